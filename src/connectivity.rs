//! Cable adjacency between devices.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::models::{Cable, CableId, Device, DeviceId, Interface, InterfaceId, VlanId};

/// Index of which interfaces belong to which device and which cables land on
/// which interfaces. Built per request from repository reads.
#[derive(Debug, Default)]
pub struct Topology {
    interface_owner: HashMap<InterfaceId, DeviceId>,
    device_interfaces: HashMap<DeviceId, Vec<Interface>>,
    interface_cables: HashMap<InterfaceId, BTreeSet<CableId>>,
    cable_devices: HashMap<CableId, BTreeSet<DeviceId>>,
}

impl Topology {
    pub fn build<'a, D, C>(devices: D, cables: C) -> Self
    where
        D: IntoIterator<Item = &'a Device>,
        C: IntoIterator<Item = &'a Cable>,
    {
        let mut topology = Topology::default();

        for device in devices {
            for iface in &device.interfaces {
                topology.interface_owner.insert(iface.id, device.id);
            }
            topology
                .device_interfaces
                .insert(device.id, device.interfaces.clone());
        }

        for cable in cables {
            let mut owners = BTreeSet::new();
            let mut landed = Vec::new();
            for termination in cable.terminations() {
                let Some(iface_id) = termination.interface_id() else {
                    continue;
                };
                match topology.interface_owner.get(&iface_id) {
                    Some(owner) => {
                        owners.insert(*owner);
                        landed.push(iface_id);
                    }
                    None => debug!(
                        "Cable {} terminates on unknown interface {}, skipping termination",
                        cable.id, iface_id
                    ),
                }
            }

            if owners.is_empty() {
                debug!("Cable {} has no resolvable interface terminations, skipping", cable.id);
                continue;
            }

            for iface_id in landed {
                topology
                    .interface_cables
                    .entry(iface_id)
                    .or_default()
                    .insert(cable.id);
            }
            topology.cable_devices.insert(cable.id, owners);
        }

        topology
    }

    /// Devices sharing a cable with `device`. With `vlan` set, only the
    /// device's interfaces carrying that VLAN (tagged or untagged) count.
    pub fn connected_devices(&self, device: DeviceId, vlan: Option<VlanId>) -> BTreeSet<DeviceId> {
        self.peers(device, |iface| vlan.is_none_or(|v| iface.carries_vlan(v)))
    }

    /// Like [`Topology::connected_devices`], with an interface counting if it
    /// carries any VLAN in `vlans`.
    pub fn connected_devices_on(&self, device: DeviceId, vlans: &BTreeSet<VlanId>) -> BTreeSet<DeviceId> {
        self.peers(device, |iface| iface.carries_any_vlan(vlans))
    }

    /// Whether some interface of `a` shares a cable with an interface of `b`.
    /// A device is never connected to itself.
    pub fn are_connected(&self, a: DeviceId, b: DeviceId) -> bool {
        a != b && self.connected_devices(a, None).contains(&b)
    }

    fn peers<F>(&self, device: DeviceId, include: F) -> BTreeSet<DeviceId>
    where
        F: Fn(&Interface) -> bool,
    {
        let Some(interfaces) = self.device_interfaces.get(&device) else {
            return BTreeSet::new();
        };

        let mut peers: BTreeSet<DeviceId> = interfaces
            .iter()
            .filter(|&iface| include(iface))
            .filter_map(|iface| self.interface_cables.get(&iface.id))
            .flatten()
            .filter_map(|cable| self.cable_devices.get(cable))
            .flatten()
            .copied()
            .collect();
        peers.remove(&device);
        peers
    }
}
