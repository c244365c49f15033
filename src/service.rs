//! Request-scoped orchestration behind the HTTP handlers.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::connectivity::Topology;
use crate::error::Result;
use crate::geomap::{build_map, MapConfig, MapRequest};
use crate::location::resolve_location;
use crate::models::{Device, DeviceId, DeviceRole, LatLon, Vlan, VlanGroup, VlanId};
use crate::repository::{DeviceCriteria, DeviceRepository};
use crate::settings::PluginSettings;

pub const MAP_ID: &str = "geomap";

static INTEGER_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").expect("Invalid regex pattern"));

/// A validated map filter
#[derive(Debug, Clone)]
pub struct MapFilter {
    pub vlan_group: Option<VlanGroup>,
    pub vlan: Option<Vlan>,
    pub device_roles: Vec<DeviceRole>,
    pub calculate_connections: bool,
}

impl Default for MapFilter {
    fn default() -> Self {
        Self {
            vlan_group: None,
            vlan: None,
            device_roles: Vec::new(),
            calculate_connections: true,
        }
    }
}

/// Short description of a device for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub id: DeviceId,
    pub name: String,
    pub url: String,
}

impl From<&Device> for DeviceSummary {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id,
            name: device.name.clone(),
            url: device.url(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MapOutcome {
    pub map_data: MapConfig,
    pub non_geolocated_devices: Vec<DeviceSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpeDevice {
    pub id: DeviceId,
    pub name: String,
    pub url: String,
    pub comments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpeLookup {
    pub cpe_devices: Vec<CpeDevice>,
    pub device_type: String,
}

/// The device map service: a repository plus the settings it is read with
pub struct DeviceMap {
    repository: Arc<dyn DeviceRepository>,
    settings: PluginSettings,
}

impl DeviceMap {
    pub fn new(repository: Arc<dyn DeviceRepository>, settings: PluginSettings) -> Self {
        Self {
            repository,
            settings,
        }
    }

    pub fn repository(&self) -> &dyn DeviceRepository {
        self.repository.as_ref()
    }

    /// VLANs the filter narrows devices and connections to; `None` means no
    /// VLAN restriction. A VLAN outside the selected group gives an empty set.
    pub async fn vlan_scope(&self, filter: &MapFilter) -> Result<Option<BTreeSet<VlanId>>> {
        let group_vlans = match &filter.vlan_group {
            Some(group) => Some(
                self.repository
                    .find_vlans_in_group(group.id)
                    .await?
                    .into_iter()
                    .map(|v| v.id)
                    .collect::<BTreeSet<_>>(),
            ),
            None => None,
        };

        Ok(match (&filter.vlan, group_vlans) {
            (Some(vlan), Some(group_vlans)) => Some(
                group_vlans
                    .into_iter()
                    .filter(|id| *id == vlan.id)
                    .collect(),
            ),
            (Some(vlan), None) => Some(BTreeSet::from([vlan.id])),
            (None, group_vlans) => group_vlans,
        })
    }

    #[instrument(name = "map_page", skip_all, fields(
        vlan_group = ?filter.vlan_group.as_ref().map(|g| g.id),
        vlan = ?filter.vlan.as_ref().map(|v| v.id),
        roles = filter.device_roles.len(),
    ))]
    pub async fn map_page(&self, filter: &MapFilter) -> Result<MapOutcome> {
        let scope = self.vlan_scope(filter).await?;

        let criteria = DeviceCriteria {
            vlans: scope.clone(),
            roles: (!filter.device_roles.is_empty())
                .then(|| filter.device_roles.iter().map(|r| r.id).collect()),
            with_interfaces: true,
        };

        let mut devices = self.repository.find_devices(&criteria).await?;
        devices.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        let mut located: Vec<(&Device, Option<LatLon>)> = Vec::new();
        let mut non_geolocated = Vec::new();
        for device in &devices {
            match resolve_location(device, &self.settings.device_geolocation_cf) {
                Some(position) => located.push((device, Some(position))),
                None => non_geolocated.push(DeviceSummary::from(device)),
            }
        }
        info!(
            "Map filter matched {} devices, {} without location",
            devices.len(),
            non_geolocated.len()
        );

        // Edges only join shown devices, so indexing the shown set is enough
        let topology = if filter.calculate_connections {
            let cables = self.repository.find_cables().await?;
            Topology::build(&devices, &cables)
        } else {
            Topology::default()
        };

        let sites = if self.settings.show_sites {
            self.repository.find_sites_with_location().await?
        } else {
            Vec::new()
        };

        let request = MapRequest {
            map_id: MAP_ID,
            devices: &located,
            sites: &sites,
            calculate_connections: filter.calculate_connections,
            vlans: scope.as_ref(),
            vlan: filter.vlan.as_ref().map(|v| v.id),
        };
        let map_data = build_map(&self.settings, &topology, request);

        Ok(MapOutcome {
            map_data,
            non_geolocated_devices: non_geolocated,
        })
    }

    /// CPE devices cabled to `device`, ordered by the numbers in their comments
    #[instrument(name = "connected_cpe", skip(self, device), fields(device = device.id))]
    pub async fn connected_cpe(&self, device: &Device, vlan: Option<VlanId>) -> Result<CpeLookup> {
        let all = self.repository.find_devices(&DeviceCriteria::default()).await?;
        let cables = self.repository.find_cables().await?;
        let topology = Topology::build(&all, &cables);

        let peers = topology.connected_devices(device.id, vlan);
        debug!("Device {} has {} connected devices", device.id, peers.len());

        let mut cpe_devices: Vec<CpeDevice> = all
            .iter()
            .filter(|d| peers.contains(&d.id))
            .filter(|d| d.role_name() == Some(self.settings.cpe_device_role.as_str()))
            .map(|d| CpeDevice {
                id: d.id,
                name: d.name.clone(),
                url: d.url(),
                comments: d.comments.clone(),
            })
            .collect();
        sort_by_comment_numbers(&mut cpe_devices);

        Ok(CpeLookup {
            cpe_devices,
            device_type: device.device_type_label(),
        })
    }
}

/// Magnitude of a run of digits; compares numerically without overflow
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Number {
    len: usize,
    digits: String,
}

/// The integers embedded in `text`, in order
fn numeric_key(text: &str) -> Vec<Number> {
    INTEGER_RUN
        .find_iter(text)
        .map(|m| {
            let trimmed = m.as_str().trim_start_matches('0');
            Number {
                len: trimmed.len(),
                digits: trimmed.to_string(),
            }
        })
        .collect()
}

/// Natural order: `"Port 2"` before `"Port 10"`. Ties keep id order.
pub fn sort_by_comment_numbers(devices: &mut [CpeDevice]) {
    devices.sort_by(|a, b| match numeric_key(&a.comments).cmp(&numeric_key(&b.comments)) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
}
