use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{DeviceCriteria, DeviceRepository};
use crate::error::Result;
use crate::models::{
    Cable, Device, DeviceId, DeviceRole, RoleId, Site, SiteId, Vlan, VlanGroup, VlanGroupId, VlanId,
};

/// A point-in-time export of the inventory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub sites: Vec<Site>,
    #[serde(default)]
    pub cables: Vec<Cable>,
    #[serde(default)]
    pub vlans: Vec<Vlan>,
    #[serde(default)]
    pub vlan_groups: Vec<VlanGroup>,
    #[serde(default)]
    pub device_roles: Vec<DeviceRole>,
}

/// Repository serving a [`Snapshot`] held in memory
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    devices: BTreeMap<DeviceId, Device>,
    sites: BTreeMap<SiteId, Site>,
    cables: Vec<Cable>,
    vlans: BTreeMap<VlanId, Vlan>,
    vlan_groups: BTreeMap<VlanGroupId, VlanGroup>,
    roles: BTreeMap<RoleId, DeviceRole>,
}

impl InMemoryRepository {
    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&data)?;
        info!(
            "Loaded snapshot {}: {} devices, {} sites, {} cables",
            path.display(),
            snapshot.devices.len(),
            snapshot.sites.len(),
            snapshot.cables.len()
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Index the snapshot. Device sites given by id only are completed from
    /// the snapshot's site list.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let sites: BTreeMap<SiteId, Site> = snapshot.sites.into_iter().map(|s| (s.id, s)).collect();

        let mut roles: BTreeMap<RoleId, DeviceRole> = snapshot
            .device_roles
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let devices = snapshot
            .devices
            .into_iter()
            .map(|mut device| {
                if let Some(site) = device.site.as_mut() {
                    if let Some(full) = sites.get(&site.id) {
                        *site = full.clone();
                    }
                }
                if let Some(role) = &device.role {
                    roles.entry(role.id).or_insert_with(|| role.clone());
                }
                (device.id, device)
            })
            .collect();

        Self {
            devices,
            sites,
            cables: snapshot.cables,
            vlans: snapshot.vlans.into_iter().map(|v| (v.id, v)).collect(),
            vlan_groups: snapshot.vlan_groups.into_iter().map(|g| (g.id, g)).collect(),
            roles,
        }
    }
}

impl From<Snapshot> for InMemoryRepository {
    fn from(snapshot: Snapshot) -> Self {
        Self::from_snapshot(snapshot)
    }
}

#[async_trait]
impl DeviceRepository for InMemoryRepository {
    async fn find_devices(&self, criteria: &DeviceCriteria) -> Result<Vec<Device>> {
        Ok(self
            .devices
            .values()
            .filter(|d| criteria.matches(d))
            .cloned()
            .collect())
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>> {
        Ok(self.devices.get(&id).cloned())
    }

    async fn find_sites_with_location(&self) -> Result<Vec<Site>> {
        Ok(self
            .sites
            .values()
            .filter(|s| s.location().is_some())
            .cloned()
            .collect())
    }

    async fn find_cables(&self) -> Result<Vec<Cable>> {
        Ok(self.cables.clone())
    }

    async fn get_vlan(&self, id: VlanId) -> Result<Option<Vlan>> {
        Ok(self.vlans.get(&id).cloned())
    }

    async fn get_vlan_group(&self, id: VlanGroupId) -> Result<Option<VlanGroup>> {
        Ok(self.vlan_groups.get(&id).cloned())
    }

    async fn find_vlans_in_group(&self, group: VlanGroupId) -> Result<Vec<Vlan>> {
        Ok(self
            .vlans
            .values()
            .filter(|v| v.group == Some(group))
            .cloned()
            .collect())
    }

    async fn find_device_roles(&self, ids: &[RoleId]) -> Result<Vec<DeviceRole>> {
        Ok(ids.iter().filter_map(|id| self.roles.get(id)).cloned().collect())
    }
}
