//! Read-only access to inventory records.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AppConfig, SourceBackend};
use crate::error::{AppError, Result};
use crate::models::{Cable, Device, DeviceId, DeviceRole, RoleId, Site, Vlan, VlanGroup, VlanGroupId, VlanId};

mod memory;
mod netbox;

pub use memory::{InMemoryRepository, Snapshot};
pub use netbox::NetBoxRepository;

/// Which devices [`DeviceRepository::find_devices`] returns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceCriteria {
    /// Only devices with an interface carrying one of these VLANs
    pub vlans: Option<BTreeSet<VlanId>>,
    /// Only devices with one of these roles
    pub roles: Option<BTreeSet<RoleId>>,
    /// Only devices with at least one interface
    pub with_interfaces: bool,
}

impl DeviceCriteria {
    pub fn matches(&self, device: &Device) -> bool {
        let vlan_ok = self
            .vlans
            .as_ref()
            .is_none_or(|vlans| device.carries_any_vlan(vlans));
        let role_ok = self.roles.as_ref().is_none_or(|roles| {
            device
                .role
                .as_ref()
                .is_some_and(|role| roles.contains(&role.id))
        });
        let interfaces_ok = !self.with_interfaces || !device.interfaces.is_empty();
        vlan_ok && role_ok && interfaces_ok
    }
}

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn find_devices(&self, criteria: &DeviceCriteria) -> Result<Vec<Device>>;

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>>;

    async fn find_sites_with_location(&self) -> Result<Vec<Site>>;

    async fn find_cables(&self) -> Result<Vec<Cable>>;

    async fn get_vlan(&self, id: VlanId) -> Result<Option<Vlan>>;

    async fn get_vlan_group(&self, id: VlanGroupId) -> Result<Option<VlanGroup>>;

    async fn find_vlans_in_group(&self, group: VlanGroupId) -> Result<Vec<Vlan>>;

    async fn find_device_roles(&self, ids: &[RoleId]) -> Result<Vec<DeviceRole>>;
}

/// Open the repository selected by `config.source`
pub async fn open(config: &AppConfig) -> Result<Arc<dyn DeviceRepository>> {
    match config.source.backend {
        SourceBackend::Snapshot => {
            let path = config
                .source
                .snapshot_path
                .clone()
                .ok_or_else(|| AppError::Config("Missing snapshot_path configuration".to_string()))?;
            let repo = InMemoryRepository::load(&path).await?;
            Ok(Arc::new(repo))
        }
        SourceBackend::NetBox => {
            let url = config
                .source
                .netbox_url
                .clone()
                .ok_or_else(|| AppError::Config("Missing netbox_url configuration".to_string()))?;
            let repo = NetBoxRepository::new(
                url,
                config.source.netbox_token.clone(),
                config.source.timeout_secs,
            )?;
            Ok(Arc::new(repo))
        }
    }
}
