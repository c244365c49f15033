use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

pub type DeviceId = u64;
pub type SiteId = u64;
pub type InterfaceId = u64;
pub type CableId = u64;
pub type VlanId = u64;
pub type VlanGroupId = u64;
pub type RoleId = u64;

/// A `(latitude, longitude)` pair in decimal degrees
pub type LatLon = (f64, f64);

/// Object type of a cable termination that resolves to a device interface
pub const INTERFACE_TERMINATION: &str = "dcim.interface";

/// A network device as stored in the inventory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<DeviceRole>,
    #[serde(default)]
    pub site: Option<Site>,
    #[serde(default)]
    pub device_type: Option<DeviceType>,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    /// Custom field bag, keyed by custom field name
    #[serde(default)]
    pub custom_fields: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub comments: String,
}

impl Device {
    pub fn url(&self) -> String {
        format!("/dcim/devices/{}/", self.id)
    }

    pub fn role_name(&self) -> Option<&str> {
        self.role.as_ref().map(|r| r.name.as_str())
    }

    /// Whether any interface carries one of the given VLANs
    pub fn carries_any_vlan(&self, vlans: &BTreeSet<VlanId>) -> bool {
        self.interfaces.iter().any(|iface| iface.carries_any_vlan(vlans))
    }

    /// `"<manufacturer> <model>"`, with `Unknown` standing in for missing parts
    pub fn device_type_label(&self) -> String {
        let manufacturer = self
            .device_type
            .as_ref()
            .and_then(|t| t.manufacturer.as_ref())
            .map(|m| m.name.as_str())
            .unwrap_or("Unknown");
        let model = self
            .device_type
            .as_ref()
            .map(|t| t.model.as_str())
            .filter(|m| !m.is_empty())
            .unwrap_or("Unknown");
        format!("{} {}", manufacturer, model)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRole {
    pub id: RoleId,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceType {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub manufacturer: Option<Manufacturer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manufacturer {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl Site {
    pub fn url(&self) -> String {
        format!("/dcim/sites/{}/", self.id)
    }

    pub fn location(&self) -> Option<LatLon> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Interface {
    pub id: InterfaceId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub untagged_vlan: Option<VlanId>,
    #[serde(default)]
    pub tagged_vlans: Vec<VlanId>,
}

impl Interface {
    pub fn carries_vlan(&self, vlan: VlanId) -> bool {
        self.untagged_vlan == Some(vlan) || self.tagged_vlans.contains(&vlan)
    }

    pub fn carries_any_vlan(&self, vlans: &BTreeSet<VlanId>) -> bool {
        vlans.iter().any(|v| self.carries_vlan(*v))
    }
}

/// One end of a cable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CableTermination {
    pub object_type: String,
    pub object_id: u64,
}

impl CableTermination {
    pub fn interface(id: InterfaceId) -> Self {
        Self {
            object_type: INTERFACE_TERMINATION.to_string(),
            object_id: id,
        }
    }

    /// The interface this termination lands on, if it is an interface termination
    pub fn interface_id(&self) -> Option<InterfaceId> {
        (self.object_type == INTERFACE_TERMINATION).then_some(self.object_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cable {
    pub id: CableId,
    #[serde(default)]
    pub a_terminations: Vec<CableTermination>,
    #[serde(default)]
    pub b_terminations: Vec<CableTermination>,
}

impl Cable {
    /// Convenience constructor for a point-to-point interface cable
    pub fn between(id: CableId, a: InterfaceId, b: InterfaceId) -> Self {
        Self {
            id,
            a_terminations: vec![CableTermination::interface(a)],
            b_terminations: vec![CableTermination::interface(b)],
        }
    }

    pub fn terminations(&self) -> impl Iterator<Item = &CableTermination> {
        self.a_terminations.iter().chain(self.b_terminations.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vlan {
    pub id: VlanId,
    #[serde(default)]
    pub vid: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub group: Option<VlanGroupId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanGroup {
    pub id: VlanGroupId,
    #[serde(default)]
    pub name: String,
}
