use serde_json::{Map, Value, json};

use crate::config::PluginConfig;

pub const DEFAULT_GEOLOCATION_CF: &str = "geolocation";
pub const DEFAULT_CPE_ROLE: &str = "CPE";

/// Effective plugin settings, built once at startup and shared read-only
#[derive(Debug, Clone)]
pub struct PluginSettings {
    /// Custom field holding a `"lat, lon"` string
    pub device_geolocation_cf: String,
    /// Role name identifying customer premises equipment
    pub cpe_device_role: String,
    pub show_sites: bool,
    /// Display options handed to the map widget verbatim
    pub geomap_settings: Map<String, Value>,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            device_geolocation_cf: DEFAULT_GEOLOCATION_CF.to_string(),
            cpe_device_role: DEFAULT_CPE_ROLE.to_string(),
            show_sites: false,
            geomap_settings: default_geomap_settings(),
        }
    }
}

impl PluginSettings {
    pub fn from_config(config: &PluginConfig) -> Self {
        let defaults = Self::default();
        Self {
            device_geolocation_cf: config
                .device_geolocation_cf
                .clone()
                .unwrap_or(defaults.device_geolocation_cf),
            cpe_device_role: config
                .cpe_device_role
                .clone()
                .unwrap_or(defaults.cpe_device_role),
            show_sites: config.show_sites.unwrap_or(defaults.show_sites),
            geomap_settings: merge_shallow(
                defaults.geomap_settings,
                config.geomap_settings.clone().unwrap_or_default(),
            ),
        }
    }
}

pub fn default_geomap_settings() -> Map<String, Value> {
    let value = json!({
        "crs": "EPSG3857",
        "tiles": {
            "url_template": "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png",
            "options": {
                "attribution": "&copy; <a href=\"https://www.openstreetmap.org/copyright\">OpenStreetMap</a> contributors"
            }
        }
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Top-level keys of `overrides` replace those of `base` wholesale.
pub fn merge_shallow(mut base: Map<String, Value>, overrides: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overrides {
        base.insert(key, value);
    }
    base
}
