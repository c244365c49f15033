use std::env;
use std::fmt;
use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub port: u16,
    pub source: SourceConfig,
    #[serde(default)]
    pub plugin: PluginConfig,
}

/// Where inventory records are read from
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub backend: SourceBackend,
    pub snapshot_path: Option<PathBuf>,
    pub netbox_url: Option<String>,
    pub netbox_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SourceBackend {
    Snapshot,
    NetBox,
}

impl fmt::Display for SourceBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceBackend::Snapshot => write!(f, "snapshot"),
            SourceBackend::NetBox => write!(f, "netbox"),
        }
    }
}

/// User-supplied plugin options, before merging with built-in defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginConfig {
    pub device_geolocation_cf: Option<String>,
    pub cpe_device_role: Option<String>,
    pub show_sites: Option<bool>,
    pub geomap_settings: Option<Map<String, Value>>,
}

fn default_timeout_secs() -> u64 {
    10
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "dev".into());

        let config = Config::builder()
            // Start with default values
            .set_default("port", 8080)?
            .set_default("source.backend", "snapshot")?
            .set_default("source.snapshot_path", "./data/snapshot.json")?
            .set_default("source.timeout_secs", 10)?

            // Add configuration from files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))

            // DEVICEMAP_PORT, DEVICEMAP_SOURCE__NETBOX_URL, ...
            .add_source(
                Environment::with_prefix("DEVICEMAP")
                    .prefix_separator("_")
                    .separator("__"),
            )

            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let config: AppConfig = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match self.source.backend {
            SourceBackend::Snapshot if self.source.snapshot_path.is_none() => Err(
                AppError::Config("Missing source.snapshot_path configuration".to_string()),
            ),
            SourceBackend::NetBox if self.source.netbox_url.is_none() => Err(AppError::Config(
                "Missing source.netbox_url configuration".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            source: SourceConfig {
                backend: SourceBackend::Snapshot,
                snapshot_path: Some(PathBuf::from("./data/snapshot.json")),
                netbox_url: None,
                netbox_token: None,
                timeout_secs: default_timeout_secs(),
            },
            plugin: PluginConfig::default(),
        }
    }
}
