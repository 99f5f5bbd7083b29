use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::discovery::DiscoverySettings;
use crate::entities::DeviceClass;
use crate::mqtt::BrokerSettings;
use crate::topics::TopicScheme;

const CONFIG_DIR: &str = "galaxy-bridge";
const CONFIG_FILE: &str = "config.toml";
pub const CONFIG_ENV: &str = "GALAXY_BRIDGE_CONFIG";

/// Bridge configuration, one file per gateway
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GalaxyConfig {
    /// Prefix of every entity's unique id
    pub entry_id: String,
    /// Identifier of the vmod gateway, `selfmon/vmod.<vmodid>`
    pub vmodid: String,
    pub broker: BrokerSettings,
    pub discovery: DiscoveryConfig,
    pub options: EntityOptions,
}

impl Default for GalaxyConfig {
    fn default() -> Self {
        Self {
            entry_id: "galaxy".to_string(),
            vmodid: String::new(),
            broker: BrokerSettings::default(),
            discovery: DiscoveryConfig::default(),
            options: EntityOptions::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub connect_timeout_secs: u64,
    pub window_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            window_secs: 10,
        }
    }
}

/// Explicit entity lists. An empty list means "discover".
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EntityOptions {
    pub physical_rio_zones: Vec<ZoneConfig>,
    pub physical_rio_outputs: Vec<OutputConfig>,
    pub virtual_rio_outputs: Vec<OutputConfig>,
    pub virtual_rio_zones: Vec<OutputConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ZoneConfig {
    pub number: u32,
    pub name: Option<String>,
    pub zone_type: Option<String>,
}

impl ZoneConfig {
    pub fn device_class(&self) -> DeviceClass {
        self.zone_type
            .as_deref()
            .map(DeviceClass::from_zone_type)
            .unwrap_or(DeviceClass::Door)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct OutputConfig {
    pub number: u32,
    pub name: Option<String>,
}

impl GalaxyConfig {
    pub fn topics(&self) -> TopicScheme {
        TopicScheme::new(&self.vmodid)
    }

    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            connect_timeout: Duration::from_secs(self.discovery.connect_timeout_secs),
            window: Duration::from_secs(self.discovery.window_secs),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker.host.trim().is_empty() {
            return Err(eyre!("Invalid broker host: host must not be empty"));
        }
        if self.vmodid.trim().is_empty() {
            return Err(eyre!("vmodid must be set"));
        }
        Ok(())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        debug!("Loading config from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        Self::from_toml(&content)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file {}: {}", path.display(), e))?;
        info!("Saved config to {}", path.display());
        Ok(())
    }
}

/// `$GALAXY_BRIDGE_CONFIG`, else `<config dir>/galaxy-bridge/config.toml`
pub fn config_path() -> PathBuf {
    if let Some(path) = env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let mut path = dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

/// Writes a default file when none exists, then loads it.
pub async fn ensure_default_config(path: &Path) -> Result<GalaxyConfig> {
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?;
    if !exists {
        warn!("No config at {}, writing defaults", path.display());
        GalaxyConfig::default().save(path).await?;
    }
    GalaxyConfig::load(path).await
}
