use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::bridge::{AnimationSettings, BridgeSettings, ProbeSettings};
use crate::mqtt::MqttConfig;

const CONFIG_DIR: &str = ".config/lightstrip-controller";
const CONFIG_FILE: &str = "config.toml";

/// Everything the binary reads at startup. Missing keys take their defaults.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub seed_demo_devices: bool,
    pub enable_performance_probe: bool,
    pub probe: ProbeSettings,
    pub animation: AnimationSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            seed_demo_devices: true,
            enable_performance_probe: true,
            probe: ProbeSettings::default(),
            animation: AnimationSettings::default(),
        }
    }
}

impl AppConfig {
    /// `~/.config/lightstrip-controller/config.toml`
    pub fn default_path() -> PathBuf {
        let mut path = get_home_dir();
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads the config from its default location, writing defaults first if
    /// the file does not exist yet.
    pub async fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&Self::default_path()).await
    }

    pub async fn load_or_create_at(path: &Path) -> Result<Self> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?;

        if exists {
            Self::load_from(path).await
        } else {
            info!("No config at {}, writing defaults", path.display());
            let config = Self::default();
            config.save_to(path).await?;
            Ok(config)
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file: {}", e))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| eyre!("Failed to parse config file: {}", e))?;
        debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;
        Ok(())
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            connect_timeout: self.mqtt.connect_timeout(),
            probe_enabled: self.enable_performance_probe,
            probe: self.probe.clone(),
            animation: self.animation.clone(),
            ..BridgeSettings::default()
        }
    }
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}
