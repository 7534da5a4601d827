//! Configuration types

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{default_settings_path, default_tun2socks_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub tun2socks: Tun2socksSettings,

    #[serde(default)]
    pub routing: RoutingSettings,

    #[serde(default)]
    pub connectivity: ConnectivitySettings,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            info!("Loaded settings from {:?}", path);
            settings
        } else {
            Self::default()
        };
        settings.config_path = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Where this instance was loaded from, if anywhere
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

/// tun2socks binary settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tun2socksSettings {
    /// Override for the bundled binary
    #[serde(default)]
    pub binary_path: Option<PathBuf>,

    /// Run tun2socks with `-logLevel debug` and relay its stderr
    #[serde(default)]
    pub debug: bool,
}

impl Tun2socksSettings {
    pub fn resolved_binary_path(&self) -> PathBuf {
        self.binary_path.clone().unwrap_or_else(default_tun2socks_path)
    }
}

/// Routing daemon settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSettings {
    /// Override for the platform's socket or pipe path
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Seconds to wait for the configureRouting reply; 0 waits forever
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Seconds to wait for the daemon to close after a reset; 0 waits forever
    #[serde(default = "default_teardown_timeout")]
    pub teardown_timeout_secs: u64,
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_teardown_timeout() -> u64 {
    5
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            handshake_timeout_secs: default_handshake_timeout(),
            teardown_timeout_secs: default_teardown_timeout(),
        }
    }
}

impl RoutingSettings {
    pub fn handshake_timeout(&self) -> Option<Duration> {
        secs(self.handshake_timeout_secs)
    }

    pub fn teardown_timeout(&self) -> Option<Duration> {
        secs(self.teardown_timeout_secs)
    }
}

/// UDP connectivity probe settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivitySettings {
    /// Seconds before the probe is killed; 0 waits forever
    #[serde(default = "default_connectivity_timeout")]
    pub timeout_secs: u64,
}

fn default_connectivity_timeout() -> u64 {
    10
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_connectivity_timeout(),
        }
    }
}

impl ConnectivitySettings {
    pub fn timeout(&self) -> Option<Duration> {
        secs(self.timeout_secs)
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}
