//! Outline Settings
//!
//! Local configuration for the Outline control plane: where the tun2socks
//! binary lives, which routing daemon endpoint to talk to and the timeouts
//! bounding each step of a connection.
//!
//! ## Usage
//!
//! ```no_run
//! use outline_settings::Settings;
//!
//! let mut settings = Settings::load_or_default()?;
//! settings.tun2socks.debug = true;
//! settings.save()?;
//! # Ok::<(), outline_settings::SettingsError>(())
//! ```

mod config;

pub use config::{ConnectivitySettings, RoutingSettings, Settings, Tun2socksSettings};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Per-user config directory for Outline
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("outline")
}

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}

/// File name of the bundled tun2socks binary
pub fn tun2socks_binary_name() -> &'static str {
    if cfg!(windows) {
        "tun2socks.exe"
    } else if cfg!(target_os = "linux") {
        "outline-go-tun2socks"
    } else {
        "tun2socks"
    }
}

/// tun2socks shipped next to the running executable
pub fn default_tun2socks_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(tun2socks_binary_name())
}
