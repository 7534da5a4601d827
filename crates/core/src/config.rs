//! Proxy session configuration

use serde::{Deserialize, Serialize};

/// Shadowsocks proxy credentials for one tunnel session.
///
/// Owned by the caller and handed by value to the components that need it;
/// nothing mutates it once a session has been built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowsocksSessionConfig {
    pub host: String,
    pub port: u16,
    /// Cipher name, e.g. `chacha20-ietf-poly1305`
    pub method: String,
    pub password: String,
    /// Optional salt prefix sent at the start of each connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl ShadowsocksSessionConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        method: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            method: method.into(),
            password: password.into(),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}
