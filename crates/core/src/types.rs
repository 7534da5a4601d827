//! Connectivity status reported by the routing daemon

use std::fmt;

use serde::{Deserialize, Serialize};

/// System-level connectivity as seen by the routing daemon.
///
/// This is distinct from the GUI's own per-server connection state. On the
/// wire the daemon sends the integer discriminant; upper-case names are
/// accepted as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "TunnelStatusRepr", into = "u8")]
pub enum TunnelStatus {
    Connected,
    Disconnected,
    Reconnecting,
    Disconnecting,
}

impl TunnelStatus {
    /// Wire discriminant used by the routing daemons
    pub fn code(&self) -> u8 {
        match self {
            Self::Connected => 0,
            Self::Disconnected => 1,
            Self::Reconnecting => 2,
            Self::Disconnecting => 3,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Connected),
            1 => Some(Self::Disconnected),
            2 => Some(Self::Reconnecting),
            3 => Some(Self::Disconnecting),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "CONNECTED" => Some(Self::Connected),
            "DISCONNECTED" => Some(Self::Disconnected),
            "RECONNECTING" => Some(Self::Reconnecting),
            "DISCONNECTING" => Some(Self::Disconnecting),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::Disconnecting => "DISCONNECTING",
        }
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<TunnelStatus> for u8 {
    fn from(status: TunnelStatus) -> Self {
        status.code()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TunnelStatusRepr {
    Code(u64),
    Name(String),
}

impl TryFrom<TunnelStatusRepr> for TunnelStatus {
    type Error = String;

    fn try_from(repr: TunnelStatusRepr) -> Result<Self, Self::Error> {
        match repr {
            TunnelStatusRepr::Code(code) => {
                Self::from_code(code).ok_or_else(|| format!("unknown tunnel status code {}", code))
            }
            TunnelStatusRepr::Name(name) => {
                Self::from_name(&name).ok_or_else(|| format!("unknown tunnel status {:?}", name))
            }
        }
    }
}
