//! Outline tun2socks Controller
//!
//! Drives the external `outline-go-tun2socks` binary, which bridges packets
//! from the TUN/TAP device to the Shadowsocks proxy.
//!
//! ## Modes
//!
//! - **Tunnel**: long-running, relaunched automatically when it drops out
//!   after announcing itself with the [`RUNNING_BANNER`]
//! - **Connectivity check**: one-shot probe whose exit code tells whether
//!   the proxy relays UDP

mod args;
mod connectivity;
mod controller;
#[cfg(all(test, unix))]
mod test_support;

pub use args::{
    connectivity_args, tunnel_args, DNS_RESOLVERS, RUNNING_BANNER, TUN_DEVICE_IP,
    VIRTUAL_ROUTER_IP, VIRTUAL_ROUTER_NETMASK,
};
pub use connectivity::{check_connectivity, interpret_probe_outcome};
pub use controller::{next_action, GoTun2socks, LoopAction, TunnelProcessState};

use std::time::Duration;

use outline_core::NativeError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    #[error("Connectivity check failed: {0}")]
    Platform(NativeError),

    #[error("Connectivity check failed unexpectedly: {0}")]
    Unexpected(String),

    #[error("Connectivity check timed out after {0:?}")]
    Timeout(Duration),
}

impl ConnectivityError {
    /// The platform error to surface to the user
    pub fn native_error(&self) -> NativeError {
        match self {
            Self::Platform(e) => e.clone(),
            Self::Unexpected(_) | Self::Timeout(_) => NativeError::UnexpectedPluginError,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnectivityError>;
