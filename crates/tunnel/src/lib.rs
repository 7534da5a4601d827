//! Outline VPN Tunnel
//!
//! Coordinates tun2socks and the routing daemon into one VPN session. The
//! two helpers never talk to each other: [`VpnTunnel`] is the only party that
//! knows about both, through the narrow traits in [`traits`].
//!
//! ## Lifecycle
//!
//! ```text
//! Idle -> Connecting -> Connected <-> Reconnecting -> Disconnecting -> Disconnected
//! ```

mod adapters;
mod power;
mod service;
mod supervisor;
pub mod traits;

pub use adapters::ConnectivityProbe;
pub use power::{PowerEvent, PowerMonitor};
pub use service::{ServiceConfig, StartRequest, StatusListener, VpnService};
pub use supervisor::{TunnelListener, TunnelOptions, TunnelState, VpnTunnel};
pub use traits::{ConnectivityChecker, RoutingClient, TunnelProcess};

use outline_core::NativeError;
use outline_process::ProcessError;
use outline_routing::RoutingError;
use outline_tun2socks::ConnectivityError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunnelError {
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("{0}")]
    Connectivity(#[from] ConnectivityError),

    #[error("tun2socks error: {0}")]
    Process(#[from] ProcessError),

    #[error("Tunnel already connected")]
    AlreadyConnected,

    #[error("Failed to resolve {0}")]
    Unresolvable(String),

    #[error("Illegal server configuration: {0}")]
    IllegalServerConfiguration(String),
}

impl TunnelError {
    /// The platform error to surface to the user
    pub fn native_error(&self) -> NativeError {
        match self {
            Self::Routing(RoutingError::Service(_)) => NativeError::UnexpectedPluginError,
            Self::Routing(_) => NativeError::SystemConfigurationException,
            Self::Connectivity(e) => e.native_error(),
            Self::Process(_) => NativeError::VpnStartFailure,
            Self::AlreadyConnected => NativeError::UnexpectedPluginError,
            Self::Unresolvable(_) => NativeError::ServerUnreachable,
            Self::IllegalServerConfiguration(_) => NativeError::IllegalServerConfiguration,
        }
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;
