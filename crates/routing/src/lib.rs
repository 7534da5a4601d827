//! Outline Routing Daemon Client
//!
//! Client for the privileged routing daemon that points the system routing
//! table at the TUN/TAP device.
//!
//! ## Protocol
//!
//! A deliberately minimal lifecycle over one IPC connection:
//!
//! - `configureRouting` is always the first message sent, exactly once
//! - `resetRouting` is the only request that may follow, at most once
//! - in between, the daemon may push `statusChanged` events
//!
//! The connection stays open only as long as routing is configured. On Windows
//! only one client may hold the service pipe at a time.
//!
//! ## Platform-Specific IPC
//!
//! - **Windows**: Named pipe (`\\.\pipe\OutlineServicePipe`)
//! - **Linux/macOS**: Unix domain socket (`/var/run/outline_controller`)

mod client;
mod codec;
mod protocol;
mod transport;

pub use client::{NetworkChangeListener, RoutingConfig, RoutingDaemon, RoutingState};
pub use codec::{DecodeError, MessageDecoder};
pub use protocol::{
    ParameterValue, RoutingServiceAction, RoutingServiceRequest, RoutingServiceResponse,
    RoutingServiceStatusCode,
};

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Routing daemon is not running: {0}")]
    NotRunning(String),

    #[error("Routing service error: {0}")]
    Service(String),

    #[error("Routing daemon service stopped before started")]
    StoppedBeforeStarted,

    #[error("Routing daemon client already started")]
    AlreadyStarted,

    #[error("Timed out after {0:?} waiting for the routing daemon")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for RoutingError {
    fn from(e: std::io::Error) -> Self {
        RoutingError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for RoutingError {
    fn from(e: serde_json::Error) -> Self {
        RoutingError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RoutingError>;
