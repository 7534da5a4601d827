//! Seams between the supervisor and the helpers it coordinates

use async_trait::async_trait;
use futures::future::BoxFuture;
use outline_process::ProcessResult;
use outline_routing::NetworkChangeListener;

/// The supervised tun2socks process
#[async_trait]
pub trait TunnelProcess: Send + Sync {
    /// Start forwarding in the background; does not wait for the process
    fn start(&self, is_udp_enabled: bool) -> ProcessResult;

    /// Stop the process; resolves once it is gone
    async fn stop(&self) -> ProcessResult;

    fn enable_debug_mode(&self);
}

/// The privileged routing daemon client
#[async_trait]
pub trait RoutingClient: Send + Sync {
    /// Configure routing; resolves once the daemon has acknowledged
    async fn start(&self) -> outline_routing::Result<()>;

    /// Reset routing; does not wait for the connection to close
    async fn stop(&self) -> outline_routing::Result<()>;

    /// Resolves once the routing connection has closed, for any reason
    fn once_disconnected(&self) -> BoxFuture<'static, ()>;

    fn on_network_change(&self, listener: Option<NetworkChangeListener>);
}

/// UDP support probe
#[async_trait]
pub trait ConnectivityChecker: Send + Sync {
    async fn check_connectivity(&self) -> outline_tun2socks::Result<bool>;

    fn enable_debug_mode(&self) {}
}
