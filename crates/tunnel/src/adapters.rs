//! Trait implementations for the concrete helpers

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use outline_core::ShadowsocksSessionConfig;
use outline_process::ProcessResult;
use outline_routing::{NetworkChangeListener, RoutingDaemon};
use outline_tun2socks::GoTun2socks;

use crate::traits::{ConnectivityChecker, RoutingClient, TunnelProcess};

#[async_trait]
impl TunnelProcess for GoTun2socks {
    fn start(&self, is_udp_enabled: bool) -> ProcessResult {
        GoTun2socks::start(self, is_udp_enabled)
    }

    async fn stop(&self) -> ProcessResult {
        GoTun2socks::stop(self).await
    }

    fn enable_debug_mode(&self) {
        GoTun2socks::enable_debug_mode(self)
    }
}

#[async_trait]
impl RoutingClient for RoutingDaemon {
    async fn start(&self) -> outline_routing::Result<()> {
        RoutingDaemon::start(self).await
    }

    async fn stop(&self) -> outline_routing::Result<()> {
        RoutingDaemon::stop(self).await
    }

    fn once_disconnected(&self) -> BoxFuture<'static, ()> {
        RoutingDaemon::once_disconnected(self)
    }

    fn on_network_change(&self, listener: Option<NetworkChangeListener>) {
        RoutingDaemon::on_network_change(self, listener)
    }
}

/// Runs each probe in its own short-lived tun2socks process
pub struct ConnectivityProbe {
    binary: PathBuf,
    config: ShadowsocksSessionConfig,
    timeout: Option<Duration>,
    debug_mode: AtomicBool,
}

impl ConnectivityProbe {
    pub fn new(
        binary: impl Into<PathBuf>,
        config: ShadowsocksSessionConfig,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            binary: binary.into(),
            config,
            timeout,
            debug_mode: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ConnectivityChecker for ConnectivityProbe {
    async fn check_connectivity(&self) -> outline_tun2socks::Result<bool> {
        outline_tun2socks::check_connectivity(
            &self.binary,
            &self.config,
            self.debug_mode.load(Ordering::Relaxed),
            self.timeout,
        )
        .await
    }

    fn enable_debug_mode(&self) {
        self.debug_mode.store(true, Ordering::Relaxed);
    }
}
