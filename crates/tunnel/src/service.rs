//! Front-end facing VPN service

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use outline_core::{Platform, ShadowsocksSessionConfig, TunnelStatus};
use outline_routing::{RoutingConfig, RoutingDaemon};
use outline_tun2socks::GoTun2socks;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::adapters::ConnectivityProbe;
use crate::power::PowerMonitor;
use crate::supervisor::{TunnelOptions, TunnelState, VpnTunnel};
use crate::{Result, TunnelError};

const DNS_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Callback for tunnel status changes, keyed by tunnel id
pub type StatusListener = Arc<dyn Fn(&str, TunnelStatus) + Send + Sync>;

/// Request to connect to one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub config: ShadowsocksSessionConfig,
}

/// How the service builds tunnels
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub platform: Platform,
    pub tun2socks_path: PathBuf,
    pub debug_mode: bool,
    pub handshake_timeout: Option<Duration>,
    pub teardown_timeout: Option<Duration>,
    pub connectivity_timeout: Option<Duration>,
    /// Suspend/resume source, used only where the platform supports it
    pub power_monitor: Option<PowerMonitor>,
}

impl ServiceConfig {
    pub fn new(platform: Platform, tun2socks_path: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            tun2socks_path: tun2socks_path.into(),
            debug_mode: false,
            handshake_timeout: Some(Duration::from_secs(10)),
            teardown_timeout: Some(Duration::from_secs(5)),
            connectivity_timeout: Some(Duration::from_secs(10)),
            power_monitor: None,
        }
    }
}

#[derive(Clone)]
struct ActiveTunnel {
    id: String,
    tunnel: Arc<VpnTunnel>,
}

type Slot<T> = Arc<Mutex<Option<T>>>;

/// Runs at most one tunnel at a time on behalf of the front-end
pub struct VpnService {
    config: ServiceConfig,
    /// Serializes starts. Stops go straight to the current tunnel.
    ops: tokio::sync::Mutex<()>,
    current: Slot<ActiveTunnel>,
    listener: Slot<StatusListener>,
}

impl VpnService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            ops: tokio::sync::Mutex::new(()),
            current: Arc::new(Mutex::new(None)),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Register (or clear) the status listener. Last writer wins.
    pub fn on_status_change(&self, listener: Option<StatusListener>) {
        *self.listener.lock() = listener;
    }

    /// Whether the tunnel `id` is up
    pub fn is_running(&self, id: &str) -> bool {
        self.current.lock().as_ref().is_some_and(|active| {
            active.id == id
                && !matches!(
                    active.tunnel.state(),
                    TunnelState::Disconnecting | TunnelState::Disconnected
                )
        })
    }

    /// Connect to the server in `request`, replacing any current tunnel.
    ///
    /// Auto-connect skips the connectivity probe: if the key was revoked or
    /// the network is not ready yet, the tunnel stays up so traffic does
    /// not leak.
    pub async fn start(&self, request: StartRequest, is_auto_connect: bool) -> Result<()> {
        let _ops = self.ops.lock().await;
        debug!("Start requested for {}", request.id);

        let previous = self.current.lock().clone();
        if let Some(previous) = previous {
            info!(
                "Disconnecting from {} before connecting to {}",
                previous.id, request.id
            );
            previous.tunnel.disconnect().await;
            clear_if_current(&self.current, &previous.tunnel);
        }

        // Routes are installed per proxy address, so this needs an IP.
        let proxy_ip = resolve_proxy_ip(&request.config).await?;
        let tunnel = Arc::new(self.build_tunnel(&request.config, proxy_ip, is_auto_connect));
        if self.config.debug_mode {
            tunnel.enable_debug_mode();
        }

        let id = request.id;
        *self.current.lock() = Some(ActiveTunnel {
            id: id.clone(),
            tunnel: tunnel.clone(),
        });
        self.watch_disconnect(id.clone(), tunnel.clone());

        tunnel.on_reconnecting(Some({
            let listener = self.listener.clone();
            let id = id.clone();
            Arc::new(move || {
                info!("Reconnecting to {}", id);
                emit(&listener, &id, TunnelStatus::Reconnecting);
            })
        }));
        tunnel.on_reconnected(Some({
            let listener = self.listener.clone();
            let id = id.clone();
            Arc::new(move || {
                info!("Reconnected to {}", id);
                emit(&listener, &id, TunnelStatus::Connected);
            })
        }));

        match tunnel.connect(!is_auto_connect).await {
            Ok(()) => {
                info!("Connected to {}", id);
                emit(&self.listener, &id, TunnelStatus::Connected);
                Ok(())
            }
            Err(e) => {
                if e.native_error().is_red_flag() {
                    error!("Failed to connect to {}: {}", id, e);
                } else {
                    warn!("Failed to connect to {}: {}", id, e);
                }
                tunnel.disconnect().await;
                clear_if_current(&self.current, &tunnel);
                Err(e)
            }
        }
    }

    /// Disconnect the current tunnel if it is `id`, or whatever is running
    /// when `id` is `None`. Resolves once it is fully down.
    ///
    /// A start still in its handshake is cancelled and fails.
    pub async fn stop(&self, id: Option<&str>) {
        let active = self.current.lock().clone();
        let Some(active) = active else {
            return;
        };
        if let Some(id) = id.filter(|id| *id != active.id) {
            debug!("Not stopping {}: {} is the current tunnel", id, active.id);
            return;
        }

        active.tunnel.disconnect().await;
        clear_if_current(&self.current, &active.tunnel);
    }

    fn build_tunnel(
        &self,
        config: &ShadowsocksSessionConfig,
        proxy_ip: IpAddr,
        is_auto_connect: bool,
    ) -> VpnTunnel {
        let platform = &self.config.platform;
        let routing = RoutingDaemon::new(
            RoutingConfig::for_platform(platform, proxy_ip.to_string(), is_auto_connect)
                .with_handshake_timeout(self.config.handshake_timeout),
        );
        let tun2socks = GoTun2socks::new(&self.config.tun2socks_path, config.clone(), platform);
        let probe = ConnectivityProbe::new(
            &self.config.tun2socks_path,
            config.clone(),
            self.config.connectivity_timeout,
        );
        let power_monitor = if platform.supports_power_events {
            self.config.power_monitor.clone()
        } else {
            None
        };

        VpnTunnel::new(
            Arc::new(tun2socks),
            Arc::new(routing),
            Arc::new(probe),
            TunnelOptions {
                teardown_timeout: self.config.teardown_timeout,
                power_monitor,
            },
        )
    }

    fn watch_disconnect(&self, id: String, tunnel: Arc<VpnTunnel>) {
        let current = self.current.clone();
        let listener = self.listener.clone();
        tokio::spawn(async move {
            tunnel.once_disconnected().await;
            info!("Disconnected from {}", id);
            clear_if_current(&current, &tunnel);
            emit(&listener, &id, TunnelStatus::Disconnected);
        });
    }
}

fn clear_if_current(current: &Mutex<Option<ActiveTunnel>>, tunnel: &Arc<VpnTunnel>) {
    let mut current = current.lock();
    if current
        .as_ref()
        .is_some_and(|active| Arc::ptr_eq(&active.tunnel, tunnel))
    {
        *current = None;
    }
}

fn emit(listener: &Mutex<Option<StatusListener>>, id: &str, status: TunnelStatus) {
    let listener = listener.lock().clone();
    if let Some(listener) = listener {
        listener(id, status);
    }
}

/// Resolve the proxy host to an IPv4 address, or any address if it has none
async fn resolve_proxy_ip(config: &ShadowsocksSessionConfig) -> Result<IpAddr> {
    if config.host.is_empty() {
        return Err(TunnelError::IllegalServerConfiguration(
            "host is missing".to_string(),
        ));
    }
    if let Ok(ip) = config.host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let lookup = tokio::net::lookup_host((config.host.as_str(), config.port));
    let addrs: Vec<IpAddr> = match tokio::time::timeout(DNS_LOOKUP_TIMEOUT, lookup).await {
        Ok(Ok(addrs)) => addrs.map(|addr| addr.ip()).collect(),
        Ok(Err(e)) => {
            return Err(TunnelError::Unresolvable(format!("{}: {}", config.host, e)));
        }
        Err(_) => {
            return Err(TunnelError::Unresolvable(format!(
                "{}: DNS lookup timed out",
                config.host
            )));
        }
    };

    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| TunnelError::Unresolvable(config.host.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use outline_core::OsFamily;

    fn service() -> VpnService {
        let platform = Platform::for_os(OsFamily::Linux);
        VpnService::new(ServiceConfig::new(platform, "/nonexistent/tun2socks"))
    }

    fn request(host: &str) -> StartRequest {
        StartRequest {
            id: "server-1".to_string(),
            name: "My server".to_string(),
            config: ShadowsocksSessionConfig::new(host, 8388, "aes-256-gcm", "pw"),
        }
    }

    #[test]
    fn test_start_request_json() {
        let json = r#"{"id":"abc","config":{"host":"203.0.113.7","port":443,"method":"aes-256-gcm","password":"pw"}}"#;
        let request: StartRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.id, "abc");
        assert!(request.name.is_empty());
        assert_eq!(request.config.port, 443);
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let ip = resolve_proxy_ip(&request("203.0.113.7").config).await.unwrap();
        assert_eq!(ip, "203.0.113.7".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let ip = resolve_proxy_ip(&request("localhost").config).await.unwrap();
        assert!(ip.is_loopback());
    }

    #[tokio::test]
    async fn test_missing_host_is_illegal() {
        let service = service();
        let result = service.start(request(""), false).await;
        assert!(matches!(
            result,
            Err(TunnelError::IllegalServerConfiguration(_))
        ));
        assert!(!service.is_running("server-1"));
    }

    #[tokio::test]
    async fn test_stop_without_tunnel() {
        let service = service();
        service.stop(None).await;
        service.stop(Some("server-1")).await;
        assert!(!service.is_running("server-1"));
    }
}
