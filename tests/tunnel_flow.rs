//! End-to-end tunnel lifecycle against a mock routing daemon
//!
//! Drives a real `VpnTunnel` built from `RoutingDaemon`, `GoTun2socks` and
//! `ConnectivityProbe`, with a shell script in place of tun2socks:
//! 1. Connect probes, launches tun2socks, then configures routing
//! 2. Daemon status pushes reach the reconnecting/reconnected listeners
//! 3. A UDP support change restarts tun2socks with the new flags
//! 4. Disconnect stops tun2socks, resets routing and waits for the daemon
//! 5. The daemon hanging up tears the whole tunnel down
//! 6. Suspend/resume cycles tun2socks

#![cfg(unix)]

mod support;

use std::sync::Arc;
use std::time::Duration;

use outline_core::{OsFamily, Platform, ShadowsocksSessionConfig};
use outline_routing::{RoutingConfig, RoutingDaemon, RoutingState};
use outline_tun2socks::{GoTun2socks, TunnelProcessState};
use outline_tunnel::{
    ConnectivityProbe, PowerEvent, PowerMonitor, TunnelError, TunnelOptions, TunnelState,
    VpnTunnel,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

use support::{FakeTun2socks, MockDaemon, WAIT};

// =============================================================================
// HELPERS
// =============================================================================

struct Harness {
    tunnel: VpnTunnel,
    routing: Arc<RoutingDaemon>,
    tun2socks: Arc<GoTun2socks>,
}

fn session_config() -> ShadowsocksSessionConfig {
    ShadowsocksSessionConfig::new("127.0.0.1", 8388, "chacha20-ietf-poly1305", "secret")
}

fn build(
    daemon: &MockDaemon,
    fake: &FakeTun2socks,
    is_auto_connect: bool,
    power_monitor: Option<PowerMonitor>,
) -> Harness {
    let platform = Platform::for_os(OsFamily::Linux).with_routing_endpoint(daemon.endpoint());
    let config = session_config();

    let routing = Arc::new(RoutingDaemon::new(
        RoutingConfig::for_platform(&platform, "127.0.0.1", is_auto_connect)
            .with_handshake_timeout(Some(WAIT)),
    ));
    let tun2socks = Arc::new(GoTun2socks::new(fake.path(), config.clone(), &platform));
    let probe = Arc::new(ConnectivityProbe::new(fake.path(), config, Some(WAIT)));

    let tunnel = VpnTunnel::new(
        tun2socks.clone(),
        routing.clone(),
        probe,
        TunnelOptions {
            teardown_timeout: Some(WAIT),
            power_monitor,
        },
    );
    Harness {
        tunnel,
        routing,
        tun2socks,
    }
}

fn record_listeners(tunnel: &VpnTunnel) -> mpsc::UnboundedReceiver<&'static str> {
    let (tx, rx) = mpsc::unbounded_channel();
    let reconnecting = tx.clone();
    tunnel.on_reconnecting(Some(Arc::new(move || {
        let _ = reconnecting.send("reconnecting");
    })));
    tunnel.on_reconnected(Some(Arc::new(move || {
        let _ = tx.send("reconnected");
    })));
    rx
}

// =============================================================================
// TESTS
// =============================================================================

#[tokio::test]
async fn test_connect_and_disconnect() {
    let daemon = MockDaemon::bind();
    let fake = FakeTun2socks::new(0);
    let harness = build(&daemon, &fake, false, None);

    let (result, (mut connection, request)) =
        tokio::join!(harness.tunnel.connect(true), daemon.accept_configured());
    result.unwrap();

    assert_eq!(harness.tunnel.state(), TunnelState::Connected);
    assert!(harness.tunnel.is_udp_enabled());
    assert_eq!(harness.routing.state(), RoutingState::Active);
    assert_eq!(request["action"], "configureRouting");
    assert_eq!(request["parameters"]["proxyIp"], "127.0.0.1");
    assert_eq!(request["parameters"]["isAutoConnect"], false);
    assert_eq!(fake.probes(), 1);

    let launches = fake.wait_for_launches(1).await;
    assert!(launches[0].contains("-tunName outline-tun0"));
    assert!(launches[0].contains("-proxyHost 127.0.0.1"));
    assert!(!launches[0].contains("-dnsFallback"));

    let disconnect = harness.tunnel.disconnect();
    connection.expect_reset().await;
    timeout(WAIT, disconnect).await.unwrap();

    assert_eq!(harness.tunnel.state(), TunnelState::Disconnected);
    assert_eq!(harness.routing.state(), RoutingState::Disconnected);
    assert_eq!(harness.tun2socks.state(), TunnelProcessState::Stopped);
    timeout(WAIT, harness.tunnel.once_disconnected()).await.unwrap();
}

#[tokio::test]
async fn test_probe_failure_never_reaches_daemon() {
    let daemon = MockDaemon::bind();
    let fake = FakeTun2socks::new(3);
    let harness = build(&daemon, &fake, false, None);

    let result = harness.tunnel.connect(true).await;
    assert!(matches!(result, Err(TunnelError::Connectivity(_))));
    assert!(fake.launches().is_empty());

    timeout(WAIT, harness.tunnel.disconnect()).await.unwrap();
    assert_eq!(harness.tunnel.state(), TunnelState::Disconnected);
    assert_eq!(harness.routing.state(), RoutingState::Disconnected);
}

#[tokio::test]
async fn test_auto_connect_skips_probe() {
    let daemon = MockDaemon::bind();
    let fake = FakeTun2socks::new(0);
    let harness = build(&daemon, &fake, true, None);

    let (result, (mut connection, request)) =
        tokio::join!(harness.tunnel.connect(false), daemon.accept_configured());
    result.unwrap();

    assert_eq!(request["parameters"]["isAutoConnect"], true);
    assert_eq!(fake.probes(), 0);
    assert!(!harness.tunnel.is_udp_enabled());
    let launches = fake.wait_for_launches(1).await;
    assert!(launches[0].contains("-dnsFallback"));

    let disconnect = harness.tunnel.disconnect();
    connection.expect_reset().await;
    timeout(WAIT, disconnect).await.unwrap();
}

#[tokio::test]
async fn test_status_pushes_reach_listeners() {
    let daemon = MockDaemon::bind();
    let fake = FakeTun2socks::new(0);
    let harness = build(&daemon, &fake, false, None);
    let mut events = record_listeners(&harness.tunnel);

    let (result, (mut connection, _)) =
        tokio::join!(harness.tunnel.connect(true), daemon.accept_configured());
    result.unwrap();

    connection
        .send(r#"{"action":"statusChanged","statusCode":0,"connectionStatus":2}"#)
        .await;
    assert_eq!(timeout(WAIT, events.recv()).await.unwrap(), Some("reconnecting"));
    assert_eq!(harness.tunnel.state(), TunnelState::Reconnecting);

    connection
        .send(r#"{"action":"statusChanged","statusCode":0,"connectionStatus":0}"#)
        .await;
    assert_eq!(timeout(WAIT, events.recv()).await.unwrap(), Some("reconnected"));
    assert_eq!(harness.tunnel.state(), TunnelState::Connected);

    let disconnect = harness.tunnel.disconnect();
    connection.expect_reset().await;
    timeout(WAIT, disconnect).await.unwrap();
}

#[tokio::test]
async fn test_udp_change_restarts_tun2socks() {
    let daemon = MockDaemon::bind();
    let fake = FakeTun2socks::new(0);
    // Auto-connect assumes no UDP; the re-probe on reconnect finds it.
    let harness = build(&daemon, &fake, true, None);

    let (result, (mut connection, _)) =
        tokio::join!(harness.tunnel.connect(false), daemon.accept_configured());
    result.unwrap();
    fake.wait_for_launches(1).await;

    connection
        .send(r#"{"action":"statusChanged","statusCode":0,"connectionStatus":"CONNECTED"}"#)
        .await;

    let launches = fake.wait_for_launches(2).await;
    assert!(launches[0].contains("-dnsFallback"));
    assert!(!launches[1].contains("-dnsFallback"));
    assert!(harness.tunnel.is_udp_enabled());

    let disconnect = harness.tunnel.disconnect();
    connection.expect_reset().await;
    timeout(WAIT, disconnect).await.unwrap();
    assert_eq!(harness.tun2socks.state(), TunnelProcessState::Stopped);
}

#[tokio::test]
async fn test_daemon_hangup_tears_down() {
    let daemon = MockDaemon::bind();
    let fake = FakeTun2socks::new(0);
    let harness = build(&daemon, &fake, false, None);

    let (result, (connection, _)) =
        tokio::join!(harness.tunnel.connect(true), daemon.accept_configured());
    result.unwrap();
    fake.wait_for_launches(1).await;

    connection.close().await;
    timeout(WAIT, harness.tunnel.once_disconnected()).await.unwrap();

    assert_eq!(harness.tunnel.state(), TunnelState::Disconnected);
    assert_eq!(harness.tun2socks.state(), TunnelProcessState::Stopped);
}

#[tokio::test]
async fn test_suspend_and_resume() {
    let daemon = MockDaemon::bind();
    let fake = FakeTun2socks::new(0);
    let monitor = PowerMonitor::new();
    let harness = build(&daemon, &fake, false, Some(monitor.clone()));

    let (result, (mut connection, _)) =
        tokio::join!(harness.tunnel.connect(true), daemon.accept_configured());
    result.unwrap();
    fake.wait_for_launches(1).await;

    monitor.notify(PowerEvent::Suspend);
    timeout(WAIT, async {
        while harness.tun2socks.state() != TunnelProcessState::Stopped {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    monitor.notify(PowerEvent::Resume);
    fake.wait_for_launches(2).await;

    let disconnect = harness.tunnel.disconnect();
    connection.expect_reset().await;
    timeout(WAIT, disconnect).await.unwrap();
    assert_eq!(harness.tunnel.state(), TunnelState::Disconnected);
}
