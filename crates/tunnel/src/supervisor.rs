//! VPN tunnel supervisor

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use outline_core::TunnelStatus;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::power::{PowerEvent, PowerMonitor};
use crate::traits::{ConnectivityChecker, RoutingClient, TunnelProcess};
use crate::{Result, TunnelError};

/// Callback for reconnecting/reconnected notifications
pub type TunnelListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
    Disconnected,
}

#[derive(Debug, Clone, Default)]
pub struct TunnelOptions {
    /// Bound on waiting for the routing connection to close on disconnect
    pub teardown_timeout: Option<Duration>,
    /// Source of suspend/resume events, where the OS provides them
    pub power_monitor: Option<PowerMonitor>,
}

#[derive(Default)]
struct Listeners {
    reconnecting: Option<TunnelListener>,
    reconnected: Option<TunnelListener>,
}

struct Inner {
    tun2socks: Arc<dyn TunnelProcess>,
    routing: Arc<dyn RoutingClient>,
    checker: Arc<dyn ConnectivityChecker>,
    options: TunnelOptions,
    state: watch::Sender<TunnelState>,
    is_udp_enabled: AtomicBool,
    /// Set once teardown has begun; the tunnel never comes back from it
    terminated: AtomicBool,
    /// Serializes stop/start sequences on tun2socks
    ops: tokio::sync::Mutex<()>,
    listeners: Mutex<Listeners>,
    network_events: Mutex<Option<mpsc::UnboundedReceiver<TunnelStatus>>>,
    pending_disconnect: Mutex<Option<Shared<BoxFuture<'static, ()>>>>,
}

/// One VPN session: tun2socks plus routing, coordinated.
///
/// The helpers are reached only through their traits, so either can be
/// replaced independently. Network changes reported by the routing daemon,
/// power events and the routing connection closing are all consumed by one
/// event loop owned by the tunnel.
pub struct VpnTunnel {
    inner: Arc<Inner>,
}

impl VpnTunnel {
    pub fn new(
        tun2socks: Arc<dyn TunnelProcess>,
        routing: Arc<dyn RoutingClient>,
        checker: Arc<dyn ConnectivityChecker>,
        options: TunnelOptions,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        routing.on_network_change(Some(Arc::new(move |status| {
            let _ = events_tx.send(status);
        })));

        let (state, _) = watch::channel(TunnelState::Idle);
        Self {
            inner: Arc::new(Inner {
                tun2socks,
                routing,
                checker,
                options,
                state,
                is_udp_enabled: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                ops: tokio::sync::Mutex::new(()),
                listeners: Mutex::new(Listeners::default()),
                network_events: Mutex::new(Some(events_rx)),
                pending_disconnect: Mutex::new(None),
            }),
        }
    }

    pub fn enable_debug_mode(&self) {
        self.inner.tun2socks.enable_debug_mode();
        self.inner.checker.enable_debug_mode();
    }

    pub fn state(&self) -> TunnelState {
        *self.inner.state.borrow()
    }

    pub fn is_udp_enabled(&self) -> bool {
        self.inner.is_udp_enabled.load(Ordering::SeqCst)
    }

    pub fn on_reconnecting(&self, listener: Option<TunnelListener>) {
        self.inner.listeners.lock().reconnecting = listener;
    }

    pub fn on_reconnected(&self, listener: Option<TunnelListener>) {
        self.inner.listeners.lock().reconnected = listener;
    }

    /// Bring the tunnel up.
    ///
    /// Probes UDP support first when `check_proxy_connectivity` is set,
    /// starts tun2socks without waiting for it, then configures routing and
    /// waits for the daemon. If the routing connection later closes, the
    /// whole tunnel is torn down.
    pub async fn connect(&self, check_proxy_connectivity: bool) -> Result<()> {
        let claimed = self.inner.state.send_if_modified(|state| {
            if *state == TunnelState::Idle {
                *state = TunnelState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(TunnelError::AlreadyConnected);
        }
        let events = self.inner.network_events.lock().take();

        let power_events = self
            .inner
            .options
            .power_monitor
            .as_ref()
            .map(PowerMonitor::subscribe);
        tokio::spawn(run_event_loop(
            self.inner.clone(),
            events,
            power_events,
        ));

        if check_proxy_connectivity {
            let is_udp_enabled = self.inner.checker.check_connectivity().await?;
            self.inner
                .is_udp_enabled
                .store(is_udp_enabled, Ordering::SeqCst);
        }
        info!("UDP support: {}", self.is_udp_enabled());

        {
            let _ops = self.inner.ops.lock().await;
            if self.inner.terminated.load(Ordering::SeqCst) {
                return Err(TunnelError::Routing(
                    outline_routing::RoutingError::StoppedBeforeStarted,
                ));
            }
            self.inner.tun2socks.start(self.is_udp_enabled())?;
        }

        info!("Starting routing daemon");
        self.inner.routing.start().await?;

        self.inner.state.send_if_modified(|state| {
            if *state == TunnelState::Connecting {
                *state = TunnelState::Connected;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    /// Tear the tunnel down: tun2socks first, then routing.
    ///
    /// Resolves once both helpers have stopped. Repeated calls share the
    /// first call's teardown and stop nothing twice.
    pub fn disconnect(&self) -> BoxFuture<'static, ()> {
        self.inner.disconnect()
    }

    /// Resolves once the tunnel is fully down and the system is back to its
    /// previous routing and device configuration.
    pub fn once_disconnected(&self) -> BoxFuture<'static, ()> {
        let mut state = self.inner.state.subscribe();
        async move {
            let _ = state
                .wait_for(|state| *state == TunnelState::Disconnected)
                .await;
        }
        .boxed()
    }

    /// Apply a network status reported by the routing daemon
    pub fn network_changed(&self, status: TunnelStatus) {
        self.inner.network_changed(status);
    }
}

impl Inner {
    fn disconnect(self: &Arc<Self>) -> BoxFuture<'static, ()> {
        let mut pending = self.pending_disconnect.lock();
        if let Some(disconnect) = pending.as_ref() {
            return disconnect.clone().boxed();
        }

        let inner = self.clone();
        let disconnect = async move { inner.teardown().await }.boxed().shared();
        *pending = Some(disconnect.clone());
        // Runs to completion even if no caller awaits it.
        tokio::spawn(disconnect.clone());
        disconnect.boxed()
    }

    async fn teardown(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.state.send_replace(TunnelState::Disconnecting);

        {
            let _ops = self.ops.lock().await;
            match self.tun2socks.stop().await {
                Ok(()) => {}
                Err(e) if e.is_signal() => debug!("tun2socks stopped: {}", e),
                Err(e) => error!("could not stop tun2socks: {}", e),
            }
        }

        if let Err(e) = self.routing.stop().await {
            error!("could not stop routing: {}", e);
        }

        let closed = self.routing.once_disconnected();
        match self.options.teardown_timeout {
            Some(timeout) => {
                if tokio::time::timeout(timeout, closed).await.is_err() {
                    warn!(
                        "Routing daemon did not close the connection within {:?}",
                        timeout
                    );
                }
            }
            None => closed.await,
        }

        self.state.send_replace(TunnelState::Disconnected);
        info!("Tunnel disconnected");
    }

    fn network_changed(self: &Arc<Self>, status: TunnelStatus) {
        match status {
            TunnelStatus::Connected => {
                self.set_active_state(TunnelState::Connected);
                let listener = self.listeners.lock().reconnected.clone();
                if let Some(listener) = listener {
                    listener();
                }
                // After the listener, so the UI is not held up by the probe.
                tokio::spawn(self.clone().update_udp_support());
            }
            TunnelStatus::Reconnecting => {
                self.set_active_state(TunnelState::Reconnecting);
                let listener = self.listeners.lock().reconnecting.clone();
                if let Some(listener) = listener {
                    listener();
                }
            }
            other => error!("unknown network change status {} from routing daemon", other),
        }
    }

    /// Move between Connected and Reconnecting; other states are left alone
    fn set_active_state(&self, next: TunnelState) {
        self.state.send_if_modified(|state| {
            let active = matches!(*state, TunnelState::Connected | TunnelState::Reconnecting);
            if active && *state != next {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    /// Re-probe UDP support and restart tun2socks if it changed
    async fn update_udp_support(self: Arc<Self>) {
        let was_udp_enabled = self.is_udp_enabled.load(Ordering::SeqCst);
        let is_udp_enabled = match self.checker.check_connectivity().await {
            Ok(is_udp_enabled) => is_udp_enabled,
            Err(e) => {
                error!("connectivity check failed: {}", e);
                return;
            }
        };
        self.is_udp_enabled.store(is_udp_enabled, Ordering::SeqCst);
        if is_udp_enabled == was_udp_enabled {
            return;
        }

        info!("UDP support change: now {}", is_udp_enabled);
        self.restart_tun2socks().await;
    }

    async fn restart_tun2socks(&self) {
        let _ops = self.ops.lock().await;
        if self.terminated.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.tun2socks.stop().await {
            debug!("tun2socks stopped: {}", e);
        }
        if let Err(e) = self.tun2socks.start(self.is_udp_enabled.load(Ordering::SeqCst)) {
            error!("could not restart tun2socks: {}", e);
        }
    }

    async fn power_event(self: &Arc<Self>, event: PowerEvent) {
        match event {
            PowerEvent::Suspend => {
                // The OS takes the device away under tun2socks on suspend.
                let _ops = self.ops.lock().await;
                if self.terminated.load(Ordering::SeqCst) {
                    return;
                }
                if let Err(e) = self.tun2socks.stop().await {
                    debug!("tun2socks stopped: {}", e);
                }
                info!("Stopped tun2socks in preparation for suspend");
            }
            PowerEvent::Resume => {
                if self.terminated.load(Ordering::SeqCst) {
                    error!("resume event invoked but this tunnel is terminated - doing nothing");
                    return;
                }
                info!("Restarting tun2socks after resume");
                self.restart_tun2socks().await;
                tokio::spawn(self.clone().update_udp_support());
            }
        }
    }
}

async fn next_power_event(
    power_events: &mut Option<broadcast::Receiver<PowerEvent>>,
) -> Option<PowerEvent> {
    let Some(receiver) = power_events.as_mut() else {
        return future::pending().await;
    };
    loop {
        match receiver.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Missed {} power events", missed);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Consumes everything that happens to the tunnel after `connect()`.
///
/// Ends when teardown begins, which also drops the power subscription.
async fn run_event_loop(
    inner: Arc<Inner>,
    mut network_events: Option<mpsc::UnboundedReceiver<TunnelStatus>>,
    mut power_events: Option<broadcast::Receiver<PowerEvent>>,
) {
    let mut state = inner.state.subscribe();
    let mut routing_closed = inner.routing.once_disconnected();

    loop {
        tokio::select! {
            // The watch guard must not live across the awaits below.
            _ = async {
                let _ = state
                    .wait_for(|state| {
                        matches!(*state, TunnelState::Disconnecting | TunnelState::Disconnected)
                    })
                    .await;
            } => break,
            _ = &mut routing_closed => {
                info!("Routing daemon disconnected, tearing down tunnel");
                inner.disconnect().await;
                break;
            }
            status = next_network_event(&mut network_events) => match status {
                Some(status) => inner.network_changed(status),
                None => network_events = None,
            },
            event = next_power_event(&mut power_events) => match event {
                Some(event) => inner.power_event(event).await,
                None => power_events = None,
            },
        }
    }
    debug!("Tunnel event loop finished");
}

async fn next_network_event(
    network_events: &mut Option<mpsc::UnboundedReceiver<TunnelStatus>>,
) -> Option<TunnelStatus> {
    match network_events.as_mut() {
        Some(receiver) => receiver.recv().await,
        None => future::pending().await,
    }
}
