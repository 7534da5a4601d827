//! Routing daemon client

use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use outline_core::{Platform, TunnelStatus};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::codec::{DecodeError, MessageDecoder};
use crate::protocol::{RoutingServiceAction, RoutingServiceRequest, RoutingServiceResponse};
use crate::transport::{self, IpcStream};
use crate::{Result, RoutingError};

const READ_BUFFER_SIZE: usize = 4096;

/// Callback for `statusChanged` events pushed by the daemon
pub type NetworkChangeListener = Arc<dyn Fn(TunnelStatus) + Send + Sync>;

/// Connection parameters for one routing session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Named pipe or Unix socket path of the daemon
    pub endpoint: String,
    /// IP address of the proxy server, excluded from the tunnel routes
    pub proxy_address: String,
    pub is_auto_connect: bool,
    /// Bound on the configureRouting handshake; `None` waits forever
    pub handshake_timeout: Option<Duration>,
}

impl RoutingConfig {
    pub fn new(
        endpoint: impl Into<String>,
        proxy_address: impl Into<String>,
        is_auto_connect: bool,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            proxy_address: proxy_address.into(),
            is_auto_connect,
            handshake_timeout: None,
        }
    }

    pub fn for_platform(
        platform: &Platform,
        proxy_address: impl Into<String>,
        is_auto_connect: bool,
    ) -> Self {
        Self::new(
            platform.routing_endpoint.clone(),
            proxy_address,
            is_auto_connect,
        )
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingState {
    Unconnected,
    Connecting,
    Configuring,
    Active,
    Stopping,
    Disconnected,
}

enum Command {
    Reset(oneshot::Sender<Result<()>>),
}

/// State shared with the connection task
struct Session {
    state: Mutex<RoutingState>,
    listener: Mutex<Option<NetworkChangeListener>>,
    disconnected_tx: watch::Sender<bool>,
}

impl Session {
    fn state(&self) -> RoutingState {
        *self.state.lock()
    }

    /// Mark the connection closed. Idempotent.
    fn finish(&self) {
        *self.state.lock() = RoutingState::Disconnected;
        self.disconnected_tx.send_replace(true);
    }

    /// Dispatch one inbound message. Returns false when the connection should close.
    fn handle_message(
        &self,
        message: std::result::Result<RoutingServiceResponse, DecodeError>,
    ) -> bool {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                error!("{}", e);
                return true;
            }
        };

        match message.action {
            RoutingServiceAction::StatusChanged => match message.connection_status {
                Some(status) => {
                    let listener = self.listener.lock().clone();
                    match listener {
                        Some(listener) => listener(status),
                        None => debug!("No network change listener for status {}", status),
                    }
                }
                None => warn!("statusChanged message without a connection status"),
            },
            RoutingServiceAction::ResetRouting => {
                info!("Routing reset by the daemon, closing connection");
                return false;
            }
            other => warn!("Unexpected message from routing daemon: {:?}", other),
        }
        true
    }
}

struct Connection {
    reader: ReadHalf<Box<dyn IpcStream>>,
    writer: WriteHalf<Box<dyn IpcStream>>,
    decoder: MessageDecoder,
}

/// Client for the privileged routing daemon.
///
/// One instance handles one session: `start()` configures routing once,
/// `stop()` resets it once. The IPC connection is owned exclusively by the
/// instance and closes when the daemon resets routing, when the daemon goes
/// away, or when the instance is dropped.
pub struct RoutingDaemon {
    config: RoutingConfig,
    session: Arc<Session>,
    stop_tx: watch::Sender<bool>,
    commands: Mutex<Option<mpsc::Sender<Command>>>,
    pending_stop: Mutex<Option<Shared<BoxFuture<'static, Result<()>>>>>,
}

impl RoutingDaemon {
    pub fn new(config: RoutingConfig) -> Self {
        let (disconnected_tx, _) = watch::channel(false);
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            session: Arc::new(Session {
                state: Mutex::new(RoutingState::Unconnected),
                listener: Mutex::new(None),
                disconnected_tx,
            }),
            stop_tx,
            commands: Mutex::new(None),
            pending_stop: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn state(&self) -> RoutingState {
        self.session.state()
    }

    /// Register (or clear) the `statusChanged` listener. Last writer wins.
    pub fn on_network_change(&self, listener: Option<NetworkChangeListener>) {
        *self.session.listener.lock() = listener;
    }

    /// Connect and configure routing.
    ///
    /// Resolves once the daemon acknowledges `configureRouting`. Any failure
    /// closes the connection and fulfills [`Self::once_disconnected`].
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.session.state.lock();
            match *state {
                RoutingState::Unconnected => *state = RoutingState::Connecting,
                RoutingState::Disconnected => return Err(RoutingError::StoppedBeforeStarted),
                _ => return Err(RoutingError::AlreadyStarted),
            }
        }

        let mut stop_rx = self.stop_tx.subscribe();
        let timeout = self.config.handshake_timeout;
        let expired = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => future::pending::<()>().await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = stop_rx.wait_for(|stopping| *stopping) => Err(RoutingError::StoppedBeforeStarted),
            result = self.handshake() => result,
            _ = expired => Err(RoutingError::Timeout(timeout.unwrap_or_default())),
        };

        let connection = match result {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Failed to configure routing: {}", e);
                self.session.finish();
                return Err(e);
            }
        };

        let (command_tx, command_rx) = mpsc::channel(1);
        {
            let mut state = self.session.state.lock();
            if *state == RoutingState::Stopping {
                drop(state);
                drop(connection);
                warn!("Routing daemon service stopped before started");
                self.session.finish();
                return Err(RoutingError::StoppedBeforeStarted);
            }
            // Installed under the state lock: a stop() that sees Active
            // must find the channel to send the reset on.
            *self.commands.lock() = Some(command_tx);
            *state = RoutingState::Active;
        }

        info!("Routing configured through {}", self.config.endpoint);
        tokio::spawn(run_connection(connection, command_rx, self.session.clone()));
        Ok(())
    }

    async fn handshake(&self) -> Result<Connection> {
        let stream = transport::connect(&self.config.endpoint).await?;
        {
            let mut state = self.session.state.lock();
            if *state == RoutingState::Connecting {
                *state = RoutingState::Configuring;
            }
        }

        let (mut reader, mut writer) = tokio::io::split(stream);
        let request = RoutingServiceRequest::configure_routing(
            self.config.proxy_address.clone(),
            self.config.is_auto_connect,
        );
        write_message(&mut writer, &request).await?;

        let mut decoder = MessageDecoder::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            if let Some(message) = decoder.next_message() {
                let response = message.map_err(|e| RoutingError::Service(e.to_string()))?;
                if response.action != RoutingServiceAction::ConfigureRouting
                    || !response.is_success()
                {
                    let message = response.error_message.unwrap_or_else(|| {
                        format!(
                            "unexpected {:?} response with status {:?}",
                            response.action, response.status_code
                        )
                    });
                    return Err(RoutingError::Service(message));
                }
                return Ok(Connection {
                    reader,
                    writer,
                    decoder,
                });
            }

            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Err(RoutingError::Service(
                    "empty routing service response".to_string(),
                ));
            }
            decoder.push(&buf[..n]);
        }
    }

    /// Reset routing.
    ///
    /// Resolves once `resetRouting` is written; the socket closing is observed
    /// through [`Self::once_disconnected`]. Repeated calls return the first
    /// call's outcome without writing again. A stop while the handshake is
    /// still pending writes nothing and makes `start()` fail.
    pub fn stop(&self) -> BoxFuture<'static, Result<()>> {
        let mut pending = self.pending_stop.lock();
        if let Some(stop) = pending.as_ref() {
            return stop.clone().boxed();
        }

        let stop: BoxFuture<'static, Result<()>> = {
            let mut state = self.session.state.lock();
            match *state {
                RoutingState::Unconnected => {
                    *state = RoutingState::Disconnected;
                    self.session.disconnected_tx.send_replace(true);
                    future::ready(Ok(())).boxed()
                }
                RoutingState::Connecting | RoutingState::Configuring => {
                    *state = RoutingState::Stopping;
                    self.stop_tx.send_replace(true);
                    future::ready(Ok(())).boxed()
                }
                RoutingState::Active => {
                    *state = RoutingState::Stopping;
                    let (ack_tx, ack_rx) = oneshot::channel();
                    let sent = self
                        .commands
                        .lock()
                        .as_ref()
                        .map(|commands| commands.try_send(Command::Reset(ack_tx)).is_ok())
                        .unwrap_or(false);
                    if sent {
                        // The ack is dropped only if the connection closed first.
                        async move { ack_rx.await.unwrap_or(Ok(())) }.boxed()
                    } else {
                        future::ready(Ok(())).boxed()
                    }
                }
                RoutingState::Stopping | RoutingState::Disconnected => {
                    future::ready(Ok(())).boxed()
                }
            }
        };

        let stop = stop.shared();
        *pending = Some(stop.clone());
        stop.boxed()
    }

    /// Resolves once the connection to the daemon is closed, for any reason.
    pub fn once_disconnected(&self) -> BoxFuture<'static, ()> {
        let mut disconnected_rx = self.session.disconnected_tx.subscribe();
        async move {
            let _ = disconnected_rx.wait_for(|disconnected| *disconnected).await;
        }
        .boxed()
    }

    pub fn is_disconnected(&self) -> bool {
        *self.session.disconnected_tx.borrow()
    }
}

async fn write_message<W>(writer: &mut W, request: &RoutingServiceRequest) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(request)?;
    debug!("Sending {:?} to routing daemon", request.action);
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Feed every complete buffered message to the dispatcher
fn dispatch_pending(decoder: &mut MessageDecoder, session: &Session) -> bool {
    while let Some(message) = decoder.next_message() {
        if !session.handle_message(message) {
            return false;
        }
    }
    true
}

async fn run_connection(
    connection: Connection,
    mut commands: mpsc::Receiver<Command>,
    session: Arc<Session>,
) {
    let Connection {
        mut reader,
        mut writer,
        mut decoder,
    } = connection;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    // Events may have arrived together with the handshake response.
    let mut open = dispatch_pending(&mut decoder, &session);

    while open {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Reset(ack)) => {
                    let result = write_message(&mut writer, &RoutingServiceRequest::reset_routing()).await;
                    if let Err(e) = &result {
                        warn!("Failed to reset routing: {}", e);
                        open = false;
                    }
                    let _ = ack.send(result);
                }
                None => {
                    debug!("Routing daemon client dropped, closing connection");
                    open = false;
                }
            },
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    info!("Routing daemon closed the connection");
                    open = false;
                }
                Ok(n) => {
                    decoder.push(&buf[..n]);
                    open = dispatch_pending(&mut decoder, &session);
                }
                Err(e) => {
                    warn!("Routing daemon connection error: {}", e);
                    open = false;
                }
            },
        }
    }

    let _ = writer.shutdown().await;
    drop(reader);
    drop(writer);
    session.finish();
    debug!("Routing daemon connection closed");
}
