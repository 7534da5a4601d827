//! Platform IPC transport to the routing daemon

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{Result, RoutingError};

/// A bidirectional byte stream to the daemon
pub(crate) trait IpcStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IpcStream for T {}

/// Open the daemon endpoint. Every failure means the daemon is not reachable.
#[cfg(unix)]
pub(crate) async fn connect(endpoint: &str) -> Result<Box<dyn IpcStream>> {
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(endpoint)
        .await
        .map_err(|e| RoutingError::NotRunning(format!("{}: {}", endpoint, e)))?;
    Ok(Box::new(stream))
}

/// Open the daemon endpoint. Every failure means the daemon is not reachable.
#[cfg(windows)]
pub(crate) async fn connect(endpoint: &str) -> Result<Box<dyn IpcStream>> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let client = ClientOptions::new()
        .open(endpoint)
        .map_err(|e| RoutingError::NotRunning(format!("{}: {}", endpoint, e)))?;
    Ok(Box::new(client))
}

#[cfg(not(any(unix, windows)))]
pub(crate) async fn connect(endpoint: &str) -> Result<Box<dyn IpcStream>> {
    Err(RoutingError::NotRunning(format!(
        "{}: IPC is not supported on this platform",
        endpoint
    )))
}
