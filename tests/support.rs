//! Stand-ins for the routing daemon and the tun2socks binary

#![cfg(unix)]
#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

pub const CONFIGURED: &str =
    r#"{"action":"configureRouting","statusCode":0,"connectionStatus":"DISCONNECTED"}"#;

pub const RESET: &str = r#"{"action":"resetRouting","statusCode":0}"#;

/// Routing daemon listening on a Unix socket under the temp dir
pub struct MockDaemon {
    path: PathBuf,
    listener: UnixListener,
}

impl MockDaemon {
    pub fn bind() -> Self {
        let path = scratch_dir().with_extension("sock");
        let listener = UnixListener::bind(&path).unwrap();
        Self { path, listener }
    }

    pub fn endpoint(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub async fn accept(&self) -> DaemonConnection {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .unwrap()
            .unwrap();
        DaemonConnection { stream }
    }

    /// Accept, answer the configureRouting request and hand back both
    pub async fn accept_configured(&self) -> (DaemonConnection, serde_json::Value) {
        let mut connection = self.accept().await;
        let request = connection.read_request().await;
        connection.send(CONFIGURED).await;
        (connection, request)
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub struct DaemonConnection {
    stream: UnixStream,
}

impl DaemonConnection {
    pub async fn read_request(&mut self) -> serde_json::Value {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = timeout(WAIT, self.stream.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "client closed before sending a request");
            data.extend_from_slice(&buf[..n]);
            if let Ok(value) = serde_json::from_slice(&data) {
                return value;
            }
        }
    }

    pub async fn send(&mut self, message: &str) {
        self.stream.write_all(message.as_bytes()).await.unwrap();
    }

    /// Answer a resetRouting request, which ends the session
    pub async fn expect_reset(&mut self) {
        let request = self.read_request().await;
        assert_eq!(request["action"], "resetRouting");
        self.send(RESET).await;
    }

    pub async fn close(self) {
        let mut stream = self.stream;
        let _ = stream.shutdown().await;
    }
}

/// Shell script standing in for tun2socks.
///
/// Probe runs exit with `probe_exit`. Tunnel runs record their arguments in
/// `launches`, print the running banner and sleep until signalled.
pub struct FakeTun2socks {
    dir: PathBuf,
    path: PathBuf,
}

impl FakeTun2socks {
    pub fn new(probe_exit: i32) -> Self {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tun2socks");
        let script = format!(
            r#"#!/bin/sh
DIR='{dir}'
case "$*" in
  *-checkConnectivity*)
    echo probe >> "$DIR/probes"
    exit {probe_exit}
    ;;
esac
echo "$@" >> "$DIR/launches"
echo "tun2socks running" >&2
exec sleep 30
"#,
            dir = dir.display(),
            probe_exit = probe_exit,
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lines(&self, name: &str) -> Vec<String> {
        std::fs::read_to_string(self.dir.join(name))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn launches(&self) -> Vec<String> {
        self.lines("launches")
    }

    pub fn probes(&self) -> usize {
        self.lines("probes").len()
    }

    /// Wait until tun2socks has been launched `count` times
    pub async fn wait_for_launches(&self, count: usize) -> Vec<String> {
        timeout(WAIT, async {
            loop {
                let launches = self.launches();
                if launches.len() >= count {
                    return launches;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap()
    }
}

impl Drop for FakeTun2socks {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("outline-e2e-{}", uuid::Uuid::new_v4()))
}
