//! Supervised tun2socks process

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use outline_core::{Platform, ShadowsocksSessionConfig};
use outline_process::{ChildProcessHelper, ProcessError, ProcessResult};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::args::{tunnel_args, RUNNING_BANNER};
use crate::connectivity::check_connectivity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelProcessState {
    /// No process and no restart loop
    Stopped,
    /// Launched, banner not seen yet
    Starting,
    /// Banner seen; an unexpected exit will be relaunched
    Running,
    /// Exited after the banner, about to relaunch
    Restarting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Relaunch,
    Finish,
}

/// What to do once the current process has exited.
///
/// A process that announced itself and then went away dropped out from
/// under us and is relaunched. One that never got that far, or that we
/// asked to stop, is not.
pub fn next_action(banner_seen: bool, stop_requested: bool) -> LoopAction {
    if banner_seen && !stop_requested {
        LoopAction::Relaunch
    } else {
        LoopAction::Finish
    }
}

/// Bookkeeping shared between the controller and its restart loop
struct RestartLoop {
    state: watch::Sender<TunnelProcessState>,
    stop_requested: AtomicBool,
    current: Mutex<Option<Arc<ChildProcessHelper>>>,
}

/// Runs tun2socks for one proxy session, relaunching it when it drops out.
pub struct GoTun2socks {
    binary: PathBuf,
    config: ShadowsocksSessionConfig,
    device_name: String,
    debug_mode: AtomicBool,
    restart_loop: Arc<RestartLoop>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GoTun2socks {
    pub fn new(
        binary: impl Into<PathBuf>,
        config: ShadowsocksSessionConfig,
        platform: &Platform,
    ) -> Self {
        let (state, _) = watch::channel(TunnelProcessState::Stopped);
        Self {
            binary: binary.into(),
            config,
            device_name: platform.tun_device_name.clone(),
            debug_mode: AtomicBool::new(false),
            restart_loop: Arc::new(RestartLoop {
                state,
                stop_requested: AtomicBool::new(false),
                current: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn config(&self) -> &ShadowsocksSessionConfig {
        &self.config
    }

    /// Log at debug level and mirror the process output. Applies from the next `start()`.
    pub fn enable_debug_mode(&self) {
        self.debug_mode.store(true, Ordering::Relaxed);
    }

    pub fn is_debug_mode_enabled(&self) -> bool {
        self.debug_mode.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> TunnelProcessState {
        *self.restart_loop.state.borrow()
    }

    /// Start the restart loop in the background.
    ///
    /// Fails with [`ProcessError::AlreadyLaunched`] while a previous loop is
    /// still running; `stop()` it first.
    pub fn start(&self, is_udp_enabled: bool) -> ProcessResult {
        let mut task = self.task.lock();
        if self.state() != TunnelProcessState::Stopped {
            return Err(ProcessError::AlreadyLaunched("tun2socks".to_string()));
        }

        let debug_mode = self.is_debug_mode_enabled();
        let args = tunnel_args(&self.device_name, &self.config, is_udp_enabled, debug_mode);
        debug!("Starting tun2socks on {} (UDP: {})", self.device_name, is_udp_enabled);

        self.restart_loop.stop_requested.store(false, Ordering::SeqCst);
        self.restart_loop
            .state
            .send_replace(TunnelProcessState::Starting);
        *task = Some(tokio::spawn(run_with_auto_restart(
            self.restart_loop.clone(),
            self.binary.clone(),
            args,
            debug_mode,
        )));
        Ok(())
    }

    /// Stop the process and end the restart loop.
    ///
    /// Resolves once the loop has finished, with the last process's outcome;
    /// a process we terminate reports a signal. `Ok(())` if never started.
    pub async fn stop(&self) -> ProcessResult {
        self.restart_loop.stop_requested.store(true, Ordering::SeqCst);
        let current = self.restart_loop.current.lock().clone();
        let outcome = match current {
            Some(helper) => helper.stop().await,
            None => Ok(()),
        };

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("tun2socks restart loop failed: {}", e);
            }
        }
        info!("tun2socks stopped");
        outcome
    }

    /// Resolves once no process is running and no relaunch is pending
    pub async fn wait_stopped(&self) {
        let mut state = self.restart_loop.state.subscribe();
        let _ = state
            .wait_for(|state| *state == TunnelProcessState::Stopped)
            .await;
    }

    /// Probe UDP support with a separate one-shot process
    pub async fn check_connectivity(
        &self,
        timeout: Option<Duration>,
    ) -> crate::Result<bool> {
        check_connectivity(
            &self.binary,
            &self.config,
            self.is_debug_mode_enabled(),
            timeout,
        )
        .await
    }
}

async fn run_with_auto_restart(
    restart_loop: Arc<RestartLoop>,
    binary: PathBuf,
    args: Vec<String>,
    debug_mode: bool,
) {
    loop {
        let helper = Arc::new(ChildProcessHelper::new(binary.clone()));
        if debug_mode {
            helper.enable_debug_mode();
        }

        let banner_seen = Arc::new(AtomicBool::new(false));
        helper.on_stderr(Some({
            let banner_seen = banner_seen.clone();
            let restart_loop = restart_loop.clone();
            Arc::new(move |line: &str| {
                if line.contains(RUNNING_BANNER) && !banner_seen.swap(true, Ordering::SeqCst) {
                    debug!("tun2socks started");
                    restart_loop.state.send_replace(TunnelProcessState::Running);
                }
            })
        }));

        // Checked under the lock `stop()` reads the current process with, so
        // a stop either sees this process or keeps it from launching.
        let exit = {
            let mut current = restart_loop.current.lock();
            if restart_loop.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            restart_loop.state.send_replace(TunnelProcessState::Starting);
            *current = Some(helper.clone());
            helper.launch(&args)
        };

        match exit.await {
            Ok(()) => info!("tun2socks exited with no errors"),
            Err(e) => error!("tun2socks terminated due to {}", e),
        }

        let action = next_action(
            banner_seen.load(Ordering::SeqCst),
            restart_loop.stop_requested.load(Ordering::SeqCst),
        );
        match action {
            LoopAction::Relaunch => {
                restart_loop
                    .state
                    .send_replace(TunnelProcessState::Restarting);
                warn!("tun2socks exited unexpectedly. Restarting...");
            }
            LoopAction::Finish => break,
        }
    }
    restart_loop.state.send_replace(TunnelProcessState::Stopped);
}
