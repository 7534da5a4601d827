//! One-shot child process launcher

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info};

use crate::{ProcessError, Result};

/// Termination outcome of a launched process
pub type ProcessResult = Result<()>;

/// Callback invoked with every line the child writes to stderr
pub type StdErrListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Launches a native helper exactly once and reports how it terminated.
///
/// Spawn failures (e.g. a missing binary) are not returned synchronously; they
/// surface as the launch outcome like any other termination.
pub struct ChildProcessHelper {
    path: PathBuf,
    process_name: String,
    debug_mode: AtomicBool,
    stderr_listener: Arc<Mutex<Option<StdErrListener>>>,
    launched: Mutex<Option<Launched>>,
}

struct Launched {
    terminate_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<ProcessResult>>,
}

impl ChildProcessHelper {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let process_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        Self {
            path,
            process_name,
            debug_mode: AtomicBool::new(false),
            stderr_listener: Arc::new(Mutex::new(None)),
            launched: Mutex::new(None),
        }
    }

    /// Mirror the child's stdout/stderr to our own. Must be called before `launch()`.
    pub fn enable_debug_mode(&self) {
        self.debug_mode.store(true, Ordering::Relaxed);
    }

    pub fn is_debug_mode_enabled(&self) -> bool {
        self.debug_mode.load(Ordering::Relaxed)
    }

    /// Register (or clear) the stderr line listener. May be changed while running.
    pub fn on_stderr(&self, listener: Option<StdErrListener>) {
        *self.stderr_listener.lock() = listener;
    }

    pub fn is_launched(&self) -> bool {
        self.launched.lock().is_some()
    }

    /// Spawn the process and return a future resolving when it terminates.
    ///
    /// The spawn itself happens before this returns, so a `stop()` issued
    /// right afterwards always reaches the child. Must be called from within
    /// a tokio runtime.
    pub fn launch<I, S>(&self, args: I) -> BoxFuture<'static, ProcessResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut launched = self.launched.lock();
        if launched.is_some() {
            let err = ProcessError::AlreadyLaunched(self.process_name.clone());
            return future::ready(Err(err)).boxed();
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (terminate_tx, terminate_rx) = oneshot::channel();
        let debug_mode = self.is_debug_mode_enabled();

        let mut command = Command::new(&self.path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(if debug_mode {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match command.spawn() {
            Ok(child) => {
                debug!("Launched {} (pid {:?})", self.process_name, child.id());
                tokio::spawn(monitor(
                    child,
                    self.process_name.clone(),
                    debug_mode,
                    self.stderr_listener.clone(),
                    terminate_rx,
                    exit_tx,
                ));
            }
            Err(e) => {
                error!("[EXIT - {}]: Failed to launch: {}", self.process_name, e);
                exit_tx.send_replace(Some(Err(ProcessError::Spawn(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))));
            }
        }

        *launched = Some(Launched {
            terminate_tx: Some(terminate_tx),
            exit_rx: exit_rx.clone(),
        });

        wait_for_exit(exit_rx).boxed()
    }

    /// Ask the process to terminate and wait for it to exit.
    ///
    /// Resolves with the same outcome as the pending `launch()`; resolves
    /// immediately with `Ok(())` if the process was never launched.
    pub fn stop(&self) -> BoxFuture<'static, ProcessResult> {
        let mut launched = self.launched.lock();
        match launched.as_mut() {
            None => future::ready(Ok(())).boxed(),
            Some(launched) => {
                if let Some(terminate_tx) = launched.terminate_tx.take() {
                    let _ = terminate_tx.send(());
                }
                wait_for_exit(launched.exit_rx.clone()).boxed()
            }
        }
    }
}

async fn wait_for_exit(mut exit_rx: watch::Receiver<Option<ProcessResult>>) -> ProcessResult {
    match exit_rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome
            .clone()
            .unwrap_or_else(|| Err(ProcessError::Wait("no exit status".to_string()))),
        Err(_) => Err(ProcessError::Wait("process monitor dropped".to_string())),
    }
}

/// Owns the child until it exits, then publishes the outcome exactly once.
async fn monitor(
    mut child: Child,
    process_name: String,
    debug_mode: bool,
    stderr_listener: Arc<Mutex<Option<StdErrListener>>>,
    terminate_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ProcessResult>>,
) {
    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(forward_stderr(
            stderr,
            process_name.clone(),
            debug_mode,
            stderr_listener,
        ))
    });

    let mut terminate_requested = false;
    let status = tokio::select! {
        status = child.wait() => status,
        _ = terminate_rx => {
            terminate_requested = true;
            terminate(&mut child, &process_name);
            child.wait().await
        }
    };

    // Let the listener see everything the process printed before it exited.
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    let outcome = match status {
        Ok(status) => exit_outcome(status, terminate_requested),
        Err(e) => Err(ProcessError::Wait(e.to_string())),
    };
    log_exit(&process_name, &outcome);
    exit_tx.send_replace(Some(outcome));
}

async fn forward_stderr(
    stderr: ChildStderr,
    process_name: String,
    debug_mode: bool,
    stderr_listener: Arc<Mutex<Option<StdErrListener>>>,
) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                // Written straight to our stderr so traffic details stay out of the logs.
                if debug_mode {
                    eprintln!("[STDERR - {}]: {}", process_name, line);
                }
                let listener = stderr_listener.lock().clone();
                if let Some(listener) = listener {
                    listener(&line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading stderr of {}: {}", process_name, e);
                break;
            }
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child, process_name: &str) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!("SIGTERM to {} failed ({}), killing", process_name, e);
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, process_name: &str) {
    if let Err(e) = child.start_kill() {
        debug!("Failed to kill {}: {}", process_name, e);
    }
}

fn exit_outcome(status: ExitStatus, terminate_requested: bool) -> ProcessResult {
    match status.code() {
        Some(0) => Ok(()),
        #[cfg(not(unix))]
        Some(_) if terminate_requested => Err(ProcessError::Signal("SIGTERM".to_string())),
        Some(code) => Err(ProcessError::ExitCode(code)),
        None => {
            let _ = terminate_requested;
            Err(ProcessError::Signal(signal_name(&status)))
        }
    }
}

#[cfg(unix)]
fn signal_name(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    match status.signal() {
        Some(signal) => nix::sys::signal::Signal::try_from(signal)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| format!("signal {}", signal)),
        None => "unknown".to_string(),
    }
}

#[cfg(not(unix))]
fn signal_name(_status: &ExitStatus) -> String {
    "unknown".to_string()
}

fn log_exit(process_name: &str, outcome: &ProcessResult) {
    match outcome {
        Ok(()) => info!("[EXIT - {}]: Exited with code 0", process_name),
        Err(ProcessError::ExitCode(code)) => {
            error!("[EXIT - {}]: Exited with code {}", process_name, code)
        }
        Err(ProcessError::Signal(signal)) if signal == "SIGTERM" => {
            info!("[EXIT - {}]: Killed by signal {}", process_name, signal)
        }
        Err(ProcessError::Signal(signal)) => {
            error!("[EXIT - {}]: Killed by signal {}", process_name, signal)
        }
        Err(e) => error!("[EXIT - {}]: {}", process_name, e),
    }
}
