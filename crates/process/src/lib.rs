//! Outline Process Supervision
//!
//! One-shot launcher for native helper executables (tun2socks). A launch
//! resolves exactly once, with the way the process terminated.
//!
//! ## Termination outcomes
//!
//! - `Ok(())` - exited with code 0
//! - [`ProcessError::ExitCode`] - exited with a non-zero code
//! - [`ProcessError::Signal`] - killed by a signal
//! - [`ProcessError::Spawn`] - the executable could not be started

mod helper;

pub use helper::{ChildProcessHelper, ProcessResult, StdErrListener};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Subprocess {0} has already been launched")]
    AlreadyLaunched(String),

    #[error("Process terminated by non-zero exit code: {0}")]
    ExitCode(i32),

    #[error("Process terminated by signal: {0}")]
    Signal(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Failed to wait for process: {0}")]
    Wait(String),
}

impl ProcessError {
    /// Whether the process was killed by a signal, the usual result of `stop()`
    pub fn is_signal(&self) -> bool {
        matches!(self, Self::Signal(_))
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;
