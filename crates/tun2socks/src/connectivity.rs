//! UDP connectivity probe

use std::path::Path;
use std::time::Duration;

use outline_core::{ErrorCode, NativeError, ShadowsocksSessionConfig};
use outline_process::{ChildProcessHelper, ProcessError, ProcessResult};
use tracing::{debug, error};

use crate::args::connectivity_args;
use crate::{ConnectivityError, Result};

/// Run tun2socks in connectivity-check mode.
///
/// Returns whether the proxy relays UDP. Uses its own short-lived process,
/// so a running tunnel is left alone.
pub async fn check_connectivity(
    binary: &Path,
    config: &ShadowsocksSessionConfig,
    debug_mode: bool,
    timeout: Option<Duration>,
) -> Result<bool> {
    debug!("Using tun2socks to check connectivity");
    let helper = ChildProcessHelper::new(binary);
    if debug_mode {
        helper.enable_debug_mode();
    }

    let probe = helper.launch(connectivity_args(config));
    let outcome = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, probe).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Connectivity check timed out after {:?}", timeout);
                let _ = helper.stop().await;
                return Err(ConnectivityError::Timeout(timeout));
            }
        },
        None => probe.await,
    };

    let result = interpret_probe_outcome(outcome);
    if let Err(e) = &result {
        error!("Connectivity check error: {}", e);
    }
    result
}

/// Map the probe's termination to UDP support.
///
/// Exit code 0 means UDP works; [`ErrorCode::UdpRelayNotEnabled`] means the
/// proxy only relays TCP. Any other exit code is a platform error.
pub fn interpret_probe_outcome(outcome: ProcessResult) -> Result<bool> {
    match outcome {
        Ok(()) => Ok(true),
        Err(ProcessError::ExitCode(code)) if code == ErrorCode::UdpRelayNotEnabled.code() => {
            Ok(false)
        }
        Err(ProcessError::ExitCode(code)) => Err(ConnectivityError::Platform(
            NativeError::from_error_code(code),
        )),
        Err(e) => Err(ConnectivityError::Unexpected(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_zero_supports_udp() {
        assert_eq!(interpret_probe_outcome(Ok(())), Ok(true));
    }

    #[test]
    fn test_udp_relay_not_enabled() {
        assert_eq!(interpret_probe_outcome(Err(ProcessError::ExitCode(4))), Ok(false));
    }

    #[test]
    fn test_other_exit_codes_translated() {
        assert_eq!(
            interpret_probe_outcome(Err(ProcessError::ExitCode(3))),
            Err(ConnectivityError::Platform(NativeError::InvalidServerCredentials))
        );
        assert_eq!(
            interpret_probe_outcome(Err(ProcessError::ExitCode(5))),
            Err(ConnectivityError::Platform(NativeError::ServerUnreachable))
        );
        assert_eq!(
            interpret_probe_outcome(Err(ProcessError::ExitCode(99))),
            Err(ConnectivityError::Platform(NativeError::UnexpectedPluginError))
        );
    }

    #[test]
    fn test_non_exit_failures_unexpected() {
        let result = interpret_probe_outcome(Err(ProcessError::Signal("SIGKILL".to_string())));
        assert!(matches!(result, Err(ConnectivityError::Unexpected(_))));
        assert_eq!(
            result.unwrap_err().native_error(),
            NativeError::UnexpectedPluginError
        );
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::test_support::FakeBinary;

        fn config() -> ShadowsocksSessionConfig {
            ShadowsocksSessionConfig::new("203.0.113.7", 8388, "aes-256-gcm", "secret")
        }

        #[tokio::test]
        async fn test_probe_udp_supported() {
            let fake = FakeBinary::new("echo \"$@\" > \"$DIR/args\"\nexit 0");
            let result = check_connectivity(fake.path(), &config(), false, None).await;
            assert_eq!(result, Ok(true));
            assert!(fake.read("args").trim_end().ends_with("-checkConnectivity"));
        }

        #[tokio::test]
        async fn test_probe_udp_not_enabled() {
            let fake = FakeBinary::new("exit 4");
            let result = check_connectivity(fake.path(), &config(), false, None).await;
            assert_eq!(result, Ok(false));
        }

        #[tokio::test]
        async fn test_probe_bad_credentials() {
            let fake = FakeBinary::new("exit 3");
            let result = check_connectivity(fake.path(), &config(), false, None).await;
            assert_eq!(
                result,
                Err(ConnectivityError::Platform(NativeError::InvalidServerCredentials))
            );
        }

        #[tokio::test]
        async fn test_probe_missing_binary() {
            let result = check_connectivity(
                Path::new("/nonexistent/tun2socks"),
                &config(),
                false,
                None,
            )
            .await;
            assert!(matches!(result, Err(ConnectivityError::Unexpected(_))));
        }

        #[tokio::test]
        async fn test_probe_timeout() {
            let fake = FakeBinary::new("exec sleep 30");
            let timeout = Duration::from_millis(200);
            let result = check_connectivity(fake.path(), &config(), false, Some(timeout)).await;
            assert_eq!(result, Err(ConnectivityError::Timeout(timeout)));
        }
    }
}
