use thiserror::Error;

/// Error codes shared with the native helpers (tun2socks exit codes, plugin
/// results). Values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    NoError = 0,
    Unexpected = 1,
    VpnPermissionNotGranted = 2,
    InvalidServerCredentials = 3,
    UdpRelayNotEnabled = 4,
    ServerUnreachable = 5,
    VpnStartFailure = 6,
    IllegalServerConfiguration = 7,
    ShadowsocksStartFailure = 8,
    ConfigureSystemProxyFailure = 9,
    NoAdminPermissions = 10,
    UnsupportedRoutingTable = 11,
    SystemMisconfigured = 12,
}

impl ErrorCode {
    pub fn from_code(code: i32) -> Option<Self> {
        let code = match code {
            0 => Self::NoError,
            1 => Self::Unexpected,
            2 => Self::VpnPermissionNotGranted,
            3 => Self::InvalidServerCredentials,
            4 => Self::UdpRelayNotEnabled,
            5 => Self::ServerUnreachable,
            6 => Self::VpnStartFailure,
            7 => Self::IllegalServerConfiguration,
            8 => Self::ShadowsocksStartFailure,
            9 => Self::ConfigureSystemProxyFailure,
            10 => Self::NoAdminPermissions,
            11 => Self::UnsupportedRoutingTable,
            12 => Self::SystemMisconfigured,
            _ => return None,
        };
        Some(code)
    }

    pub fn code(&self) -> i32 {
        *self as i32
    }
}

/// Errors originating in native code, typed from an [`ErrorCode`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NativeError {
    #[error("Unexpected error in native code")]
    UnexpectedPluginError,

    #[error("VPN permission not granted")]
    VpnPermissionNotGranted,

    #[error("Invalid server credentials")]
    InvalidServerCredentials,

    #[error("Remote UDP forwarding disabled")]
    RemoteUdpForwardingDisabled,

    #[error("Server unreachable")]
    ServerUnreachable,

    #[error("VPN start failure")]
    VpnStartFailure,

    #[error("Illegal server configuration")]
    IllegalServerConfiguration,

    #[error("Shadowsocks start failure")]
    ShadowsocksStartFailure,

    #[error("Failed to configure system proxy")]
    ConfigureSystemProxyFailure,

    #[error("No admin permissions")]
    NoAdminPermissions,

    #[error("Unsupported routing table")]
    UnsupportedRoutingTable,

    #[error("System misconfigured")]
    SystemConfigurationException,
}

impl NativeError {
    /// Translate an exit/result code reported by a native helper.
    ///
    /// `NoError` and codes outside the table translate to
    /// [`NativeError::UnexpectedPluginError`]: a caller only translates codes
    /// it already knows to be failures.
    pub fn from_error_code(code: i32) -> Self {
        match ErrorCode::from_code(code) {
            Some(ErrorCode::VpnPermissionNotGranted) => Self::VpnPermissionNotGranted,
            Some(ErrorCode::InvalidServerCredentials) => Self::InvalidServerCredentials,
            Some(ErrorCode::UdpRelayNotEnabled) => Self::RemoteUdpForwardingDisabled,
            Some(ErrorCode::ServerUnreachable) => Self::ServerUnreachable,
            Some(ErrorCode::VpnStartFailure) => Self::VpnStartFailure,
            Some(ErrorCode::IllegalServerConfiguration) => Self::IllegalServerConfiguration,
            Some(ErrorCode::ShadowsocksStartFailure) => Self::ShadowsocksStartFailure,
            Some(ErrorCode::ConfigureSystemProxyFailure) => Self::ConfigureSystemProxyFailure,
            Some(ErrorCode::NoAdminPermissions) => Self::NoAdminPermissions,
            Some(ErrorCode::UnsupportedRoutingTable) => Self::UnsupportedRoutingTable,
            Some(ErrorCode::SystemMisconfigured) => Self::SystemConfigurationException,
            Some(ErrorCode::Unexpected) | Some(ErrorCode::NoError) | None => {
                Self::UnexpectedPluginError
            }
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnexpectedPluginError => ErrorCode::Unexpected,
            Self::VpnPermissionNotGranted => ErrorCode::VpnPermissionNotGranted,
            Self::InvalidServerCredentials => ErrorCode::InvalidServerCredentials,
            Self::RemoteUdpForwardingDisabled => ErrorCode::UdpRelayNotEnabled,
            Self::ServerUnreachable => ErrorCode::ServerUnreachable,
            Self::VpnStartFailure => ErrorCode::VpnStartFailure,
            Self::IllegalServerConfiguration => ErrorCode::IllegalServerConfiguration,
            Self::ShadowsocksStartFailure => ErrorCode::ShadowsocksStartFailure,
            Self::ConfigureSystemProxyFailure => ErrorCode::ConfigureSystemProxyFailure,
            Self::NoAdminPermissions => ErrorCode::NoAdminPermissions,
            Self::UnsupportedRoutingTable => ErrorCode::UnsupportedRoutingTable,
            Self::SystemConfigurationException => ErrorCode::SystemMisconfigured,
        }
    }

    /// "Unexpected" native errors, as opposed to expected ones such as bad
    /// credentials. These warrant an error report.
    pub fn is_red_flag(&self) -> bool {
        matches!(
            self,
            Self::ShadowsocksStartFailure
                | Self::ConfigureSystemProxyFailure
                | Self::UnsupportedRoutingTable
                | Self::VpnStartFailure
        )
    }
}
