//! Platform capability descriptor
//!
//! Components take a [`Platform`] instead of branching on the host OS, so the
//! whole control plane can be exercised on any host.

/// Windows named pipe served by the routing service
pub const WINDOWS_ROUTING_ENDPOINT: &str = r"\\.\pipe\OutlineServicePipe";

/// Unix domain socket served by the routing daemon
pub const UNIX_ROUTING_ENDPOINT: &str = "/var/run/outline_controller";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Windows,
    Linux,
    MacOs,
    Other,
}

impl OsFamily {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: OsFamily,
    /// Named pipe path (Windows) or Unix socket path of the routing daemon
    pub routing_endpoint: String,
    /// Name of the TUN/TAP device tun2socks attaches to
    pub tun_device_name: String,
    /// Whether the OS delivers suspend/resume notifications we act on
    pub supports_power_events: bool,
}

impl Platform {
    pub fn current() -> Self {
        Self::for_os(OsFamily::current())
    }

    pub fn for_os(os: OsFamily) -> Self {
        let routing_endpoint = match os {
            OsFamily::Windows => WINDOWS_ROUTING_ENDPOINT,
            _ => UNIX_ROUTING_ENDPOINT,
        };
        let tun_device_name = match os {
            OsFamily::Linux => "outline-tun0",
            _ => "outline-tap0",
        };

        Self {
            os,
            routing_endpoint: routing_endpoint.to_string(),
            tun_device_name: tun_device_name.to_string(),
            // The TAP device is closed under tun2socks on Windows suspend.
            supports_power_events: os == OsFamily::Windows,
        }
    }

    pub fn with_routing_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.routing_endpoint = endpoint.into();
        self
    }

    pub fn with_power_events(mut self, enabled: bool) -> Self {
        self.supports_power_events = enabled;
        self
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}
