//! Command line of the tun2socks binary

use outline_core::ShadowsocksSessionConfig;

/// Address of the TUN/TAP device
pub const TUN_DEVICE_IP: &str = "10.0.85.2";

/// Gateway of the virtual network behind the device
pub const VIRTUAL_ROUTER_IP: &str = "10.0.85.1";

pub const VIRTUAL_ROUTER_NETMASK: &str = "255.255.255.0";

/// Resolvers handed to the device, in order of preference
pub const DNS_RESOLVERS: [&str; 2] = ["1.1.1.1", "9.9.9.9"];

/// Written to stderr once tun2socks is forwarding traffic
pub const RUNNING_BANNER: &str = "tun2socks running";

/// Arguments for a tunnel run attached to `device_name`
pub fn tunnel_args(
    device_name: &str,
    config: &ShadowsocksSessionConfig,
    is_udp_enabled: bool,
    debug: bool,
) -> Vec<String> {
    let mut args = vec![
        "-tunName".to_string(),
        device_name.to_string(),
        "-tunAddr".to_string(),
        TUN_DEVICE_IP.to_string(),
        "-tunGw".to_string(),
        VIRTUAL_ROUTER_IP.to_string(),
        "-tunMask".to_string(),
        VIRTUAL_ROUTER_NETMASK.to_string(),
        "-tunDNS".to_string(),
        DNS_RESOLVERS.join(","),
    ];
    push_proxy_args(&mut args, config);
    args.push("-logLevel".to_string());
    args.push(if debug { "debug" } else { "info" }.to_string());
    if !is_udp_enabled {
        args.push("-dnsFallback".to_string());
    }
    args
}

/// Arguments for a one-shot connectivity probe. The TUN flags have no
/// effect in this mode and are left out.
pub fn connectivity_args(config: &ShadowsocksSessionConfig) -> Vec<String> {
    let mut args = Vec::with_capacity(11);
    push_proxy_args(&mut args, config);
    args.push("-checkConnectivity".to_string());
    args
}

fn push_proxy_args(args: &mut Vec<String>, config: &ShadowsocksSessionConfig) {
    args.extend([
        "-proxyHost".to_string(),
        config.host.clone(),
        "-proxyPort".to_string(),
        config.port.to_string(),
        "-proxyPassword".to_string(),
        config.password.clone(),
        "-proxyCipher".to_string(),
        config.method.clone(),
        "-proxyPrefix".to_string(),
        config.prefix.clone().unwrap_or_default(),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ShadowsocksSessionConfig {
        ShadowsocksSessionConfig::new("203.0.113.7", 8388, "chacha20-ietf-poly1305", "secret")
    }

    fn value_of<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|arg| arg == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_tunnel_args() {
        let args = tunnel_args("outline-tun0", &config(), true, false);
        assert_eq!(value_of(&args, "-tunName"), Some("outline-tun0"));
        assert_eq!(value_of(&args, "-tunAddr"), Some("10.0.85.2"));
        assert_eq!(value_of(&args, "-tunGw"), Some("10.0.85.1"));
        assert_eq!(value_of(&args, "-tunMask"), Some("255.255.255.0"));
        assert_eq!(value_of(&args, "-tunDNS"), Some("1.1.1.1,9.9.9.9"));
        assert_eq!(value_of(&args, "-proxyHost"), Some("203.0.113.7"));
        assert_eq!(value_of(&args, "-proxyPort"), Some("8388"));
        assert_eq!(value_of(&args, "-proxyPassword"), Some("secret"));
        assert_eq!(value_of(&args, "-proxyCipher"), Some("chacha20-ietf-poly1305"));
        assert_eq!(value_of(&args, "-proxyPrefix"), Some(""));
        assert_eq!(value_of(&args, "-logLevel"), Some("info"));
        assert!(!args.contains(&"-dnsFallback".to_string()));
        assert!(!args.contains(&"-checkConnectivity".to_string()));
    }

    #[test]
    fn test_dns_fallback_without_udp() {
        let args = tunnel_args("outline-tap0", &config(), false, true);
        assert_eq!(args.last().map(String::as_str), Some("-dnsFallback"));
        assert_eq!(value_of(&args, "-logLevel"), Some("debug"));
    }

    #[test]
    fn test_prefix_passed_through() {
        let config = config().with_prefix("\u{16}\u{03}\u{01}");
        let args = tunnel_args("outline-tun0", &config, true, false);
        assert_eq!(value_of(&args, "-proxyPrefix"), Some("\u{16}\u{03}\u{01}"));
    }

    #[test]
    fn test_connectivity_args() {
        let args = connectivity_args(&config());
        assert_eq!(args.len(), 11);
        assert_eq!(args.last().map(String::as_str), Some("-checkConnectivity"));
        assert_eq!(value_of(&args, "-proxyHost"), Some("203.0.113.7"));
        assert!(!args.iter().any(|arg| arg.starts_with("-tun")));
        assert!(!args.contains(&"-dnsFallback".to_string()));
    }
}
