//! Outline Logging
//!
//! Installs the global `tracing` subscriber for Outline binaries. `RUST_LOG`
//! takes precedence over the level passed in.

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::{fmt as fmt_layer, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Default filter directive: `level` for everything, raised to at
    /// least debug for the outline crates when `level` is debug or trace.
    pub fn directive(&self) -> String {
        match self {
            Self::Trace | Self::Debug => format!("info,outline={}", self.as_str()),
            _ => self.as_str().to_string(),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

fn filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()))
}

/// Install the global subscriber. Fails if one is already set.
pub fn try_init(level: LogLevel) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(fmt_layer::layer().with_target(false))
        .with(filter(level))
        .try_init()
}

/// Install the global subscriber, ignoring an existing one
pub fn init(level: LogLevel) {
    let _ = try_init(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_directive() {
        assert_eq!(LogLevel::Info.directive(), "info");
        assert_eq!(LogLevel::Debug.directive(), "info,outline=debug");
    }

    #[test]
    fn test_init_twice() {
        init(LogLevel::Warn);
        assert!(try_init(LogLevel::Warn).is_err());
    }
}
