//! Outline Core Types
//!
//! Shared data model for the local VPN control plane: the routing daemon's
//! view of connectivity, proxy session credentials, the injected platform
//! descriptor and the platform error-code table shared with native helpers.

mod config;
mod error;
mod platform;
mod types;

pub use config::*;
pub use error::*;
pub use platform::*;
pub use types::*;
