//! Routing service wire types
//!
//! Each message is a single JSON object with camelCase fields.

use std::collections::BTreeMap;

use outline_core::TunnelStatus;
use serde::{Deserialize, Serialize};

/// Message action; responses echo the action of the request they answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoutingServiceAction {
    ConfigureRouting,
    ResetRouting,
    StatusChanged,
    /// Any action this client does not know about
    #[serde(other)]
    Unknown,
}

/// Result code of a routing service operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum RoutingServiceStatusCode {
    Success,
    GenericFailure,
    UnsupportedRoutingTable,
    Other(i32),
}

impl From<i32> for RoutingServiceStatusCode {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::GenericFailure,
            2 => Self::UnsupportedRoutingTable,
            other => Self::Other(other),
        }
    }
}

impl From<RoutingServiceStatusCode> for i32 {
    fn from(code: RoutingServiceStatusCode) -> Self {
        match code {
            RoutingServiceStatusCode::Success => 0,
            RoutingServiceStatusCode::GenericFailure => 1,
            RoutingServiceStatusCode::UnsupportedRoutingTable => 2,
            RoutingServiceStatusCode::Other(other) => other,
        }
    }
}

/// Request parameter: the daemon only understands strings and booleans
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    String(String),
}

/// Request sent to the routing daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingServiceRequest {
    pub action: RoutingServiceAction,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValue>,
}

impl RoutingServiceRequest {
    /// Route all traffic through the TUN device, except traffic to `proxy_ip`
    pub fn configure_routing(proxy_ip: impl Into<String>, is_auto_connect: bool) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("proxyIp".to_string(), ParameterValue::String(proxy_ip.into()));
        parameters.insert(
            "isAutoConnect".to_string(),
            ParameterValue::Bool(is_auto_connect),
        );
        Self {
            action: RoutingServiceAction::ConfigureRouting,
            parameters,
        }
    }

    pub fn reset_routing() -> Self {
        Self {
            action: RoutingServiceAction::ResetRouting,
            parameters: BTreeMap::new(),
        }
    }
}

/// Response or event pushed by the routing daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingServiceResponse {
    pub action: RoutingServiceAction,
    pub status_code: RoutingServiceStatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_status: Option<TunnelStatus>,
}

impl RoutingServiceResponse {
    pub fn is_success(&self) -> bool {
        self.status_code == RoutingServiceStatusCode::Success
    }
}
