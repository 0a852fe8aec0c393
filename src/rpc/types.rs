// src/rpc/types.rs
//
// Newline-delimited JSON envelopes. One request per line, one response per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod methods {
    pub const START: &str = "start";
    pub const STOP: &str = "stop";
    pub const ADD_PEER: &str = "add_peer";
    pub const REMOVE_PEER: &str = "remove_peer";
}

pub mod codes {
    pub const NOT_STARTED: &str = "not_started";
    pub const START_IN_PROGRESS: &str = "start_in_progress";
    pub const TRANSPORT: &str = "transport";
    pub const MALFORMED_PEER_REF: &str = "malformed_peer_ref";
    pub const NOT_RUNNING: &str = "not_running";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const BUSY: &str = "busy";
    pub const CANCELLED: &str = "cancelled";
    pub const UNKNOWN_METHOD: &str = "unknown_method";
    pub const BAD_REQUEST: &str = "bad_request";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, code: &str, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcErrorBody {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPeerParams {
    pub enode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovePeerParams {
    pub enode: String,
}
