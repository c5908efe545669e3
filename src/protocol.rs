use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Zone addressed by every zone request. Multi-zone units are not supported.
pub const ZONE: &str = "ZONE1";

/// Update interval requested when subscribing to an endpoint
const UPDATE_INTERVAL: u32 = 100;

/// StreamMagic endpoint paths
pub mod paths {
    pub const INFO: &str = "/system/info";
    pub const SOURCES: &str = "/system/sources";
    pub const POWER: &str = "/system/power";
    pub const ZONE_STATE: &str = "/zone/state";
    pub const PLAY_STATE: &str = "/zone/play_state";
    pub const POSITION: &str = "/zone/play_state/position";
    pub const NOW_PLAYING: &str = "/zone/now_playing";
    pub const PLAY_CONTROL: &str = "/zone/play_control";
}

/// Endpoints the client keeps a live subscription on
pub const SUBSCRIBED_PATHS: [&str; 4] = [
    paths::ZONE_STATE,
    paths::PLAY_STATE,
    paths::POSITION,
    paths::NOW_PLAYING,
];

/// API request structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub path: String,
    pub params: Value,
}

/// Message sent by the device, either a response or a pushed update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ResponseParams>,
}

/// Payload wrapper of a device message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Message types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Response,
    Update,
    #[serde(other)]
    Unknown,
}

impl Request {
    /// Create a new request for `path`
    pub fn new(path: impl Into<String>, params: Value) -> Self {
        Self {
            path: path.into(),
            params,
        }
    }

    /// Create a request addressed to the default zone
    pub fn zone(path: impl Into<String>) -> Self {
        Self::new(path, json!({ "zone": ZONE }))
    }

    /// Create a subscription request for `path`
    pub fn subscribe(path: impl Into<String>) -> Self {
        let path = path.into();
        let params = if path.starts_with("/zone") {
            json!({ "zone": ZONE, "update": UPDATE_INTERVAL })
        } else {
            json!({ "update": UPDATE_INTERVAL })
        };
        Self { path, params }
    }
}

impl Response {
    /// Check if the device reported a failure
    pub fn has_errors(&self) -> bool {
        self.result.is_some_and(|code| code != 200)
    }

    /// Get the error message, if any
    pub fn error_message(&self) -> Option<String> {
        if !self.has_errors() {
            return None;
        }
        Some(match (&self.message, self.result) {
            (Some(message), _) => message.clone(),
            (None, Some(code)) => format!("result {}", code),
            (None, None) => "unknown error".to_string(),
        })
    }

    /// Get the `params.data` payload
    pub fn data(&self) -> Option<&Value> {
        self.params.as_ref().and_then(|p| p.data.as_ref())
    }
}
