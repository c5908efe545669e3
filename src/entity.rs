use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Kind of entity exposed to the Remote
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    MediaPlayer,
    Remote,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MediaPlayer => write!(f, "media_player"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Outcome of an entity command, reported to the Remote as an HTTP-like code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    BadRequest,
    NotFound,
    ServerError,
    NotImplemented,
}

impl StatusCode {
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::ServerError => 500,
            Self::NotImplemented => 501,
        }
    }
}

/// Text keyed by language code
pub type LocalizedText = BTreeMap<String, String>;

/// English-only localized text
pub fn en(text: impl Into<String>) -> LocalizedText {
    BTreeMap::from([("en".to_string(), text.into())])
}

/// Entity description published in `available_entities`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EntityDefinition {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub device_id: Option<String>,
    pub features: Vec<String>,
    pub name: LocalizedText,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    pub attributes: Value,
}

/// An entity backed by one receiver session
#[async_trait]
pub trait Entity: Send + Sync {
    fn id(&self) -> &str;

    fn entity_type(&self) -> EntityType;

    fn definition(&self) -> EntityDefinition;

    /// Recompute attributes from the device and publish them
    async fn push_update(&self);

    /// Handle a command from the Remote
    async fn command(&self, cmd_id: &str, params: Option<&Value>) -> StatusCode;
}

/// Why a command id could not be turned into a command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    /// The command id is not part of the entity's vocabulary
    #[error("unsupported command: {0}")]
    Unsupported(String),

    /// A parameter is present but has the wrong shape
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl CommandParseError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unsupported(_) => StatusCode::NotImplemented,
            Self::InvalidParameter(_) => StatusCode::BadRequest,
        }
    }
}

fn param<'a>(params: Option<&'a Value>, name: &str) -> Option<&'a Value> {
    params.and_then(|p| p.get(name)).filter(|v| !v.is_null())
}

/// Integer parameter. Accepts JSON numbers and numeric strings.
pub fn param_int(params: Option<&Value>, name: &str) -> Result<Option<i64>, CommandParseError> {
    let Some(value) = param(params, name) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| CommandParseError::InvalidParameter(name.to_string()))
}

pub fn param_bool(params: Option<&Value>, name: &str) -> Result<Option<bool>, CommandParseError> {
    match param(params, name) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(CommandParseError::InvalidParameter(name.to_string())),
    }
}

pub fn param_str(params: Option<&Value>, name: &str) -> Result<Option<String>, CommandParseError> {
    match param(params, name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(CommandParseError::InvalidParameter(name.to_string())),
    }
}
