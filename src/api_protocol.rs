//! Message types of the Remote's integration API.

use crate::entity::StatusCode;
use crate::entity_store::{DeviceState, EntityChange};
use crate::setup::SetupAction;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Message kind on the wire
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Req,
    Resp,
    Event,
}

/// Any message received from the Remote
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub kind: Kind,
    #[serde(default)]
    pub id: Option<u64>,
    pub msg: String,
    #[serde(default)]
    pub msg_data: Option<Value>,
}

/// Event category
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    Device,
    Entity,
}

/// Any message sent to the Remote
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Resp {
        req_id: u64,
        code: u16,
        msg: String,
        msg_data: Value,
    },
    Event {
        msg: String,
        cat: EventCategory,
        msg_data: Value,
    },
}

impl OutgoingMessage {
    pub fn response(req_id: u64, msg: &str, msg_data: Value) -> Self {
        Self::Resp {
            req_id,
            code: StatusCode::Ok.code(),
            msg: msg.to_string(),
            msg_data,
        }
    }

    /// Bare `result` response carrying only a status code
    pub fn result(req_id: u64, status: StatusCode) -> Self {
        Self::Resp {
            req_id,
            code: status.code(),
            msg: "result".to_string(),
            msg_data: json!({}),
        }
    }

    pub fn authentication() -> Self {
        Self::response(0, "authentication", json!({}))
    }

    pub fn entity_change(change: &EntityChange) -> Self {
        Self::Event {
            msg: "entity_change".to_string(),
            cat: EventCategory::Entity,
            msg_data: json!({
                "entity_type": change.entity_type,
                "entity_id": change.entity_id,
                "attributes": change.attributes,
            }),
        }
    }

    pub fn device_state(state: DeviceState) -> Self {
        Self::Event {
            msg: "device_state".to_string(),
            cat: EventCategory::Device,
            msg_data: json!({ "state": state }),
        }
    }

    fn setup_change(msg_data: Value) -> Self {
        Self::Event {
            msg: "driver_setup_change".to_string(),
            cat: EventCategory::Device,
            msg_data,
        }
    }

    /// Setup has started and is in progress
    pub fn setup_progress() -> Self {
        Self::setup_change(json!({ "event_type": "SETUP", "state": "SETUP" }))
    }

    /// Event reporting where a setup step ended up
    pub fn setup_outcome(action: &SetupAction) -> Self {
        match action {
            SetupAction::Complete => Self::setup_change(json!({ "event_type": "STOP", "state": "OK" })),
            SetupAction::RequestUserInput { title, settings } => Self::setup_change(json!({
                "event_type": "SETUP",
                "state": "WAIT_USER_ACTION",
                "require_user_action": { "input": { "title": title, "settings": settings } },
            })),
            SetupAction::Error(kind) => Self::setup_change(json!({
                "event_type": "STOP",
                "state": "ERROR",
                "error": kind,
            })),
        }
    }
}

/// Request from the Remote, parsed from `msg` and `msg_data`
#[derive(Debug, Clone, PartialEq)]
pub enum ApiRequest {
    Authentication,
    GetDriverVersion,
    GetDriverMetadata,
    GetDeviceState,
    GetAvailableEntities,
    GetEntityStates,
    SubscribeEvents(Vec<String>),
    UnsubscribeEvents(Vec<String>),
    EntityCommand {
        entity_id: String,
        cmd_id: String,
        params: Option<Value>,
    },
    SetupDriver(Map<String, Value>),
    SetDriverUserData(SetDriverUserData),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetDriverUserData {
    InputValues(Map<String, Value>),
    Confirm(bool),
}

#[derive(Deserialize)]
struct EntityIds {
    #[serde(default)]
    entity_ids: Vec<String>,
}

#[derive(Deserialize)]
struct EntityCommandData {
    entity_id: String,
    cmd_id: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Deserialize)]
struct SetupDriverData {
    #[serde(default)]
    setup_data: Map<String, Value>,
}

#[derive(Deserialize)]
struct UserData {
    #[serde(default)]
    input_values: Option<Map<String, Value>>,
    #[serde(default)]
    confirm: Option<bool>,
}

/// Why a request could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("unsupported request: {0}")]
    UnknownMessage(String),

    #[error("invalid request data: {0}")]
    InvalidData(String),
}

impl ApiRequest {
    pub fn parse(msg: &str, msg_data: Option<Value>) -> Result<Self, RequestError> {
        let data = msg_data.unwrap_or_else(|| json!({}));
        let invalid = |e: serde_json::Error| RequestError::InvalidData(format!("{}: {}", msg, e));

        let request = match msg {
            "authentication" => Self::Authentication,
            "get_driver_version" => Self::GetDriverVersion,
            "get_driver_metadata" => Self::GetDriverMetadata,
            "get_device_state" => Self::GetDeviceState,
            "get_available_entities" => Self::GetAvailableEntities,
            "get_entity_states" => Self::GetEntityStates,
            "subscribe_events" => {
                Self::SubscribeEvents(serde_json::from_value::<EntityIds>(data).map_err(invalid)?.entity_ids)
            }
            "unsubscribe_events" => {
                Self::UnsubscribeEvents(serde_json::from_value::<EntityIds>(data).map_err(invalid)?.entity_ids)
            }
            "entity_command" => {
                let command: EntityCommandData = serde_json::from_value(data).map_err(invalid)?;
                Self::EntityCommand {
                    entity_id: command.entity_id,
                    cmd_id: command.cmd_id,
                    params: command.params,
                }
            }
            "setup_driver" => {
                Self::SetupDriver(serde_json::from_value::<SetupDriverData>(data).map_err(invalid)?.setup_data)
            }
            "set_driver_user_data" => {
                let user_data: UserData = serde_json::from_value(data).map_err(invalid)?;
                match (user_data.input_values, user_data.confirm) {
                    (Some(values), _) => Self::SetDriverUserData(SetDriverUserData::InputValues(values)),
                    (None, Some(confirm)) => Self::SetDriverUserData(SetDriverUserData::Confirm(confirm)),
                    (None, None) => {
                        return Err(RequestError::InvalidData(
                            "set_driver_user_data: missing input_values".to_string(),
                        ))
                    }
                }
            }
            other => return Err(RequestError::UnknownMessage(other.to_string())),
        };
        Ok(request)
    }
}

/// Event from the Remote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiEvent {
    Connect,
    Disconnect,
    EnterStandby,
    ExitStandby,
    AbortDriverSetup,
}

impl ApiEvent {
    pub fn parse(msg: &str) -> Option<Self> {
        match msg {
            "connect" => Some(Self::Connect),
            "disconnect" => Some(Self::Disconnect),
            "enter_standby" => Some(Self::EnterStandby),
            "exit_standby" => Some(Self::ExitStandby),
            "abort_driver_setup" => Some(Self::AbortDriverSetup),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use crate::setup::SetupErrorKind;

    #[test]
    fn requests_parse_from_envelopes() {
        let message: IncomingMessage = serde_json::from_str(
            r#"{"kind":"req","id":7,"msg":"entity_command","msg_data":{"entity_id":"remote.x","cmd_id":"send_cmd","params":{"command":"PLAY"}}}"#,
        )
        .unwrap();
        assert_eq!(message.kind, Kind::Req);
        assert_eq!(message.id, Some(7));

        let request = ApiRequest::parse(&message.msg, message.msg_data).unwrap();
        assert_eq!(
            request,
            ApiRequest::EntityCommand {
                entity_id: "remote.x".to_string(),
                cmd_id: "send_cmd".to_string(),
                params: Some(json!({ "command": "PLAY" })),
            }
        );
    }

    #[test]
    fn unknown_and_malformed_requests_are_distinguished() {
        assert_eq!(
            ApiRequest::parse("get_everything", None),
            Err(RequestError::UnknownMessage("get_everything".to_string()))
        );
        assert!(matches!(
            ApiRequest::parse("entity_command", Some(json!({ "entity_id": 3 }))),
            Err(RequestError::InvalidData(_))
        ));
        assert_eq!(
            ApiRequest::parse("subscribe_events", None),
            Ok(ApiRequest::SubscribeEvents(Vec::new()))
        );
        assert_eq!(
            RequestError::UnknownMessage("get_everything".to_string()).to_string(),
            "unsupported request: get_everything"
        );
    }

    #[test]
    fn user_data_prefers_input_values() {
        let parsed = ApiRequest::parse(
            "set_driver_user_data",
            Some(json!({ "input_values": { "device_0_ip": "10.0.0.1" } })),
        )
        .unwrap();
        assert!(matches!(
            parsed,
            ApiRequest::SetDriverUserData(SetDriverUserData::InputValues(values)) if values.len() == 1
        ));
        assert_eq!(
            ApiRequest::parse("set_driver_user_data", Some(json!({ "confirm": true }))),
            Ok(ApiRequest::SetDriverUserData(SetDriverUserData::Confirm(true)))
        );
    }

    #[test]
    fn outgoing_messages_use_envelope_layout() {
        let change = EntityChange {
            entity_type: EntityType::MediaPlayer,
            entity_id: "media_player.a".to_string(),
            attributes: json!({ "volume": 10 }),
        };
        assert_eq!(
            serde_json::to_value(OutgoingMessage::entity_change(&change)).unwrap(),
            json!({
                "kind": "event",
                "msg": "entity_change",
                "cat": "ENTITY",
                "msg_data": {
                    "entity_type": "media_player",
                    "entity_id": "media_player.a",
                    "attributes": { "volume": 10 }
                }
            })
        );
        assert_eq!(
            serde_json::to_value(OutgoingMessage::result(4, StatusCode::NotImplemented)).unwrap(),
            json!({ "kind": "resp", "req_id": 4, "code": 501, "msg": "result", "msg_data": {} })
        );
    }

    #[test]
    fn setup_outcomes_map_to_setup_change_events() {
        let error = OutgoingMessage::setup_outcome(&SetupAction::Error(SetupErrorKind::ConnectionRefused));
        let value = serde_json::to_value(error).unwrap();
        assert_eq!(value["msg_data"]["state"], "ERROR");
        assert_eq!(value["msg_data"]["error"], "CONNECTION_REFUSED");

        let input = SetupAction::RequestUserInput {
            title: crate::entity::en("Configure"),
            settings: vec![json!({ "id": "device_0_ip" })],
        };
        let value = serde_json::to_value(OutgoingMessage::setup_outcome(&input)).unwrap();
        assert_eq!(value["msg_data"]["state"], "WAIT_USER_ACTION");
        assert_eq!(value["msg_data"]["require_user_action"]["input"]["title"]["en"], "Configure");
    }
}
