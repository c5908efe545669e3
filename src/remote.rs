use crate::config::DeviceConfig;
use crate::entity::{
    en, param_int, param_str, CommandParseError, Entity, EntityDefinition, EntityType, StatusCode,
};
use crate::entity_store::EntityStore;
use crate::error::Result;
use crate::session::{CambridgeSession, StateObserver};
use crate::subscription::StateUpdate;
use crate::ui::{Button, ButtonMapping, UiItem, UiPage};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const MAX_SOURCE_ICONS: usize = 12;
const SOURCE_ICONS_PER_ROW: u8 = 4;
const SOURCE_PREFIX: &str = "SOURCE_";

const FIXED_COMMANDS: [&str; 14] = [
    "POWER_ON",
    "POWER_OFF",
    "POWER_TOGGLE",
    "PLAY",
    "PAUSE",
    "PLAY_PAUSE",
    "STOP",
    "NEXT",
    "PREVIOUS",
    "VOLUME_UP",
    "VOLUME_DOWN",
    "MUTE",
    "UNMUTE",
    "MUTE_TOGGLE",
];

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteState {
    On,
    Off,
    #[default]
    Unavailable,
}

/// Named command sent through `send_cmd`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimpleCommand {
    PowerOn,
    PowerOff,
    PowerToggle,
    Play,
    Pause,
    PlayPause,
    Stop,
    Next,
    Previous,
    VolumeUp,
    VolumeDown,
    Mute,
    Unmute,
    MuteToggle,
    /// Select the source with this device id
    Source(String),
}

impl SimpleCommand {
    /// Case-insensitive parse against the known source ids
    pub fn parse(command: &str, source_ids: &[String]) -> Option<Self> {
        let upper = command.trim().to_ascii_uppercase();
        let parsed = match upper.as_str() {
            "POWER_ON" => Self::PowerOn,
            "POWER_OFF" => Self::PowerOff,
            "POWER_TOGGLE" => Self::PowerToggle,
            "PLAY" => Self::Play,
            "PAUSE" => Self::Pause,
            "PLAY_PAUSE" => Self::PlayPause,
            "STOP" => Self::Stop,
            "NEXT" => Self::Next,
            "PREVIOUS" => Self::Previous,
            "VOLUME_UP" => Self::VolumeUp,
            "VOLUME_DOWN" => Self::VolumeDown,
            "MUTE" => Self::Mute,
            "UNMUTE" => Self::Unmute,
            "MUTE_TOGGLE" => Self::MuteToggle,
            other => {
                let wanted = other.strip_prefix(SOURCE_PREFIX)?;
                let id = source_ids
                    .iter()
                    .find(|id| id.to_ascii_uppercase() == wanted)?;
                Self::Source(id.clone())
            }
        };
        Some(parsed)
    }
}

/// Commands the remote entity understands
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCommand {
    On,
    Off,
    Toggle,
    SendCmd(Option<String>),
    SendCmdSequence {
        sequence: Vec<String>,
        delay: Duration,
        repeat: u32,
    },
}

impl RemoteCommand {
    pub fn parse(cmd_id: &str, params: Option<&Value>) -> std::result::Result<Self, CommandParseError> {
        let command = match cmd_id {
            "on" => Self::On,
            "off" => Self::Off,
            "toggle" => Self::Toggle,
            "send_cmd" => Self::SendCmd(param_str(params, "command")?),
            "send_cmd_sequence" => {
                let sequence = match params.and_then(|p| p.get("sequence")) {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|item| item.as_str().map(str::to_string))
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| CommandParseError::InvalidParameter("sequence".to_string()))?,
                    Some(_) => return Err(CommandParseError::InvalidParameter("sequence".to_string())),
                };
                let delay = param_int(params, "delay")?.unwrap_or(0).max(0) as u64;
                let repeat = u32::try_from(param_int(params, "repeat")?.unwrap_or(1).max(0))
                    .map_err(|_| CommandParseError::InvalidParameter("repeat".to_string()))?;
                Self::SendCmdSequence {
                    sequence,
                    delay: Duration::from_millis(delay),
                    repeat,
                }
            }
            other => return Err(CommandParseError::Unsupported(other.to_string())),
        };
        Ok(command)
    }
}

/// Remote entity with simple commands, button mapping and UI pages
pub struct CambridgeRemote {
    id: String,
    name: String,
    device_id: String,
    session: Arc<CambridgeSession>,
    store: Arc<EntityStore>,
    source_ids: Vec<String>,
    state: Mutex<RemoteState>,
}

impl CambridgeRemote {
    /// The source vocabulary is read from the session once, here
    pub fn new(session: Arc<CambridgeSession>, device_config: &DeviceConfig, store: Arc<EntityStore>) -> Self {
        let source_ids = session
            .get_sources()
            .map(|sources| sources.into_iter().map(|s| s.id).collect())
            .unwrap_or_default();

        Self {
            id: format!("remote.{}", device_config.device_id),
            name: format!("{} Remote", device_config.name),
            device_id: device_config.device_id.clone(),
            session,
            store,
            source_ids,
            state: Mutex::new(RemoteState::Unavailable),
        }
    }

    pub fn state(&self) -> RemoteState {
        *self.state.lock()
    }

    pub fn simple_commands(&self) -> Vec<String> {
        FIXED_COMMANDS
            .iter()
            .map(|c| c.to_string())
            .chain(self.source_ids.iter().map(|id| source_command(id)))
            .collect()
    }

    pub fn button_mapping() -> Vec<ButtonMapping> {
        vec![
            ButtonMapping::short(Button::Power, "POWER_TOGGLE"),
            ButtonMapping::short(Button::VolumeUp, "VOLUME_UP"),
            ButtonMapping::short(Button::VolumeDown, "VOLUME_DOWN"),
            ButtonMapping::short(Button::Mute, "MUTE_TOGGLE"),
            ButtonMapping::short(Button::Play, "PLAY_PAUSE"),
            ButtonMapping::short(Button::Next, "NEXT"),
            ButtonMapping::short(Button::Prev, "PREVIOUS"),
        ]
    }

    pub fn ui_pages(&self) -> Vec<UiPage> {
        let mut main = UiPage::new("main", "Cambridge Audio").with_grid(4, 3);
        main.add(UiItem::icon("uc:power-on", 0, 0, "POWER_ON"));
        main.add(UiItem::icon("uc:power-off", 1, 0, "POWER_OFF"));
        main.add(UiItem::icon("uc:up-arrow", 2, 0, "VOLUME_UP"));
        main.add(UiItem::icon("uc:down-arrow", 3, 0, "VOLUME_DOWN"));
        main.add(UiItem::icon("uc:play", 0, 1, "PLAY"));
        main.add(UiItem::icon("uc:pause", 1, 1, "PAUSE"));
        main.add(UiItem::icon("uc:stop", 2, 1, "STOP"));
        main.add(UiItem::icon("uc:speaker-mute", 3, 1, "MUTE_TOGGLE"));
        main.add(UiItem::icon("uc:prev", 0, 2, "PREVIOUS"));
        main.add(UiItem::icon("uc:play-pause", 1, 2, "PLAY_PAUSE").with_size(2, 1));
        main.add(UiItem::icon("uc:next", 3, 2, "NEXT"));

        let mut pages = vec![main];

        if !self.source_ids.is_empty() {
            let mut sources = UiPage::new("sources", "Sources");
            for (i, id) in self.source_ids.iter().take(MAX_SOURCE_ICONS).enumerate() {
                let i = i as u8;
                sources.add(UiItem::icon(
                    "uc:input",
                    i % SOURCE_ICONS_PER_ROW,
                    i / SOURCE_ICONS_PER_ROW,
                    source_command(id),
                ));
            }
            pages.push(sources);
        }

        pages
    }

    fn publish(&self, state: RemoteState) {
        *self.state.lock() = state;
        self.store
            .update_attributes(&self.id, EntityType::Remote, json!({ "state": state }));
    }

    async fn power_toggle(&self) -> Result<()> {
        if self.state() == RemoteState::Off {
            self.session.power_on().await
        } else {
            self.session.power_off().await
        }
    }

    async fn run_simple(&self, command: &str) -> Result<()> {
        let Some(parsed) = SimpleCommand::parse(command, &self.source_ids) else {
            tracing::warn!("Unknown simple command: {}", command);
            return Ok(());
        };

        match parsed {
            SimpleCommand::PowerOn => self.session.power_on().await,
            SimpleCommand::PowerOff => self.session.power_off().await,
            SimpleCommand::PowerToggle => self.power_toggle().await,
            SimpleCommand::Play => self.session.play().await,
            SimpleCommand::Pause => self.session.pause().await,
            SimpleCommand::PlayPause => self.session.play_pause().await,
            SimpleCommand::Stop => self.session.stop().await,
            SimpleCommand::Next => self.session.next_track().await,
            SimpleCommand::Previous => self.session.previous_track().await,
            SimpleCommand::VolumeUp => self.session.volume_up().await,
            SimpleCommand::VolumeDown => self.session.volume_down().await,
            SimpleCommand::Mute => self.session.set_mute(true).await,
            SimpleCommand::Unmute => self.session.set_mute(false).await,
            SimpleCommand::MuteToggle => {
                let muted = self.session.get_state()?.mute;
                self.session.set_mute(!muted).await
            }
            SimpleCommand::Source(id) => self.session.set_source_by_id(&id).await,
        }
    }

    async fn dispatch(&self, command: RemoteCommand) -> Result<()> {
        match command {
            RemoteCommand::On => self.session.power_on().await,
            RemoteCommand::Off => self.session.power_off().await,
            RemoteCommand::Toggle => self.power_toggle().await,
            RemoteCommand::SendCmd(Some(command)) => self.run_simple(&command).await,
            RemoteCommand::SendCmd(None) => Ok(()),
            RemoteCommand::SendCmdSequence {
                sequence,
                delay,
                repeat,
            } => {
                let mut outcome = Ok(());
                for _ in 0..repeat {
                    for command in &sequence {
                        outcome = self.run_simple(command).await;
                        if let Err(e) = &outcome {
                            tracing::error!("[{}] Sequence command {} failed: {}", self.id, command, e);
                        }
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
                outcome
            }
        }
    }
}

fn source_command(source_id: &str) -> String {
    format!("{}{}", SOURCE_PREFIX, source_id.to_ascii_uppercase())
}

#[async_trait]
impl Entity for CambridgeRemote {
    fn id(&self) -> &str {
        &self.id
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Remote
    }

    fn definition(&self) -> EntityDefinition {
        EntityDefinition {
            entity_id: self.id.clone(),
            entity_type: EntityType::Remote,
            device_id: Some(self.device_id.clone()),
            features: vec!["on_off".to_string(), "toggle".to_string(), "send_cmd".to_string()],
            name: en(self.name.clone()),
            device_class: None,
            options: Some(json!({
                "simple_commands": self.simple_commands(),
                "button_mapping": Self::button_mapping(),
                "user_interface": { "pages": self.ui_pages() },
            })),
            attributes: json!({ "state": self.state() }),
        }
    }

    async fn push_update(&self) {
        if !self.session.is_connected() {
            self.publish(RemoteState::Unavailable);
            return;
        }

        match self.session.get_state() {
            Ok(state) if state.power => self.publish(RemoteState::On),
            Ok(_) => self.publish(RemoteState::Off),
            Err(e) => tracing::error!("Error updating remote state for {}: {}", self.id, e),
        }
    }

    async fn command(&self, cmd_id: &str, params: Option<&Value>) -> StatusCode {
        tracing::info!("[{}] Received command: {}", self.id, cmd_id);

        let command = match RemoteCommand::parse(cmd_id, params) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("[{}] {}", self.id, e);
                return e.status();
            }
        };

        match self.dispatch(command).await {
            Ok(()) => {
                self.push_update().await;
                StatusCode::Ok
            }
            Err(e) => {
                tracing::error!("Command execution failed for {}: {}", cmd_id, e);
                StatusCode::ServerError
            }
        }
    }
}

#[async_trait]
impl StateObserver for CambridgeRemote {
    async fn on_state_update(&self, _update: StateUpdate) {
        self.push_update().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{sample_snapshot, source, MockConnector, MockDevice};

    async fn connected_remote() -> (CambridgeRemote, Arc<MockDevice>, Arc<EntityStore>) {
        let connector = Arc::new(MockConnector::new());
        let device = connector.add("10.0.0.5", MockDevice::new(sample_snapshot()));
        let config = DeviceConfig::new("10.0.0.5", "Living Room");
        let session = Arc::new(CambridgeSession::new(config.clone(), connector));
        assert!(session.connect().await);
        let store = Arc::new(EntityStore::new());
        let remote = CambridgeRemote::new(session, &config, store.clone());
        remote.push_update().await;
        (remote, device, store)
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn simple_commands_are_case_insensitive() {
        let sources = ids(&["SPOTIFY"]);
        assert_eq!(SimpleCommand::parse("mute_toggle", &sources), Some(SimpleCommand::MuteToggle));
        assert_eq!(SimpleCommand::parse("Play_Pause", &sources), Some(SimpleCommand::PlayPause));
        assert_eq!(
            SimpleCommand::parse("source_spotify", &sources),
            Some(SimpleCommand::Source("SPOTIFY".to_string()))
        );
    }

    #[test]
    fn source_commands_resolve_only_known_ids() {
        let sources = ids(&["usb_audio"]);
        assert_eq!(
            SimpleCommand::parse("SOURCE_USB_AUDIO", &sources),
            Some(SimpleCommand::Source("usb_audio".to_string()))
        );
        assert_eq!(SimpleCommand::parse("SOURCE_HDMI", &sources), None);
        assert_eq!(SimpleCommand::parse("EJECT", &sources), None);
    }

    #[test]
    fn sequence_parameters_have_defaults() {
        let parsed = RemoteCommand::parse("send_cmd_sequence", Some(&json!({ "sequence": ["PLAY"] })));
        assert_eq!(
            parsed,
            Ok(RemoteCommand::SendCmdSequence {
                sequence: vec!["PLAY".to_string()],
                delay: Duration::ZERO,
                repeat: 1,
            })
        );
        assert!(RemoteCommand::parse("send_cmd_sequence", Some(&json!({ "sequence": "PLAY" }))).is_err());
        assert_eq!(
            RemoteCommand::parse(
                "send_cmd_sequence",
                Some(&json!({ "sequence": ["PLAY"], "repeat": 5_000_000_000_u64 }))
            ),
            Err(CommandParseError::InvalidParameter("repeat".to_string()))
        );
        assert!(matches!(
            RemoteCommand::parse("launch", None),
            Err(CommandParseError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn state_follows_power_and_connection() {
        let (remote, device, store) = connected_remote().await;
        assert_eq!(store.attributes(remote.id()).unwrap(), json!({ "state": "ON" }));

        device.update(|s| s.state.power = false);
        remote.push_update().await;
        assert_eq!(remote.state(), RemoteState::Off);

        device.set_connected(false);
        remote.push_update().await;
        assert_eq!(store.attributes(remote.id()).unwrap(), json!({ "state": "UNAVAILABLE" }));
    }

    #[tokio::test]
    async fn vocabulary_includes_sources_known_at_construction() {
        let (remote, device, _store) = connected_remote().await;
        device.update(|s| s.sources.push(source("HDMI", "HDMI")));

        let commands = remote.simple_commands();
        assert_eq!(commands.len(), 17);
        assert!(commands.contains(&"SOURCE_USB_AUDIO".to_string()));
        assert!(!commands.contains(&"SOURCE_HDMI".to_string()));

        assert_eq!(
            remote.command("send_cmd", Some(&json!({ "command": "SOURCE_HDMI" }))).await,
            StatusCode::Ok
        );
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn send_cmd_dispatches_simple_commands() {
        let (remote, device, _store) = connected_remote().await;

        remote.command("send_cmd", Some(&json!({ "command": "mute_toggle" }))).await;
        remote.command("send_cmd", Some(&json!({ "command": "SOURCE_IR" }))).await;
        remote.command("send_cmd", Some(&json!({ "command": "POWER_TOGGLE" }))).await;

        assert_eq!(
            device.calls(),
            vec!["set_mute(true)", "set_source_by_id(IR)", "power_off"]
        );
        assert_eq!(remote.state(), RemoteState::Off);
    }

    #[tokio::test]
    async fn unknown_command_id_is_not_implemented() {
        let (remote, device, _store) = connected_remote().await;
        assert_eq!(remote.command("power", None).await, StatusCode::NotImplemented);
        assert!(device.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_repeats_with_delay() {
        let (remote, device, _store) = connected_remote().await;

        let started = tokio::time::Instant::now();
        let status = remote
            .command(
                "send_cmd_sequence",
                Some(&json!({ "sequence": ["VOLUME_UP", "NEXT"], "delay": 200, "repeat": 2 })),
            )
            .await;

        assert_eq!(status, StatusCode::Ok);
        assert_eq!(
            device.calls(),
            vec!["volume_up", "next_track", "volume_up", "next_track"]
        );
        assert!(started.elapsed() >= Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_continues_after_a_failure() {
        let (remote, device, _store) = connected_remote().await;
        device.fail_next(2);

        let status = remote
            .command("send_cmd_sequence", Some(&json!({ "sequence": ["STOP", "PLAY"] })))
            .await;

        // STOP fails twice (with its retry); PLAY still runs and decides the outcome
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(device.calls(), vec!["stop", "stop", "play"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_last_command_fails_the_sequence() {
        let (remote, device, _store) = connected_remote().await;
        device.fail_next(2);

        let status = remote
            .command("send_cmd_sequence", Some(&json!({ "sequence": ["stop"] })))
            .await;

        assert_eq!(status, StatusCode::ServerError);
        assert_eq!(device.calls(), vec!["stop", "stop"]);
    }

    #[tokio::test]
    async fn definition_carries_pages_and_mapping() {
        let (remote, _device, _store) = connected_remote().await;
        let definition = remote.definition();

        assert_eq!(definition.entity_id, "remote.cambridge_10_0_0_5");
        assert_eq!(definition.name["en"], "Living Room Remote");

        let options = definition.options.unwrap();
        let pages = options["user_interface"]["pages"].as_array().unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0]["items"].as_array().unwrap().len(), 11);
        assert_eq!(pages[1]["items"][2]["command"]["cmd_id"], "SOURCE_USB_AUDIO");
        assert_eq!(options["button_mapping"][0]["short_press"]["cmd_id"], "POWER_TOGGLE");
    }

    #[tokio::test]
    async fn ui_pages_fit_their_grids() {
        let connector = Arc::new(MockConnector::new());
        let mut snapshot = sample_snapshot();
        snapshot.sources = (0..15).map(|i| source(&format!("S{}", i), "x")).collect();
        connector.add("10.0.0.9", MockDevice::new(snapshot));
        let config = DeviceConfig::new("10.0.0.9", "Den");
        let session = Arc::new(CambridgeSession::new(config.clone(), connector));
        assert!(session.connect().await);

        let remote = CambridgeRemote::new(session, &config, Arc::new(EntityStore::new()));
        let pages = remote.ui_pages();
        let main = serde_json::to_value(&pages[0]).unwrap();
        assert_eq!(main["grid"], json!({ "width": 4, "height": 3 }));
        assert!(main["items"]
            .as_array()
            .unwrap()
            .iter()
            .all(|item| item["location"]["y"].as_u64().unwrap() < 3));
        let items = &pages[1].items;

        assert_eq!(items.len(), 12);
        let last = serde_json::to_value(&items[11]).unwrap();
        assert_eq!(last["location"], json!({ "x": 3, "y": 2 }));
        assert_eq!(items[5].cmd_id(), "SOURCE_S5");
    }
}
