use crate::config::DeviceConfig;
use crate::entity::{
    en, param_bool, param_int, param_str, CommandParseError, Entity, EntityDefinition, EntityType,
    StatusCode,
};
use crate::entity_store::EntityStore;
use crate::error::Result;
use crate::session::{CambridgeSession, StateObserver};
use crate::subscription::StateUpdate;
use crate::types::{
    self, PlayState, ShuffleMode, Source, State, INTERNET_RADIO_SOURCE, STANDBY_PLAY_STATE,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const FEATURES: [&str; 22] = [
    "on_off",
    "toggle",
    "volume",
    "volume_up_down",
    "mute_toggle",
    "mute",
    "unmute",
    "play_pause",
    "stop",
    "next",
    "previous",
    "seek",
    "media_duration",
    "media_position",
    "media_title",
    "media_artist",
    "media_album",
    "media_image_url",
    "media_type",
    "select_source",
    "shuffle",
    "repeat",
];

/// Media player state as shown on the Remote
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaPlayerState {
    On,
    Off,
    Playing,
    Paused,
    Standby,
    Buffering,
    Idle,
    #[default]
    Unavailable,
    Unknown,
}

/// Repeat mode as shown on the Remote
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    One,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaType {
    Music,
}

/// Attribute set of the media player entity
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MediaPlayerAttributes {
    pub state: MediaPlayerState,
    pub volume: u8,
    pub muted: bool,
    pub source: String,
    pub source_list: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_position: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_position_updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatMode>,
}

/// Map the raw power flag and transport state to the entity state
pub fn reconcile_state(connected: bool, power: bool, play_state: &str) -> MediaPlayerState {
    if !connected {
        return MediaPlayerState::Unavailable;
    }
    if play_state == STANDBY_PLAY_STATE || !power {
        return MediaPlayerState::Off;
    }
    match play_state {
        "play" => MediaPlayerState::Playing,
        "pause" => MediaPlayerState::Paused,
        "connecting" => MediaPlayerState::Buffering,
        "stop" | "ready" => MediaPlayerState::Idle,
        _ => MediaPlayerState::On,
    }
}

/// Build the full attribute set of a connected device
pub fn build_attributes(
    state: &State,
    sources: &[Source],
    play_state: &PlayState,
    position_updated: Option<DateTime<Utc>>,
) -> MediaPlayerAttributes {
    let metadata = &play_state.metadata;

    let current_source = sources
        .iter()
        .find(|s| s.id == state.source)
        .map(|s| s.name.clone())
        .unwrap_or_default();

    let artist = metadata.artist.clone().filter(|a| !a.is_empty());
    let media_artist = match artist {
        None if state.source == INTERNET_RADIO_SOURCE => metadata.station.clone().unwrap_or_default(),
        artist => artist.unwrap_or_default(),
    };

    let repeat = match play_state.mode_repeat {
        types::RepeatMode::All => RepeatMode::All,
        _ => RepeatMode::Off,
    };

    MediaPlayerAttributes {
        state: reconcile_state(true, state.power, &play_state.state),
        volume: state.volume_percent.unwrap_or(0),
        muted: state.mute,
        source: current_source,
        source_list: sources.iter().map(|s| s.name.clone()).collect(),
        media_title: Some(metadata.title.clone().unwrap_or_default()),
        media_artist: Some(media_artist),
        media_album: Some(metadata.album.clone().unwrap_or_default()),
        media_image_url: Some(metadata.art_url.clone().unwrap_or_default()),
        media_duration: Some(metadata.duration.unwrap_or(0)),
        media_position: Some(play_state.position.unwrap_or(0)),
        media_position_updated_at: position_updated.map(|t| t.to_rfc3339()),
        media_type: Some(MediaType::Music),
        shuffle: Some(play_state.mode_shuffle != ShuffleMode::Off),
        repeat: Some(repeat),
    }
}

/// Commands the media player understands
#[derive(Debug, Clone, PartialEq)]
pub enum MediaPlayerCommand {
    On,
    Off,
    Toggle,
    PlayPause,
    Stop,
    Previous,
    Next,
    Seek(Option<u32>),
    Volume(Option<u8>),
    VolumeUp,
    VolumeDown,
    MuteToggle,
    Mute,
    Unmute,
    SelectSource(Option<String>),
    Shuffle(Option<bool>),
    Repeat(Option<RepeatMode>),
}

impl MediaPlayerCommand {
    /// Parse a command id and its parameters. A missing parameter parses as `None`.
    pub fn parse(cmd_id: &str, params: Option<&Value>) -> std::result::Result<Self, CommandParseError> {
        let command = match cmd_id {
            "on" => Self::On,
            "off" => Self::Off,
            "toggle" => Self::Toggle,
            "play_pause" => Self::PlayPause,
            "stop" => Self::Stop,
            "previous" => Self::Previous,
            "next" => Self::Next,
            "seek" => Self::Seek(
                param_int(params, "media_position")?
                    .map(|p| p.clamp(0, i64::from(u32::MAX)) as u32),
            ),
            "volume" => Self::Volume(param_int(params, "volume")?.map(|v| v.clamp(0, 100) as u8)),
            "volume_up" => Self::VolumeUp,
            "volume_down" => Self::VolumeDown,
            "mute_toggle" => Self::MuteToggle,
            "mute" => Self::Mute,
            "unmute" => Self::Unmute,
            "select_source" => Self::SelectSource(param_str(params, "source")?),
            "shuffle" => Self::Shuffle(param_bool(params, "shuffle")?),
            "repeat" => Self::Repeat(param_str(params, "repeat")?.map(|mode| {
                match mode.to_ascii_uppercase().as_str() {
                    "ALL" => RepeatMode::All,
                    "ONE" => RepeatMode::One,
                    _ => RepeatMode::Off,
                }
            })),
            other => return Err(CommandParseError::Unsupported(other.to_string())),
        };
        Ok(command)
    }
}

/// Media player entity for one receiver
pub struct CambridgeMediaPlayer {
    id: String,
    name: String,
    device_id: String,
    session: Arc<CambridgeSession>,
    store: Arc<EntityStore>,
    attributes: Mutex<MediaPlayerAttributes>,
}

impl CambridgeMediaPlayer {
    pub fn new(session: Arc<CambridgeSession>, device_config: &DeviceConfig, store: Arc<EntityStore>) -> Self {
        Self {
            id: format!("media_player.{}", device_config.device_id),
            name: device_config.name.clone(),
            device_id: device_config.device_id.clone(),
            session,
            store,
            attributes: Mutex::new(MediaPlayerAttributes::default()),
        }
    }

    pub fn attributes(&self) -> MediaPlayerAttributes {
        self.attributes.lock().clone()
    }

    fn read_attributes(&self) -> Result<MediaPlayerAttributes> {
        let snapshot = self.session.get_snapshot()?;
        Ok(build_attributes(
            &snapshot.state,
            &snapshot.sources,
            &snapshot.play_state,
            snapshot.position_last_updated,
        ))
    }

    fn publish(&self, attributes: &MediaPlayerAttributes) {
        match serde_json::to_value(attributes) {
            Ok(value) => self.store.update_attributes(&self.id, EntityType::MediaPlayer, value),
            Err(e) => tracing::error!("Failed to serialize attributes of {}: {}", self.id, e),
        }
    }

    async fn dispatch(&self, command: MediaPlayerCommand) -> Result<()> {
        match command {
            MediaPlayerCommand::On => self.session.power_on().await,
            MediaPlayerCommand::Off => self.session.power_off().await,
            MediaPlayerCommand::Toggle => {
                let state = self.attributes.lock().state;
                if state == MediaPlayerState::Off {
                    self.session.power_on().await
                } else {
                    self.session.power_off().await
                }
            }
            MediaPlayerCommand::PlayPause => self.session.play_pause().await,
            MediaPlayerCommand::Stop => self.session.stop().await,
            MediaPlayerCommand::Previous => self.session.previous_track().await,
            MediaPlayerCommand::Next => self.session.next_track().await,
            MediaPlayerCommand::Seek(Some(position)) => self.session.media_seek(position).await,
            MediaPlayerCommand::Volume(Some(volume)) => self.session.set_volume(volume).await,
            MediaPlayerCommand::VolumeUp => self.session.volume_up().await,
            MediaPlayerCommand::VolumeDown => self.session.volume_down().await,
            MediaPlayerCommand::MuteToggle => {
                let muted = self.attributes.lock().muted;
                self.session.set_mute(!muted).await
            }
            MediaPlayerCommand::Mute => self.session.set_mute(true).await,
            MediaPlayerCommand::Unmute => self.session.set_mute(false).await,
            MediaPlayerCommand::SelectSource(Some(name)) => {
                let sources = self.session.get_sources()?;
                match sources.iter().find(|s| s.name == name) {
                    Some(source) => self.session.set_source_by_id(&source.id).await,
                    None => {
                        tracing::warn!("[{}] Unknown source: {}", self.id, name);
                        Ok(())
                    }
                }
            }
            MediaPlayerCommand::Shuffle(Some(shuffle)) => {
                let mode = if shuffle { ShuffleMode::All } else { ShuffleMode::Off };
                self.session.set_shuffle(mode).await
            }
            MediaPlayerCommand::Repeat(Some(repeat)) => {
                let mode = match repeat {
                    RepeatMode::All | RepeatMode::One => types::RepeatMode::All,
                    RepeatMode::Off => types::RepeatMode::Off,
                };
                self.session.set_repeat(mode).await
            }
            MediaPlayerCommand::Seek(None)
            | MediaPlayerCommand::Volume(None)
            | MediaPlayerCommand::SelectSource(None)
            | MediaPlayerCommand::Shuffle(None)
            | MediaPlayerCommand::Repeat(None) => {
                tracing::debug!("[{}] Ignoring {:?} without parameter", self.id, command);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Entity for CambridgeMediaPlayer {
    fn id(&self) -> &str {
        &self.id
    }

    fn entity_type(&self) -> EntityType {
        EntityType::MediaPlayer
    }

    fn definition(&self) -> EntityDefinition {
        EntityDefinition {
            entity_id: self.id.clone(),
            entity_type: EntityType::MediaPlayer,
            device_id: Some(self.device_id.clone()),
            features: FEATURES.iter().map(|f| f.to_string()).collect(),
            name: en(self.name.clone()),
            device_class: Some("receiver".to_string()),
            options: None,
            attributes: serde_json::to_value(self.attributes()).unwrap_or(Value::Null),
        }
    }

    async fn push_update(&self) {
        if !self.session.is_connected() {
            let attributes = {
                let mut attributes = self.attributes.lock();
                attributes.state = MediaPlayerState::Unavailable;
                attributes.clone()
            };
            self.publish(&attributes);
            return;
        }

        match self.read_attributes() {
            Ok(attributes) => {
                *self.attributes.lock() = attributes.clone();
                self.publish(&attributes);
            }
            Err(e) => tracing::error!("Error updating state for {}: {}", self.id, e),
        }
    }

    async fn command(&self, cmd_id: &str, params: Option<&Value>) -> StatusCode {
        tracing::info!("[{}] Received command: {}", self.id, cmd_id);

        let command = match MediaPlayerCommand::parse(cmd_id, params) {
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
impl StateObserver for CambridgeMediaPlayer {
    async fn on_state_update(&self, _update: StateUpdate) {
        self.push_update().await;
    }
}
