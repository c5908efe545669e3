use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source identifier as reported by the device (e.g. "IR", "SPDIF_COAX")
pub type SourceId = String;

/// Volume in percent (0-100)
pub type VolumePercent = u8;

/// Identifier of the internet radio source
pub const INTERNET_RADIO_SOURCE: &str = "IR";

/// Play state the device reports while it sits in network standby
pub const STANDBY_PLAY_STATE: &str = "NETWORK";

/// Device information from `/system/info`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Info {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub unit_id: String,

    /// Universal device name from the UPnP description
    #[serde(default)]
    pub udn: String,

    #[serde(default, rename = "api")]
    pub api_version: String,

    #[serde(default)]
    pub timezone: Option<String>,
}

/// Selectable input
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: SourceId,
    pub name: String,

    #[serde(default)]
    pub default_name: String,

    #[serde(default)]
    pub class: String,

    #[serde(default = "default_true")]
    pub ui_selectable: bool,
}

fn default_true() -> bool {
    true
}

/// Payload of `/system/sources`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceList {
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// Zone state from `/zone/state`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct State {
    /// Active source id
    #[serde(default)]
    pub source: SourceId,

    #[serde(default)]
    pub power: bool,

    #[serde(default)]
    pub mute: bool,

    #[serde(default)]
    pub volume_percent: Option<VolumePercent>,

    #[serde(default)]
    pub volume_db: Option<i32>,

    #[serde(default)]
    pub pre_amp_mode: bool,
}

/// Track metadata carried inside the play state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayStateMetadata {
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Radio station name
    #[serde(default)]
    pub station: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub art_url: Option<String>,
    /// Track length in seconds
    #[serde(default)]
    pub duration: Option<u32>,
}

/// Playback state from `/zone/play_state`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayState {
    /// Raw transport state, e.g. "play", "pause", "connecting", "NETWORK"
    #[serde(default = "default_play_state")]
    pub state: String,

    #[serde(default)]
    pub metadata: PlayStateMetadata,

    #[serde(default)]
    pub presettable: bool,

    /// Playback position in seconds
    #[serde(default)]
    pub position: Option<u32>,

    #[serde(default)]
    pub mode_repeat: RepeatMode,

    #[serde(default)]
    pub mode_shuffle: ShuffleMode,
}

fn default_play_state() -> String {
    "not_ready".to_string()
}

impl Default for PlayState {
    fn default() -> Self {
        Self {
            state: default_play_state(),
            metadata: PlayStateMetadata::default(),
            presettable: false,
            position: None,
            mode_repeat: RepeatMode::default(),
            mode_shuffle: ShuffleMode::default(),
        }
    }
}

/// Transport controls the current source accepts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportControl {
    Pause,
    Play,
    PlayPause,
    ToggleShuffle,
    ToggleRepeat,
    TrackNext,
    TrackPrevious,
    Seek,
    Stop,
    #[serde(other)]
    Unknown,
}

/// Now playing information from `/zone/now_playing`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NowPlaying {
    #[serde(default)]
    pub controls: Vec<TransportControl>,
}

/// Device shuffle mode
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShuffleMode {
    #[default]
    Off,
    All,
    Toggle,
    #[serde(other)]
    Unknown,
}

/// Device repeat mode
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
    Toggle,
    #[serde(other)]
    Unknown,
}

/// Everything the client knows about the device at one point in time
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    pub info: Info,
    pub sources: Vec<Source>,
    pub state: State,
    pub play_state: PlayState,
    pub now_playing: NowPlaying,

    /// When the client last saw the playback position change
    pub position_last_updated: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_state_tolerates_sparse_payloads() {
        let play_state: PlayState = serde_json::from_str(r#"{"state":"play"}"#).unwrap();
        assert_eq!(play_state.state, "play");
        assert_eq!(play_state.mode_repeat, RepeatMode::Off);
        assert_eq!(play_state.mode_shuffle, ShuffleMode::Off);
        assert!(play_state.metadata.artist.is_none());
        assert!(play_state.position.is_none());
    }

    #[test]
    fn parses_zone_state() {
        let state: State = serde_json::from_str(
            r#"{"source":"SPOTIFY","power":true,"mute":false,"volume_percent":42,"volume_db":-30,"pre_amp_mode":true}"#,
        )
        .unwrap();
        assert_eq!(state.source, "SPOTIFY");
        assert!(state.power);
        assert_eq!(state.volume_percent, Some(42));
    }

    #[test]
    fn unknown_modes_and_controls_are_preserved_as_unknown() {
        let play_state: PlayState =
            serde_json::from_str(r#"{"state":"pause","mode_repeat":"sometimes","mode_shuffle":"all"}"#)
                .unwrap();
        assert_eq!(play_state.mode_repeat, RepeatMode::Unknown);
        assert_eq!(play_state.mode_shuffle, ShuffleMode::All);

        let now_playing: NowPlaying =
            serde_json::from_str(r#"{"controls":["play","track_next","warp"]}"#).unwrap();
        assert_eq!(
            now_playing.controls,
            vec![TransportControl::Play, TransportControl::TrackNext, TransportControl::Unknown]
        );
    }

    #[test]
    fn sources_default_to_selectable() {
        let list: SourceList =
            serde_json::from_str(r#"{"sources":[{"id":"IR","name":"Internet Radio"}]}"#).unwrap();
        assert_eq!(list.sources.len(), 1);
        assert!(list.sources[0].ui_selectable);
    }
}
