//! Seams between the session wrapper and the device client.

use crate::error::Result;
use crate::subscription::StateReceiver;
use crate::types::{
    DeviceSnapshot, Info, NowPlaying, PlayState, RepeatMode, ShuffleMode, Source, State,
    VolumePercent,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Control surface of one connected receiver
///
/// Snapshot accessors return the client's cached view, which is kept
/// current by device-pushed updates.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Live connection status
    fn is_connected(&self) -> bool;

    /// Copy of the full cached state
    fn snapshot(&self) -> DeviceSnapshot;

    fn info(&self) -> Info {
        self.snapshot().info
    }

    fn state(&self) -> State {
        self.snapshot().state
    }

    fn sources(&self) -> Vec<Source> {
        self.snapshot().sources
    }

    fn play_state(&self) -> PlayState {
        self.snapshot().play_state
    }

    fn now_playing(&self) -> NowPlaying {
        self.snapshot().now_playing
    }

    fn position_last_updated(&self) -> Option<DateTime<Utc>> {
        self.snapshot().position_last_updated
    }

    /// Receive a notification whenever the cached state changes
    fn subscribe(&self) -> StateReceiver;

    async fn disconnect(&self) -> Result<()>;

    async fn power_on(&self) -> Result<()>;
    async fn power_off(&self) -> Result<()>;
    async fn play(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn play_pause(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn next_track(&self) -> Result<()>;
    async fn previous_track(&self) -> Result<()>;
    async fn volume_up(&self) -> Result<()>;
    async fn volume_down(&self) -> Result<()>;
    async fn set_volume(&self, volume: VolumePercent) -> Result<()>;
    async fn set_mute(&self, mute: bool) -> Result<()>;
    async fn set_source_by_id(&self, source_id: &str) -> Result<()>;
    async fn media_seek(&self, position: u32) -> Result<()>;
    async fn set_shuffle(&self, mode: ShuffleMode) -> Result<()>;
    async fn set_repeat(&self, mode: RepeatMode) -> Result<()>;
}

/// Opens device connections
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(&self, host: &str) -> Result<Arc<dyn DeviceControl>>;
}
