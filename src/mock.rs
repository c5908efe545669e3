//! In-memory device used by the unit tests.

use crate::device::{DeviceConnector, DeviceControl};
use crate::error::{CambridgeError, Result};
use crate::subscription::{StateReceiver, StateUpdate};
use crate::types::{
    DeviceSnapshot, Info, PlayState, PlayStateMetadata, RepeatMode, ShuffleMode, Source, State,
    VolumePercent,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

pub(crate) fn source(id: &str, name: &str) -> Source {
    Source {
        id: id.to_string(),
        name: name.to_string(),
        default_name: name.to_string(),
        class: "stream".to_string(),
        ui_selectable: true,
    }
}

/// A powered-on CXNv2 playing Spotify
pub(crate) fn sample_snapshot() -> DeviceSnapshot {
    DeviceSnapshot {
        info: Info {
            name: "Living Room".to_string(),
            model: "CXNv2".to_string(),
            unit_id: "ABC123".to_string(),
            udn: "uuid:1234".to_string(),
            api_version: "1.8".to_string(),
            timezone: None,
        },
        sources: vec![
            source("IR", "Internet Radio"),
            source("SPOTIFY", "Spotify"),
            source("USB_AUDIO", "USB Audio"),
        ],
        state: State {
            source: "SPOTIFY".to_string(),
            power: true,
            mute: false,
            volume_percent: Some(35),
            volume_db: Some(-40),
            pre_amp_mode: true,
        },
        play_state: PlayState {
            state: "play".to_string(),
            metadata: PlayStateMetadata {
                title: Some("So What".to_string()),
                artist: Some("Miles Davis".to_string()),
                album: Some("Kind of Blue".to_string()),
                art_url: Some("http://art/kob.jpg".to_string()),
                duration: Some(545),
                ..Default::default()
            },
            presettable: false,
            position: Some(12),
            mode_repeat: RepeatMode::Off,
            mode_shuffle: ShuffleMode::Off,
        },
        now_playing: Default::default(),
        position_last_updated: None,
    }
}

pub(crate) struct MockDevice {
    snapshot: Mutex<DeviceSnapshot>,
    connected: AtomicBool,
    failures: AtomicUsize,
    calls: Mutex<Vec<String>>,
    events_tx: broadcast::Sender<StateUpdate>,
}

impl MockDevice {
    pub(crate) fn new(snapshot: DeviceSnapshot) -> Self {
        let (events_tx, _) = broadcast::channel(16);
        Self {
            snapshot: Mutex::new(snapshot),
            connected: AtomicBool::new(true),
            failures: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            events_tx,
        }
    }

    /// Make the next `n` actions fail
    pub(crate) fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut DeviceSnapshot)) {
        f(&mut self.snapshot.lock());
    }

    pub(crate) fn snapshot_now(&self) -> DeviceSnapshot {
        self.snapshot.lock().clone()
    }

    pub(crate) fn emit(&self, update: StateUpdate) {
        let _ = self.events_tx.send(update);
    }

    fn record(&self, call: String) -> Result<()> {
        self.calls.lock().push(call);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(CambridgeError::ApiError {
                detail: "injected failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DeviceControl for MockDevice {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot.lock().clone()
    }

    fn subscribe(&self) -> StateReceiver {
        StateReceiver::new(self.events_tx.subscribe())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn power_on(&self) -> Result<()> {
        self.record("power_on".to_string())?;
        self.update(|s| s.state.power = true);
        Ok(())
    }

    async fn power_off(&self) -> Result<()> {
        self.record("power_off".to_string())?;
        self.update(|s| s.state.power = false);
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        self.record("play".to_string())
    }

    async fn pause(&self) -> Result<()> {
        self.record("pause".to_string())
    }

    async fn play_pause(&self) -> Result<()> {
        self.record("play_pause".to_string())
    }

    async fn stop(&self) -> Result<()> {
        self.record("stop".to_string())
    }

    async fn next_track(&self) -> Result<()> {
        self.record("next_track".to_string())
    }

    async fn previous_track(&self) -> Result<()> {
        self.record("previous_track".to_string())
    }

    async fn volume_up(&self) -> Result<()> {
        self.record("volume_up".to_string())
    }

    async fn volume_down(&self) -> Result<()> {
        self.record("volume_down".to_string())
    }

    async fn set_volume(&self, volume: VolumePercent) -> Result<()> {
        self.record(format!("set_volume({})", volume))?;
        self.update(|s| s.state.volume_percent = Some(volume));
        Ok(())
    }

    async fn set_mute(&self, mute: bool) -> Result<()> {
        self.record(format!("set_mute({})", mute))?;
        self.update(|s| s.state.mute = mute);
        Ok(())
    }

    async fn set_source_by_id(&self, source_id: &str) -> Result<()> {
        self.record(format!("set_source_by_id({})", source_id))?;
        self.update(|s| s.state.source = source_id.to_string());
        Ok(())
    }

    async fn media_seek(&self, position: u32) -> Result<()> {
        self.record(format!("media_seek({})", position))
    }

    async fn set_shuffle(&self, mode: ShuffleMode) -> Result<()> {
        self.record(format!("set_shuffle({:?})", mode))
    }

    async fn set_repeat(&self, mode: RepeatMode) -> Result<()> {
        self.record(format!("set_repeat({:?})", mode))
    }
}

/// Connector handing out [`MockDevice`]s by host
#[derive(Default)]
pub(crate) struct MockConnector {
    devices: Mutex<HashMap<String, Arc<MockDevice>>>,
    hanging: Mutex<HashSet<String>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, host: &str, device: MockDevice) -> Arc<MockDevice> {
        let device = Arc::new(device);
        self.devices.lock().insert(host.to_string(), device.clone());
        device
    }

    /// Connections to `host` never complete
    pub(crate) fn hang(&self, host: &str) {
        self.hanging.lock().insert(host.to_string());
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceConnector for MockConnector {
    async fn connect(&self, host: &str) -> Result<Arc<dyn DeviceControl>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let hangs = self.hanging.lock().contains(host);
        if hangs {
            std::future::pending::<()>().await;
        }
        let device = self.devices.lock().get(host).cloned();
        match device {
            Some(device) => {
                device.set_connected(true);
                Ok(device as Arc<dyn DeviceControl>)
            }
            None => Err(CambridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("connection refused by {}", host),
            ))),
        }
    }
}
