use crate::config::DeviceConfig;
use crate::device::{DeviceConnector, DeviceControl};
use crate::error::{CambridgeError, Result};
use crate::subscription::StateUpdate;
use crate::types::{
    DeviceSnapshot, Info, NowPlaying, PlayState, RepeatMode, ShuffleMode, Source, State, VolumePercent,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Pause before the single retry of a failed command
pub const ERROR_OS_WAIT: Duration = Duration::from_millis(500);

/// Receives device notifications forwarded by a session
#[async_trait]
pub trait StateObserver: Send + Sync {
    async fn on_state_update(&self, update: StateUpdate);
}

type Observers = Arc<Mutex<Vec<Arc<dyn StateObserver>>>>;

/// Session with one configured receiver
///
/// Owns at most one device client at a time. Every command is retried once
/// after [`ERROR_OS_WAIT`]; a second failure is returned to the caller.
pub struct CambridgeSession {
    config: DeviceConfig,
    connector: Arc<dyn DeviceConnector>,
    client: Mutex<Option<Arc<dyn DeviceControl>>>,
    observers: Observers,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl CambridgeSession {
    pub fn new(config: DeviceConfig, connector: Arc<dyn DeviceConnector>) -> Self {
        Self {
            config,
            connector,
            client: Mutex::new(None),
            observers: Arc::new(Mutex::new(Vec::new())),
            forwarder: Mutex::new(None),
        }
    }

    pub fn device_config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Connect to the device within its configured timeout
    ///
    /// Never fails: errors are logged and reported as `false`.
    pub async fn connect(&self) -> bool {
        let host = &self.config.ip_address;

        if self.is_connected() {
            tracing::debug!("Already connected to {}", host);
            return true;
        }

        // Drop a stale client so at most one connection exists
        let stale = self.client.lock().take();
        if let Some(stale) = stale {
            if let Err(e) = stale.disconnect().await {
                tracing::debug!("Error dropping stale connection to {}: {}", host, e);
            }
        }

        match tokio::time::timeout(self.config.connect_timeout(), self.connector.connect(host)).await {
            Ok(Ok(client)) => {
                *self.client.lock() = Some(client.clone());
                self.start_forwarding(client);
                tracing::info!("Connected to Cambridge Audio at {}", host);
                true
            }
            Ok(Err(e)) => {
                tracing::error!("Connection failed for {}: {}", host, e);
                false
            }
            Err(_) => {
                tracing::error!("Connection timeout for {}", host);
                false
            }
        }
    }

    /// Forward client notifications to the observers registered at that moment
    fn start_forwarding(&self, client: Arc<dyn DeviceControl>) {
        let mut updates = client.subscribe();
        let observers = self.observers.clone();
        let host = self.config.ip_address.clone();

        let handle = tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => {
                        let current: Vec<Arc<dyn StateObserver>> = observers.lock().clone();
                        for observer in current {
                            observer.on_state_update(update).await;
                        }
                        if update == StateUpdate::Connection {
                            tracing::warn!("Connection to {} lost", host);
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        if let Some(previous) = self.forwarder.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Release the connection, keeping the last known state readable
    pub async fn disconnect(&self) {
        let client = self.client.lock().clone();
        if let Some(client) = client {
            match client.disconnect().await {
                Ok(()) => tracing::info!("Disconnected from {}", self.config.ip_address),
                Err(e) => tracing::error!("Error during disconnect: {}", e),
            }
        }
    }

    /// Release the connection and drop the client
    pub async fn close(&self) {
        self.disconnect().await;
        if let Some(handle) = self.forwarder.lock().take() {
            handle.abort();
        }
        self.client.lock().take();
    }

    pub fn is_connected(&self) -> bool {
        self.client
            .lock()
            .as_ref()
            .is_some_and(|client| client.is_connected())
    }

    /// Register an observer. Effective immediately for a live connection.
    pub fn register_callback(&self, observer: Arc<dyn StateObserver>) {
        let mut observers = self.observers.lock();
        if !observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            observers.push(observer);
        }
    }

    pub fn unregister_callback(&self, observer: &Arc<dyn StateObserver>) {
        self.observers.lock().retain(|o| !Arc::ptr_eq(o, observer));
    }

    fn client(&self) -> Result<Arc<dyn DeviceControl>> {
        self.client.lock().clone().ok_or(CambridgeError::Uninitialized)
    }

    /// The whole cached state, read in one piece
    pub fn get_snapshot(&self) -> Result<DeviceSnapshot> {
        Ok(self.client()?.snapshot())
    }

    pub fn get_info(&self) -> Result<Info> {
        Ok(self.client()?.info())
    }

    pub fn get_state(&self) -> Result<State> {
        Ok(self.client()?.state())
    }

    pub fn get_sources(&self) -> Result<Vec<Source>> {
        Ok(self.client()?.sources())
    }

    pub fn get_play_state(&self) -> Result<PlayState> {
        Ok(self.client()?.play_state())
    }

    pub fn get_now_playing(&self) -> Result<NowPlaying> {
        Ok(self.client()?.now_playing())
    }

    pub fn position_last_updated(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.client()?.position_last_updated())
    }

    /// Run `op`, and on failure wait [`ERROR_OS_WAIT`] and run it exactly once more
    async fn with_retry<F, Fut>(&self, action: &str, op: F) -> Result<()>
    where
        F: Fn(Arc<dyn DeviceControl>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let client = self.client()?;
        match op(client.clone()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!("{} failed: {}", action, e);
                tokio::time::sleep(ERROR_OS_WAIT).await;
                op(client).await
            }
        }
    }

    pub async fn power_on(&self) -> Result<()> {
        self.with_retry("Power on", |c| async move { c.power_on().await }).await
    }

    pub async fn power_off(&self) -> Result<()> {
        self.with_retry("Power off", |c| async move { c.power_off().await }).await
    }

    pub async fn play(&self) -> Result<()> {
        self.with_retry("Play", |c| async move { c.play().await }).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.with_retry("Pause", |c| async move { c.pause().await }).await
    }

    pub async fn play_pause(&self) -> Result<()> {
        self.with_retry("Play/pause", |c| async move { c.play_pause().await }).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.with_retry("Stop", |c| async move { c.stop().await }).await
    }

    pub async fn next_track(&self) -> Result<()> {
        self.with_retry("Next track", |c| async move { c.next_track().await }).await
    }

    pub async fn previous_track(&self) -> Result<()> {
        self.with_retry("Previous track", |c| async move { c.previous_track().await })
            .await
    }

    pub async fn volume_up(&self) -> Result<()> {
        self.with_retry("Volume up", |c| async move { c.volume_up().await }).await
    }

    pub async fn volume_down(&self) -> Result<()> {
        self.with_retry("Volume down", |c| async move { c.volume_down().await }).await
    }

    pub async fn set_volume(&self, volume: VolumePercent) -> Result<()> {
        self.with_retry("Set volume", move |c| async move { c.set_volume(volume).await })
            .await
    }

    pub async fn set_mute(&self, mute: bool) -> Result<()> {
        self.with_retry("Set mute", move |c| async move { c.set_mute(mute).await })
            .await
    }

    pub async fn set_source_by_id(&self, source_id: &str) -> Result<()> {
        self.with_retry("Set source", |c| {
            let source_id = source_id.to_string();
            async move { c.set_source_by_id(&source_id).await }
        })
        .await
    }

    pub async fn media_seek(&self, position: u32) -> Result<()> {
        self.with_retry("Media seek", move |c| async move { c.media_seek(position).await })
            .await
    }

    pub async fn set_shuffle(&self, mode: ShuffleMode) -> Result<()> {
        self.with_retry("Set shuffle", move |c| async move { c.set_shuffle(mode).await })
            .await
    }

    pub async fn set_repeat(&self, mode: RepeatMode) -> Result<()> {
        self.with_retry("Set repeat", move |c| async move { c.set_repeat(mode).await })
            .await
    }
}
