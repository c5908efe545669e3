use crate::connection::{Connection, ConnectionEvent};
use crate::device::{DeviceConnector, DeviceControl};
use crate::error::{CambridgeError, Result};
use crate::protocol::{paths, Request, Response, SUBSCRIBED_PATHS, ZONE};
use crate::subscription::{StateReceiver, StateUpdate};
use crate::types::{
    DeviceSnapshot, Info, NowPlaying, PlayState, RepeatMode, ShuffleMode, SourceList, State,
    VolumePercent,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Port of the StreamMagic WebSocket API
pub const STREAMMAGIC_PORT: u16 = 80;

/// Client for a Cambridge Audio StreamMagic device
///
/// Holds one WebSocket connection, a cached [`DeviceSnapshot`] that is kept
/// current by device-pushed updates, and the action endpoints.
pub struct StreamMagicClient {
    host: String,
    connection: Arc<Connection>,
    snapshot: Arc<Mutex<DeviceSnapshot>>,
    events_tx: broadcast::Sender<StateUpdate>,
}

impl StreamMagicClient {
    /// Connect to a device and load its initial state
    ///
    /// # Example
    ///
    /// ```no_run
    /// use uc_intg_cambridge_audio::{DeviceControl, StreamMagicClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = StreamMagicClient::connect("192.168.1.20", 80).await?;
    ///     println!("{} is on {}", client.info().model, client.state().source);
    ///     client.set_volume(30).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        let url = format!("ws://{}:{}/smoip", host, port);
        let connection = Arc::new(Connection::connect(url).await?);

        // Subscribe before loading so no update between load and subscription is lost
        let incoming = connection.subscribe();

        let info: Info = fetch(&connection, Request::new(paths::INFO, json!({}))).await?;
        let sources: SourceList = fetch(&connection, Request::new(paths::SOURCES, json!({}))).await?;
        let state: State = fetch(&connection, Request::zone(paths::ZONE_STATE)).await?;
        let play_state: PlayState = fetch(&connection, Request::zone(paths::PLAY_STATE)).await?;
        let now_playing: NowPlaying = fetch(&connection, Request::zone(paths::NOW_PLAYING)).await?;

        tracing::info!("Loaded state of {} ({}) at {}", info.name, info.model, host);

        let position_last_updated = play_state.position.map(|_| Utc::now());
        let snapshot = Arc::new(Mutex::new(DeviceSnapshot {
            info,
            sources: sources.sources,
            state,
            play_state,
            now_playing,
            position_last_updated,
        }));

        // Acknowledgements share the per-path reply queue with actions
        for path in SUBSCRIBED_PATHS {
            match connection.send_request(Request::subscribe(path)).await {
                Ok(_) => {}
                Err(CambridgeError::ApiError { detail }) => {
                    tracing::warn!("Subscription to {} refused by {}: {}", path, host, detail)
                }
                Err(e) => return Err(e),
            }
        }

        let (events_tx, _) = broadcast::channel(100);
        tokio::spawn(run_updates(incoming, snapshot.clone(), events_tx.clone()));

        Ok(Self {
            host,
            connection,
            snapshot,
            events_tx,
        })
    }

    /// Get the device's host address
    pub fn host(&self) -> &str {
        &self.host
    }

    async fn send(&self, request: Request) -> Result<()> {
        self.connection.send_request(request).await?;
        Ok(())
    }

    async fn play_control(&self, action: &str) -> Result<()> {
        self.send(Request::new(
            paths::PLAY_CONTROL,
            json!({ "zone": ZONE, "action": action }),
        ))
        .await
    }
}

/// Request an endpoint and decode its `params.data` payload
async fn fetch<T: DeserializeOwned>(connection: &Connection, request: Request) -> Result<T> {
    let path = request.path.clone();
    let response = connection.send_request(request).await?;
    let data = response
        .data()
        .ok_or_else(|| CambridgeError::InvalidResponse(format!("No data in {} response", path)))?;
    Ok(serde_json::from_value(data.clone())?)
}

/// Apply pushed updates to the snapshot until the connection goes away
async fn run_updates(
    mut incoming: broadcast::Receiver<ConnectionEvent>,
    snapshot: Arc<Mutex<DeviceSnapshot>>,
    events_tx: broadcast::Sender<StateUpdate>,
) {
    loop {
        match incoming.recv().await {
            Ok(ConnectionEvent::Update(update)) => match apply_update(&snapshot, &update) {
                Ok(true) => {
                    let _ = events_tx.send(StateUpdate::State);
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to apply update for {}: {}", update.path, e),
            },
            Ok(ConnectionEvent::Closed) => {
                let _ = events_tx.send(StateUpdate::Connection);
                break;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Dropped {} device updates", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Merge one pushed update into the snapshot. Returns whether anything changed.
fn apply_update(snapshot: &Mutex<DeviceSnapshot>, update: &Response) -> Result<bool> {
    let Some(data) = update.data() else {
        return Ok(false);
    };

    let mut snapshot = snapshot.lock();
    match update.path.as_str() {
        paths::INFO => snapshot.info = serde_json::from_value(data.clone())?,
        paths::SOURCES => {
            let list: SourceList = serde_json::from_value(data.clone())?;
            snapshot.sources = list.sources;
        }
        paths::ZONE_STATE => snapshot.state = serde_json::from_value(data.clone())?,
        paths::PLAY_STATE => {
            let play_state: PlayState = serde_json::from_value(data.clone())?;
            if play_state.position.is_some() && play_state.position != snapshot.play_state.position {
                snapshot.position_last_updated = Some(Utc::now());
            }
            snapshot.play_state = play_state;
        }
        paths::POSITION => {
            let position = data
                .get("position")
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| CambridgeError::InvalidResponse("Missing position".to_string()))?;
            snapshot.play_state.position = Some(position);
            snapshot.position_last_updated = Some(Utc::now());
        }
        paths::NOW_PLAYING => snapshot.now_playing = serde_json::from_value(data.clone())?,
        _ => return Ok(false),
    }

    Ok(true)
}

#[async_trait]
impl DeviceControl for StreamMagicClient {
    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot.lock().clone()
    }

    fn subscribe(&self) -> StateReceiver {
        StateReceiver::new(self.events_tx.subscribe())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connection.close().await;
        Ok(())
    }

    async fn power_on(&self) -> Result<()> {
        self.send(Request::new(paths::POWER, json!({ "power": "ON" }))).await
    }

    async fn power_off(&self) -> Result<()> {
        self.send(Request::new(paths::POWER, json!({ "power": "NETWORK" }))).await
    }

    async fn play(&self) -> Result<()> {
        self.play_control("play").await
    }

    async fn pause(&self) -> Result<()> {
        self.play_control("pause").await
    }

    async fn play_pause(&self) -> Result<()> {
        self.play_control("toggle").await
    }

    async fn stop(&self) -> Result<()> {
        self.play_control("stop").await
    }

    async fn next_track(&self) -> Result<()> {
        self.play_control("next").await
    }

    async fn previous_track(&self) -> Result<()> {
        self.play_control("previous").await
    }

    async fn volume_up(&self) -> Result<()> {
        self.send(Request::new(
            paths::ZONE_STATE,
            json!({ "zone": ZONE, "volume_step_change": 1 }),
        ))
        .await
    }

    async fn volume_down(&self) -> Result<()> {
        self.send(Request::new(
            paths::ZONE_STATE,
            json!({ "zone": ZONE, "volume_step_change": -1 }),
        ))
        .await
    }

    async fn set_volume(&self, volume: VolumePercent) -> Result<()> {
        self.send(Request::new(
            paths::ZONE_STATE,
            json!({ "zone": ZONE, "volume_percent": volume.min(100) }),
        ))
        .await
    }

    async fn set_mute(&self, mute: bool) -> Result<()> {
        self.send(Request::new(paths::ZONE_STATE, json!({ "zone": ZONE, "mute": mute })))
            .await
    }

    async fn set_source_by_id(&self, source_id: &str) -> Result<()> {
        self.send(Request::new(
            paths::ZONE_STATE,
            json!({ "zone": ZONE, "source": source_id }),
        ))
        .await
    }

    async fn media_seek(&self, position: u32) -> Result<()> {
        self.send(Request::new(
            paths::PLAY_CONTROL,
            json!({ "zone": ZONE, "position": position }),
        ))
        .await
    }

    async fn set_shuffle(&self, mode: ShuffleMode) -> Result<()> {
        self.send(Request::new(
            paths::PLAY_CONTROL,
            json!({ "zone": ZONE, "mode_shuffle": mode }),
        ))
        .await
    }

    async fn set_repeat(&self, mode: RepeatMode) -> Result<()> {
        self.send(Request::new(
            paths::PLAY_CONTROL,
            json!({ "zone": ZONE, "mode_repeat": mode }),
        ))
        .await
    }
}

/// Connector that opens real StreamMagic connections
#[derive(Debug, Clone)]
pub struct StreamMagicConnector {
    port: u16,
}

impl StreamMagicConnector {
    pub fn new() -> Self {
        Self {
            port: STREAMMAGIC_PORT,
        }
    }

    /// Use a non-standard port
    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

impl Default for StreamMagicConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceConnector for StreamMagicConnector {
    async fn connect(&self, host: &str) -> Result<Arc<dyn DeviceControl>> {
        let client = StreamMagicClient::connect(host, self.port).await?;
        Ok(Arc::new(client))
    }
}
