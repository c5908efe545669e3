//! Owns the per-device sessions and entities and their lifecycle.

use crate::config::{DeviceConfig, SharedConfig};
use crate::device::DeviceConnector;
use crate::entity::{Entity, EntityDefinition};
use crate::entity_store::{DeviceState, EntityStore};
use crate::media_player::CambridgeMediaPlayer;
use crate::remote::CambridgeRemote;
use crate::session::{CambridgeSession, StateObserver};
use crate::setup::{CambridgeSetup, SetupAction};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Pause between connecting a device and reading its first state
pub const SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Lifecycle of the runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RuntimeState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Error,
}

/// Session and entities of one connected receiver
struct DeviceEntities {
    session: Arc<CambridgeSession>,
    media_player: Arc<CambridgeMediaPlayer>,
    remote: Arc<CambridgeRemote>,
}

impl DeviceEntities {
    async fn close(&self) {
        let media_player: Arc<dyn StateObserver> = self.media_player.clone();
        let remote: Arc<dyn StateObserver> = self.remote.clone();
        self.session.unregister_callback(&media_player);
        self.session.unregister_callback(&remote);
        self.session.close().await;
    }
}

#[derive(Default)]
struct RuntimeInner {
    state: RuntimeState,
    devices: Vec<DeviceEntities>,
}

/// The driver's single owner of sessions, entities and setup
pub struct IntegrationRuntime {
    config: SharedConfig,
    connector: Arc<dyn DeviceConnector>,
    store: Arc<EntityStore>,
    setup: CambridgeSetup,
    inner: Mutex<RuntimeInner>,
    entities: RwLock<BTreeMap<String, Arc<dyn Entity>>>,
    state: RwLock<RuntimeState>,
}

impl IntegrationRuntime {
    pub fn new(config: SharedConfig, connector: Arc<dyn DeviceConnector>) -> Self {
        Self {
            setup: CambridgeSetup::new(config.clone(), connector.clone()),
            config,
            connector,
            store: Arc::new(EntityStore::new()),
            inner: Mutex::new(RuntimeInner::default()),
            entities: RwLock::new(BTreeMap::new()),
            state: RwLock::new(RuntimeState::Uninitialized),
        }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.read()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == RuntimeState::Ready
    }

    fn set_state(&self, inner: &mut RuntimeInner, state: RuntimeState) {
        inner.state = state;
        *self.state.write() = state;
    }

    /// Connect every enabled device and build its entities
    ///
    /// Returns `true` once at least one device is connected. Calling it
    /// again while ready does nothing.
    pub async fn initialize(&self) -> bool {
        let mut inner = self.inner.lock().await;
        self.initialize_locked(&mut inner).await
    }

    async fn initialize_locked(&self, inner: &mut RuntimeInner) -> bool {
        if inner.state == RuntimeState::Ready {
            tracing::debug!("Entities already initialized, skipping");
            return true;
        }

        let (devices, total) = {
            let config = self.config.read();
            if !config.is_configured() {
                drop(config);
                tracing::error!("Configuration not found or invalid.");
                self.set_state(inner, RuntimeState::Error);
                self.store.set_device_state(DeviceState::Error);
                return false;
            }
            (config.get_enabled_devices(), config.get_all_devices().len())
        };

        tracing::info!("Initializing Cambridge Audio integration for {} devices...", total);
        self.set_state(inner, RuntimeState::Initializing);
        self.store.set_device_state(DeviceState::Connecting);
        self.teardown(inner).await;

        for device in devices {
            if let Some(entities) = self.setup_device(&device).await {
                inner.devices.push(entities);
            }
        }

        let connected = inner.devices.len();
        if connected > 0 {
            self.set_state(inner, RuntimeState::Ready);
            self.store.set_device_state(DeviceState::Connected);
            tracing::info!(
                "Cambridge Audio integration initialization completed - {}/{} devices connected.",
                connected,
                total
            );
            true
        } else {
            self.set_state(inner, RuntimeState::Error);
            self.store.set_device_state(DeviceState::Error);
            tracing::error!("No devices could be connected during initialization");
            false
        }
    }

    async fn setup_device(&self, device: &DeviceConfig) -> Option<DeviceEntities> {
        tracing::info!(
            "Connecting to Cambridge Audio device: {} at {}",
            device.name,
            device.ip_address
        );

        let session = Arc::new(CambridgeSession::new(device.clone(), self.connector.clone()));
        if !session.connect().await {
            tracing::warn!("Failed to connect to device: {}", device.name);
            session.close().await;
            return None;
        }
        tracing::info!("Connected to Cambridge Audio device: {} ({})", device.name, device.model);

        let media_player = Arc::new(CambridgeMediaPlayer::new(session.clone(), device, self.store.clone()));
        let remote = Arc::new(CambridgeRemote::new(session.clone(), device, self.store.clone()));
        session.register_callback(media_player.clone());
        session.register_callback(remote.clone());

        {
            let mut entities = self.entities.write();
            entities.insert(media_player.id().to_string(), media_player.clone());
            entities.insert(remote.id().to_string(), remote.clone());
        }
        tracing::info!("Created entities {} and {}", media_player.id(), remote.id());

        tokio::time::sleep(SETTLE_DELAY).await;
        media_player.push_update().await;
        remote.push_update().await;
        tracing::info!("Queried initial state for: {}", device.name);

        Some(DeviceEntities {
            session,
            media_player,
            remote,
        })
    }

    /// Close all sessions and forget all entities
    async fn teardown(&self, inner: &mut RuntimeInner) {
        for device in inner.devices.drain(..) {
            device.close().await;
        }
        self.entities.write().clear();
        self.store.clear();
    }

    /// The Remote connected: reload the configuration and bring entities up
    pub async fn on_connect(&self) {
        tracing::info!("Remote connected");
        self.config.write().reload_from_disk();

        let configured = self.config.read().is_configured();
        if !configured {
            tracing::info!("Not configured, waiting for setup");
            self.store.set_device_state(DeviceState::Disconnected);
            return;
        }

        if self.is_ready() {
            tracing::info!("Entities already ready, confirming connection");
            self.store.set_device_state(DeviceState::Connected);
        } else {
            tracing::warn!("Entities not ready on connect - initializing now");
            self.initialize().await;
        }
    }

    pub async fn on_disconnect(&self) {
        tracing::info!("Remote disconnected");
    }

    pub async fn on_enter_standby(&self) {
        tracing::info!("Remote entering standby");
    }

    /// Rebuild when a device was lost while the Remote slept
    pub async fn on_exit_standby(&self) {
        tracing::info!("Remote leaving standby");
        let lost = {
            let inner = self.inner.lock().await;
            inner.devices.iter().any(|d| !d.session.is_connected())
        };
        if lost {
            tracing::warn!("Device connection lost during standby, reconnecting");
            self.reconfigure().await;
        } else {
            self.push_all().await;
        }
    }

    /// The Remote subscribed to entities: make sure they exist and push their state
    pub async fn on_subscribe_entities(&self, entity_ids: &[String]) {
        tracing::info!("Entities subscribed: {:?}", entity_ids);

        if !self.is_ready() && !self.initialize().await {
            tracing::error!("Failed to initialize during subscription attempt");
            return;
        }

        for entity_id in entity_ids {
            match self.entity(entity_id) {
                Some(entity) => entity.push_update().await,
                None => tracing::debug!("Subscribed to unknown entity {}", entity_id),
            }
        }
    }

    pub async fn on_unsubscribe_entities(&self, entity_ids: &[String]) {
        tracing::info!("Entities unsubscribed: {:?}", entity_ids);
    }

    async fn push_all(&self) {
        let entities: Vec<Arc<dyn Entity>> = self.entities.read().values().cloned().collect();
        for entity in entities {
            entity.push_update().await;
        }
    }

    /// Drop everything and initialize from the current configuration
    pub async fn reconfigure(&self) -> bool {
        let mut inner = self.inner.lock().await;
        self.teardown(&mut inner).await;
        self.set_state(&mut inner, RuntimeState::Uninitialized);
        self.initialize_locked(&mut inner).await
    }

    /// Close every session
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        self.teardown(&mut inner).await;
        self.set_state(&mut inner, RuntimeState::Uninitialized);
        tracing::info!("Shutting down Cambridge Audio integration");
    }

    pub fn entity(&self, entity_id: &str) -> Option<Arc<dyn Entity>> {
        self.entities.read().get(entity_id).cloned()
    }

    pub fn available_entities(&self) -> Vec<EntityDefinition> {
        self.entities.read().values().map(|e| e.definition()).collect()
    }

    /// First setup step. A completed setup rebuilds the entities.
    pub async fn setup_driver(&self, setup_data: &Map<String, Value>) -> SetupAction {
        let action = self.setup.handle_setup_request(setup_data).await;
        self.after_setup(&action).await;
        action
    }

    /// Second setup step with the values the user entered
    pub async fn set_driver_user_data(&self, input_values: &Map<String, Value>) -> SetupAction {
        let action = self.setup.handle_user_data(input_values).await;
        self.after_setup(&action).await;
        action
    }

    async fn after_setup(&self, action: &SetupAction) {
        if *action == SetupAction::Complete {
            tracing::info!("Setup confirmed. Initializing integration components...");
            self.reconfigure().await;
        }
    }
}
