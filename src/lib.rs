//! Unfolded Circle Remote integration driver for Cambridge Audio StreamMagic receivers
//!
//! This library bridges Cambridge Audio network players and amplifiers (CXN, CXA,
//! EVO and other StreamMagic devices) to the Unfolded Circle Remote. It supports:
//!
//! - Direct WebSocket control of StreamMagic devices on the local network
//! - One media player and one remote entity per configured device
//! - Power, transport, volume, mute, source, shuffle and repeat control
//! - Real-time state updates pushed from the device
//! - Single- and multi-device setup with connection probing
//! - Persisted device configuration
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use uc_intg_cambridge_audio::{CambridgeConfig, IntegrationRuntime, StreamMagicConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CambridgeConfig::load("./config.json")?.into_shared();
//!     let runtime = IntegrationRuntime::new(config, Arc::new(StreamMagicConnector::new()));
//!
//!     if runtime.initialize().await {
//!         for entity in runtime.available_entities() {
//!             println!("{} ({})", entity.entity_id, entity.entity_type);
//!         }
//!     }
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Direct Connection
//!
//! If you only need to talk to a receiver, use the device client on its own:
//!
//! ```no_run
//! use uc_intg_cambridge_audio::{DeviceControl, StreamMagicClient, STREAMMAGIC_PORT};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = StreamMagicClient::connect("192.168.1.100", STREAMMAGIC_PORT).await?;
//!     println!("Connected to {}", client.info().model);
//!     client.set_volume(30).await?;
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Client**: StreamMagic connection, cached device state and actions
//! - **Session**: Per-device connection lifecycle with retried commands
//! - **Entities**: Media player and remote reconciliation and command handling
//! - **Setup**: Device probing and configuration persistence
//! - **Runtime**: Lifecycle of sessions and entities
//! - **API**: WebSocket server speaking the Remote's integration protocol
//! - **Connection / Protocol / Types**: Device wire format and data structures

mod api;
mod api_protocol;
mod client;
mod config;
mod connection;
mod device;
mod entity;
mod entity_store;
mod error;
mod media_player;
#[cfg(test)]
mod mock;
mod protocol;
mod remote;
mod runtime;
mod session;
mod setup;
mod subscription;
mod types;
mod ui;

// Public exports
pub use api::{ApiServer, API_VERSION};
pub use client::{StreamMagicClient, StreamMagicConnector, STREAMMAGIC_PORT};
pub use config::{CambridgeConfig, DeviceConfig, DriverSettings, SharedConfig, CONFIG_FILE_NAME};
pub use device::{DeviceConnector, DeviceControl};
pub use entity::{Entity, EntityDefinition, EntityType, StatusCode};
pub use entity_store::{DeviceState, EntityChange, EntityStore, StoreEvent};
pub use error::{CambridgeError, Result};
pub use media_player::{CambridgeMediaPlayer, MediaPlayerAttributes, MediaPlayerCommand, MediaPlayerState};
pub use remote::{CambridgeRemote, RemoteCommand, RemoteState, SimpleCommand};
pub use runtime::{IntegrationRuntime, RuntimeState};
pub use session::{CambridgeSession, StateObserver};
pub use setup::{CambridgeSetup, SetupAction, SetupErrorKind};
pub use subscription::{StateReceiver, StateUpdate};
pub use types::{
    DeviceSnapshot, Info, NowPlaying, PlayState, PlayStateMetadata, RepeatMode, ShuffleMode,
    Source, SourceId, State, TransportControl, VolumePercent,
};
