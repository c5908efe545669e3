use crate::entity::EntityType;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Integration state reported to the Remote
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    Connected,
    Connecting,
    #[default]
    Disconnected,
    Error,
}

/// Attributes of one entity at one point in time
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EntityChange {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub attributes: Value,
}

/// Event broadcast to connected Remotes
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    EntityChange(EntityChange),
    DeviceState(DeviceState),
}

/// Latest attributes of every entity plus the integration state
pub struct EntityStore {
    entities: RwLock<HashMap<String, EntityChange>>,
    device_state: RwLock<DeviceState>,
    events_tx: broadcast::Sender<StoreEvent>,
}

impl EntityStore {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            entities: RwLock::new(HashMap::new()),
            device_state: RwLock::new(DeviceState::default()),
            events_tx,
        }
    }

    /// Replace an entity's attributes and notify listeners
    pub fn update_attributes(&self, entity_id: &str, entity_type: EntityType, attributes: Value) {
        let change = EntityChange {
            entity_type,
            entity_id: entity_id.to_string(),
            attributes,
        };
        self.entities
            .write()
            .insert(entity_id.to_string(), change.clone());
        let _ = self.events_tx.send(StoreEvent::EntityChange(change));
    }

    pub fn attributes(&self, entity_id: &str) -> Option<Value> {
        self.entities
            .read()
            .get(entity_id)
            .map(|change| change.attributes.clone())
    }

    /// Current attributes of the given entities, or of all entities when `None`
    pub fn entity_states(&self, entity_ids: Option<&[String]>) -> Vec<EntityChange> {
        let entities = self.entities.read();
        let mut states: Vec<EntityChange> = match entity_ids {
            Some(ids) => ids.iter().filter_map(|id| entities.get(id).cloned()).collect(),
            None => entities.values().cloned().collect(),
        };
        states.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        states
    }

    /// Forget all entities, e.g. before a rebuild
    pub fn clear(&self) {
        self.entities.write().clear();
    }

    pub fn set_device_state(&self, state: DeviceState) {
        *self.device_state.write() = state;
        let _ = self.events_tx.send(StoreEvent::DeviceState(state));
    }

    pub fn device_state(&self) -> DeviceState {
        *self.device_state.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn updates_are_stored_and_broadcast() {
        let store = EntityStore::new();
        let mut rx = store.subscribe();

        store.update_attributes("remote.a", EntityType::Remote, json!({ "state": "ON" }));

        assert_eq!(store.attributes("remote.a"), Some(json!({ "state": "ON" })));
        match rx.try_recv().unwrap() {
            StoreEvent::EntityChange(change) => {
                assert_eq!(change.entity_id, "remote.a");
                assert_eq!(change.entity_type, EntityType::Remote);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn entity_states_can_be_filtered() {
        let store = EntityStore::new();
        store.update_attributes("remote.b", EntityType::Remote, json!({}));
        store.update_attributes("media_player.b", EntityType::MediaPlayer, json!({}));

        assert_eq!(store.entity_states(None).len(), 2);
        let filtered = store.entity_states(Some(&["remote.b".to_string(), "missing".to_string()]));
        assert_eq!(filtered.len(), 1);

        store.clear();
        assert!(store.entity_states(None).is_empty());
    }

    #[test]
    fn device_state_changes_are_broadcast() {
        let store = EntityStore::new();
        let mut rx = store.subscribe();
        assert_eq!(store.device_state(), DeviceState::Disconnected);

        store.set_device_state(DeviceState::Connected);
        assert_eq!(store.device_state(), DeviceState::Connected);
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::DeviceState(DeviceState::Connected));
    }

    #[test]
    fn device_state_serializes_in_upper_case() {
        assert_eq!(serde_json::to_value(DeviceState::Connecting).unwrap(), json!("CONNECTING"));
    }
}
