//! WebSocket server for the Remote's integration API.

use crate::api_protocol::{
    ApiEvent, ApiRequest, IncomingMessage, Kind, OutgoingMessage, SetDriverUserData,
};
use crate::entity::StatusCode;
use crate::entity_store::StoreEvent;
use crate::error::Result;
use crate::runtime::IntegrationRuntime;
use crate::setup::{SetupAction, SetupErrorKind};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

/// Integration API version this driver speaks
pub const API_VERSION: &str = "0.12.1";

/// Serves the integration API to connecting Remotes
pub struct ApiServer {
    runtime: Arc<IntegrationRuntime>,
    metadata: Value,
}

/// Per-connection state
struct ClientSession {
    id: Uuid,
    subscriptions: Mutex<HashSet<String>>,
    out_tx: mpsc::UnboundedSender<OutgoingMessage>,
}

impl ClientSession {
    fn send(&self, message: OutgoingMessage) {
        if self.out_tx.send(message).is_err() {
            tracing::debug!("Client {} is gone, dropping message", self.id);
        }
    }

    fn is_subscribed(&self, entity_id: &str) -> bool {
        self.subscriptions.lock().contains(entity_id)
    }
}

impl ApiServer {
    /// `metadata` is the driver description returned by `get_driver_metadata`
    pub fn new(runtime: Arc<IntegrationRuntime>, metadata: Value) -> Self {
        Self { runtime, metadata }
    }

    /// Accept connections until the listener fails
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!("Integration API listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                tracing::info!("Remote connection from {}", peer);
                if let Err(e) = server.handle_connection(stream).await {
                    tracing::warn!("Connection from {} ended with error: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> Result<()> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutgoingMessage>();
        let client = Arc::new(ClientSession {
            id: Uuid::new_v4(),
            subscriptions: Mutex::new(HashSet::new()),
            out_tx,
        });
        tracing::debug!("Client {} connected", client.id);

        client.send(OutgoingMessage::authentication());

        let mut store_rx = self.runtime.store().subscribe();
        let send_client = client.clone();
        let mut send_task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    Some(message) = out_rx.recv() => message,
                    event = store_rx.recv() => match event {
                        Ok(StoreEvent::EntityChange(change)) => {
                            if !send_client.is_subscribed(&change.entity_id) {
                                continue;
                            }
                            OutgoingMessage::entity_change(&change)
                        }
                        Ok(StoreEvent::DeviceState(state)) => OutgoingMessage::device_state(state),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("Client {} lagged by {} events", send_client.id, n);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    else => break,
                };

                match serde_json::to_string(&message) {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json)).await.is_err() {
                            tracing::debug!("WebSocket send to {} failed", send_client.id);
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Failed to serialize message: {}", e),
                }
            }
        });

        let recv_client = client.clone();
        let server = self.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                match result {
                    Ok(Message::Text(text)) => server.handle_text(&recv_client, &text).await,
                    Ok(Message::Close(_)) => {
                        tracing::debug!("Client {} closed the connection", recv_client.id);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("WebSocket error from {}: {}", recv_client.id, e);
                        break;
                    }
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        tracing::info!("Client {} disconnected", client.id);
        Ok(())
    }

    async fn handle_text(&self, client: &ClientSession, text: &str) {
        let message: IncomingMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Invalid message from {}: {}", client.id, e);
                return;
            }
        };

        match message.kind {
            Kind::Req => {
                let Some(req_id) = message.id else {
                    tracing::warn!("Request {} without id", message.msg);
                    return;
                };
                self.handle_request(client, req_id, &message.msg, message.msg_data).await;
            }
            Kind::Event => self.handle_event(&message.msg).await,
            Kind::Resp => tracing::debug!("Ignoring response {}", message.msg),
        }
    }

    async fn handle_event(&self, msg: &str) {
        match ApiEvent::parse(msg) {
            Some(ApiEvent::Connect) => self.runtime.on_connect().await,
            Some(ApiEvent::Disconnect) => self.runtime.on_disconnect().await,
            Some(ApiEvent::EnterStandby) => self.runtime.on_enter_standby().await,
            Some(ApiEvent::ExitStandby) => self.runtime.on_exit_standby().await,
            Some(ApiEvent::AbortDriverSetup) => tracing::info!("Driver setup aborted"),
            None => tracing::debug!("Unhandled event: {}", msg),
        }
    }

    async fn handle_request(&self, client: &ClientSession, req_id: u64, msg: &str, msg_data: Option<Value>) {
        let request = match ApiRequest::parse(msg, msg_data) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Rejecting request {}: {}", req_id, e);
                client.send(OutgoingMessage::result(req_id, StatusCode::BadRequest));
                return;
            }
        };

        match request {
            ApiRequest::Authentication => {
                client.send(OutgoingMessage::response(req_id, "authentication", json!({})))
            }
            ApiRequest::GetDriverVersion => client.send(OutgoingMessage::response(
                req_id,
                "driver_version",
                self.driver_version(),
            )),
            ApiRequest::GetDriverMetadata => client.send(OutgoingMessage::response(
                req_id,
                "driver_metadata",
                self.metadata.clone(),
            )),
            ApiRequest::GetDeviceState => client.send(OutgoingMessage::response(
                req_id,
                "device_state",
                json!({ "state": self.runtime.store().device_state() }),
            )),
            ApiRequest::GetAvailableEntities => client.send(OutgoingMessage::response(
                req_id,
                "available_entities",
                json!({ "available_entities": self.runtime.available_entities() }),
            )),
            ApiRequest::GetEntityStates => client.send(OutgoingMessage::response(
                req_id,
                "entity_states",
                json!(self.runtime.store().entity_states(None)),
            )),
            ApiRequest::SubscribeEvents(entity_ids) => {
                let entity_ids = if entity_ids.is_empty() {
                    self.runtime
                        .available_entities()
                        .into_iter()
                        .map(|d| d.entity_id)
                        .collect()
                } else {
                    entity_ids
                };
                client.subscriptions.lock().extend(entity_ids.iter().cloned());
                client.send(OutgoingMessage::result(req_id, StatusCode::Ok));
                self.runtime.on_subscribe_entities(&entity_ids).await;
            }
            ApiRequest::UnsubscribeEvents(entity_ids) => {
                {
                    let mut subscriptions = client.subscriptions.lock();
                    if entity_ids.is_empty() {
                        subscriptions.clear();
                    } else {
                        for id in &entity_ids {
                            subscriptions.remove(id);
                        }
                    }
                }
                client.send(OutgoingMessage::result(req_id, StatusCode::Ok));
                self.runtime.on_unsubscribe_entities(&entity_ids).await;
            }
            ApiRequest::EntityCommand {
                entity_id,
                cmd_id,
                params,
            } => {
                let status = match self.runtime.entity(&entity_id) {
                    Some(entity) => entity.command(&cmd_id, params.as_ref()).await,
                    None => {
                        tracing::warn!("Command {} for unknown entity {}", cmd_id, entity_id);
                        StatusCode::NotFound
                    }
                };
                client.send(OutgoingMessage::result(req_id, status));
            }
            ApiRequest::SetupDriver(setup_data) => {
                client.send(OutgoingMessage::result(req_id, StatusCode::Ok));
                client.send(OutgoingMessage::setup_progress());
                let action = self.runtime.setup_driver(&setup_data).await;
                client.send(OutgoingMessage::setup_outcome(&action));
            }
            ApiRequest::SetDriverUserData(user_data) => {
                client.send(OutgoingMessage::result(req_id, StatusCode::Ok));
                client.send(OutgoingMessage::setup_progress());
                let action = match user_data {
                    SetDriverUserData::InputValues(values) => self.runtime.set_driver_user_data(&values).await,
                    SetDriverUserData::Confirm(true) => SetupAction::Complete,
                    SetDriverUserData::Confirm(false) => SetupAction::Error(SetupErrorKind::Other),
                };
                client.send(OutgoingMessage::setup_outcome(&action));
            }
        }
    }

    fn driver_version(&self) -> Value {
        json!({
            "name": self.metadata.get("driver_id").cloned().unwrap_or(Value::Null),
            "version": {
                "api": API_VERSION,
                "driver": env!("CARGO_PKG_VERSION"),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CambridgeConfig, DeviceConfig};
    use crate::mock::{sample_snapshot, MockConnector, MockDevice};
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

    async fn start(connector: Arc<MockConnector>, hosts: &[&str]) -> (Arc<IntegrationRuntime>, Client) {
        let mut config = CambridgeConfig::in_memory();
        for host in hosts {
            config.add_device(DeviceConfig::new(*host, "Lounge")).unwrap();
        }
        let runtime = Arc::new(IntegrationRuntime::new(config.into_shared(), connector));
        let server = Arc::new(ApiServer::new(
            runtime.clone(),
            json!({ "driver_id": "cambridge_audio", "version": "0.1.0" }),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));

        let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let auth = next_json(&mut client).await;
        assert_eq!(auth["msg"], "authentication");
        (runtime, client)
    }

    async fn send(client: &mut Client, value: Value) {
        client.send(Message::Text(value.to_string())).await.unwrap();
    }

    async fn next_json(client: &mut Client) -> Value {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for message")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Next message matching `pred`, skipping the rest
    async fn next_matching(client: &mut Client, pred: impl Fn(&Value) -> bool) -> Value {
        loop {
            let value = next_json(client).await;
            if pred(&value) {
                return value;
            }
        }
    }

    #[tokio::test]
    async fn answers_version_and_unknown_requests() {
        let (_runtime, mut client) = start(Arc::new(MockConnector::new()), &[]).await;

        send(&mut client, json!({ "kind": "req", "id": 1, "msg": "get_driver_version" })).await;
        let version = next_matching(&mut client, |v| v["req_id"] == 1).await;
        assert_eq!(version["msg"], "driver_version");
        assert_eq!(version["msg_data"]["name"], "cambridge_audio");

        send(&mut client, json!({ "kind": "req", "id": 2, "msg": "launch_rockets" })).await;
        let result = next_matching(&mut client, |v| v["req_id"] == 2).await;
        assert_eq!(result["code"], 400);
    }

    #[tokio::test]
    async fn connect_event_initializes_and_commands_reach_the_device() {
        let connector = Arc::new(MockConnector::new());
        let device = connector.add("10.0.0.5", MockDevice::new(sample_snapshot()));
        let (runtime, mut client) = start(connector, &["10.0.0.5"]).await;

        send(&mut client, json!({ "kind": "event", "msg": "connect" })).await;
        let state = next_matching(&mut client, |v| {
            v["msg"] == "device_state" && v["msg_data"]["state"] == "CONNECTED"
        })
        .await;
        assert_eq!(state["cat"], "DEVICE");
        assert!(runtime.is_ready());

        send(
            &mut client,
            json!({
                "kind": "req", "id": 3, "msg": "entity_command",
                "msg_data": {
                    "entity_id": "media_player.cambridge_10_0_0_5",
                    "cmd_id": "volume",
                    "params": { "volume": 42 }
                }
            }),
        )
        .await;
        let result = next_matching(&mut client, |v| v["req_id"] == 3).await;
        assert_eq!(result["code"], 200);
        assert_eq!(device.calls(), vec!["set_volume(42)"]);

        send(
            &mut client,
            json!({
                "kind": "req", "id": 4, "msg": "entity_command",
                "msg_data": { "entity_id": "remote.nowhere", "cmd_id": "on" }
            }),
        )
        .await;
        let result = next_matching(&mut client, |v| v["req_id"] == 4).await;
        assert_eq!(result["code"], 404);
    }

    #[tokio::test]
    async fn entity_changes_are_sent_only_for_subscribed_entities() {
        let connector = Arc::new(MockConnector::new());
        connector.add("10.0.0.5", MockDevice::new(sample_snapshot()));
        let (runtime, mut client) = start(connector, &["10.0.0.5"]).await;
        assert!(runtime.initialize().await);

        send(
            &mut client,
            json!({
                "kind": "req", "id": 5, "msg": "subscribe_events",
                "msg_data": { "entity_ids": ["remote.cambridge_10_0_0_5"] }
            }),
        )
        .await;

        let change = next_matching(&mut client, |v| v["msg"] == "entity_change").await;
        assert_eq!(change["msg_data"]["entity_id"], "remote.cambridge_10_0_0_5");
        assert_eq!(change["msg_data"]["attributes"]["state"], "ON");

        let media_player = runtime.entity("media_player.cambridge_10_0_0_5").unwrap();
        media_player.push_update().await;
        let remote = runtime.entity("remote.cambridge_10_0_0_5").unwrap();
        remote.command("off", None).await;

        loop {
            let change = next_matching(&mut client, |v| v["msg"] == "entity_change").await;
            assert_eq!(change["msg_data"]["entity_id"], "remote.cambridge_10_0_0_5");
            if change["msg_data"]["attributes"]["state"] == "OFF" {
                break;
            }
        }
    }

    #[tokio::test]
    async fn setup_reports_progress_and_outcome() {
        let connector = Arc::new(MockConnector::new());
        connector.add("10.0.0.5", MockDevice::new(sample_snapshot()));
        let (runtime, mut client) = start(connector, &[]).await;

        send(
            &mut client,
            json!({
                "kind": "req", "id": 6, "msg": "setup_driver",
                "msg_data": { "setup_data": { "host": "10.0.0.5" } }
            }),
        )
        .await;

        let result = next_matching(&mut client, |v| v["req_id"] == 6).await;
        assert_eq!(result["code"], 200);
        let outcome = next_matching(&mut client, |v| {
            v["msg"] == "driver_setup_change" && v["msg_data"]["event_type"] == "STOP"
        })
        .await;
        assert_eq!(outcome["msg_data"]["state"], "OK");
        assert!(runtime.is_ready());
        assert!(runtime.config().read().get_device("cambridge_10_0_0_5").is_some());
    }

    #[tokio::test]
    async fn multi_device_setup_waits_for_user_input() {
        let connector = Arc::new(MockConnector::new());
        let (_runtime, mut client) = start(connector, &[]).await;

        send(
            &mut client,
            json!({
                "kind": "req", "id": 7, "msg": "setup_driver",
                "msg_data": { "setup_data": { "device_count": 2 } }
            }),
        )
        .await;

        let waiting = next_matching(&mut client, |v| {
            v["msg_data"]["state"] == "WAIT_USER_ACTION"
        })
        .await;
        let settings = waiting["msg_data"]["require_user_action"]["input"]["settings"]
            .as_array()
            .unwrap();
        assert_eq!(settings.len(), 4);

        send(
            &mut client,
            json!({
                "kind": "req", "id": 8, "msg": "set_driver_user_data",
                "msg_data": { "input_values": { "device_0_ip": "10.9.9.9", "device_0_name": "Nope" } }
            }),
        )
        .await;
        let outcome = next_matching(&mut client, |v| {
            v["msg"] == "driver_setup_change" && v["msg_data"]["event_type"] == "STOP"
        })
        .await;
        assert_eq!(outcome["msg_data"]["error"], "CONNECTION_REFUSED");
    }
}
