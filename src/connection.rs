use crate::error::{CambridgeError, Result};
use crate::protocol::{MessageKind, Request, Response};
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Event emitted by the connection to its subscribers
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The device pushed an update for a subscribed endpoint
    Update(Box<Response>),

    /// The WebSocket is gone
    Closed,
}

/// WebSocket connection state
struct ConnectionState {
    /// Pending requests per path, answered in the order they were sent
    pending_requests: HashMap<String, VecDeque<oneshot::Sender<Response>>>,
    /// Channel for sending outgoing messages
    ws_tx: mpsc::UnboundedSender<Message>,
}

/// Low-level WebSocket connection handler
pub struct Connection {
    state: Arc<Mutex<ConnectionState>>,
    /// Broadcast channel for pushed updates (outside mutex to allow non-blocking subscribe)
    events_tx: broadcast::Sender<ConnectionEvent>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Connect to a WebSocket URL
    pub async fn connect(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        tracing::info!("Connecting to {}", url);

        let (ws_stream, _) = connect_async(&url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, _) = broadcast::channel(100);
        let connected = Arc::new(AtomicBool::new(true));

        let state = Arc::new(Mutex::new(ConnectionState {
            pending_requests: HashMap::new(),
            ws_tx,
        }));

        // Forward outgoing messages to the WebSocket
        tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let state_clone = state.clone();
        let events_tx_clone = events_tx.clone();
        let connected_clone = connected.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if let Err(e) = Self::handle_message(&state_clone, &events_tx_clone, text).await {
                            tracing::error!("Error handling message: {}", e);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket connection closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            // Connection closed, cancel all pending requests
            connected_clone.store(false, Ordering::SeqCst);
            state_clone.lock().await.pending_requests.clear();
            let _ = events_tx_clone.send(ConnectionEvent::Closed);
        });

        Ok(Self {
            state,
            events_tx,
            connected,
            reader,
        })
    }

    /// Handle an incoming message
    async fn handle_message(
        state: &Arc<Mutex<ConnectionState>>,
        events_tx: &broadcast::Sender<ConnectionEvent>,
        text: String,
    ) -> Result<()> {
        tracing::debug!("Received: {}", text);

        let response: Response = serde_json::from_str(&text)?;

        match response.kind {
            MessageKind::Response => {
                let mut state = state.lock().await;
                let waiter = state
                    .pending_requests
                    .get_mut(&response.path)
                    .and_then(|queue| queue.pop_front());
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    // Replies to requests that already timed out land here
                    None => tracing::debug!("Unsolicited response for {}", response.path),
                }
            }
            MessageKind::Update => {
                let _ = events_tx.send(ConnectionEvent::Update(Box::new(response)));
            }
            MessageKind::Unknown => {
                tracing::debug!("Ignoring message of unknown type for {}", response.path);
            }
        }

        Ok(())
    }

    /// Send a request and wait for the response
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        if !self.is_connected() {
            return Err(CambridgeError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock().await;
            state
                .pending_requests
                .entry(request.path.clone())
                .or_default()
                .push_back(tx);

            let json = serde_json::to_string(&request)?;
            tracing::debug!("Sending: {}", json);

            state
                .ws_tx
                .send(Message::Text(json))
                .map_err(|_| CambridgeError::ConnectionClosed)?;
        }

        let response = match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(CambridgeError::ConnectionClosed),
            Err(_) => {
                // Our receiver is dropped by now, so its sender reports closed
                let mut state = self.state.lock().await;
                if let Some(queue) = state.pending_requests.get_mut(&request.path) {
                    queue.retain(|tx| !tx.is_closed());
                }
                return Err(CambridgeError::Timeout);
            }
        };

        if let Some(detail) = response.error_message() {
            return Err(CambridgeError::ApiError { detail });
        }

        Ok(response)
    }

    /// Subscribe to pushed updates and connection loss
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    /// Whether the WebSocket is still open
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Close the WebSocket. Calling this on a closed connection is a no-op.
    pub async fn close(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut state = self.state.lock().await;
        let _ = state.ws_tx.send(Message::Close(None));
        state.pending_requests.clear();
        drop(state);

        self.reader.abort();
        let _ = self.events_tx.send(ConnectionEvent::Closed);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
