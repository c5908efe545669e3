use crate::error::{CambridgeError, Result};
use tokio::sync::broadcast;

/// Notification pushed by a device client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateUpdate {
    /// Part of the device state snapshot changed
    State,

    /// The connection to the device was lost or closed
    Connection,
}

/// Receiver for state updates
pub struct StateReceiver {
    rx: broadcast::Receiver<StateUpdate>,
}

impl StateReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<StateUpdate>) -> Self {
        Self { rx }
    }

    /// Receive the next state update
    ///
    /// Missed notifications collapse into one `State`, since the snapshot
    /// always holds the full device state. Fails with `ConnectionClosed`
    /// once the client is gone.
    pub async fn recv(&mut self) -> Result<StateUpdate> {
        match self.rx.recv().await {
            Ok(update) => Ok(update),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("State receiver lagged by {} updates", n);
                Ok(StateUpdate::State)
            }
            Err(broadcast::error::RecvError::Closed) => Err(CambridgeError::ConnectionClosed),
        }
    }
}
