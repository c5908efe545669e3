use thiserror::Error;

/// Result type for Cambridge Audio operations
pub type Result<T> = std::result::Result<T, CambridgeError>;

/// Errors that can occur when talking to a StreamMagic device or the Remote
#[derive(Error, Debug)]
pub enum CambridgeError {
    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timed out waiting for response
    #[error("Request timeout")]
    Timeout,

    /// Device returned a non-success result
    #[error("API error: {detail}")]
    ApiError {
        /// Error detail message from the device
        detail: String,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No device client has been created for the session yet
    #[error("Client not initialized")]
    Uninitialized,

    /// Invalid or unexpected response from the device
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration could not be read or written
    #[error("Configuration error: {0}")]
    Config(String),
}
