//! Error handling for duplex connections.

use thiserror::Error;

/// The main result type used throughout the crate.
pub type DuplexResult<T> = Result<T, DuplexError>;

/// Every failure a [`Connection`](crate::Connection) can report.
///
/// Errors local to one call (`EmptyBody`, `ConnectionClosed`, `AlreadyConnected`,
/// `Config`) are returned to the caller and leave the connection untouched.
/// `Transport` and `KeepaliveExhausted` compromise the shared channel and are
/// always followed by a full teardown.
#[derive(Error, Debug)]
pub enum DuplexError {
    /// A message was sent without a payload.
    #[error("no message body")]
    EmptyBody,

    /// The connection is not in the connected state.
    #[error("closed connection")]
    ConnectionClosed,

    /// `dial` was called while a session is still live.
    #[error("connection already established")]
    AlreadyConnected,

    /// The transport could not be established.
    #[error("Connect error: {message}")]
    Connect { message: String },

    /// Mid-session read or write failure.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Keepalive pings went unanswered for too long.
    #[error("too many pings not responded to ({unanswered} unanswered)")]
    KeepaliveExhausted { unanswered: i64 },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A configured header value could not be encoded.
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
}

#[cfg(feature = "websocket")]
impl From<tokio_tungstenite::tungstenite::Error> for DuplexError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport {
            message: e.to_string(),
        }
    }
}

impl DuplexError {
    /// Create a connect error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a keepalive exhaustion error.
    pub fn keepalive_exhausted(unanswered: i64) -> Self {
        Self::KeepaliveExhausted { unanswered }
    }

    /// Returns true if this error tears the session down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::KeepaliveExhausted { .. }
        )
    }
}
