//! # hpx-duplex
//!
//! Persistent duplex client connections over a message-oriented transport.
//!
//! A [`Connection`] wraps one long-lived channel (WebSocket by default) and adds
//! the pieces every streaming client ends up rebuilding:
//!
//! - **Request/response correlation**: messages sent with a callback are held
//!   in a pending queue until an inbound message matches them
//! - **Keepalive**: periodic application-level pings with an unanswered-ping
//!   threshold
//! - **Auto-reconnect**: abnormal closes are redialled on a fixed delay and
//!   pending requests are replayed on the new session
//! - **Serialized I/O**: at most one read and one write are in flight at a time
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use hpx_duplex::{Connection, ConnectionConfig, Message};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new()
//!         .match_msg(|candidate, pending| candidate.param("id") == pending.param("id"))
//!         .on_message(|msg, _conn| println!("unsolicited: {msg:?}"))
//!         .reconnect(true)
//!         .reconnect_delay(Duration::from_secs(2));
//!
//!     let conn = Connection::websocket(config);
//!     conn.dial("wss://stream.example.com/ws").await?;
//!
//!     conn.send(
//!         Message::new(r#"{"id":1,"op":"subscribe"}"#)
//!             .with_param("id", 1)
//!             .with_callback(|reply, _conn| println!("ack: {reply:?}")),
//!     )
//!     .await?;
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod gate;
mod keepalive;
pub mod message;
mod queue;
mod reconnect;
mod task;
pub mod transport;

#[cfg(feature = "websocket")]
pub mod ws;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{
    BasicAuth, ConnectedHandler, ConnectionConfig, ErrorHandler, MatchFn, MessageHandler,
    PingComposer, PrepFn,
};
pub use connection::{Connection, ConnectionState};
pub use error::{DuplexError, DuplexResult};
pub use frame::{Frame, OpCode};
pub use message::{Callback, Message};
pub use transport::{Connector, Transport};
#[cfg(feature = "websocket")]
pub use ws::{WsConnector, WsTransport};
