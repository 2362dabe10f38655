//! Connection configuration.

use std::{fmt, sync::Arc, time::Duration};

use base64::Engine;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, header::AUTHORIZATION};

use crate::{
    connection::Connection,
    error::{DuplexError, DuplexResult},
    message::Message,
};

/// General inbound handler for messages not claimed by a pending callback.
pub type MessageHandler = Arc<dyn Fn(Message, Connection) + Send + Sync>;
/// Error notification.
pub type ErrorHandler = Arc<dyn Fn(&DuplexError) + Send + Sync>;
/// Post-connect hook.
pub type ConnectedHandler = Arc<dyn Fn(Connection) + Send + Sync>;
/// Correlation predicate: `(candidate, pending) -> matched`.
pub type MatchFn = Arc<dyn Fn(&Message, &Message) -> bool + Send + Sync>;
/// Inbound message mutation hook, run before matching and dispatch.
pub type PrepFn = Arc<dyn Fn(&mut Message) + Send + Sync>;
/// Composes a keepalive payload on every keepalive tick.
pub type PingComposer = Arc<dyn Fn() -> Bytes + Send + Sync>;

/// Username and password encoded into an `Authorization: Basic` header.
#[derive(Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The full header value, `Basic <base64(username:password)>`.
    pub fn header_value(&self) -> DuplexResult<HeaderValue> {
        let credentials = format!("{}:{}", self.username, self.password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for a [`Connection`].
///
/// Every field must be set before the first `dial`; reconnects reuse it as is.
#[derive(Clone)]
pub struct ConnectionConfig {
    // Callbacks
    /// Receives every inbound message not claimed by a pending callback.
    pub on_message: Option<MessageHandler>,
    /// Notified of transport failures and keepalive exhaustion.
    pub on_error: Option<ErrorHandler>,
    /// Fired after each successful dial.
    pub on_connected: Option<ConnectedHandler>,
    /// Correlates inbound messages with pending outbound ones.
    pub match_msg: Option<MatchFn>,
    /// Mutates inbound messages before matching.
    pub msg_prep: Option<PrepFn>,

    // Reconnection
    /// Redial automatically after an abnormal close.
    pub reconnect: bool,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,

    // Handshake
    /// Credentials sent as a basic-auth header.
    pub basic_auth: Option<BasicAuth>,
    /// Extra headers sent with the connect request.
    pub request_headers: HeaderMap,

    // Keepalive
    /// Fixed application-level keepalive payload.
    pub ping_message: Bytes,
    /// Overrides `ping_message` when set.
    pub compose_ping: Option<PingComposer>,
    /// Interval between keepalive ticks. Zero disables keepalive.
    pub ping_interval: Duration,
    /// Count pings until `pong_received` is called. Needs `on_message`.
    pub count_pongs: bool,
    /// Unanswered pings tolerated beyond one.
    pub unreceived_ping_threshold: u32,

    // Internals
    /// Capacity of the queue operation channel.
    pub queue_capacity: usize,
    /// Max wait for the write gate when sending the close frame.
    pub close_grace: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            on_message: None,
            on_error: None,
            on_connected: None,
            match_msg: None,
            msg_prep: None,
            reconnect: false,
            reconnect_delay: Duration::from_secs(1),
            basic_auth: None,
            request_headers: HeaderMap::new(),
            ping_message: Bytes::new(),
            compose_ping: None,
            ping_interval: Duration::ZERO,
            count_pongs: false,
            unreceived_ping_threshold: 0,
            queue_capacity: 64,
            close_grace: Duration::from_secs(1),
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the general inbound handler.
    #[must_use]
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(Message, Connection) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Set the error notification.
    #[must_use]
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&DuplexError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Set the post-connect hook.
    #[must_use]
    pub fn on_connected<F>(mut self, f: F) -> Self
    where
        F: Fn(Connection) + Send + Sync + 'static,
    {
        self.on_connected = Some(Arc::new(f));
        self
    }

    /// Set the correlation predicate.
    #[must_use]
    pub fn match_msg<F>(mut self, f: F) -> Self
    where
        F: Fn(&Message, &Message) -> bool + Send + Sync + 'static,
    {
        self.match_msg = Some(Arc::new(f));
        self
    }

    /// Set the inbound preparation hook.
    #[must_use]
    pub fn msg_prep<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Message) + Send + Sync + 'static,
    {
        self.msg_prep = Some(Arc::new(f));
        self
    }

    /// Enable or disable auto-reconnect.
    #[must_use]
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the delay between reconnect attempts.
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set basic-auth credentials.
    #[must_use]
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some(BasicAuth::new(username, password));
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn header(mut self, name: http::HeaderName, value: HeaderValue) -> Self {
        self.request_headers.insert(name, value);
        self
    }

    /// Set a fixed keepalive payload.
    #[must_use]
    pub fn ping_message(mut self, payload: impl Into<Bytes>) -> Self {
        self.ping_message = payload.into();
        self
    }

    /// Compose the keepalive payload on every tick.
    #[must_use]
    pub fn compose_ping<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Bytes + Send + Sync + 'static,
    {
        self.compose_ping = Some(Arc::new(f));
        self
    }

    /// Set the ping interval.
    #[must_use]
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Enable pong counting.
    #[must_use]
    pub fn count_pongs(mut self, count: bool) -> Self {
        self.count_pongs = count;
        self
    }

    /// Set the unanswered-ping threshold.
    #[must_use]
    pub fn unreceived_ping_threshold(mut self, threshold: u32) -> Self {
        self.unreceived_ping_threshold = threshold;
        self
    }

    /// Set the queue operation channel capacity.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the close-frame grace period.
    #[must_use]
    pub fn close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Keepalive runs only with an interval and some payload source.
    pub fn keepalive_enabled(&self) -> bool {
        !self.ping_interval.is_zero()
            && (self.compose_ping.is_some() || !self.ping_message.is_empty())
    }

    /// Pongs can only be observed through the general handler.
    pub fn counts_pongs(&self) -> bool {
        self.count_pongs && self.on_message.is_some()
    }

    /// Headers for one connect attempt, including basic auth.
    pub fn handshake_headers(&self) -> DuplexResult<HeaderMap> {
        let mut headers = self.request_headers.clone();
        if let Some(auth) = &self.basic_auth {
            headers.insert(AUTHORIZATION, auth.header_value()?);
        }
        Ok(headers)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == 0 {
            return Err("Queue capacity must be > 0".to_string());
        }
        if self.reconnect && self.reconnect_delay.is_zero() {
            return Err("Reconnect delay must be > 0".to_string());
        }
        if self.close_grace.is_zero() {
            return Err("Close grace must be > 0".to_string());
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_connected", &self.on_connected.is_some())
            .field("match_msg", &self.match_msg.is_some())
            .field("msg_prep", &self.msg_prep.is_some())
            .field("reconnect", &self.reconnect)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("basic_auth", &self.basic_auth)
            .field("ping_interval", &self.ping_interval)
            .field("count_pongs", &self.count_pongs)
            .field("unreceived_ping_threshold", &self.unreceived_ping_threshold)
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert!(!config.reconnect);
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.ping_interval, Duration::ZERO);
        assert_eq!(config.queue_capacity, 64);
        assert!(config.ping_message.is_empty());
        assert!(!config.keepalive_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_keepalive_needs_interval_and_payload() {
        let config = ConnectionConfig::new().ping_interval(Duration::from_secs(5));
        assert!(!config.keepalive_enabled());

        let config = config.ping_message("ping");
        assert!(config.keepalive_enabled());

        let config = ConnectionConfig::new()
            .ping_interval(Duration::from_secs(5))
            .compose_ping(|| Bytes::from_static(b"{\"op\":\"ping\"}"));
        assert!(config.keepalive_enabled());

        let config = ConnectionConfig::new().ping_message("ping");
        assert!(!config.keepalive_enabled());
    }

    #[test]
    fn test_count_pongs_requires_handler() {
        let config = ConnectionConfig::new().count_pongs(true);
        assert!(!config.counts_pongs());

        let config = config.on_message(|_, _| {});
        assert!(config.counts_pongs());
    }

    #[test]
    fn test_basic_auth_header() {
        let config = ConnectionConfig::new().basic_auth("Aladdin", "open sesame");
        let headers = config.handshake_headers().expect("headers");
        assert_eq!(
            headers.get(AUTHORIZATION).map(|v| v.as_bytes()),
            Some(&b"Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="[..])
        );
    }

    #[test]
    fn test_handshake_headers_keep_custom_headers() {
        let config = ConnectionConfig::new().header(
            http::HeaderName::from_static("x-client"),
            HeaderValue::from_static("duplex"),
        );
        let headers = config.handshake_headers().expect("headers");
        assert_eq!(headers.get("x-client").map(|v| v.as_bytes()), Some(&b"duplex"[..]));
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_validation_zero_queue_capacity() {
        let config = ConnectionConfig::new().queue_capacity(0);
        assert_eq!(config.validate().unwrap_err(), "Queue capacity must be > 0");
    }

    #[test]
    fn test_validation_zero_reconnect_delay() {
        let config = ConnectionConfig::new()
            .reconnect(true)
            .reconnect_delay(Duration::ZERO);
        assert_eq!(config.validate().unwrap_err(), "Reconnect delay must be > 0");

        let config = ConnectionConfig::new().reconnect_delay(Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ConnectionConfig::new().basic_auth("user", "hunter2");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
