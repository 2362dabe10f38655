//! Application messages.

use std::{collections::HashMap, fmt, sync::Arc};

use bytes::Bytes;

use crate::connection::Connection;

/// Response callback attached to an outbound [`Message`].
///
/// Invoked at most once, with the matching inbound message.
pub type Callback = Arc<dyn Fn(Message, Connection) + Send + Sync>;

/// A unit of application data.
///
/// Cloning is cheap: the body is reference counted and the callback is an `Arc`.
#[derive(Clone, Default)]
pub struct Message {
    /// Opaque payload.
    pub body: Bytes,
    /// Invoked when an inbound message matches this one.
    pub callback: Option<Callback>,
    /// Free-form caller metadata, typically filled by a `msg_prep` hook.
    pub params: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Create a message without a callback.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            callback: None,
            params: HashMap::new(),
        }
    }

    /// Attach a response callback.
    #[must_use]
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Message, Connection) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Set one metadata entry.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Look up a metadata entry.
    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    /// The body as UTF-8, if it is valid.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("body", &self.body)
            .field("callback", &self.callback.is_some())
            .field("params", &self.params)
            .finish()
    }
}

impl From<&'static str> for Message {
    fn from(s: &'static str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<Vec<u8>> for Message {
    fn from(v: Vec<u8>) -> Self {
        Self::new(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let msg = Message::new("hello")
            .with_param("id", 7)
            .with_callback(|_, _| {});

        assert_eq!(msg.as_text(), Some("hello"));
        assert_eq!(msg.param("id"), Some(&serde_json::json!(7)));
        assert!(msg.has_callback());
        assert!(!msg.is_empty());
    }

    #[test]
    fn default_is_empty() {
        let msg = Message::default();
        assert!(msg.is_empty());
        assert!(!msg.has_callback());
        assert!(msg.params.is_empty());
    }

    #[test]
    fn clone_shares_callback() {
        let msg = Message::new("a").with_callback(|_, _| {});
        let copy = msg.clone();
        match (&msg.callback, &copy.callback) {
            (Some(a), Some(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("callback lost on clone"),
        }
    }

    #[test]
    fn debug_hides_callback_body() {
        let msg = Message::new("x").with_callback(|_, _| {});
        let rendered = format!("{msg:?}");
        assert!(rendered.contains("callback: true"));
    }
}
