//! The transport seam.
//!
//! A [`Connector`] opens a [`Transport`]; the transport moves whole frames.
//! Framing, handshake and compression live below this seam. The connection
//! guarantees at most one `send` and at most one `receive` are in flight at a
//! time, but the two may run concurrently, so implementations keep their read
//! and write halves independently lockable.

use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;

use crate::{error::DuplexResult, frame::Frame};

/// An open duplex channel.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Write one frame.
    async fn send(&self, frame: Frame) -> DuplexResult<()>;

    /// Block until the next frame arrives.
    async fn receive(&self) -> DuplexResult<Frame>;

    /// Release the underlying channel. Must be safe to call more than once.
    async fn close(&self) -> DuplexResult<()>;
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str, headers: &HeaderMap) -> DuplexResult<Arc<dyn Transport>>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for Arc<C> {
    async fn connect(&self, url: &str, headers: &HeaderMap) -> DuplexResult<Arc<dyn Transport>> {
        (**self).connect(url, headers).await
    }
}
