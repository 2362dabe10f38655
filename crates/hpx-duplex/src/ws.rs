//! WebSocket transport over `tokio-tungstenite`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use http::HeaderMap;
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
    tungstenite::{
        client::IntoClientRequest,
        protocol::{CloseFrame, Message, WebSocketConfig, frame::coding::CloseCode},
    },
};
use tracing::debug;

use crate::{
    error::{DuplexError, DuplexResult},
    frame::{Frame, OpCode},
    transport::{Connector, Transport},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections, optionally over a caller-supplied rustls config.
#[derive(Clone, Default)]
pub struct WsConnector {
    tls: Option<Arc<rustls::ClientConfig>>,
    ws_config: Option<WebSocketConfig>,
    disable_nagle: bool,
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this TLS configuration for `wss://` URLs.
    ///
    /// Without one, a config trusting the webpki roots is built on the
    /// process-default crypto provider, falling back to `ring`.
    #[must_use]
    pub fn tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    /// Protocol limits such as max message size.
    #[must_use]
    pub fn websocket_config(mut self, config: WebSocketConfig) -> Self {
        self.ws_config = Some(config);
        self
    }

    /// Set `TCP_NODELAY` on the socket.
    #[must_use]
    pub fn disable_nagle(mut self, disable: bool) -> Self {
        self.disable_nagle = disable;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str, headers: &HeaderMap) -> DuplexResult<Arc<dyn Transport>> {
        let mut request = url
            .into_client_request()
            .map_err(|e| DuplexError::connect(format!("Failed to build request: {e}")))?;
        request
            .headers_mut()
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));

        let connector = match (&self.tls, request.uri().scheme_str()) {
            (Some(tls), _) => Some(tokio_tungstenite::Connector::Rustls(Arc::clone(tls))),
            (None, Some("wss")) => Some(tokio_tungstenite::Connector::Rustls(default_tls_config()?)),
            (None, _) => None,
        };

        let (stream, response) =
            connect_async_tls_with_config(request, self.ws_config, self.disable_nagle, connector)
                .await
                .map_err(|e| DuplexError::connect(e.to_string()))?;
        debug!(url, status = %response.status(), "WebSocket handshake complete");

        Ok(Arc::new(WsTransport::new(stream)))
    }
}

/// Client config trusting the bundled webpki roots.
fn default_tls_config() -> DuplexResult<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DuplexError::connect(format!("Failed to build TLS config: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// A connected WebSocket with independently locked halves.
pub struct WsTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WsTransport {
    fn new(ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, frame: Frame) -> DuplexResult<()> {
        let message = frame_to_message(frame);
        self.sink.lock().await.send(message).await?;
        Ok(())
    }

    async fn receive(&self) -> DuplexResult<Frame> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(message)) => {
                    if let Some(frame) = message_to_frame(message) {
                        return Ok(frame);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(DuplexError::transport("WebSocket stream ended")),
            }
        }
    }

    async fn close(&self) -> DuplexResult<()> {
        // Already-closed sinks are fine here.
        let _ = self.sink.lock().await.close().await;
        Ok(())
    }
}

fn frame_to_message(frame: Frame) -> Message {
    match frame.opcode {
        OpCode::Text => match String::from_utf8(frame.payload.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => {
                debug!("Text payload is not UTF-8, sending as binary");
                Message::Binary(e.into_bytes())
            }
        },
        OpCode::Binary => Message::Binary(frame.payload.to_vec()),
        OpCode::Ping => Message::Ping(frame.payload.to_vec()),
        OpCode::Pong => Message::Pong(frame.payload.to_vec()),
        OpCode::Close => {
            let close = frame.close_code().map(|code| CloseFrame {
                code: CloseCode::from(code),
                reason: frame.close_reason().unwrap_or_default().into(),
            });
            Message::Close(close)
        }
    }
}

fn message_to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::text(text)),
        Message::Binary(data) => Some(Frame::binary(data)),
        Message::Ping(data) => Some(Frame::ping(data)),
        Message::Pong(data) => Some(Frame::pong(data)),
        Message::Close(Some(close)) => Some(Frame::close(u16::from(close.code), &close.reason)),
        Message::Close(None) => Some(Frame::new(OpCode::Close, Bytes::new())),
        Message::Frame(_) => None,
    }
}
