//! Connection controller.
//!
//! A [`Connection`] owns at most one live [`Session`]. Each successful dial
//! builds a fresh session (transport, gates, queue manager, reader loop and
//! optional keepalive); teardown dismantles it in a fixed order and, for
//! abnormal closes with auto-reconnect enabled, hands off to the reconnect
//! supervisor. Pending correlations outlive the session that registered them
//! and are replayed by the next dial.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::ConnectionConfig,
    error::{DuplexError, DuplexResult},
    frame::{Frame, OpCode},
    gate::Gate,
    keepalive,
    message::Message,
    queue::{QueueHandle, QueueManager},
    reconnect,
    task::{guarded, spawn_guarded},
    transport::{Connector, Transport},
};

/// Lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never dialled, or the last dial failed.
    Disconnected,
    /// Dial in progress.
    Connecting,
    /// Session live, traffic allowed.
    Connected,
    /// Teardown in progress.
    Closing,
    /// Session torn down.
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// States from which a new session may be dialled.
    pub fn can_dial(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Closed)
    }
}

/// Why a session is being torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CloseCause {
    /// `close` or `disconnect` was called.
    User,
    /// The peer sent a close frame.
    Peer,
    /// Read/write failure or keepalive exhaustion.
    Failure,
}

/// Everything that lives exactly as long as one transport.
pub(crate) struct Session {
    epoch: u64,
    transport: Arc<dyn Transport>,
    read_gate: Gate,
    write_gate: Gate,
    queue: QueueHandle,
    shutdown: CancellationToken,
    closed: AtomicBool,
    broken: AtomicBool,
    manager: Mutex<Option<JoinHandle<Vec<Message>>>>,
}

impl Session {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }
}

struct Inner {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<ConnectionState>,
    session: Mutex<Option<Arc<Session>>>,
    url: Mutex<Option<String>>,
    carry: Mutex<Vec<Message>>,
    ping_count: AtomicI64,
    epoch: AtomicU64,
    halted: AtomicBool,
    dialing: tokio::sync::Mutex<()>,
}

/// A persistent duplex client connection.
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("url", &self.url())
            .finish()
    }
}

impl Connection {
    /// Create an idle connection. Nothing happens until [`dial`](Self::dial).
    pub fn new<C>(config: ConnectionConfig, connector: C) -> Self
    where
        C: Connector,
    {
        Self {
            inner: Arc::new(Inner {
                config,
                connector: Arc::new(connector),
                state: Mutex::new(ConnectionState::Disconnected),
                session: Mutex::new(None),
                url: Mutex::new(None),
                carry: Mutex::new(Vec::new()),
                ping_count: AtomicI64::new(0),
                epoch: AtomicU64::new(0),
                halted: AtomicBool::new(false),
                dialing: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Create an idle connection using the default WebSocket connector.
    #[cfg(feature = "websocket")]
    pub fn websocket(config: ConnectionConfig) -> Self {
        Self::new(config, crate::ws::WsConnector::new())
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The last dialled URL.
    pub fn url(&self) -> Option<String> {
        self.inner.url.lock().clone()
    }

    /// Current unanswered-ping counter.
    pub fn pending_pings(&self) -> i64 {
        self.inner.ping_count.load(Ordering::Acquire)
    }

    /// Report an application-level pong. Pong framing is protocol specific, so
    /// recognising one is left to the caller's `on_message` handler.
    pub fn pong_received(&self) {
        self.inner.ping_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Open a session to `url`.
    ///
    /// The result reflects only this connect attempt. Messages still pending
    /// from a previous session are re-sent once the new session is up.
    pub async fn dial(&self, url: impl Into<String>) -> DuplexResult<()> {
        self.inner.halted.store(false, Ordering::SeqCst);
        self.dial_session(url.into()).await
    }

    pub(crate) async fn dial_session(&self, url: String) -> DuplexResult<()> {
        let config = &self.inner.config;
        config.validate().map_err(DuplexError::config)?;

        let _dialing = self.inner.dialing.lock().await;
        {
            let mut state = self.inner.state.lock();
            if !state.can_dial() {
                return Err(DuplexError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }
        *self.inner.url.lock() = Some(url.clone());

        let connected = match config.handshake_headers() {
            Ok(headers) => self.inner.connector.connect(&url, &headers).await,
            Err(e) => Err(e),
        };
        let transport = match connected {
            Ok(transport) => transport,
            Err(e) => {
                *self.inner.state.lock() = ConnectionState::Disconnected;
                return Err(match e {
                    DuplexError::Connect { .. } | DuplexError::InvalidHeader(_) => e,
                    other => DuplexError::connect(other.to_string()),
                });
            }
        };

        let seed = std::mem::take(&mut *self.inner.carry.lock());
        let replay: Vec<Bytes> = seed.iter().map(|m| m.body.clone()).collect();

        let shutdown = CancellationToken::new();
        let (manager, queue) = QueueManager::new(
            seed,
            config.match_msg.clone(),
            config.queue_capacity,
            shutdown.child_token(),
        );
        let epoch = self.inner.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let session = Arc::new(Session {
            epoch,
            transport,
            read_gate: Gate::new(),
            write_gate: Gate::new(),
            queue,
            shutdown,
            closed: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            manager: Mutex::new(Some(tokio::spawn(manager.run()))),
        });

        self.inner.ping_count.store(0, Ordering::Release);
        *self.inner.session.lock() = Some(Arc::clone(&session));
        *self.inner.state.lock() = ConnectionState::Connected;
        session.read_gate.prime();
        session.write_gate.prime();

        // A close that found no session yet must still win.
        if self.is_halted() {
            debug!(url = %url, epoch, "Closed while dialling");
            self.teardown(&session, CloseCause::User).await;
            return Err(DuplexError::ConnectionClosed);
        }
        info!(url = %url, epoch, "Connected");

        tokio::spawn(read_loop(self.clone(), Arc::clone(&session)));
        if config.keepalive_enabled() {
            tokio::spawn(keepalive::run(self.clone(), Arc::clone(&session)));
        }

        if let Some(on_connected) = config.on_connected.clone() {
            let conn = self.clone();
            spawn_guarded("on_connected", move || on_connected(conn));
        }

        if !replay.is_empty() {
            debug!(count = replay.len(), epoch, "Replaying pending messages");
            for body in replay {
                let conn = self.clone();
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    let _ = conn.write(&session, Frame::text(body)).await;
                });
            }
        }

        Ok(())
    }

    /// Send a message.
    ///
    /// A message with a callback is registered before it is written, so a
    /// reply can never overtake its registration.
    pub async fn send(&self, message: Message) -> DuplexResult<()> {
        if message.body.is_empty() {
            return Err(DuplexError::EmptyBody);
        }
        let session = self.live_session()?;

        if message.callback.is_some() {
            session.queue.add(message.clone()).await?;
        }
        self.write(&session, Frame::text(message.body)).await
    }

    /// Cancel a pending correlation, typically after a caller-side timeout.
    ///
    /// The oldest pending entry the match predicate pairs with `message` is
    /// dropped without invoking its callback. `message` is passed as the
    /// predicate's first (candidate) argument and each pending entry as the
    /// second, exactly as an inbound reply would be; with an asymmetric
    /// predicate, pass a message shaped like the expected reply.
    pub async fn remove_from_queue(&self, message: &Message) -> DuplexResult<()> {
        let session = self.live_session()?;
        session.queue.remove(message.clone()).await
    }

    /// Snapshot of the pending correlations, oldest first.
    pub async fn pending(&self) -> DuplexResult<Vec<Message>> {
        let session = self.live_session()?;
        session.queue.snapshot().await
    }

    /// Close the connection: best-effort close frame, then full teardown.
    ///
    /// Idempotent. Never triggers a reconnect and stops one in progress.
    pub async fn close(&self) {
        self.inner.halted.store(true, Ordering::SeqCst);
        let session = self.inner.session.lock().clone();
        if let Some(session) = session {
            self.teardown(&session, CloseCause::User).await;
        }
    }

    /// Alias of [`close`](Self::close).
    pub async fn disconnect(&self) {
        self.close().await;
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.inner.halted.load(Ordering::SeqCst)
    }

    /// Count one unanswered ping, returning the new total.
    pub(crate) fn record_ping(&self) -> i64 {
        self.inner.ping_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn live_session(&self) -> DuplexResult<Arc<Session>> {
        if !self.is_connected() {
            return Err(DuplexError::ConnectionClosed);
        }
        self.inner
            .session
            .lock()
            .clone()
            .filter(|session| !session.is_closed())
            .ok_or(DuplexError::ConnectionClosed)
    }

    /// Write one frame through the session's write gate.
    ///
    /// A failed write leaves the gate drained and routes the error to the
    /// error path; the session is unusable afterwards.
    pub(crate) async fn write(&self, session: &Arc<Session>, frame: Frame) -> DuplexResult<()> {
        let pass = session
            .write_gate
            .acquire()
            .await
            .map_err(|_| DuplexError::ConnectionClosed)?;

        match session.transport.send(frame).await {
            Ok(()) => {
                drop(pass);
                Ok(())
            }
            Err(e) => {
                pass.poison();
                session.broken.store(true, Ordering::Release);
                if !session.is_closed() {
                    warn!(error = %e, epoch = session.epoch, "Write failed");
                }
                self.fail(session, &e).await;
                Err(e)
            }
        }
    }

    /// Error path: notify, then tear down.
    pub(crate) async fn fail(&self, session: &Arc<Session>, err: &DuplexError) {
        if session.is_closed() {
            return;
        }
        if let Some(on_error) = &self.inner.config.on_error {
            guarded("on_error", || on_error(err));
        }
        self.teardown(session, CloseCause::Failure).await;
    }

    /// Ordered, idempotent teardown of one session.
    pub(crate) async fn teardown(&self, session: &Arc<Session>, cause: CloseCause) {
        if session.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.inner.state.lock() = ConnectionState::Closing;

        self.send_close_frame(session).await;
        session.read_gate.close();
        session.write_gate.close();
        session.shutdown.cancel();

        let manager = session.manager.lock().take();
        if let Some(manager) = manager {
            match manager.await {
                Ok(pending) => *self.inner.carry.lock() = pending,
                Err(e) => warn!(error = %e, "Queue manager task failed"),
            }
        }

        if let Err(e) = session.transport.close().await {
            debug!(error = %e, "Transport close failed");
        }

        {
            let mut current = self.inner.session.lock();
            if current
                .as_ref()
                .is_some_and(|live| Arc::ptr_eq(live, session))
            {
                *current = None;
            }
        }
        *self.inner.state.lock() = ConnectionState::Closed;
        info!(epoch = session.epoch, ?cause, "Connection closed");

        if cause != CloseCause::User && self.inner.config.reconnect && !self.is_halted() {
            if let Some(url) = self.url() {
                reconnect::spawn_supervisor(self.clone(), url);
            }
        }
    }

    async fn send_close_frame(&self, session: &Session) {
        if session.broken.load(Ordering::Acquire) {
            debug!(epoch = session.epoch, "Skipping close frame on broken transport");
            return;
        }
        match timeout(self.inner.config.close_grace, session.write_gate.acquire()).await {
            Ok(Ok(pass)) => {
                if let Err(e) = session.transport.send(Frame::close_normal()).await {
                    debug!(error = %e, "Close frame not delivered");
                }
                drop(pass);
            }
            _ => debug!(epoch = session.epoch, "Write gate unavailable; skipping close frame"),
        }
    }

    /// Route one inbound payload to a pending callback or the general handler.
    async fn dispatch(&self, session: &Session, payload: Bytes) {
        let config = &self.inner.config;
        let mut message = Message::new(payload);
        if let Some(prep) = &config.msg_prep {
            let mut prepared = message.clone();
            if guarded("msg_prep", || prep(&mut prepared)).is_some() {
                message = prepared;
            }
        }

        if config.match_msg.is_some() {
            match session.queue.take(message.clone()).await {
                Ok(Some(pending)) => {
                    if let Some(callback) = pending.callback {
                        let conn = self.clone();
                        spawn_guarded("callback", move || callback(message, conn));
                    }
                    return;
                }
                Ok(None) => {}
                Err(_) => debug!("Queue closed before dispatch; treating message as unmatched"),
            }
        }

        match config.on_message.clone() {
            Some(on_message) => {
                let conn = self.clone();
                spawn_guarded("on_message", move || on_message(message, conn));
            }
            None => debug!(len = message.body.len(), "Dropping unmatched message"),
        }
    }
}

/// Sole consumer of inbound frames for one session.
async fn read_loop(conn: Connection, session: Arc<Session>) {
    loop {
        let Ok(pass) = session.read_gate.acquire().await else {
            break;
        };
        let received = tokio::select! {
            biased;
            _ = session.shutdown.cancelled() => break,
            received = session.transport.receive() => received,
        };

        let frame = match received {
            Ok(frame) => {
                drop(pass);
                frame
            }
            Err(e) => {
                pass.poison();
                if !session.is_closed() {
                    warn!(error = %e, epoch = session.epoch, "Read failed");
                    conn.fail(&session, &e).await;
                }
                break;
            }
        };

        match frame.opcode {
            OpCode::Close => {
                debug!(code = ?frame.close_code(), epoch = session.epoch, "Peer sent close frame");
                conn.teardown(&session, CloseCause::Peer).await;
                break;
            }
            OpCode::Ping | OpCode::Pong => {
                debug!(opcode = ?frame.opcode, "Ignoring control frame");
            }
            OpCode::Text | OpCode::Binary => {
                let conn = conn.clone();
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    conn.dispatch(&session, frame.payload).await;
                });
            }
        }
    }
    debug!(epoch = session.epoch, "Reader loop stopped");
}
