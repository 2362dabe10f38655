//! In-memory transport and connector for unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use http::HeaderMap;
use tokio::{
    sync::{Mutex, Notify, mpsc},
    time::timeout,
};

use crate::{
    error::{DuplexError, DuplexResult},
    frame::Frame,
    transport::{Connector, Transport},
};

const WAIT: Duration = Duration::from_secs(2);

pub(crate) async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Option<T> {
    timeout(WAIT, rx.recv()).await.ok().flatten()
}

/// Poll `condition` until it holds, panicking after a generous timeout.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub(crate) struct ScriptedTransport {
    inbound: Mutex<mpsc::UnboundedReceiver<DuplexResult<Frame>>>,
    sent: mpsc::UnboundedSender<Frame>,
    fail_writes: AtomicBool,
    closed: AtomicBool,
    closed_notify: Notify,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, frame: Frame) -> DuplexResult<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(DuplexError::transport("write failed"));
        }
        let _ = self.sent.send(frame);
        Ok(())
    }

    async fn receive(&self) -> DuplexResult<Frame> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .unwrap_or_else(|| Err(DuplexError::transport("peer gone")))
    }

    async fn close(&self) -> DuplexResult<()> {
        self.closed.store(true, Ordering::Release);
        self.closed_notify.notify_waiters();
        Ok(())
    }
}

/// Test-side end of a [`ScriptedTransport`].
pub(crate) struct Peer {
    inbound: mpsc::UnboundedSender<DuplexResult<Frame>>,
    sent: mpsc::UnboundedReceiver<Frame>,
    transport: Arc<ScriptedTransport>,
}

impl Peer {
    pub(crate) fn push(&self, frame: Frame) {
        let _ = self.inbound.send(Ok(frame));
    }

    pub(crate) fn push_error(&self, err: DuplexError) {
        let _ = self.inbound.send(Err(err));
    }

    pub(crate) fn fail_writes(&self) {
        self.transport.fail_writes.store(true, Ordering::Release);
    }

    pub(crate) async fn next_sent(&mut self) -> Option<Frame> {
        recv_within(&mut self.sent).await
    }

    pub(crate) fn try_next_sent(&mut self) -> Option<Frame> {
        self.sent.try_recv().ok()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.transport.closed.load(Ordering::Acquire)
    }

    pub(crate) async fn wait_closed(&self) {
        let notified = self.transport.closed_notify.notified();
        if self.is_closed() {
            return;
        }
        timeout(WAIT, notified)
            .await
            .expect("transport was not closed in time");
    }
}

pub(crate) fn pair() -> (Arc<ScriptedTransport>, Peer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(ScriptedTransport {
        inbound: Mutex::new(inbound_rx),
        sent: sent_tx,
        fail_writes: AtomicBool::new(false),
        closed: AtomicBool::new(false),
        closed_notify: Notify::new(),
    });
    let peer = Peer {
        inbound: inbound_tx,
        sent: sent_rx,
        transport: Arc::clone(&transport),
    };
    (transport, peer)
}

/// Hands out queued transports in order; refuses once they run out.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    transports: parking_lot::Mutex<VecDeque<Arc<ScriptedTransport>>>,
    refusals: AtomicUsize,
    attempts: AtomicUsize,
    headers: parking_lot::Mutex<Option<HeaderMap>>,
    delay: parking_lot::Mutex<Duration>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push_peer(&self) -> Peer {
        let (transport, peer) = pair();
        self.transports.lock().push_back(transport);
        peer
    }

    /// Refuse the next `count` attempts before handing out transports.
    pub(crate) fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::Release);
    }

    /// Hold every connect attempt for `delay` before answering.
    pub(crate) fn delay_connects(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }

    pub(crate) fn last_headers(&self) -> Option<HeaderMap> {
        self.headers.lock().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _url: &str, headers: &HeaderMap) -> DuplexResult<Arc<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::AcqRel);
        *self.headers.lock() = Some(headers.clone());
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let refused = self
            .refusals
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(DuplexError::connect("connection refused"));
        }
        match self.transports.lock().pop_front() {
            Some(transport) => Ok(transport as Arc<dyn Transport>),
            None => Err(DuplexError::connect("connection refused")),
        }
    }
}
