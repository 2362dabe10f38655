//! Pending-correlation queue.
//!
//! The [`QueueManager`] is the only owner of the pending list. Everything else
//! talks to it through a [`QueueHandle`], so the list is never shared and never
//! locked. Operations are applied strictly in submission order, which is what
//! makes "register before write" sufficient to never miss a fast reply.

use std::{
    collections::VecDeque,
    panic::{AssertUnwindSafe, catch_unwind},
};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::MatchFn,
    error::{DuplexError, DuplexResult},
    message::Message,
};

/// Commands accepted by the [`QueueManager`].
pub(crate) enum QueueOp {
    /// Append to the tail.
    Add(Message),
    /// Remove the oldest entry matching the argument. The argument takes the
    /// candidate (reply) side of the predicate, like `Take`.
    Remove(Message),
    /// Remove and return the oldest entry with a callback matching the candidate.
    Take {
        candidate: Message,
        reply: oneshot::Sender<Option<Message>>,
    },
    /// Copy of the current list, oldest first.
    Snapshot {
        reply: oneshot::Sender<Vec<Message>>,
    },
}

/// Cloneable submitter of [`QueueOp`]s.
#[derive(Clone)]
pub(crate) struct QueueHandle {
    ops: mpsc::Sender<QueueOp>,
}

impl QueueHandle {
    async fn submit(&self, op: QueueOp) -> DuplexResult<()> {
        self.ops
            .send(op)
            .await
            .map_err(|_| DuplexError::ConnectionClosed)
    }

    pub(crate) async fn add(&self, message: Message) -> DuplexResult<()> {
        self.submit(QueueOp::Add(message)).await
    }

    pub(crate) async fn remove(&self, needle: Message) -> DuplexResult<()> {
        self.submit(QueueOp::Remove(needle)).await
    }

    pub(crate) async fn take(&self, candidate: Message) -> DuplexResult<Option<Message>> {
        let (reply, rx) = oneshot::channel();
        self.submit(QueueOp::Take { candidate, reply }).await?;
        rx.await.map_err(|_| DuplexError::ConnectionClosed)
    }

    pub(crate) async fn snapshot(&self) -> DuplexResult<Vec<Message>> {
        let (reply, rx) = oneshot::channel();
        self.submit(QueueOp::Snapshot { reply }).await?;
        rx.await.map_err(|_| DuplexError::ConnectionClosed)
    }
}

/// Single-task owner of the pending list.
pub(crate) struct QueueManager {
    entries: VecDeque<Message>,
    matcher: Option<MatchFn>,
    ops: mpsc::Receiver<QueueOp>,
    shutdown: CancellationToken,
}

impl QueueManager {
    /// Build a manager seeded with entries carried over from a previous session.
    pub(crate) fn new(
        seed: Vec<Message>,
        matcher: Option<MatchFn>,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Self, QueueHandle) {
        let (tx, rx) = mpsc::channel(capacity);
        let manager = Self {
            entries: seed.into(),
            matcher,
            ops: rx,
            shutdown,
        };
        (manager, QueueHandle { ops: tx })
    }

    /// Process operations until shutdown, then hand back whatever is still pending.
    ///
    /// Operations already buffered at shutdown are still applied so that a
    /// registration accepted before teardown survives into the next session.
    pub(crate) async fn run(mut self) -> Vec<Message> {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                op = self.ops.recv() => match op {
                    Some(op) => self.apply(op),
                    None => break,
                },
            }
        }

        self.ops.close();
        while let Ok(op) = self.ops.try_recv() {
            self.apply(op);
        }

        debug!(pending = self.entries.len(), "Queue manager stopped");
        self.entries.into()
    }

    fn apply(&mut self, op: QueueOp) {
        match op {
            QueueOp::Add(message) => self.entries.push_back(message),
            QueueOp::Remove(needle) => {
                if let Some(pos) = self.position(&needle, false) {
                    self.entries.remove(pos);
                }
            }
            QueueOp::Take { candidate, reply } => {
                let pos = self.position(&candidate, true);
                let taken = pos.and_then(|pos| self.entries.remove(pos));
                if let (Some(pos), Err(Some(entry))) = (pos, reply.send(taken)) {
                    // Nobody is waiting for it; keep it pending.
                    self.entries.insert(pos, entry);
                }
            }
            QueueOp::Snapshot { reply } => {
                let _ = reply.send(self.entries.iter().cloned().collect());
            }
        }
    }

    /// Index of the oldest entry the matcher accepts for `needle`, called as
    /// `matcher(needle, entry)`.
    fn position(&self, needle: &Message, needs_callback: bool) -> Option<usize> {
        let matcher = self.matcher.as_ref()?;
        self.entries.iter().position(|entry| {
            if needs_callback && entry.callback.is_none() {
                return false;
            }
            match catch_unwind(AssertUnwindSafe(|| matcher(needle, entry))) {
                Ok(matched) => matched,
                Err(_) => {
                    warn!("Match predicate panicked; treating as no match");
                    false
                }
            }
        })
    }
}
