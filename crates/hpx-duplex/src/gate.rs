//! Single-slot exclusion gates.
//!
//! A [`Gate`] lets exactly one holder through at a time. It starts empty and
//! must be [`prime`](Gate::prime)d once the session is ready. Closing the gate
//! wakes every waiter with [`GateClosed`] and rejects later acquires.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

/// The gate has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateClosed;

/// Binary semaphore guarding one read or one write path.
#[derive(Debug)]
pub struct Gate {
    slot: Semaphore,
    primed: AtomicBool,
    closed: CancellationToken,
}

/// Proof of passage through a [`Gate`]. Dropping it releases the slot.
#[must_use = "dropping the pass releases the gate immediately"]
#[derive(Debug)]
pub struct GatePass<'a> {
    permit: SemaphorePermit<'a>,
}

impl GatePass<'_> {
    /// Keep the slot consumed for good, leaving the gate drained.
    pub fn poison(self) {
        self.permit.forget();
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// A gate with no slot available yet.
    pub fn new() -> Self {
        Self {
            slot: Semaphore::new(0),
            primed: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    /// Make the single slot available. Extra calls are ignored.
    pub fn prime(&self) {
        if !self.is_closed() && !self.primed.swap(true, Ordering::AcqRel) {
            self.slot.add_permits(1);
        }
    }

    /// Wait for the slot.
    pub async fn acquire(&self) -> Result<GatePass<'_>, GateClosed> {
        if self.closed.is_cancelled() {
            return Err(GateClosed);
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(GateClosed),
            permit = self.slot.acquire() => permit
                .map(|permit| GatePass { permit })
                .map_err(|_| GateClosed),
        }
    }

    /// Take the slot only if it is free right now.
    pub fn try_acquire(&self) -> Result<Option<GatePass<'_>>, GateClosed> {
        if self.closed.is_cancelled() {
            return Err(GateClosed);
        }
        match self.slot.try_acquire() {
            Ok(permit) => Ok(Some(GatePass { permit })),
            Err(tokio::sync::TryAcquireError::NoPermits) => Ok(None),
            Err(tokio::sync::TryAcquireError::Closed) => Err(GateClosed),
        }
    }

    /// Close the gate, waking all waiters. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
        self.slot.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
