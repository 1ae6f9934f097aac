//! Counting gate that bounds concurrent upstream calls of one pool.
//!
//! ## Overview
//!
//! - A request is granted immediately only when the pool is below its limit **and** nobody is
//!   queued; otherwise it joins a FIFO queue, so a late arrival never overtakes a waiter.
//! - A queued request ends in exactly one of: grant (a holder released and handed its slot
//!   over), wait-timeout ([`AdmissionError::Busy`]) or caller cancellation
//!   ([`AdmissionError::Cancelled`]). The waiter leaves the queue exactly once.
//! - A granted slot is represented by a [`Permit`]; dropping it releases the slot, so no exit
//!   path can leak capacity. Release hands the slot directly to the head waiter, leaving the
//!   active count unchanged across the handoff.
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::GenerationError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("no {pool} slot became free within {waited_ms} ms")]
    Busy { pool: &'static str, waited_ms: u64 },
    #[error("admission wait cancelled")]
    Cancelled,
}

impl From<AdmissionError> for GenerationError {
    fn from(e: AdmissionError) -> Self {
        match e {
            AdmissionError::Busy { pool, waited_ms } => GenerationError::Busy { pool, waited_ms },
            AdmissionError::Cancelled => GenerationError::Cancelled,
        }
    }
}

/// Admission pool with an owned, internally synchronized state.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Shared>,
}

struct Shared {
    name: &'static str,
    limit: usize,
    wait_timeout: Duration,
    state: Mutex<PoolState>,
}

struct PoolState {
    active: usize,
    waiters: VecDeque<Waiter>,
    next_id: u64,
}

struct Waiter {
    id: u64,
    grant: oneshot::Sender<()>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Frees one slot: hand it to the oldest live waiter or decrement the active count.
    fn release_locked(&self, state: &mut PoolState) {
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.grant.send(()).is_ok() {
                trace!(pool = self.name, waiter = waiter.id, "slot handed to waiter");
                return;
            }
        }
        state.active = state.active.saturating_sub(1);
        trace!(pool = self.name, active = state.active, "slot released");
    }

    fn release(&self) {
        let mut state = self.lock();
        self.release_locked(&mut state);
    }
}

impl AdmissionController {
    /// Create a pool. A zero `limit` is treated as one.
    pub fn new(name: &'static str, limit: usize, wait_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Shared {
                name,
                limit: limit.max(1),
                wait_timeout,
                state: Mutex::new(PoolState {
                    active: 0,
                    waiters: VecDeque::new(),
                    next_id: 0,
                }),
            }),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.inner.lock().active
    }

    /// Requests currently waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Wait for a slot, failing on wait-timeout or cancellation.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Permit, AdmissionError> {
        if cancel.is_cancelled() {
            return Err(AdmissionError::Cancelled);
        }

        let (id, rx) = {
            let mut state = self.inner.lock();
            if state.active < self.inner.limit && state.waiters.is_empty() {
                state.active += 1;
                trace!(pool = self.inner.name, active = state.active, "slot granted");
                return Ok(Permit::new(Arc::clone(&self.inner)));
            }

            let id = state.next_id;
            state.next_id += 1;
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { id, grant: tx });
            trace!(
                pool = self.inner.name,
                waiter = id,
                queued = state.waiters.len(),
                "waiting for slot"
            );
            (id, rx)
        };

        let mut pending = PendingWait {
            inner: Arc::clone(&self.inner),
            id,
            rx,
            settled: false,
        };

        let outcome = tokio::select! {
            granted = &mut pending.rx => match granted {
                Ok(()) => Ok(()),
                // The sender is only dropped after a send, or by us.
                Err(_) => Err(AdmissionError::Cancelled),
            },
            _ = cancel.cancelled() => Err(AdmissionError::Cancelled),
            _ = tokio::time::sleep(self.inner.wait_timeout) => Err(AdmissionError::Busy {
                pool: self.inner.name,
                waited_ms: self.inner.wait_timeout.as_millis() as u64,
            }),
        };

        pending.settle(outcome)
    }
}

/// A queued acquire; removes itself from the queue if abandoned.
struct PendingWait {
    inner: Arc<Shared>,
    id: u64,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl PendingWait {
    fn settle(mut self, outcome: Result<(), AdmissionError>) -> Result<Permit, AdmissionError> {
        self.settled = true;

        let err = match outcome {
            Ok(()) => return Ok(Permit::new(Arc::clone(&self.inner))),
            Err(err) => err,
        };

        let mut state = self.inner.lock();
        if let Some(pos) = state.waiters.iter().position(|w| w.id == self.id) {
            state.waiters.remove(pos);
            trace!(pool = self.inner.name, waiter = self.id, reason = %err, "waiter left queue");
            return Err(err);
        }

        // A release already handed us the slot while the timer or the token fired.
        if self.rx.try_recv().is_ok() {
            match err {
                AdmissionError::Cancelled => {
                    self.inner.release_locked(&mut state);
                    return Err(err);
                }
                AdmissionError::Busy { .. } => {
                    drop(state);
                    return Ok(Permit::new(Arc::clone(&self.inner)));
                }
            }
        }
        Err(err)
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.inner.lock();
        if let Some(pos) = state.waiters.iter().position(|w| w.id == self.id) {
            state.waiters.remove(pos);
        } else if self.rx.try_recv().is_ok() {
            self.inner.release_locked(&mut state);
        }
    }
}

/// One held slot; released on drop.
pub struct Permit {
    inner: Arc<Shared>,
}

impl Permit {
    fn new(inner: Arc<Shared>) -> Self {
        Self { inner }
    }

    #[inline]
    pub fn pool(&self) -> &'static str {
        self.inner.name
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").field("pool", &self.inner.name).finish()
    }
}
