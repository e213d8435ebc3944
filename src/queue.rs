//! Start queue for admission control
//!
//! Sessions asked to start wait here in arrival order until the
//! admission sweep promotes them. The queue itself is dumb FIFO
//! storage; the engine decides when to poll it.

use crate::session::SessionId;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// FIFO queue of sessions waiting for an admission slot
#[derive(Debug, Default)]
pub struct StartQueue {
    inner: Mutex<VecDeque<SessionId>>,
}

impl StartQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a session, unless it is already waiting
    ///
    /// Returns false for duplicates.
    pub fn enqueue(&self, id: SessionId) -> bool {
        let mut inner = self.inner.lock();
        if inner.contains(&id) {
            return false;
        }
        inner.push_back(id);
        true
    }

    /// Take the next waiting session
    pub fn poll(&self) -> Option<SessionId> {
        self.inner.lock().pop_front()
    }

    /// Remove a session wherever it sits in the queue
    ///
    /// Returns true if it was waiting.
    pub fn remove(&self, id: SessionId) -> bool {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.iter().position(|&q| q == id) {
            inner.remove(pos);
            true
        } else {
            false
        }
    }

    /// Whether a session is waiting
    pub fn contains(&self, id: SessionId) -> bool {
        self.inner.lock().contains(&id)
    }

    /// Number of waiting sessions
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Snapshot of the waiting sessions in order
    ///
    /// Used to recompute observable 1-based positions after every
    /// enqueue, removal, and admission sweep.
    pub fn snapshot(&self) -> Vec<SessionId> {
        self.inner.lock().iter().copied().collect()
    }
}
