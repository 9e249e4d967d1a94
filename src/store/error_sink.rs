//! Process-wide error queue with a dedupe window.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::AtomicError;

pub type ErrorId = u64;

/// One reported error, possibly standing for several identical reports.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub id: ErrorId,
    pub error: AtomicError,
    /// Reports folded into this record.
    pub count: usize,
    pub last_seen: Instant,
}

/// Bounded queue of errors for UI surfacing.
///
/// An error equal to one reported within `dedupe_window` bumps that record's
/// count instead of creating a new record.
#[derive(Debug)]
pub struct ErrorSink {
    queue: VecDeque<ErrorRecord>,
    max: usize,
    dedupe_window: Duration,
    next_id: ErrorId,
}

impl ErrorSink {
    pub fn new(max: usize, dedupe_window: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            max: max.max(1),
            dedupe_window,
            next_id: 1,
        }
    }

    /// Records `error`. Returns `None` when it was folded into a recent duplicate.
    pub fn push(&mut self, error: AtomicError, now: Instant) -> Option<ErrorId> {
        if let Some(existing) = self.queue.iter_mut().find(|r| {
            r.error == error && now.duration_since(r.last_seen) <= self.dedupe_window
        }) {
            existing.count += 1;
            existing.last_seen = now;
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;
        if self.queue.len() == self.max {
            self.queue.pop_front();
        }
        self.queue.push_back(ErrorRecord {
            id,
            error,
            count: 1,
            last_seen: now,
        });
        Some(id)
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        self.queue.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
