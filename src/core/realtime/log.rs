//! Session-scoped message log.
//!
//! Append-only record of every envelope sent or received on the session, in
//! order. Recovery replays from the outgoing half of this log.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use super::codec::Envelope;

/// Direction of a logged envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sent to the upstream model
    Outgoing,
    /// Received from the upstream model
    Incoming,
}

/// One logged envelope.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Direction
    pub direction: Direction,
    /// The envelope as sent or received
    pub envelope: Envelope,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

/// Append-only envelope log.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, direction: Direction, envelope: Envelope) {
        self.entries.lock().push(LogEntry {
            direction,
            envelope,
            timestamp: now_millis(),
        });
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Outgoing envelopes in the order they were sent.
    pub fn outgoing(&self) -> Vec<Envelope> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.direction == Direction::Outgoing)
            .map(|e| e.envelope.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
