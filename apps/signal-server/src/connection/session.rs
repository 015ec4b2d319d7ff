//! Per-client session state: delivery cursor, poll backoff, and message buffer.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

/// A message waiting in a session's buffer.
#[derive(Debug, Clone)]
pub struct BufferedMessage {
    pub id: u64,
    pub payload: Value,
    pub created_at: Instant,
}

/// Client-supplied metadata, overwritten on every `connect`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetadata {
    pub transport: Option<String>,
    pub connection_data: Option<String>,
    pub groups: Vec<String>,
}

/// Poll backoff policy: grow by `step` on every empty poll, never past `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub step: Duration,
    pub max: Duration,
}

impl Backoff {
    /// Next recommended delay given the current one and whether the poll
    /// delivered anything newer than the client's cursor.
    pub fn next(&self, current: Duration, delivered_new: bool) -> Duration {
        if delivered_new {
            Duration::ZERO
        } else {
            (current + self.step).min(self.max)
        }
    }
}

/// Result of one `connect` poll against a session.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub last_delivered_id: u64,
    pub messages: Vec<Value>,
    pub poll_delay: Duration,
    pub groups: Vec<String>,
}

/// State for a single long-poll client.
#[derive(Debug)]
pub struct Session {
    pub client_id: String,
    pub last_activity: Instant,
    /// Lowest message id the client still expects.
    pub cursor: u64,
    pub poll_delay: Duration,
    pub metadata: SessionMetadata,
    /// Ordered by id; ids are allocated while the session lock is held.
    buffer: VecDeque<BufferedMessage>,
}

impl Session {
    pub fn new(client_id: String, metadata: SessionMetadata, now: Instant) -> Self {
        Self {
            client_id,
            last_activity: now,
            cursor: 0,
            poll_delay: Duration::ZERO,
            metadata,
            buffer: VecDeque::new(),
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Append a message. Callers must hand out ids in increasing order.
    pub fn push(&mut self, id: u64, payload: Value, now: Instant) {
        debug_assert!(self.buffer.back().map_or(true, |last| last.id < id));
        self.buffer.push_back(BufferedMessage {
            id,
            payload,
            created_at: now,
        });
    }

    /// Collect every buffered message with `id >= cursor`, record the cursor,
    /// and advance the backoff.
    pub fn deliver(&mut self, cursor: u64, backoff: &Backoff) -> Delivery {
        self.cursor = cursor;

        let mut last_delivered_id = cursor;
        let mut messages = Vec::new();
        for message in self.buffer.iter().filter(|m| m.id >= cursor) {
            last_delivered_id = last_delivered_id.max(message.id);
            messages.push(message.payload.clone());
        }

        self.poll_delay = backoff.next(self.poll_delay, last_delivered_id > cursor);

        Delivery {
            last_delivered_id,
            messages,
            poll_delay: self.poll_delay,
            groups: self.metadata.groups.clone(),
        }
    }

    /// Drop every message older than `max_age`. Returns how many were dropped.
    pub fn expire_messages(&mut self, now: Instant, max_age: Duration) -> usize {
        let before = self.buffer.len();
        self.buffer
            .retain(|m| now.saturating_duration_since(m.created_at) <= max_age);
        before - self.buffer.len()
    }

    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }

    pub fn buffered(&self) -> impl Iterator<Item = &BufferedMessage> {
        self.buffer.iter()
    }
}
