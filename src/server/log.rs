//! In-memory, append-only chat history.
//!
//! Every POST appends through [`MessageLog::append`] and every GET reads a snapshot
//! through [`MessageLog::after`]. Both take the same lock, so a reader always sees a
//! prefix of the history with no gaps. Ids come from a counter that is only bumped
//! while that lock is held, which keeps the stored sequence sorted by id.
use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use log::trace;

use crate::message::{ChatMessage, User};

#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Mutex<Vec<ChatMessage>>,
    next_id: AtomicU64,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message with the next id, stores it and returns a copy.
    pub fn append(&self, content: String, author: User) -> ChatMessage {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = ChatMessage::new(id, content, author);
        entries.push(message.clone());

        trace!("appended message {id}");
        message
    }

    /// Snapshot of every message with an id strictly greater than `last_id`, or the
    /// whole history when `last_id` is `None`.
    pub fn after(&self, last_id: Option<u64>) -> Vec<ChatMessage> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let start = match last_id {
            Some(last_id) => entries.partition_point(|m| m.id() <= last_id),
            None => 0,
        };
        entries[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
