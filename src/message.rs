//! Chat domain types.
use std::fmt;

use bincode::{Decode, Encode};
use chrono::{DateTime, Utc};

/// Identity of a message author. The credential is carried but never checked.
#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub struct User {
    username: String,
    password: String,
}

impl User {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

/// A posted chat message. Instances are created by the server's message log, which
/// hands out ids, and are never modified afterwards.
#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub struct ChatMessage {
    id: u64,
    content: String,
    author: User,
    /// Milliseconds since the Unix epoch.
    created: i64,
}

impl ChatMessage {
    pub(crate) fn new(id: u64, content: String, author: User) -> Self {
        Self {
            id,
            content,
            author,
            created: Utc::now().timestamp_millis(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn author(&self) -> &User {
        &self.author
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.created).unwrap_or_default()
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} | {}: {:?}",
            self.id,
            self.author.username,
            self.created_at().format("%Y-%m-%d %H:%M"),
            self.content
        )
    }
}
