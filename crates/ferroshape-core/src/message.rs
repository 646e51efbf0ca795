//! Chat messages and per-exchange history.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Append-only message log for a single exchange.
///
/// Every request carries exactly the first two messages of the log (the
/// system instruction and the caller's opening turn). Retries add the two most
/// recent entries: the rejected assistant reply and the guidance that follows
/// it. A request therefore never holds more than four messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
    seed_len: usize,
}

impl ChatHistory {
    /// Number of leading entries sent on every request.
    pub const HEAD: usize = 2;

    /// Number of trailing entries added on retries.
    pub const RETRY_TAIL: usize = 2;

    pub fn new(seed: Vec<ChatMessage>) -> Self {
        let seed_len = seed.len();
        Self {
            messages: seed,
            seed_len,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn seed(&self) -> &[ChatMessage] {
        &self.messages[..self.seed_len]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages to send for the next request.
    pub fn window(&self) -> Vec<ChatMessage> {
        let head = &self.messages[..self.seed_len.min(Self::HEAD)];
        let appended = &self.messages[self.seed_len..];
        let tail = &appended[appended.len().saturating_sub(Self::RETRY_TAIL)..];
        head.iter().chain(tail).cloned().collect()
    }
}
