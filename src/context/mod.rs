//! Conversation history shared by the context aggregators.
//!
//! [`ConversationContext`] is an append-only log of role-tagged messages.
//! The only mutator is [`ConversationContext::append`]; readers get an
//! immutable [`ContextSnapshot`], so a generation request in flight never
//! observes later appends.

pub mod aggregator;

pub use aggregator::{AssistantContextAggregator, UserContextAggregator};

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single entry in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Shared, append-only conversation log.
///
/// Cloning yields another handle to the same log.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl ConversationContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context seeded with a persona prompt.
    ///
    /// An empty or whitespace-only prompt leaves the context empty.
    pub fn with_system_prompt(prompt: &str) -> Self {
        let context = Self::new();
        if !prompt.trim().is_empty() {
            context.append(Message::system(prompt));
        }
        context
    }

    /// Append a message and return the new length of the log.
    ///
    /// Appends are linearizable: each completed call is visible to every
    /// snapshot taken after it returns, in call order.
    pub fn append(&self, message: Message) -> usize {
        let mut messages = self
            .messages
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        messages.push(message);
        messages.len()
    }

    /// Copy the current history.
    pub fn snapshot(&self) -> ContextSnapshot {
        let messages = self
            .messages
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        ContextSnapshot {
            messages: Arc::from(messages.as_slice()),
        }
    }

    /// Number of messages currently held.
    pub fn len(&self) -> usize {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable view of the history at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    messages: Arc<[Message]>,
}

impl ContextSnapshot {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent entry, of any role.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The most recent user entry, if the user has said anything yet.
    pub fn last_user(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    /// Count of entries with the given role.
    pub fn count(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }
}

impl From<Vec<Message>> for ContextSnapshot {
    fn from(messages: Vec<Message>) -> Self {
        Self {
            messages: Arc::from(messages),
        }
    }
}
