use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::api::ApiMessage;
use crate::core::coach::Coach;

pub type MessageId = u64;

/// Placeholder shown in a coach bubble until the first token arrives.
pub const THINKING_INDICATOR: &str = "💭 Thinking...";
pub const ERROR_PREFIX: &str = "❌ Error:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Coach(CoachReply),
    System {
        #[serde(rename = "isError", default)]
        is_error: bool,
    },
}

/// State carried only by coach bubbles; the one message kind that changes
/// after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoachReply {
    pub coach: String,
    pub emoji: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub is_streaming: bool,
}

impl Message {
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            timestamp: Utc::now(),
            kind: MessageKind::User,
        }
    }

    /// A streaming placeholder for `coach`'s reply.
    pub fn coach_placeholder(id: MessageId, coach: &Coach) -> Self {
        Self {
            id,
            content: THINKING_INDICATOR.to_string(),
            timestamp: Utc::now(),
            kind: MessageKind::Coach(CoachReply {
                coach: coach.name.clone(),
                emoji: coach.emoji.clone(),
                is_error: false,
                is_streaming: true,
            }),
        }
    }

    pub fn system(id: MessageId, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            id,
            content: content.into(),
            timestamp: Utc::now(),
            kind: MessageKind::System { is_error },
        }
    }

    pub fn system_error(id: MessageId, reason: &str) -> Self {
        Self::system(id, format!("{ERROR_PREFIX} {reason}"), true)
    }

    pub fn is_user(&self) -> bool {
        matches!(self.kind, MessageKind::User)
    }

    pub fn coach_reply(&self) -> Option<&CoachReply> {
        match &self.kind {
            MessageKind::Coach(reply) => Some(reply),
            _ => None,
        }
    }

    pub fn coach_reply_mut(&mut self) -> Option<&mut CoachReply> {
        match &mut self.kind {
            MessageKind::Coach(reply) => Some(reply),
            _ => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.coach_reply().is_some_and(|r| r.is_streaming)
    }

    pub fn is_error(&self) -> bool {
        match &self.kind {
            MessageKind::Coach(reply) => reply.is_error,
            MessageKind::System { is_error } => *is_error,
            MessageKind::User => false,
        }
    }

    /// Render as conversation context for the next request.
    ///
    /// Coach turns are prefixed with the persona's name. App-authored system
    /// messages, failed replies and replies still streaming are not sent.
    pub fn to_context_message(&self) -> Option<ApiMessage> {
        match &self.kind {
            MessageKind::User => Some(ApiMessage::user(self.content.clone())),
            MessageKind::Coach(reply) if !reply.is_error && !reply.is_streaming => Some(
                ApiMessage::assistant(format!("{}: {}", reply.coach, self.content)),
            ),
            _ => None,
        }
    }
}

/// Hands out message ids that are strictly unique for the life of the
/// allocator and roughly ordered by creation time.
///
/// Ids start from the wall clock in microseconds so they sort after ids
/// minted by earlier runs, then advance by one per allocation.
#[derive(Debug)]
pub struct MessageIdAllocator {
    next: AtomicU64,
}

impl Default for MessageIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIdAllocator {
    pub fn new() -> Self {
        let seed = Utc::now().timestamp_micros().max(1) as u64;
        Self::starting_at(seed)
    }

    pub fn starting_at(first: MessageId) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn allocate(&self) -> MessageId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Make sure future ids sort after `id`, e.g. after loading a saved chat.
    pub fn observe(&self, id: MessageId) {
        self.next.fetch_max(id.saturating_add(1), Ordering::Relaxed);
    }
}
