//! Chat history manager
//!
//! Owns the session lifecycle around the live [`ChatBuffer`]: snapshots are
//! saved under a session id minted on first save, and loading, deleting or
//! starting a chat swaps the buffer contents. Settings such as the model or
//! roster belong to the caller and are handed back through
//! [`SessionRestore`] when a chat is loaded.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::coach::CoachId;
use crate::core::message::{Message, MessageIdAllocator};
use crate::core::models::DEFAULT_MODEL;
use crate::core::orchestrator::ChatBuffer;
use crate::core::store::{self, keys, KeyValueStore};

pub type ChatId = String;

pub const UNTITLED_CHAT: &str = "New Chat";
pub const TITLE_MAX_CHARS: usize = 50;

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryEntry {
    pub id: ChatId,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub selected_coaches: Vec<CoachId>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub use_reasoning: bool,
}

/// Settings captured alongside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatContext {
    pub selected_coaches: Vec<CoachId>,
    pub model: String,
    pub use_reasoning: bool,
}

impl Default for ChatContext {
    fn default() -> Self {
        Self {
            selected_coaches: Vec::new(),
            model: default_model(),
            use_reasoning: false,
        }
    }
}

/// Receives the settings stored with a chat when it is loaded.
pub trait SessionRestore {
    fn restore_model(&mut self, model: &str);
    fn restore_reasoning(&mut self, use_reasoning: bool);
    fn restore_roster(&mut self, coach_ids: &[CoachId]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    NotFound(ChatId),
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryError::NotFound(id) => write!(f, "Chat {id} not found"),
        }
    }
}

impl std::error::Error for HistoryError {}

/// First user message, cut to 50 characters with a trailing `...`.
pub fn generate_chat_title(messages: &[Message]) -> String {
    let Some(first) = messages.iter().find(|m| m.is_user()) else {
        return UNTITLED_CHAT.to_string();
    };
    if first.content.chars().count() > TITLE_MAX_CHARS {
        let head: String = first.content.chars().take(TITLE_MAX_CHARS).collect();
        format!("{head}...")
    } else {
        first.content.clone()
    }
}

/// Session ids are millisecond timestamps, bumped past any id in use.
fn mint_chat_id(history: &[ChatHistoryEntry], now: DateTime<Utc>) -> ChatId {
    let mut candidate = now.timestamp_millis();
    while history.iter().any(|c| c.id == candidate.to_string()) {
        candidate += 1;
    }
    candidate.to_string()
}

struct SessionState {
    current_id: Option<ChatId>,
    turn: CancellationToken,
}

pub struct ChatHistoryManager {
    store: Arc<dyn KeyValueStore>,
    buffer: ChatBuffer,
    ids: Arc<MessageIdAllocator>,
    state: Mutex<SessionState>,
}

impl ChatHistoryManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        buffer: ChatBuffer,
        ids: Arc<MessageIdAllocator>,
    ) -> Self {
        let current_id: Option<ChatId> = store::load_or(store.as_ref(), keys::CURRENT_CHAT_ID, None);
        Self {
            store,
            buffer,
            ids,
            state: Mutex::new(SessionState {
                current_id,
                turn: CancellationToken::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn buffer(&self) -> &ChatBuffer {
        &self.buffer
    }

    pub fn current_chat_id(&self) -> Option<ChatId> {
        self.state().current_id.clone()
    }

    /// Token for turns sent into the current buffer. It is cancelled
    /// whenever the buffer is discarded.
    pub fn turn_token(&self) -> CancellationToken {
        self.state().turn.clone()
    }

    pub fn history(&self) -> Vec<ChatHistoryEntry> {
        store::load_or(self.store.as_ref(), keys::CHAT_HISTORY, Vec::new())
    }

    pub fn find(&self, id: &str) -> Option<ChatHistoryEntry> {
        self.history().into_iter().find(|c| c.id == id)
    }

    fn write_history(&self, history: &[ChatHistoryEntry]) {
        store::save(self.store.as_ref(), keys::CHAT_HISTORY, history);
    }

    fn write_current_id(&self, id: Option<&str>) {
        match id {
            Some(id) => {
                store::save(self.store.as_ref(), keys::CURRENT_CHAT_ID, id);
            }
            None => store::discard(self.store.as_ref(), keys::CURRENT_CHAT_ID),
        }
    }

    fn discard_buffer(&self, state: &mut SessionState) {
        state.turn.cancel();
        state.turn = CancellationToken::new();
        self.buffer.clear();
    }

    /// Snapshot the live buffer into history. Returns the session id, or
    /// `None` when there is nothing to save.
    pub fn save_current_chat(&self, context: &ChatContext) -> Option<ChatId> {
        let mut state = self.state();
        self.save_locked(&mut state, context)
    }

    fn save_locked(&self, state: &mut SessionState, context: &ChatContext) -> Option<ChatId> {
        let messages = self.buffer.snapshot();
        if messages.is_empty() {
            debug!("no messages to save");
            return None;
        }

        let now = Utc::now();
        let mut history = self.history();
        let existing = state
            .current_id
            .as_ref()
            .and_then(|id| history.iter().position(|c| &c.id == id));
        let id = match &state.current_id {
            Some(id) => id.clone(),
            None => mint_chat_id(&history, now),
        };
        let created_at = existing.map(|idx| history[idx].created_at).unwrap_or(now);

        let entry = ChatHistoryEntry {
            id: id.clone(),
            title: generate_chat_title(&messages),
            messages,
            created_at,
            updated_at: now,
            selected_coaches: context.selected_coaches.clone(),
            model: context.model.clone(),
            use_reasoning: context.use_reasoning,
        };
        info!(
            chat = %entry.id,
            messages = entry.messages.len(),
            model = %entry.model,
            "saving chat"
        );

        match existing {
            Some(idx) => history[idx] = entry,
            None => history.push(entry),
        }
        self.write_history(&history);
        if state.current_id.as_deref() != Some(id.as_str()) {
            self.write_current_id(Some(&id));
        }
        state.current_id = Some(id.clone());
        Some(id)
    }

    /// Flush the current chat if it has messages, then start an empty one.
    pub fn new_chat(&self, context: &ChatContext) {
        let mut state = self.state();
        if !self.buffer.is_empty() {
            self.save_locked(&mut state, context);
        }
        info!("starting new chat");
        self.discard_buffer(&mut state);
        if state.current_id.take().is_some() {
            self.write_current_id(None);
        }
        store::discard(self.store.as_ref(), keys::SELECTED_COACH_IDS);
    }

    pub fn load_chat(
        &self,
        id: &str,
        restore: &mut dyn SessionRestore,
    ) -> Result<ChatHistoryEntry, HistoryError> {
        let Some(entry) = self.find(id) else {
            warn!(chat = id, "chat not found");
            return Err(HistoryError::NotFound(id.to_string()));
        };
        info!(chat = id, messages = entry.messages.len(), "loading chat");

        {
            let mut state = self.state();
            self.discard_buffer(&mut state);
            self.buffer.replace(self.rehydrate(&entry.messages));
            state.current_id = Some(entry.id.clone());
        }
        self.write_current_id(Some(&entry.id));

        restore.restore_model(&entry.model);
        restore.restore_reasoning(entry.use_reasoning);
        restore.restore_roster(&entry.selected_coaches);
        Ok(entry)
    }

    /// Loaded messages never resume streaming, and fresh ids must not collide
    /// with theirs.
    fn rehydrate(&self, messages: &[Message]) -> Vec<Message> {
        messages
            .iter()
            .cloned()
            .map(|mut message| {
                self.ids.observe(message.id);
                if let Some(reply) = message.coach_reply_mut() {
                    reply.is_streaming = false;
                }
                message
            })
            .collect()
    }

    /// Returns whether an entry was removed.
    pub fn delete_chat(&self, id: &str) -> bool {
        let mut history = self.history();
        let before = history.len();
        history.retain(|c| c.id != id);
        let removed = history.len() != before;
        if removed {
            info!(chat = id, "deleting chat");
            self.write_history(&history);
        }

        let mut state = self.state();
        if state.current_id.as_deref() == Some(id) {
            self.discard_buffer(&mut state);
            state.current_id = None;
            self.write_current_id(None);
            store::discard(self.store.as_ref(), keys::SELECTED_COACH_IDS);
        }
        removed
    }

    /// Re-open the session that was active when the program last exited.
    pub fn restore_active(&self) -> Option<ChatId> {
        let mut state = self.state();
        let id = state.current_id.clone()?;
        match self.find(&id) {
            Some(entry) => {
                debug!(chat = %id, messages = entry.messages.len(), "restoring active chat");
                self.buffer.replace(self.rehydrate(&entry.messages));
                Some(id)
            }
            None => {
                warn!(chat = %id, "active chat id not found in history");
                state.current_id = None;
                self.write_current_id(None);
                None
            }
        }
    }
}
