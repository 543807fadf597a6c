//! Multi-coach chat turns
//!
//! A turn appends the user's message, then fans out one streaming completion
//! per coach on the roster. Every coach owns exactly one placeholder message,
//! addressed by the id allocated before its request starts. All writes to the
//! shared message list go through [`MessageSink::update`] closures that run
//! against the latest list, so concurrent coaches never overwrite each
//! other's progress.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::join_all;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::CompletionRequest;
use crate::core::chat_stream::{CompletionTransport, SseDecoder, StreamEvent, TransportError};
use crate::core::coach::{Coach, CoachId};
use crate::core::message::{Message, MessageId, MessageIdAllocator, ERROR_PREFIX};
use crate::core::models::find_model;
use crate::core::prompt::build_persona_request;

pub type BufferUpdate = Box<dyn FnOnce(&mut Vec<Message>) + Send>;

/// Receives functional updates to the visible message list.
pub trait MessageSink: Send + Sync {
    fn update(&self, update: BufferUpdate);
}

/// The live message list of the open chat, shared between the front end,
/// in-flight coach replies and the autosave task.
#[derive(Clone)]
pub struct ChatBuffer {
    inner: Arc<BufferInner>,
}

struct BufferInner {
    messages: Mutex<Vec<Message>>,
    version: watch::Sender<u64>,
}

impl Default for ChatBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatBuffer {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(BufferInner {
                messages: Mutex::new(Vec::new()),
                version,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Message>> {
        self.inner
            .messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump(&self) {
        self.inner.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn replace(&self, messages: Vec<Message>) {
        *self.lock() = messages;
        self.bump();
    }

    pub fn clear(&self) {
        self.replace(Vec::new());
    }

    /// Change notifications; the value is a counter bumped on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }
}

impl MessageSink for ChatBuffer {
    fn update(&self, update: BufferUpdate) {
        {
            let mut messages = self.lock();
            update(&mut messages);
        }
        self.bump();
    }
}

/// Rejections raised before anything is sent or appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    EmptyMessage,
    /// No API key; the front end should ask for one rather than retry.
    MissingCredential,
    ReasoningUnsupported { model: String },
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::EmptyMessage => write!(f, "Message is empty"),
            SendError::MissingCredential => write!(f, "An API key is required"),
            SendError::ReasoningUnsupported { model } => {
                write!(f, "Model {model} does not support reasoning mode")
            }
        }
    }
}

impl std::error::Error for SendError {}

/// Everything one turn needs, captured at send time.
///
/// Coaches are snapshots: edits to the roster while replies stream do not
/// reach requests already in flight.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub text: String,
    pub prior_messages: Vec<Message>,
    pub selected: Vec<Coach>,
    pub coaches: Vec<Coach>,
    pub model: String,
    pub use_reasoning: bool,
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    Completed,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaOutcome {
    pub coach_id: CoachId,
    pub coach_name: String,
    pub message_id: MessageId,
    pub status: ReplyStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    pub user_message_id: MessageId,
    /// One entry per coach, in roster order.
    pub replies: Vec<PersonaOutcome>,
}

impl TurnSummary {
    pub fn failures(&self) -> usize {
        self.replies
            .iter()
            .filter(|r| matches!(r.status, ReplyStatus::Failed(_)))
            .count()
    }
}

/// The coaches that answer a turn: the explicit selection, or everyone when
/// nothing is selected.
pub fn persona_roster(selected: &[Coach], coaches: &[Coach]) -> Vec<Coach> {
    if selected.is_empty() {
        coaches.to_vec()
    } else {
        selected.to_vec()
    }
}

/// Text of the most recent user message, used to re-send a failed turn.
pub fn last_user_text(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.is_user())
        .map(|m| m.content.clone())
}

fn update_reply<F>(sink: &dyn MessageSink, id: MessageId, apply: F)
where
    F: FnOnce(&mut Message) + Send + 'static,
{
    sink.update(Box::new(move |messages| {
        if let Some(message) = messages
            .iter_mut()
            .find(|m| m.id == id && m.coach_reply().is_some())
        {
            apply(message);
        }
    }));
}

pub struct ChatOrchestrator {
    transport: Arc<dyn CompletionTransport>,
    ids: Arc<MessageIdAllocator>,
}

impl ChatOrchestrator {
    pub fn new(transport: Arc<dyn CompletionTransport>, ids: Arc<MessageIdAllocator>) -> Self {
        Self { transport, ids }
    }

    fn check_preconditions<'a>(
        &self,
        request: &'a TurnRequest,
    ) -> Result<&'a str, SendError> {
        if request.text.trim().is_empty() {
            return Err(SendError::EmptyMessage);
        }
        let credential = request
            .credential
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(SendError::MissingCredential)?;
        if request.use_reasoning {
            if let Some(model) = find_model(&request.model) {
                if !model.supports_reasoning {
                    return Err(SendError::ReasoningUnsupported {
                        model: request.model.clone(),
                    });
                }
            }
        }
        Ok(credential)
    }

    /// Run one user turn against every coach on the roster.
    ///
    /// Returns an error only for the up-front checks; once the user message
    /// is appended each coach succeeds or fails on its own and the outcome
    /// is reported in the summary.
    pub async fn send_message(
        &self,
        request: TurnRequest,
        sink: &dyn MessageSink,
        cancel: &CancellationToken,
    ) -> Result<TurnSummary, SendError> {
        let credential = self.check_preconditions(&request)?;
        let model = find_model(&request.model);

        let user_message = Message::user(self.ids.allocate(), request.text.clone());
        let user_message_id = user_message.id;
        let mut history = request.prior_messages.clone();
        history.push(user_message.clone());
        sink.update(Box::new(move |messages| messages.push(user_message)));

        let roster = persona_roster(&request.selected, &request.coaches);
        info!(
            coaches = roster.len(),
            model = %request.model,
            reasoning = request.use_reasoning,
            "sending turn"
        );

        let mut turns = Vec::with_capacity(roster.len());
        for coach in roster {
            let placeholder = Message::coach_placeholder(self.ids.allocate(), &coach);
            let message_id = placeholder.id;
            sink.update(Box::new(move |messages| messages.push(placeholder)));
            turns.push((coach, message_id));
        }

        let replies = join_all(turns.into_iter().map(|(coach, message_id)| {
            let completion = build_persona_request(
                &coach,
                &request.model,
                model,
                &history,
                &request.text,
                request.use_reasoning,
            );
            self.run_persona(coach, message_id, completion, credential, sink, cancel)
        }))
        .await;

        Ok(TurnSummary {
            user_message_id,
            replies,
        })
    }

    async fn run_persona(
        &self,
        coach: Coach,
        message_id: MessageId,
        completion: CompletionRequest,
        credential: &str,
        sink: &dyn MessageSink,
        cancel: &CancellationToken,
    ) -> PersonaOutcome {
        let mut accumulated = String::new();

        let result = tokio::select! {
            result = self.stream_reply(message_id, &completion, credential, sink, &mut accumulated) => Some(result),
            _ = cancel.cancelled() => None,
        };

        let status = match result {
            Some(Ok(())) => {
                debug!(coach = %coach.name, chars = accumulated.len(), "reply complete");
                update_reply(sink, message_id, move |message| {
                    message.content = accumulated;
                    if let Some(reply) = message.coach_reply_mut() {
                        reply.is_streaming = false;
                    }
                });
                ReplyStatus::Completed
            }
            Some(Err(err)) => {
                warn!(coach = %coach.name, "reply failed: {err}");
                let reason = err.to_string();
                let content = format!("{ERROR_PREFIX} {reason}");
                update_reply(sink, message_id, move |message| {
                    message.content = content;
                    if let Some(reply) = message.coach_reply_mut() {
                        reply.is_streaming = false;
                        reply.is_error = true;
                    }
                });
                ReplyStatus::Failed(reason)
            }
            None => {
                debug!(coach = %coach.name, "reply cancelled");
                update_reply(sink, message_id, |message| {
                    if let Some(reply) = message.coach_reply_mut() {
                        reply.is_streaming = false;
                    }
                });
                ReplyStatus::Cancelled
            }
        };

        PersonaOutcome {
            coach_id: coach.id,
            coach_name: coach.name,
            message_id,
            status,
        }
    }

    async fn stream_reply(
        &self,
        message_id: MessageId,
        completion: &CompletionRequest,
        credential: &str,
        sink: &dyn MessageSink,
        accumulated: &mut String,
    ) -> Result<(), TransportError> {
        let mut stream = self.transport.open_stream(completion, credential).await?;
        let mut decoder = SseDecoder::new();
        let mut finished = false;

        while !finished {
            let events = match stream.next().await {
                Some(chunk) => decoder.push(&chunk?),
                None => {
                    finished = true;
                    decoder.finish()
                }
            };

            let before = accumulated.len();
            for event in events {
                match event {
                    StreamEvent::Delta(text) => accumulated.push_str(&text),
                    StreamEvent::Done => finished = true,
                    StreamEvent::Error(message) => return Err(TransportError::Stream(message)),
                }
            }

            if accumulated.len() != before {
                let content = accumulated.clone();
                update_reply(sink, message_id, move |message| {
                    message.content = content;
                });
            }
        }

        Ok(())
    }

    /// Append a standalone error for failures outside any single coach.
    pub fn report_failure(&self, sink: &dyn MessageSink, reason: &str) -> MessageId {
        let message = Message::system_error(self.ids.allocate(), reason);
        let id = message.id;
        sink.update(Box::new(move |messages| messages.push(message)));
        id
    }
}

#[cfg(test)]
mod tests;
