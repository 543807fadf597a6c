//! Completion transport
//!
//! One HTTP request per persona turn against an OpenAI-compatible
//! `chat/completions` endpoint. Streaming responses come back as
//! newline-delimited `data:` frames; [`SseDecoder`] turns raw reads into
//! [`StreamEvent`]s and keeps partial frames across read boundaries.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use memchr::memchr;
use tracing::{debug, warn};

use crate::api::{
    ApiErrorBody, ApiMessage, ChatResponse, CompletionRequest, CompletionResponse,
};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_APP_TITLE: &str = "Coachroom";
const DONE_SENTINEL: &str = "[DONE]";

/// Failure reported by the remote API: a non-success status or an empty body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteApiError {
    pub status: u16,
    pub message: Option<String>,
}

impl fmt::Display for RemoteApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{message}"),
            None => write!(f, "HTTP {}", self.status),
        }
    }
}

impl std::error::Error for RemoteApiError {}

#[derive(Debug)]
pub enum TransportError {
    /// The endpoint answered with an error status or no body.
    Remote(RemoteApiError),
    /// The request never completed (connect, TLS, read failures).
    Network(reqwest::Error),
    /// A well-formed error frame arrived in the middle of a stream.
    Stream(String),
    /// A non-streaming response could not be understood.
    InvalidResponse(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Remote(err) => write!(f, "{err}"),
            TransportError::Network(err) => write!(f, "{err}"),
            TransportError::Stream(message) => write!(f, "{message}"),
            TransportError::InvalidResponse(message) => {
                write!(f, "Invalid response: {message}")
            }
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Remote(err) => Some(err),
            TransportError::Network(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err)
    }
}

impl From<RemoteApiError> for TransportError {
    fn from(err: RemoteApiError) -> Self {
        TransportError::Remote(err)
    }
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// The seam between orchestration and the network.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Send a streaming request and hand back the raw response body.
    async fn open_stream(
        &self,
        request: &CompletionRequest,
        credential: &str,
    ) -> Result<ByteStream, TransportError>;

    /// Send a non-streaming request and return the first choice's content.
    async fn complete(
        &self,
        request: &CompletionRequest,
        credential: &str,
    ) -> Result<String, TransportError>;
}

#[derive(Clone)]
pub struct HttpCompletionTransport {
    client: reqwest::Client,
    base_url: String,
    referer: Option<String>,
    app_title: String,
}

impl HttpCompletionTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            referer: None,
            app_title: DEFAULT_APP_TITLE.to_string(),
        }
    }

    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer;
        self
    }

    pub fn with_app_title(mut self, title: impl Into<String>) -> Self {
        self.app_title = title.into();
        self
    }

    fn post(&self, request: &CompletionRequest, credential: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(completions_url(&self.base_url))
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {credential}"))
            .header("X-Title", &self.app_title);
        if let Some(referer) = &self.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        builder.json(request)
    }
}

#[async_trait]
impl CompletionTransport for HttpCompletionTransport {
    async fn open_stream(
        &self,
        request: &CompletionRequest,
        credential: &str,
    ) -> Result<ByteStream, TransportError> {
        debug!(model = %request.model, max_tokens = request.max_tokens, "opening completion stream");
        let response = self.post(request, credential).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(remote_error(status.as_u16(), &body).into());
        }
        if response.content_length() == Some(0) {
            return Err(RemoteApiError {
                status: status.as_u16(),
                message: None,
            }
            .into());
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::from));
        Ok(Box::pin(stream))
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        credential: &str,
    ) -> Result<String, TransportError> {
        let response = self.post(request, credential).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(remote_error(status.as_u16(), &body).into());
        }

        let parsed: CompletionResponse = serde_json::from_str(&body)
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default())
    }
}

pub fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build a [`RemoteApiError`] from a failure body, preferring the
/// provider's own `error.message`.
pub fn remote_error(status: u16, body: &str) -> RemoteApiError {
    let message = serde_json::from_str::<ApiErrorBody>(body.trim())
        .ok()
        .and_then(|parsed| parsed.error)
        .and_then(|detail| detail.message)
        .map(|message| collapse_whitespace(&message))
        .filter(|message| !message.is_empty());
    RemoteApiError { status, message }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
    Error(String),
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// Interpret one line of the stream. Comments, blank lines and malformed
/// JSON yield nothing; malformed frames are logged and skipped.
fn parse_frame_line(line: &str) -> Option<StreamEvent> {
    let payload = extract_data_payload(line.trim())?;
    if payload.is_empty() {
        return None;
    }
    if payload == DONE_SENTINEL {
        return Some(StreamEvent::Done);
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(frame) => {
            if let Some(detail) = frame.error {
                let message = detail
                    .message
                    .map(|m| collapse_whitespace(&m))
                    .unwrap_or_else(|| "stream reported an error".to_string());
                return Some(StreamEvent::Error(message));
            }
            frame
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .filter(|content| !content.is_empty())
                .map(StreamEvent::Delta)
        }
        Err(err) => {
            warn!("skipping malformed stream frame: {err}");
            None
        }
    }
}

/// Concatenated delta text carried by one read, or `None` when the read
/// holds no text (only sentinels, keep-alives or malformed frames).
pub fn parse_stream_chunk(chunk: &str) -> Option<String> {
    let content: String = chunk
        .split('\n')
        .filter_map(parse_frame_line)
        .filter_map(|event| match event {
            StreamEvent::Delta(text) => Some(text),
            _ => None,
        })
        .collect();

    if content.is_empty() {
        None
    } else {
        Some(content)
    }
}

/// Incremental frame decoder that holds back incomplete lines until the
/// rest of the line arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            match std::str::from_utf8(&self.buffer[..newline_pos]) {
                Ok(line) => events.extend(parse_frame_line(line)),
                Err(err) => warn!("skipping stream line with invalid UTF-8: {err}"),
            }
            self.buffer.drain(..=newline_pos);
        }

        events
    }

    /// Flush a trailing frame that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        match std::str::from_utf8(&rest) {
            Ok(line) => parse_frame_line(line).into_iter().collect(),
            Err(err) => {
                warn!("dropping trailing stream bytes with invalid UTF-8: {err}");
                Vec::new()
            }
        }
    }
}

pub const PROMPT_WRITER_INSTRUCTION: &str =
    "You write high quality system prompts for specialized AI coaching assistants.";

pub fn coach_prompt_request(name: &str, emoji: &str, model: &str) -> CompletionRequest {
    let name = if name.trim().is_empty() {
        "New Coach"
    } else {
        name
    };
    let emoji = if emoji.trim().is_empty() { "🎯" } else { emoji };
    let brief = format!(
        "Create a concise system prompt for an AI coach.\nName: {name}\nEmoji: {emoji}\nStyle: Professional, helpful, and specific.\nOutput only the prompt, no preface."
    );

    CompletionRequest {
        model: model.to_string(),
        messages: vec![
            ApiMessage::system(PROMPT_WRITER_INSTRUCTION),
            ApiMessage::user(brief),
        ],
        max_tokens: 300,
        temperature: Some(0.7),
        stream: false,
    }
}

/// Draft a system prompt for a coach from its name and emoji.
pub async fn generate_coach_prompt(
    transport: &dyn CompletionTransport,
    name: &str,
    emoji: &str,
    credential: &str,
    model: &str,
) -> Result<String, TransportError> {
    let request = coach_prompt_request(name, emoji, model);
    transport.complete(&request, credential).await
}
