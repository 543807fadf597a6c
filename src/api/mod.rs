use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApiRole {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ApiMessage {
    pub role: ApiRole,
    pub content: String,
}

impl ApiMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ApiRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ApiRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ApiRole::Assistant,
            content: content.into(),
        }
    }
}

/// Body of a `chat/completions` request.
///
/// `temperature` is left out entirely for models that reject it, and `stream`
/// is only serialized when set.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

impl CompletionRequest {
    pub fn system_message_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == ApiRole::System)
            .count()
    }
}

#[derive(Deserialize, Default)]
pub struct ChatResponseDelta {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponseChoice {
    #[serde(default)]
    pub delta: ChatResponseDelta,
}

/// One streamed frame. Error frames carry `error` and no choices.
#[derive(Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatResponseChoice>,
    #[serde(default)]
    pub error: Option<ApiErrorDetail>,
}

#[derive(Deserialize)]
pub struct CompletionMessage {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
}

#[derive(Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ApiErrorDetail {
    pub message: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ApiErrorBody {
    pub error: Option<ApiErrorDetail>,
}
