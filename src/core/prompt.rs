//! Request payloads for a single persona turn.

use crate::api::{ApiMessage, ApiRole, CompletionRequest};
use crate::core::coach::Coach;
use crate::core::message::Message;
use crate::core::models::AvailableModel;

/// How many earlier messages are replayed to each persona.
pub const HISTORY_WINDOW: usize = 6;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

pub const MAX_TOKENS_DEFAULT: u32 = 500;
pub const MAX_TOKENS_SYNTHETIC_REASONING: u32 = 2000;
pub const MAX_TOKENS_NATIVE_REASONING: u32 = 4000;

pub const REASONING_INSTRUCTION: &str = "Think step by step and reason through your response carefully. Consider multiple angles and show your thought process before giving your final answer.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningMode {
    Off,
    /// Ask a regular model to reason via an extra system instruction.
    Synthetic,
    /// The model reasons by itself and wants the plain request shape.
    Native,
}

impl ReasoningMode {
    pub fn resolve(model: Option<&AvailableModel>, use_reasoning: bool) -> Self {
        match model {
            Some(model) if model.native_reasoning => ReasoningMode::Native,
            _ if use_reasoning => ReasoningMode::Synthetic,
            _ => ReasoningMode::Off,
        }
    }
}

/// The budget follows the reasoning flag. A native model reshapes the
/// request either way but only gets the large budget with the flag on.
pub fn token_budget(mode: ReasoningMode, use_reasoning: bool) -> u32 {
    match (use_reasoning, mode) {
        (false, _) => MAX_TOKENS_DEFAULT,
        (true, ReasoningMode::Native) => MAX_TOKENS_NATIVE_REASONING,
        (true, _) => MAX_TOKENS_SYNTHETIC_REASONING,
    }
}

/// Render the tail of the conversation as `role: content` lines.
pub fn render_history(history: &[Message]) -> String {
    let context: Vec<ApiMessage> = history
        .iter()
        .filter_map(Message::to_context_message)
        .collect();
    let start = context.len().saturating_sub(HISTORY_WINDOW);

    context[start..]
        .iter()
        .map(|msg| format!("{}: {}", role_label(msg.role), msg.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn role_label(role: ApiRole) -> &'static str {
    match role {
        ApiRole::System => "system",
        ApiRole::User => "user",
        ApiRole::Assistant => "assistant",
    }
}

fn user_turn(coach: &Coach, history: &[Message], question: &str, use_reasoning: bool) -> String {
    let length = if use_reasoning {
        "detailed and thoughtful"
    } else {
        "concise but valuable (2-3 sentences max)"
    };
    format!(
        "Previous conversation context:\n{}\n\nCurrent question: \"{}\"\n\nRespond as {} would, keeping your response {}. Focus on your unique expertise and perspective. You can use markdown formatting (headers, bold, italic, lists, code blocks, etc.) in your response to make it more readable.",
        render_history(history),
        question,
        coach.name,
        length
    )
}

/// Build the streaming request one coach receives for `question`.
///
/// `history` is the conversation as the user sees it, current question
/// included. Native-reasoning models get no system messages (the coach
/// prompt is folded into the user turn) and no temperature.
pub fn build_persona_request(
    coach: &Coach,
    model_id: &str,
    model: Option<&AvailableModel>,
    history: &[Message],
    question: &str,
    use_reasoning: bool,
) -> CompletionRequest {
    let mode = ReasoningMode::resolve(model, use_reasoning);

    let mut messages = vec![ApiMessage::system(coach.system_prompt.clone())];
    if mode == ReasoningMode::Synthetic {
        messages.push(ApiMessage::system(REASONING_INSTRUCTION));
    }
    messages.push(ApiMessage::user(user_turn(
        coach,
        history,
        question,
        use_reasoning,
    )));

    let mut temperature = Some(DEFAULT_TEMPERATURE);
    if mode == ReasoningMode::Native {
        messages.retain(|m| m.role != ApiRole::System);
        if let Some(first) = messages.first_mut() {
            first.content = format!("{}\n\n{}", coach.system_prompt, first.content);
        }
        temperature = None;
    }

    CompletionRequest {
        model: model_id.to_string(),
        messages,
        max_tokens: token_budget(mode, use_reasoning),
        temperature,
        stream: true,
    }
}
