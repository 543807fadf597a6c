use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_segmentation::UnicodeSegmentation;

pub type CoachId = u64;

/// Longest emoji badge a coach may carry, in grapheme clusters.
pub const MAX_EMOJI_GLYPHS: usize = 2;

pub const NEW_COACH_NAME: &str = "New Coach";
pub const NEW_COACH_EMOJI: &str = "🎯";
pub const NEW_COACH_PROMPT: &str =
    "You are a helpful expert coach. Provide valuable advice and guidance.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coach {
    pub id: CoachId,
    pub name: String,
    pub emoji: String,
    pub system_prompt: String,
}

/// Editable coach fields, addressed individually by the roster editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoachField {
    Name,
    Emoji,
    SystemPrompt,
}

impl CoachField {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "name" => Some(CoachField::Name),
            "emoji" => Some(CoachField::Emoji),
            "prompt" | "systemprompt" => Some(CoachField::SystemPrompt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoachEditError {
    NotFound(CoachId),
    EmojiTooLong { glyphs: usize },
}

impl fmt::Display for CoachEditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoachEditError::NotFound(id) => write!(f, "No coach with id {id}"),
            CoachEditError::EmojiTooLong { glyphs } => write!(
                f,
                "Emoji must be at most {MAX_EMOJI_GLYPHS} characters (got {glyphs})"
            ),
        }
    }
}

impl std::error::Error for CoachEditError {}

impl Coach {
    pub fn new(
        id: CoachId,
        name: impl Into<String>,
        emoji: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            emoji: emoji.into(),
            system_prompt: system_prompt.into(),
        }
    }

    /// Label used in transcripts and terminal output, e.g. `🔥 David Goggins`.
    pub fn label(&self) -> String {
        if self.emoji.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.emoji, self.name)
        }
    }

    pub fn set_field(&mut self, field: CoachField, value: &str) -> Result<(), CoachEditError> {
        match field {
            CoachField::Name => self.name = value.to_string(),
            CoachField::Emoji => {
                validate_emoji(value)?;
                self.emoji = value.to_string();
            }
            CoachField::SystemPrompt => self.system_prompt = value.to_string(),
        }
        Ok(())
    }
}

pub fn validate_emoji(value: &str) -> Result<(), CoachEditError> {
    let glyphs = value.graphemes(true).count();
    if glyphs > MAX_EMOJI_GLYPHS {
        return Err(CoachEditError::EmojiTooLong { glyphs });
    }
    Ok(())
}

/// Roster seeded on first run.
pub fn default_coaches() -> Vec<Coach> {
    vec![
        Coach::new(
            1,
            "Tim Ferriss",
            "🚀",
            "You are Tim Ferriss, automation and lifestyle expert focused on everything growth and business. You help people find the 80/20 principle in all aspects of life, automate processes, and build efficient systems. Speak with Tim's characteristic analytical approach and focus on actionable tactics.",
        ),
        Coach::new(
            2,
            "Jocko Willink",
            "💪",
            "You are Jocko Willink, leadership expert and discipline life coach. You emphasize extreme ownership, discipline, early mornings, and leading by example. Your responses are direct, no-nonsense, and focused on taking responsibility and decisive action. Always push for discipline and leadership.",
        ),
        Coach::new(
            3,
            "David Goggins",
            "🔥",
            "You are David Goggins, mindset and exercise coach aimed at pushing limits in all aspects of life. You focus on mental toughness, embracing discomfort, and breaking through perceived limitations. Your tone is intense, motivational, and challenges people to go beyond what they think is possible.",
        ),
    ]
}

/// Next free id: one past the largest id in use.
pub fn next_coach_id(coaches: &[Coach]) -> CoachId {
    coaches.iter().map(|c| c.id).max().unwrap_or(0) + 1
}

/// Map a stored selection to the current coach records, in coach-list
/// order. Ids of coaches that no longer exist are ignored.
pub fn select_coaches(selection: &[CoachId], coaches: &[Coach]) -> Vec<Coach> {
    coaches
        .iter()
        .filter(|coach| selection.contains(&coach.id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_keeps_coach_list_order_and_drops_unknown_ids() {
        let coaches = default_coaches();
        let selected = select_coaches(&[3, 99, 1], &coaches);
        let names: Vec<_> = selected.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Tim Ferriss", "David Goggins"]);
        assert!(select_coaches(&[], &coaches).is_empty());
    }

    #[test]
    fn next_id_skips_past_highest() {
        let mut coaches = default_coaches();
        coaches.remove(1);
        assert_eq!(next_coach_id(&coaches), 4);
        assert_eq!(next_coach_id(&[]), 1);
    }

    #[test]
    fn emoji_is_limited_to_two_glyphs() {
        let mut coach = Coach::new(1, "A", "🎯", "p");
        assert!(coach.set_field(CoachField::Emoji, "🔥💪").is_ok());
        // A family emoji is one grapheme made of several code points.
        assert!(coach.set_field(CoachField::Emoji, "👨‍👩‍👧").is_ok());
        assert_eq!(
            coach.set_field(CoachField::Emoji, "abc"),
            Err(CoachEditError::EmojiTooLong { glyphs: 3 })
        );
        assert_eq!(coach.emoji, "👨‍👩‍👧");
    }

    #[test]
    fn field_names_parse_loosely() {
        assert_eq!(CoachField::parse("system-prompt"), Some(CoachField::SystemPrompt));
        assert_eq!(CoachField::parse("Prompt"), Some(CoachField::SystemPrompt));
        assert_eq!(CoachField::parse("name"), Some(CoachField::Name));
        assert_eq!(CoachField::parse("avatar"), None);
    }

    #[test]
    fn serializes_with_camel_case_prompt() {
        let coach = Coach::new(7, "Z", "🧠", "be wise");
        let json = serde_json::to_value(&coach).unwrap();
        assert_eq!(json["systemPrompt"], "be wise");
    }
}
