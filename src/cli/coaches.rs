//! `coachroom coaches ...` roster management

use std::error::Error;

use clap::Subcommand;

use crate::cli::session::Session;
use crate::core::chat_stream::generate_coach_prompt;
use crate::core::coach::{CoachField, CoachId};
use crate::core::settings::Settings;

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum CoachCommands {
    /// List coaches and the current selection
    List,
    /// Add a coach with default name, emoji and prompt
    Add,
    /// Change one field of a coach
    Edit {
        id: CoachId,
        /// name, emoji or prompt
        field: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        value: Vec<String>,
    },
    /// Delete a coach
    Remove { id: CoachId },
    /// Draft a system prompt from the coach's name and emoji
    GeneratePrompt { id: CoachId },
    /// Choose which coaches answer
    Select {
        #[arg(required = true)]
        ids: Vec<CoachId>,
    },
    /// Let every coach answer
    ClearSelection,
}

pub fn print_coaches(settings: &Settings) {
    let selected = settings.selected_coach_ids();
    for coach in settings.coaches() {
        let marker = if selected.contains(&coach.id) { "✓" } else { " " };
        println!("{marker} {:>3}  {}", coach.id, coach.label());
        println!("       {}", coach.system_prompt);
    }
    if selected.is_empty() {
        println!();
        println!("No selection: every coach answers.");
    }
}

pub async fn run(session: &Session, command: CoachCommands) -> Result<(), Box<dyn Error>> {
    let settings = &session.settings;
    match command {
        CoachCommands::List => print_coaches(settings),
        CoachCommands::Add => {
            let coach = settings.add_coach();
            println!("✅ Added coach {} ({})", coach.id, coach.label());
        }
        CoachCommands::Edit { id, field, value } => {
            let field = CoachField::parse(&field)
                .ok_or_else(|| format!("Unknown field '{field}'. Use name, emoji or prompt."))?;
            let coach = settings.update_coach(id, field, &value.join(" "))?;
            println!("✅ Updated {}", coach.label());
        }
        CoachCommands::Remove { id } => {
            if !settings.delete_coach(id) {
                return Err(format!("No coach with id {id}").into());
            }
            println!("✅ Removed coach {id}");
        }
        CoachCommands::GeneratePrompt { id } => {
            let coach = settings
                .coach(id)
                .ok_or_else(|| format!("No coach with id {id}"))?;
            let credential = settings
                .credential()
                .ok_or("No API key configured. Run `coachroom auth` first.")?;
            eprintln!("✍️  Drafting a prompt for {}...", coach.label());
            let prompt = generate_coach_prompt(
                session.transport.as_ref(),
                &coach.name,
                &coach.emoji,
                &credential,
                session.config.prompt_model(),
            )
            .await?;
            if prompt.is_empty() {
                return Err("The model returned an empty prompt".into());
            }
            settings.update_coach(id, CoachField::SystemPrompt, &prompt)?;
            println!("{prompt}");
        }
        CoachCommands::Select { ids } => {
            let known: Vec<CoachId> = settings.coaches().iter().map(|c| c.id).collect();
            if let Some(unknown) = ids.iter().find(|id| !known.contains(id)) {
                return Err(format!("No coach with id {unknown}").into());
            }
            settings.set_selected_coach_ids(&ids);
            print_coaches(settings);
        }
        CoachCommands::ClearSelection => {
            settings.clear_selection();
            println!("✅ Every coach will answer");
        }
    }
    Ok(())
}
