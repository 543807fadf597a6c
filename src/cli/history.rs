//! `coachroom history ...` saved chat management

use std::error::Error;

use clap::Subcommand;

use crate::cli::chat::render_message;
use crate::cli::session::Session;

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum HistoryCommands {
    /// List saved chats, newest first
    List,
    /// Print a saved chat
    Show { id: String },
    /// Delete a saved chat
    Delete { id: String },
    /// Save the open chat and start an empty one
    New,
}

pub fn run(session: &Session, command: HistoryCommands) -> Result<(), Box<dyn Error>> {
    let history = &session.history;
    match command {
        HistoryCommands::List => {
            let entries = history.history();
            if entries.is_empty() {
                println!("No saved chats.");
            }
            let current = history.current_chat_id();
            for entry in entries.iter().rev() {
                let marker = if current.as_deref() == Some(entry.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {}  {}  ({} messages, {}, {})",
                    entry.id,
                    entry.title,
                    entry.messages.len(),
                    entry.model,
                    entry.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        HistoryCommands::Show { id } => {
            let entry = history
                .find(&id)
                .ok_or_else(|| format!("No saved chat with id {id}"))?;
            println!("{}", entry.title);
            println!(
                "Created {} · model {} · reasoning {}",
                entry.created_at.format("%Y-%m-%d %H:%M"),
                entry.model,
                if entry.use_reasoning { "on" } else { "off" }
            );
            for message in &entry.messages {
                println!();
                println!("{}", render_message(message));
            }
        }
        HistoryCommands::Delete { id } => {
            if !history.delete_chat(&id) {
                return Err(format!("No saved chat with id {id}").into());
            }
            println!("✅ Deleted chat {id}");
        }
        HistoryCommands::New => {
            history.restore_active();
            history.new_chat(&session.settings.chat_context());
            println!("✅ The next chat starts empty");
        }
    }
    Ok(())
}
