//! Line-oriented chat front end
//!
//! Replies stream into the shared buffer while the turn runs; this module
//! prints each coach's bubble once it settles, so concurrent replies never
//! interleave on the terminal.

use std::collections::HashSet;
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::cli::session::Session;
use crate::core::autosave::Autosave;
use crate::core::message::{Message, MessageId, MessageKind};
use crate::core::orchestrator::{
    last_user_text, ChatBuffer, SendError, TurnRequest, TurnSummary,
};
use crate::core::store::{keys, StoreChange};
use crate::utils::transcript::TranscriptLog;

const HELP: &str = "\
Commands:
  /new                  Save this chat and start a fresh one
  /history              List saved chats
  /load <id>            Open a saved chat
  /delete <id>          Delete a saved chat
  /retry                Re-send the last question
  /coaches              List coaches and the current selection
  /select <id>... | all Choose which coaches answer
  /model [id]           Show or change the model
  /reasoning on|off     Toggle reasoning mode
  /log [file]           Start logging to a file, or pause/resume logging
  /help                 Show this help
  /quit                 Save and exit";

pub struct ChatFrontend {
    session: Session,
    transcript: TranscriptLog,
    retries: u32,
    printed: HashSet<MessageId>,
    autosave: Option<Autosave>,
}

/// Messages that have settled and have not been handled yet, in buffer order.
fn settled_unprinted<'a>(
    messages: &'a [Message],
    printed: &'a HashSet<MessageId>,
) -> impl Iterator<Item = &'a Message> {
    messages
        .iter()
        .filter(move |m| !m.is_streaming() && !printed.contains(&m.id))
}

/// The user already sees what they typed, so user turns only reach the
/// transcript.
fn print_settled(buffer: &ChatBuffer, transcript: &TranscriptLog, printed: &mut HashSet<MessageId>) {
    let messages = buffer.snapshot();
    let fresh: Vec<Message> = settled_unprinted(&messages, printed).cloned().collect();
    for message in fresh {
        if !message.is_user() {
            println!("\n{}", render_message(&message));
        }
        if let Err(err) = transcript.log_message(&message) {
            warn!("transcript write failed: {err}");
        }
        printed.insert(message.id);
    }
    let _ = io::stdout().flush();
}

pub fn render_message(message: &Message) -> String {
    match &message.kind {
        MessageKind::User => format!("You: {}", message.content),
        MessageKind::Coach(reply) => {
            format!("{} {}\n{}", reply.emoji, reply.coach, message.content)
        }
        MessageKind::System { .. } => message.content.clone(),
    }
}

/// One-line notice for a setting another coachroom process changed.
fn external_change_notice(change: &StoreChange) -> Option<String> {
    let notice = match change.key.as_str() {
        keys::SELECTED_MODEL => match change.value.as_ref().and_then(|v| v.as_str()) {
            Some(model) => format!("Model switched to {model} in another window"),
            None => "Model reset to the default in another window".to_string(),
        },
        keys::USE_REASONING => "Reasoning mode changed in another window".to_string(),
        keys::COACHES | keys::SELECTED_COACH_IDS => {
            "Coaches were edited in another window".to_string()
        }
        keys::CHAT_HISTORY => "Saved chats were updated in another window".to_string(),
        keys::CREDENTIAL => "API key changed in another window".to_string(),
        _ => return None,
    };
    Some(notice)
}

impl ChatFrontend {
    pub fn new(session: Session, log_file: Option<PathBuf>) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            session,
            transcript: TranscriptLog::new(log_file)?,
            retries: 0,
            printed: HashSet::new(),
            autosave: None,
        })
    }

    fn mark_all_printed(&mut self) {
        self.printed = self.session.buffer().snapshot().iter().map(|m| m.id).collect();
    }

    fn print_buffer(&mut self) {
        for message in self.session.buffer().snapshot() {
            println!("\n{}", render_message(&message));
        }
        self.mark_all_printed();
    }

    fn turn_request(&self, text: String) -> TurnRequest {
        let settings = &self.session.settings;
        TurnRequest {
            text,
            prior_messages: self.session.buffer().snapshot(),
            selected: settings.selected_coaches(),
            coaches: settings.coaches(),
            model: settings.model(),
            use_reasoning: settings.use_reasoning(),
            credential: settings.credential(),
        }
    }

    /// Send one turn and print replies as they settle. Ctrl+C stops the
    /// replies still streaming.
    pub async fn send(&mut self, text: String) -> Result<Option<TurnSummary>, SendError> {
        let request = self.turn_request(text);
        // Ctrl+C stops this turn only; discarding the chat still reaches it
        // through the parent.
        let token = self.session.history.turn_token().child_token();
        let mut changes = self.session.buffer().subscribe();
        let buffer = self.session.buffer().clone();

        let result = {
            let turn = self
                .session
                .orchestrator
                .send_message(request, &buffer, &token);
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    result = &mut turn => break result,
                    changed = changes.changed() => {
                        if changed.is_ok() {
                            print_settled(&buffer, &self.transcript, &mut self.printed);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n⏹  Stopping replies");
                        token.cancel();
                    }
                }
            }
        };
        print_settled(&buffer, &self.transcript, &mut self.printed);

        match result {
            Ok(summary) => {
                if summary.failures() > 0 {
                    eprintln!(
                        "⚠️  {} of {} coaches failed. Type /retry to ask again.",
                        summary.failures(),
                        summary.replies.len()
                    );
                }
                Ok(Some(summary))
            }
            Err(SendError::EmptyMessage) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Surface a failure that happened before any coach was asked.
    fn report(&mut self, err: &SendError) {
        match err {
            SendError::MissingCredential => {
                eprintln!("🔑 No API key configured. Run `coachroom auth` or set OPENROUTER_API_KEY.");
            }
            other => {
                self.retries += 1;
                self.session
                    .orchestrator
                    .report_failure(self.session.buffer(), &other.to_string());
                print_settled(self.session.buffer(), &self.transcript, &mut self.printed);
                eprintln!("🔁 Type /retry to try again ({} so far)", self.retries);
            }
        }
    }

    async fn send_and_report(&mut self, text: String) {
        if let Err(err) = self.send(text).await {
            self.report(&err);
        }
    }

    async fn retry(&mut self) {
        let Some(text) = last_user_text(&self.session.buffer().snapshot()) else {
            eprintln!("Nothing to retry yet.");
            return;
        };
        self.retries += 1;
        eprintln!("🔁 Retry #{}", self.retries);
        self.send_and_report(text).await;
    }

    fn new_chat(&mut self) {
        let context = self.session.settings.chat_context();
        self.session.history.new_chat(&context);
        self.retries = 0;
        self.mark_all_printed();
        println!("✨ Started a new chat");
    }

    fn list_history(&self) {
        let history = self.session.history.history();
        if history.is_empty() {
            println!("No saved chats.");
            return;
        }
        let current = self.session.history.current_chat_id();
        for entry in history.iter().rev() {
            let marker = if current.as_deref() == Some(entry.id.as_str()) {
                "*"
            } else {
                " "
            };
            println!(
                "{marker} {}  {}  ({} messages, {})",
                entry.id,
                entry.title,
                entry.messages.len(),
                entry.updated_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    fn load_chat(&mut self, id: &str) {
        if let Some(autosave) = &self.autosave {
            autosave.flush();
        }
        let mut restore = self.session.settings.as_ref();
        match self.session.history.load_chat(id, &mut restore) {
            Ok(entry) => {
                self.retries = 0;
                println!("📂 {}", entry.title);
                self.print_buffer();
            }
            Err(err) => eprintln!("❌ {err}"),
        }
    }

    fn delete_chat(&mut self, id: &str) {
        if self.session.history.delete_chat(id) {
            println!("🗑  Deleted chat {id}");
            self.mark_all_printed();
        } else {
            eprintln!("❌ No saved chat with id {id}");
        }
    }

    fn list_coaches(&self) {
        let selected = self.session.settings.selected_coach_ids();
        for coach in self.session.settings.coaches() {
            let marker = if selected.contains(&coach.id) { "✓" } else { " " };
            println!("{marker} {:>3}  {}", coach.id, coach.label());
        }
        if selected.is_empty() {
            println!("(no selection: every coach answers)");
        }
    }

    fn select(&mut self, args: &[&str]) {
        if args.is_empty() || args == ["all"] {
            self.session.settings.clear_selection();
            println!("Every coach will answer.");
            return;
        }
        let known: Vec<_> = self.session.settings.coaches().iter().map(|c| c.id).collect();
        let mut ids = Vec::new();
        for arg in args {
            match arg.parse::<u64>() {
                Ok(id) if known.contains(&id) => ids.push(id),
                _ => {
                    eprintln!("❌ Unknown coach id: {arg}");
                    return;
                }
            }
        }
        self.session.settings.set_selected_coach_ids(&ids);
        self.list_coaches();
    }

    fn model(&mut self, id: Option<&str>) {
        match id {
            Some(id) => {
                let reasoning = self.session.settings.set_model(id);
                println!(
                    "Model set to {id} (reasoning {})",
                    if reasoning { "on" } else { "off" }
                );
            }
            None => println!("Model: {}", self.session.settings.model()),
        }
    }

    fn reasoning(&mut self, arg: Option<&str>) {
        match arg {
            Some("on") => self.session.settings.set_use_reasoning(true),
            Some("off") => self.session.settings.set_use_reasoning(false),
            _ => {}
        }
        println!(
            "Reasoning: {}",
            if self.session.settings.use_reasoning() {
                "on"
            } else {
                "off"
            }
        );
    }

    fn log(&mut self, arg: Option<&str>) {
        let result = match arg {
            Some(path) => self.transcript.set_log_file(PathBuf::from(path)),
            None => self.transcript.toggle_logging(),
        };
        match result {
            Ok(message) => println!("{message}"),
            Err(err) => eprintln!("❌ {err}"),
        }
    }

    /// Returns `false` when the loop should exit.
    async fn handle_command(&mut self, line: &str) -> bool {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();
        match command {
            "/quit" | "/exit" => return false,
            "/help" => println!("{HELP}"),
            "/new" => self.new_chat(),
            "/history" => self.list_history(),
            "/load" => match args.first() {
                Some(id) => self.load_chat(id),
                None => eprintln!("Usage: /load <id>"),
            },
            "/delete" => match args.first() {
                Some(id) => self.delete_chat(id),
                None => eprintln!("Usage: /delete <id>"),
            },
            "/retry" => self.retry().await,
            "/coaches" => self.list_coaches(),
            "/select" => self.select(&args),
            "/model" => self.model(args.first().copied()),
            "/reasoning" => self.reasoning(args.first().copied()),
            "/log" => self.log(args.first().copied()),
            other => eprintln!("Unknown command {other}. Type /help for a list."),
        }
        true
    }

    pub async fn run(mut self) -> Result<(), Box<dyn Error>> {
        if let Some(id) = self.session.history.restore_active() {
            info!(chat = %id, "resumed chat");
            self.print_buffer();
        }
        self.autosave = Some(self.session.start_autosave());

        eprintln!(
            "💬 Coachroom · model {} · /help for commands, /quit to exit",
            self.session.settings.model()
        );
        if self.transcript.is_active() {
            eprintln!("📝 Logging {}", self.transcript.status());
        }
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("\n> ");
            let _ = io::stdout().flush();

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                break;
            };
            for change in self.session.poll_external_changes() {
                info!(key = %change.key, "store changed by another process");
                if let Some(notice) = external_change_notice(&change) {
                    eprintln!("ℹ️  {notice}");
                }
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('/') {
                if !self.handle_command(line).await {
                    break;
                }
            } else {
                self.send_and_report(line.to_string()).await;
            }
        }

        if let Some(autosave) = self.autosave.take() {
            autosave.shutdown().await;
        }
        Ok(())
    }
}

/// One question, printed replies, then exit. Nothing is written to
/// history.
pub async fn run_ask(session: Session, question: String) -> Result<(), Box<dyn Error>> {
    let mut frontend = ChatFrontend::new(session, None)?;
    let summary = match frontend.send(question).await {
        Ok(Some(summary)) => summary,
        Ok(None) => return Err("Question is empty".into()),
        Err(err) => return Err(Box::new(err)),
    };

    if summary.failures() == summary.replies.len() && !summary.replies.is_empty() {
        return Err("Every coach failed to answer".into());
    }
    Ok(())
}
