//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod coaches;
pub mod history;
pub mod model_list;
pub mod session;

use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::chat::{run_ask, ChatFrontend};
use crate::cli::coaches::CoachCommands;
use crate::cli::history::HistoryCommands;
use crate::cli::model_list::list_models;
use crate::cli::session::Session;
use crate::core::config::{Config, ConfigError, ConfigKey};
use crate::core::models::find_model;

pub const LOG_ENV_VAR: &str = "COACHROOM_LOG";

#[derive(Parser, Debug)]
#[command(name = "coachroom")]
#[command(about = "Ask a roster of AI coaches the same question at once")]
#[command(
    long_about = "Coachroom sends each question to several coach personas in parallel \
and streams every coach's answer back as it arrives. Coaches, model choice and \
chat history are stored locally.\n\n\
Authentication:\n\
  Use 'coachroom auth' to store an OpenRouter API key in your system keyring.\n\n\
Environment Variables:\n\
  OPENROUTER_API_KEY   API key (takes precedence over stored keys)\n\
  COACHROOM_LOG        Diagnostic log filter, e.g. 'coachroom=debug'\n\n\
Chat commands:\n\
  /help                Show all commands\n\
  /retry               Re-send the last question\n\
  /log <filename>      Enable logging to specified file\n\
  /log                 Toggle logging pause/resume"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Increase diagnostic output (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Enable conversation logging to the specified file
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Keep everything in memory for this run; nothing is read or written
    #[arg(long, global = true)]
    pub ephemeral: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the interactive chat (default)
    Chat,
    /// Ask one question, print every coach's answer and exit
    Ask {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        question: Vec<String>,
    },
    /// Store an OpenRouter API key
    Auth,
    /// Remove the stored API key
    Deauth,
    /// Manage the coach roster
    Coaches {
        #[command(subcommand)]
        command: CoachCommands,
    },
    /// List available models
    Models,
    /// Choose the model coaches run on
    SetModel { model: String },
    /// Show or change reasoning mode
    Reasoning {
        #[arg(value_parser = ["on", "off"])]
        state: Option<String>,
    },
    /// Manage saved chats
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigCommands {
    /// Print every key with its value or default
    Show,
    /// Set a configuration value
    Set {
        key: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        value: Vec<String>,
    },
    /// Reset a configuration value to its default
    Unset { key: String },
}

pub fn filter_for_verbosity(verbose: u8) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV_VAR) {
        return filter;
    }
    match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}

fn init_tracing(verbose: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(filter_for_verbosity(verbose))
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);
    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

fn parse_config_key(key: &str) -> Result<ConfigKey, ConfigError> {
    ConfigKey::parse(key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))
}

fn run_config(command: ConfigCommands) -> Result<(), Box<dyn Error>> {
    let path = Config::config_path()?;
    match command {
        ConfigCommands::Show => Config::load_from_path(&path)?.print_all(),
        ConfigCommands::Set { key, value } => {
            let key = parse_config_key(&key)?;
            let value = value.join(" ");
            Config::mutate_at(&path, |config| config.set(key, &value))?;
            println!("✅ Set {key} to: {value}");
        }
        ConfigCommands::Unset { key } => {
            let key = parse_config_key(&key)?;
            Config::mutate_at(&path, |config| {
                config.unset(key);
                Ok(())
            })?;
            println!("✅ Unset {key}");
        }
    }
    Ok(())
}

fn prompt_for_key() -> Result<String, Box<dyn Error>> {
    print!("Enter your OpenRouter API key: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let key = line.trim().to_string();
    if key.is_empty() {
        return Err("No key entered".into());
    }
    Ok(key)
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let command = args.command.unwrap_or(Commands::Chat);
    if let Commands::Config { command } = command {
        return run_config(command);
    }

    let config = Config::load()?;
    let session = Session::open(config, args.ephemeral)?;
    info!(ephemeral = args.ephemeral, "session opened");

    match command {
        Commands::Chat => ChatFrontend::new(session, args.log)?.run().await,
        Commands::Ask { question } => run_ask(session, question.join(" ")).await,
        Commands::Auth => {
            let key = prompt_for_key()?;
            let source = session.settings.set_credential(&key)?;
            println!("✅ API key saved to the {}", source.describe());
            Ok(())
        }
        Commands::Deauth => {
            session.settings.clear_credential();
            println!("✅ Stored API key removed");
            if let Some((_, source)) = session.settings.credential_with_source() {
                println!("ℹ️  A key is still available from the {}", source.describe());
            }
            Ok(())
        }
        Commands::Coaches { command } => coaches::run(&session, command).await,
        Commands::Models => {
            list_models(&session.settings);
            Ok(())
        }
        Commands::SetModel { model } => {
            if find_model(&model).is_none() {
                eprintln!("⚠️  {model} is not in the built-in catalog; using it anyway");
            }
            let reasoning = session.settings.set_model(&model);
            println!(
                "✅ Model set to {model} (reasoning {})",
                if reasoning { "on" } else { "off" }
            );
            Ok(())
        }
        Commands::Reasoning { state } => {
            if let Some(state) = state {
                session.settings.set_use_reasoning(state == "on");
            }
            println!(
                "Reasoning: {}",
                if session.settings.use_reasoning() {
                    "on"
                } else {
                    "off"
                }
            );
            Ok(())
        }
        Commands::History { command } => history::run(&session, command),
        Commands::Config { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests;
