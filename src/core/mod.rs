pub mod autosave;
pub mod chat_stream;
pub mod coach;
pub mod config;
pub mod history;
pub mod keyring;
pub mod message;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod settings;
pub mod store;
