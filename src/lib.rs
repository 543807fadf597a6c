//! Coachroom asks a roster of AI coach personas the same question and
//! streams every answer back side by side.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns coaches, settings, persistence, chat history and the
//!   streaming fan-out that turns one user message into one reply per coach.
//! - [`api`] defines the OpenAI-compatible request and response payloads.
//! - [`cli`] parses arguments and drives the line-oriented chat loop.
//! - [`utils`] holds the conversation transcript writer.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
