//! skychat - natural-language questions answered from live data
//!
//! An utterance goes to the model together with the tools of the selected
//! project (aircraft positions, current weather, or read-only SQL). The
//! dispatcher runs the tool calls the model asks for and returns its final
//! answer.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod project;
pub mod server;
pub mod shell;
pub mod tools;

pub use error::{Result, SkychatError};
