//! CLI module for skychat - command-line interface and subcommands.

pub mod commands;

pub use commands::{Cli, Commands};
