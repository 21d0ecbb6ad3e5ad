//! CLI command definitions using clap.
//!
//! - ask: answer one question and exit
//! - repl: interactive prompt loop (default)
//! - serve: run the HTTP API
//! - tools: list the tools the model can call

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::project::Project;

/// skychat - ask questions answered from live flight, weather or database data
#[derive(Parser, Debug)]
#[command(name = "skychat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Data source to chat with (overrides the config file)
    #[arg(short, long, global = true, value_enum)]
    pub project: Option<Project>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Answer a single question
    Ask {
        /// The question to answer
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Start an interactive session
    Repl,

    /// Serve the HTTP API
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides config and PORT)
        #[arg(long)]
        port: Option<u16>,
    },

    /// List the tools offered to the model
    Tools,
}
