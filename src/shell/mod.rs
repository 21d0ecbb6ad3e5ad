//! Interactive prompt loop
//!
//! Reads one utterance per line, prints the answer, and keeps going after a
//! failed turn. `exit` or `quit` ends the loop, as does end of input.

use std::io::Write;
use std::sync::Arc;

use colored::*;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::dispatch::{DispatchError, Dispatcher, FinalAnswer};
use crate::llm::LlmClient;

/// Counts for one REPL session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub answered: usize,
    pub failed: usize,
}

pub struct Repl<L: LlmClient> {
    dispatcher: Arc<Dispatcher<L>>,
    prompt: String,
}

impl<L: LlmClient> Repl<L> {
    pub fn new(dispatcher: Arc<Dispatcher<L>>) -> Self {
        Self {
            dispatcher,
            prompt: "You: ".to_string(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Answer one utterance and print the result
    pub async fn ask<W: Write>(&self, utterance: &str, out: &mut W) -> std::io::Result<Result<FinalAnswer, DispatchError>> {
        let result = self.dispatcher.handle(utterance).await;
        match &result {
            Ok(answer) => {
                writeln!(out, "{} {}", "Assistant:".green(), answer.text)?;
                log::info!(
                    "Answer delivered ({} model calls, {} tool calls)",
                    answer.iterations,
                    answer.tool_calls
                );
            }
            Err(e) => {
                writeln!(out, "{} {}", "Error:".red(), e)?;
            }
        }
        Ok(result)
    }

    /// Run until `exit`, `quit` or end of input
    pub async fn run<R, W>(&self, input: R, out: &mut W) -> std::io::Result<SessionStats>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut stats = SessionStats::default();
        let mut lines = input.lines();

        writeln!(out, "{}", "Type 'exit' or 'quit' to end the session.".cyan())?;
        loop {
            write!(out, "{}", self.prompt)?;
            out.flush()?;

            let Some(line) = lines.next_line().await? else {
                writeln!(out)?;
                break;
            };
            let utterance = line.trim();
            if utterance.is_empty() {
                continue;
            }
            if utterance.eq_ignore_ascii_case("exit") || utterance.eq_ignore_ascii_case("quit") {
                break;
            }

            match self.ask(utterance, out).await? {
                Ok(_) => stats.answered += 1,
                Err(_) => stats.failed += 1,
            }
        }

        writeln!(out, "{}", "Goodbye!".cyan())?;
        log::info!("REPL session ended: {:?}", stats);
        Ok(stats)
    }
}
