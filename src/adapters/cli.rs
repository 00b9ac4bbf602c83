//! CLI adapter - interactive and single-message command line interface.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use crate::agent::message::ChatTurn;
use crate::orchestrator::{ExecutionResult, Orchestrator};
use crate::{ui, Result};

/// CLI channel: one user, in-memory conversation history.
pub struct CliChannel {
    orchestrator: Arc<Orchestrator>,
    user_id: String,
    history: Vec<ChatTurn>,
}

impl CliChannel {
    /// Create a new CLI channel.
    pub fn new(orchestrator: Arc<Orchestrator>, user_id: &str) -> Self {
        Self {
            orchestrator,
            user_id: user_id.to_string(),
            history: Vec::new(),
        }
    }

    /// Run a single message and return the result.
    pub async fn run_once(&mut self, message: &str) -> Result<ExecutionResult> {
        let result = self
            .orchestrator
            .handle(&self.user_id, message, self.history.clone())
            .await?;

        // Update history
        self.history.push(ChatTurn::user(message));
        self.history.push(ChatTurn::assistant(result.answer.clone()));

        Ok(result)
    }

    /// Run interactive REPL loop.
    pub async fn run_interactive(&mut self) -> Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("\n> ");
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                // EOF
                break;
            }

            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            if matches!(input.to_lowercase().as_str(), "exit" | "quit" | "q") {
                println!("Goodbye! 👋");
                break;
            }

            if input == "/clear" {
                self.clear_history();
                ui::print_step("History cleared");
                continue;
            }

            match self.run_once(input).await {
                Ok(result) => {
                    println!("\n{}", result.answer);
                    ui::print_result_meta(&result);
                }
                Err(e) => {
                    ui::print_error(&e.to_string());
                }
            }
        }

        Ok(())
    }

    /// Clear conversation history.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Get current history length.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}
