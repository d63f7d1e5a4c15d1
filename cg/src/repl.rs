//! Interactive chat about one chapter
//!
//! Answers stream to stdout. Ctrl-C while an answer streams stops that
//! answer only; Ctrl-C at the prompt just shows a new prompt.

use std::io::{self, Write};

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::debug;

use crate::assist::CourseAssistant;
use crate::cancel::CancellationToken;
use crate::error::CourseError;
use crate::llm::Role;

/// Interactive chat session
pub struct ChatRepl {
    assistant: CourseAssistant,
    title: String,
}

impl ChatRepl {
    pub fn new(assistant: CourseAssistant, title: impl Into<String>) -> Self {
        Self {
            assistant,
            title: title.into(),
        }
    }

    /// Run the REPL main loop
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome();

        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;

        loop {
            let readline = rl.readline(&format!("{} ", ">".bright_green()));

            match readline {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(input);

                    if input.starts_with('/') {
                        match self.handle_slash_command(input) {
                            SlashResult::Continue => continue,
                            SlashResult::Quit => break,
                        }
                    } else {
                        self.ask(input).await?;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => {
                    return Err(eyre::eyre!("Readline error: {}", err));
                }
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    fn print_welcome(&self) {
        println!();
        println!("{}", format!("Chatting about: {}", self.title).bright_cyan().bold());
        println!("Type {} for help, {} to quit", "/help".yellow(), "/quit".yellow());
        println!();
    }

    fn handle_slash_command(&mut self, input: &str) -> SlashResult {
        let cmd = input.split_whitespace().next().unwrap_or("");

        match cmd {
            "/help" | "/h" => {
                self.print_help();
                SlashResult::Continue
            }
            "/quit" | "/q" | "/exit" => SlashResult::Quit,
            "/clear" | "/c" => {
                self.assistant.clear();
                println!("{}", "Conversation cleared.".dimmed());
                SlashResult::Continue
            }
            "/history" => {
                self.print_history();
                SlashResult::Continue
            }
            _ => {
                println!("{} Unknown command: {}", "?".yellow(), cmd);
                println!("Type {} for available commands", "/help".yellow());
                SlashResult::Continue
            }
        }
    }

    fn print_help(&self) {
        println!();
        println!("{}", "Available Commands:".bright_cyan());
        println!("  {:14} Show this help", "/help".yellow());
        println!("  {:14} Exit the chat", "/quit".yellow());
        println!("  {:14} Clear conversation history", "/clear".yellow());
        println!("  {:14} Show conversation history", "/history".yellow());
        println!();
    }

    fn print_history(&self) {
        let messages: Vec<_> = self
            .assistant
            .history()
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();
        if messages.is_empty() {
            println!("{}", "No conversation history.".dimmed());
            return;
        }

        println!();
        println!("{}", "Conversation History:".bright_cyan());
        for (i, msg) in messages.iter().enumerate() {
            let role = match msg.role {
                Role::User => "User".bright_green(),
                _ => "Assistant".bright_blue(),
            };
            let preview: String = msg.content.chars().take(50).collect();
            let preview = if msg.content.chars().count() > 50 {
                format!("{}...", preview)
            } else {
                preview
            };
            println!("  {}. {}: {}", i + 1, role, preview);
        }
        println!();
    }

    /// Stream one answer; provider failures are printed, not fatal
    async fn ask(&mut self, input: &str) -> Result<()> {
        debug!(len = input.len(), "ChatRepl::ask: called");
        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let result = self
            .assistant
            .ask_streaming(input, &cancel, |delta| {
                print!("{}", delta);
                let _ = io::stdout().flush();
            })
            .await;
        interrupt.abort();
        println!();

        match result {
            Ok(_) => {}
            Err(CourseError::Cancelled) => println!("{}", "[answer stopped]".dimmed()),
            Err(e @ (CourseError::Provider(_) | CourseError::Validation(_))) => {
                eprintln!("{} {}", "Error:".red(), e);
            }
            Err(e) => return Err(e.into()),
        }
        println!();
        Ok(())
    }
}

/// Result of handling a slash command
enum SlashResult {
    Continue,
    Quit,
}
