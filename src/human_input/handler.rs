use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::{debug, info};

use std::collections::VecDeque;
use std::io::Write;

use crate::human_input::types::{HumanInputHandler, HumanInputRequest, HumanInputResponse};

const RULE_WIDTH: usize = 50;

/// Reads answers from the terminal. One question is on screen at a time.
#[derive(Debug)]
pub struct ConsoleInputHandler {
    colored_output: bool,
    stdin: Mutex<Lines<BufReader<Stdin>>>,
}

impl Default for ConsoleInputHandler {
    fn default() -> Self {
        Self::with_color(true)
    }
}

impl ConsoleInputHandler {
    /// Colored console handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain console handler, for terminals without ANSI support
    pub fn without_color() -> Self {
        Self::with_color(false)
    }

    fn with_color(colored_output: bool) -> Self {
        Self {
            colored_output,
            stdin: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    fn format_description(&self, request: &HumanInputRequest) -> Option<String> {
        let description = request.description.as_ref()?;
        let rule = "=".repeat(RULE_WIDTH);

        let body = if self.colored_output {
            description.bold().to_string()
        } else {
            description.clone()
        };
        Some(format!("{}\n{}\n{}", rule, body, rule))
    }

    fn show(&self, request: &HumanInputRequest) -> Result<()> {
        if let Some(description) = self.format_description(request) {
            println!("\n{}", description);
        }

        if self.colored_output {
            print!("{} ", request.prompt.green().bold());
        } else {
            print!("{} ", request.prompt);
        }
        std::io::stdout().flush().context("Failed to flush prompt")
    }
}

#[async_trait]
impl HumanInputHandler for ConsoleInputHandler {
    async fn handle_request(&self, request: HumanInputRequest) -> Result<HumanInputResponse> {
        let mut stdin = self.stdin.lock().await;
        self.show(&request)?;

        let line = stdin
            .next_line()
            .await
            .context("Failed to read input")?
            .ok_or_else(|| anyhow!("Input stream closed"))?;

        debug!("Answer to {}: {}", request.request_id, line.trim());
        Ok(HumanInputResponse::new(request.request_id, line.trim()))
    }
}

/// Input handler answering from a fixed list, for non-interactive runs
#[derive(Debug, Default)]
pub struct ScriptedInputHandler {
    answers: Mutex<VecDeque<String>>,
}

impl ScriptedInputHandler {
    /// Create a handler that answers in order
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
        }
    }

    /// Answers not yet consumed
    pub async fn remaining(&self) -> usize {
        self.answers.lock().await.len()
    }
}

#[async_trait]
impl HumanInputHandler for ScriptedInputHandler {
    async fn handle_request(&self, request: HumanInputRequest) -> Result<HumanInputResponse> {
        let answer = self
            .answers
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| anyhow!("No scripted answer for: {}", request.prompt))?;

        info!("{} {}", request.prompt, answer);
        Ok(HumanInputResponse::new(request.request_id, answer))
    }
}
