use std::collections::VecDeque;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};

/// Where prompts come from. `None` means no more prompts will arrive.
#[async_trait]
pub trait PromptSource: Send {
    async fn next_prompt(&mut self) -> Result<Option<String>>;
}

pub struct StdinPrompts {
    lines: Lines<BufReader<Stdin>>,
    stdout: Stdout,
}

impl Default for StdinPrompts {
    fn default() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            stdout: tokio::io::stdout(),
        }
    }
}

#[async_trait]
impl PromptSource for StdinPrompts {
    async fn next_prompt(&mut self) -> Result<Option<String>> {
        self.stdout
            .write_all(b"Please type your prompt:\n")
            .await
            .context("failed to write prompt")?;
        self.stdout.flush().await.context("failed to flush stdout")?;
        self.lines
            .next_line()
            .await
            .context("failed to read prompt from stdin")
    }
}

/// Fixed list of prompts, handed out in order.
#[derive(Debug, Default)]
pub struct ScriptedPrompts {
    prompts: VecDeque<String>,
}

impl ScriptedPrompts {
    pub fn new<I, S>(prompts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prompts: prompts.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl PromptSource for ScriptedPrompts {
    async fn next_prompt(&mut self) -> Result<Option<String>> {
        Ok(self.prompts.pop_front())
    }
}
