//! Operator confirmation between lifecycle steps

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::Result;

pub const PROMPT_TEXT: &str = "-> Press Return key to continue.";

#[async_trait]
pub trait Pause: Send {
    async fn pause(&mut self) -> Result<()>;
}

/// Blocks until the operator presses Return on stdin
pub struct StdinPrompt {
    lines: tokio::io::Lines<BufReader<tokio::io::Stdin>>,
}

impl StdinPrompt {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinPrompt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Pause for StdinPrompt {
    async fn pause(&mut self) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        write_prompt(&mut stdout).await?;
        // EOF counts as confirmation so piped input does not hang
        self.lines.next_line().await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }
}

async fn write_prompt<W: AsyncWrite + Unpin>(out: &mut W) -> std::io::Result<()> {
    out.write_all(PROMPT_TEXT.as_bytes()).await?;
    out.flush().await
}

/// Never waits; used for unattended runs
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPause;

#[async_trait]
impl Pause for NoPause {
    async fn pause(&mut self) -> Result<()> {
        Ok(())
    }
}
