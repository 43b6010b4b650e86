//! Console Bot
//!
//! Runs the bundled plugins against stdin and stdout, so the whole service
//! can be exercised without a chat connection. Each input line is one
//! message:
//!
//! ```text
//! private alice: /token
//! group:g1 alice: /status <token> toggle puzzle
//! group:g1 bob: /puzzle start
//! group:g1 bob: /puzzle ask is it alive?
//! group:g1 carol: /highnoon
//! group:g1 carol: /fire
//! ```
//!
//! Replies are printed as `[group:g1] text`. The judge answers "unsure" to
//! every question, so puzzles can only be won by guessing.
//!
//! # Usage
//!
//! ```bash
//! cd demos/console_bot && cargo run
//! cargo run --package console-bot -- --config demos/console_bot/roost.toml --interval-ms 0
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::sync::Mutex;
use tracing::{info, warn};

use roost::prelude::*;
use roost::runtime::ConfigLoader;

#[derive(Parser, Debug)]
#[command(name = "console-bot", about = "Drive a Roost service from the terminal")]
struct Args {
    /// Configuration file (default: search roost.toml / config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. development or production
    #[arg(long)]
    profile: Option<String>,

    /// Minimum milliseconds between two replies to one conversation
    #[arg(long)]
    interval_ms: Option<u64>,
}

// ============================================================================
// Stdin event source
// ============================================================================

struct StdinSource {
    lines: Lines<BufReader<Stdin>>,
    next_id: u64,
}

impl StdinSource {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            next_id: 0,
        }
    }
}

#[async_trait]
impl EventSource for StdinSource {
    async fn next_event(&mut self) -> CoreResult<Option<MessageEvent>> {
        loop {
            let Some(line) = self
                .lines
                .next_line()
                .await
                .map_err(|e| CoreError::transport(e.to_string()))?
            else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }

            self.next_id += 1;
            match parse_line(self.next_id, &line) {
                Some(event) => return Ok(Some(event)),
                None => warn!(
                    line = %line,
                    "Expected `group:<gid> <uid>: text` or `private <uid>: text`"
                ),
            }
        }
    }
}

/// Parses `group:<gid> <uid>: text` or `private <uid>: text`.
fn parse_line(message_id: u64, line: &str) -> Option<MessageEvent> {
    let (chat, rest) = line.trim().split_once(' ')?;
    let (user, text) = rest.split_once(':')?;
    let (user, text) = (user.trim(), text.trim());
    if user.is_empty() || text.is_empty() {
        return None;
    }

    if chat == "private" {
        return Some(MessageEvent::private(message_id, user, text));
    }
    match chat.strip_prefix("group:") {
        Some(group) if !group.is_empty() => {
            Some(MessageEvent::group(message_id, group, user, text))
        }
        _ => None,
    }
}

// ============================================================================
// Stdout transport and judge
// ============================================================================

struct StdoutTransport {
    out: Mutex<Stdout>,
}

impl StdoutTransport {
    fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

#[async_trait]
impl Transport for StdoutTransport {
    async fn send(&self, target: &ReplyTarget, fragment: &Fragment) -> CoreResult<()> {
        let line = format!("[{target}] {}\n", fragment.display().replace('\n', "\n    "));
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| CoreError::transport(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| CoreError::transport(e.to_string()))
    }
}

struct UnsureJudge;

#[async_trait]
impl AskBackend for UnsureJudge {
    async fn ask(&self, _prompt: &str) -> CoreResult<String> {
        Ok("unsure".to_string())
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    if let Some(profile) = &args.profile {
        loader = loader.profile(profile);
    }
    let mut config = loader.load()?;
    if let Some(ms) = args.interval_ms {
        config.outbox.min_interval_ms = ms;
    }

    let runtime = RoostRuntime::builder()
        .config(config)
        .transport(Arc::new(StdoutTransport::new()))
        .service::<dyn AskBackend>(Arc::new(UnsureJudge))
        .plugins(builtin_plugins())
        .build()
        .await?;

    info!("Ready. Try `private <user>: /token` or `group:g1 <user>: /puzzle start`");
    runtime.run(StdinSource::new()).await?;
    Ok(())
}
