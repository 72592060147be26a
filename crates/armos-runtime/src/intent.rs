//! Intent unit – the slow side of the system.
//!
//! Turns operator utterances into commands and posts them to the task channel.
//! Everything here is allowed to block (typing, HTTP round-trips to a model)
//! because it runs on Tokio, never on the reflex thread.
//!
//! * [`UtteranceSource`] yields raw text, e.g. [`ChannelUtterances`] fed by
//!   the console.
//! * [`IntentParser`] maps one utterance to a [`CommandMessage`].
//!   [`LlmIntentParser`] asks a language model, except for utterances that
//!   already are a command object, which bypass the model.
//! * [`IntentUnit::run`] glues them together: one utterance, one parse, at
//!   most one command per cycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use armos_types::{ArmError, CommandMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::llm_driver::{ChatMessage, LlmDriver, Role, parse_command_reply};
use crate::task_channel::TaskSender;

/// Pause after a failed parse before handling the next utterance.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Produces operator utterances.  `None` means the source is exhausted.
#[async_trait]
pub trait UtteranceSource: Send {
    async fn next_utterance(&mut self) -> Option<String>;
}

/// Maps an utterance to a raw command message.
#[async_trait]
pub trait IntentParser: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ArmError::Llm`] when the utterance cannot be interpreted.
    async fn parse(&self, utterance: &str) -> Result<CommandMessage, ArmError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Sources
// ─────────────────────────────────────────────────────────────────────────────

/// Utterances pushed through a Tokio channel (e.g. from a stdin thread).
pub struct ChannelUtterances {
    rx: mpsc::Receiver<String>,
}

impl ChannelUtterances {
    /// Create a source plus the sender that feeds it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl UtteranceSource for ChannelUtterances {
    async fn next_utterance(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsers
// ─────────────────────────────────────────────────────────────────────────────

/// Parse `utterance` directly when it already is a command object.
pub fn parse_direct(utterance: &str) -> Option<CommandMessage> {
    let trimmed = utterance.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Language-model backed parser.
pub struct LlmIntentParser {
    driver: LlmDriver,
}

impl LlmIntentParser {
    pub fn new(driver: LlmDriver) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl IntentParser for LlmIntentParser {
    async fn parse(&self, utterance: &str) -> Result<CommandMessage, ArmError> {
        if let Some(message) = parse_direct(utterance) {
            debug!(?message, "command object bypasses the model");
            return Ok(message);
        }

        let messages = [ChatMessage {
            role: Role::User,
            content: utterance.to_string(),
        }];
        let reply = self.driver.complete(&messages).await?;
        debug!(model = self.driver.model(), %reply, "model reply");
        Ok(parse_command_reply(&reply)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// IntentUnit
// ─────────────────────────────────────────────────────────────────────────────

pub struct IntentUnit {
    source: Box<dyn UtteranceSource>,
    parser: Box<dyn IntentParser>,
    tasks: TaskSender,
    shutdown: Arc<AtomicBool>,
    backoff: Duration,
}

impl IntentUnit {
    pub fn new(
        source: Box<dyn UtteranceSource>,
        parser: Box<dyn IntentParser>,
        tasks: TaskSender,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            parser,
            tasks,
            shutdown,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Loop until the source ends, shutdown is raised or the reflex side
    /// hangs up.
    pub async fn run(mut self) {
        info!("intent unit started");
        while !self.shutdown.load(Ordering::Relaxed) {
            let Some(utterance) = self.source.next_utterance().await else {
                break;
            };
            let utterance = utterance.trim();
            if utterance.is_empty() {
                continue;
            }

            match self.parser.parse(utterance).await {
                Ok(message) => match self.tasks.post_message(message) {
                    Ok(()) => info!(%utterance, "command posted"),
                    Err(ArmError::ChannelClosed) => {
                        warn!("task channel closed; intent unit exiting");
                        break;
                    }
                    // Already logged at the channel boundary.
                    Err(_) => {}
                },
                Err(e) => {
                    warn!(%utterance, error = %e, "could not interpret utterance");
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
        info!("intent unit stopped");
    }
}
