//! `armos-runtime` – the two halves of the arm controller.
//!
//! A fast **reflex unit** owns the hardware and runs the pick/place state
//! machine at a fixed cadence; a slow **intent unit** turns operator speech
//! into commands.  The only thing they share is the [`task_channel`].
//!
//! # Modules
//!
//! - [`executor`] – [`TaskExecutor`][executor::TaskExecutor]: the state
//!   machine (search sweep, visual servoing, grab, place, stop) driven one
//!   [`tick`][executor::TaskExecutor::tick] at a time.
//! - [`reflex`] – [`ReflexUnit`][reflex::ReflexUnit]: the dedicated control
//!   thread that ticks the executor and publishes a
//!   [`StatusBoard`][reflex::StatusBoard].
//! - [`cadence`] – fixed-rate sleeping and FPS accounting for the reflex loop.
//! - [`task_channel`] – the FIFO between the units; validates raw command
//!   messages at the boundary.
//! - [`intent`] – [`IntentUnit`][intent::IntentUnit]: utterance source,
//!   parser and the async loop joining them.
//! - [`llm_driver`] – [`LlmDriver`][llm_driver::LlmDriver]: an
//!   OpenAI-compatible chat client that returns one command object per
//!   utterance.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging plus optional OTLP span export.

pub mod cadence;
pub mod executor;
pub mod intent;
pub mod llm_driver;
pub mod reflex;
pub mod task_channel;
pub mod telemetry;

pub use cadence::{FpsMeter, FpsReport, LoopRate};
pub use executor::{ExecutorTimings, Sweep, TaskExecutor};
pub use intent::{ChannelUtterances, IntentParser, IntentUnit, LlmIntentParser, UtteranceSource};
pub use llm_driver::{COMMAND_GUIDELINES, ChatMessage, LlmDriver, LlmError, Role};
pub use reflex::{DEFAULT_CONTROL_HZ, ReflexStatus, ReflexUnit, StatusBoard};
pub use task_channel::{TaskReceiver, TaskSender};
pub use telemetry::{TracerProviderGuard, init_tracing};
