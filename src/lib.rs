//! specloop - Autonomous Coding Loop
//!
//! Drives an AI coding assistant through a task spec, one iteration at a
//! time, until every task is finished, progress stalls, or the iteration
//! limit is reached.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`stream`] - Parses the assistant's JSON-lines output into activity events
//! - [`activity`] - Per-iteration stats and a bounded activity log
//! - [`progress`] - Detects when iterations stop finishing tasks
//! - [`process`] - Spawns the assistant with an idle watchdog and cancellation
//! - [`r#loop`] - The iteration state machine and run results
//! - [`spec`] - Task spec snapshots, the markdown reader and task selection
//! - [`prompt`] - Per-iteration prompt assembly
//! - [`sink`] - Lifecycle events and their console/headless renderers
//! - [`config`] - Run configuration and project settings
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Testing infrastructure (mocks, fixtures, assertions)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use specloop::{ConsoleSink, HarnessProcess, LoopConfig, LoopManager, MarkdownSpecSource};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = LoopConfig::new(".");
//! let process = Arc::new(HarnessProcess::new(config.harness.clone()));
//! let spec = Arc::new(MarkdownSpecSource::new(&config.spec_path));
//! let mut manager = LoopManager::new(config, process, spec, Box::new(ConsoleSink::new()), CancellationToken::new());
//!
//! let result = manager.run().await?;
//! std::process::exit(result.exit_code);
//! ```

pub mod activity;
pub mod config;
pub mod error;
pub mod r#loop;
pub mod process;
pub mod progress;
pub mod prompt;
pub mod signals;
pub mod sink;
pub mod spec;
pub mod stream;
pub mod testing;

// Re-export commonly used types
pub use error::{FailureKind, IntoLoopError, LoopError, Result};

// Re-export config types
pub use config::{ErrorPolicy, HarnessKind, LoopConfig, ProjectSettings};

// Re-export loop types
pub use r#loop::{ExitReason, IterationFailure, IterationResult, LoopManager, RunResult};

// Re-export component types
pub use activity::{ActivityTracker, FailureContext, Stats};
pub use process::{AgentProcess, HarnessProcess, ProcessExit};
pub use progress::{ProgressDetector, ProgressVerdict};
pub use sink::{ConsoleSink, EventSink, HeadlessSink, LoopEvent};
pub use spec::{MarkdownSpecSource, SpecSnapshot, SpecSource, SpecTask, TaskSize, TaskStatus};
pub use stream::{ActivityEvent, StreamParser};
