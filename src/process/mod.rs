//! Assistant process lifecycle.
//!
//! One process per iteration: spawn, stream its output line by line, and
//! terminate it on idle timeout or interrupt. The raw exit is reported back;
//! whether that exit is a success is decided by the iteration driver, which
//! knows if a terminal `result` message was seen.

pub mod harness;

pub use harness::HarnessProcess;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Everything needed to start one iteration's process.
#[derive(Debug, Clone)]
pub struct IterationRequest {
    /// 1-indexed iteration number.
    pub iteration: u32,
    pub prompt: String,
    pub working_dir: PathBuf,
    pub model: String,
    pub idle_timeout: Duration,
}

/// A line of process output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLine<'a> {
    Stdout(&'a str),
    Stderr(&'a str),
}

/// How the process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessExit {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Terminating signal on unix.
    pub signal: Option<i32>,
    pub pid: Option<u32>,
    pub duration_ms: u64,
}

impl ProcessExit {
    /// Exit with the given code.
    #[must_use]
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    /// Termination by signal.
    #[must_use]
    pub fn signaled(signal: i32) -> Self {
        Self {
            signal: Some(signal),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs one assistant process to completion.
///
/// Implementations must return promptly once `cancel` fires, after the
/// child has been killed and reaped.
#[async_trait]
pub trait AgentProcess: Send + Sync {
    /// Spawn the process, feed it the prompt and forward every output line.
    ///
    /// # Errors
    ///
    /// `HarnessNotFound`/`Spawn` when the process cannot start,
    /// `IdleTimeout` when it goes silent, `Cancelled` on interrupt.
    async fn run_iteration(
        &self,
        request: &IterationRequest,
        cancel: &CancellationToken,
        on_output: &mut (dyn for<'a> FnMut(OutputLine<'a>) + Send),
    ) -> Result<ProcessExit>;

    /// Harness name for logs and events.
    fn name(&self) -> String;
}
