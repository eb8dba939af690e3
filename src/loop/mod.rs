//! Loop management module.
//!
//! This module contains the iteration state machine:
//!
//! - [`manager`] - Run-level manager that sequences iterations
//! - [`iteration`] - One iteration: spawn, stream, fold
//! - [`state`] - Run and iteration phases with their transitions
//! - [`outcome`] - Iteration and run results, exit reasons
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ LoopManager │────>│  Iteration   │────>│ AgentProcess │
//! │             │     │              │     │              │
//! └─────────────┘     └──────────────┘     └──────────────┘
//!       │                    │                    │
//!       v                    v                    v
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Progress    │     │ StreamParser │     │  EventSink   │
//! │ Detector    │     │ + Tracker    │     │              │
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```

pub mod iteration;
pub mod manager;
pub mod outcome;
pub mod state;

// Re-exports for convenience
pub use iteration::{Iteration, IterationRun};
pub use manager::LoopManager;
pub use outcome::{ExitReason, IterationFailure, IterationResult, RunResult};
pub use state::{IterationPhase, LoopState, RunPhase};
