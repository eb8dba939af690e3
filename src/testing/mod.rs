//! Testing infrastructure for specloop.
//!
//! Test doubles and data for exercising the loop without a real assistant:
//!
//! - **Mocks**: scripted [`AgentProcess`](crate::process::AgentProcess),
//!   shared in-memory [`SpecSource`](crate::spec::SpecSource) and a
//!   recording [`EventSink`](crate::sink::EventSink)
//! - **Fixtures**: harness stream lines and spec documents
//! - **Assertions**: run-level checks with descriptive failures
//!
//! # Example
//!
//! ```rust,ignore
//! use specloop::testing::{MockAgentProcess, MockSpecSource, ScriptedIteration, sml_snapshot};
//!
//! let spec = MockSpecSource::new(Some(sml_snapshot()));
//! let agent = MockAgentProcess::new(vec![ScriptedIteration::idle_turn()])
//!     .with_spec(spec.clone());
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mocks;

pub use assertions::*;
pub use fixtures::*;
pub use mocks::*;
