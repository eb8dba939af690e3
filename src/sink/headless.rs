//! JSON-lines event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::warn;

use super::{EventSink, LoopEvent};

/// Current schema version of the headless event envelope.
///
/// Increment this when making breaking changes to [`LoopEvent`].
pub const SCHEMA_VERSION: u32 = 1;

/// One line of headless output.
///
/// # Example
///
/// ```
/// use specloop::sink::{EventEnvelope, LoopEvent, SCHEMA_VERSION};
///
/// let envelope = EventEnvelope::new("session-1", LoopEvent::RunComplete { iterations: 2 });
/// assert_eq!(envelope.schema_version, SCHEMA_VERSION);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub schema_version: u32,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: LoopEvent,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(session_id: impl Into<String>, event: LoopEvent) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            event,
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    schema_version: u32,
    session_id: &'a str,
    timestamp: DateTime<Utc>,
    event: &'a LoopEvent,
}

/// Writes each event as one JSON object per line.
pub struct HeadlessSink<W: Write + Send> {
    writer: W,
    session_id: String,
}

impl HeadlessSink<std::io::Stdout> {
    /// Sink writing to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> HeadlessSink<W> {
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            session_id: String::new(),
        }
    }

    /// Consume the sink, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_event(&mut self, event: &LoopEvent) -> std::io::Result<()> {
        let envelope = EnvelopeRef {
            schema_version: SCHEMA_VERSION,
            session_id: &self.session_id,
            timestamp: Utc::now(),
            event,
        };
        serde_json::to_writer(&mut self.writer, &envelope)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

impl<W: Write + Send> EventSink for HeadlessSink<W> {
    fn emit(&mut self, event: &LoopEvent) {
        if let LoopEvent::RunStarted { session_id, .. } = event {
            self.session_id.clone_from(session_id);
        }
        if let Err(e) = self.write_event(event) {
            warn!(error = %e, event = event.kind(), "failed to write headless event");
        }
    }
}
