//! Lenient markdown spec reader.
//!
//! Recognised structure, everything else is ignored:
//!
//! ```text
//! ### T001: Parse the event stream
//! Size: S
//! Status: in_progress
//! - [x] Define message types
//! - [ ] Handle tool results
//! ```
//!
//! The file may be mid-write when it is read; a partial file simply yields
//! fewer tasks. A missing file or a file without tasks is "unavailable".

use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{SpecSnapshot, SpecSource, SpecTask, TaskSize, TaskStatus};
use crate::error::{LoopError, Result};

/// Reads [`SpecSnapshot`]s from a markdown file.
#[derive(Debug, Clone)]
pub struct MarkdownSpecSource {
    path: PathBuf,
}

impl MarkdownSpecSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SpecSource for MarkdownSpecSource {
    fn load(&self) -> Result<Option<SpecSnapshot>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "spec file not found");
                return Ok(None);
            }
            Err(e) => {
                return Err(LoopError::SpecUnavailable {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })
            }
        };

        let snapshot = parse_spec(&content)?;
        if snapshot.is_empty() {
            debug!(path = %self.path.display(), "spec file has no tasks");
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Parse spec content into a snapshot.
///
/// # Errors
///
/// Returns an error only if the built-in patterns fail to compile.
///
/// # Example
///
/// ```
/// use specloop::spec::markdown::parse_spec;
/// use specloop::spec::{TaskSize, TaskStatus};
///
/// let snap = parse_spec("### T001: First\nSize: L\nStatus: passed\n").unwrap();
/// assert_eq!(snap.tasks[0].size, TaskSize::Large);
/// assert_eq!(snap.tasks[0].status, TaskStatus::Passed);
/// ```
pub fn parse_spec(content: &str) -> Result<SpecSnapshot> {
    let header_re = Regex::new(r"^#{2,4}\s+([A-Z][A-Z0-9]*-?\d+)\b\s*[:.\-–—]?\s*(.*)$")
        .map_err(|e| LoopError::config(format!("Failed to compile header regex: {e}")))?;
    let checkbox_re = Regex::new(r"^[-*]\s+\[([ xX])\]\s+(.+)$")
        .map_err(|e| LoopError::config(format!("Failed to compile checkbox regex: {e}")))?;

    let mut tasks: Vec<SpecTask> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();

        if let Some(caps) = header_re.captures(trimmed) {
            tasks.push(SpecTask::new(&caps[1], caps[2].trim(), TaskSize::default()));
            continue;
        }

        // Attributes and checkboxes only count inside a task section
        let Some(task) = tasks.last_mut() else {
            continue;
        };

        if let Some((key, value)) = attribute(trimmed) {
            match key.as_str() {
                "status" => {
                    if let Some(status) = TaskStatus::parse(&value) {
                        task.status = status;
                    }
                }
                "size" => {
                    if let Some(size) = TaskSize::parse(&value) {
                        task.size = size;
                    }
                }
                _ => {}
            }
            continue;
        }

        if let Some(caps) = checkbox_re.captures(trimmed) {
            if &caps[1] != " " {
                task.completed_items.push(caps[2].trim().to_string());
            }
        }
    }

    Ok(SpecSnapshot {
        tasks,
        fingerprint: format!("{:x}", md5::compute(content.as_bytes())),
    })
}

/// Split `- **Status:** passed` style lines into `("status", "passed")`.
fn attribute(line: &str) -> Option<(String, String)> {
    let line = line.trim_start_matches(['-', '*', ' ']);
    let (key, value) = line.split_once(':')?;
    let key = key.trim().trim_matches('*').trim().to_ascii_lowercase();
    if key != "status" && key != "size" {
        return None;
    }
    let value = value.trim().trim_matches(['*', '`', ' ']).to_string();
    Some((key, value))
}
