//! Run configuration.
//!
//! [`LoopConfig`] is built once per run and handed to the loop manager.
//! Optional per-project defaults live in `.specloop/settings.json` and are
//! layered under CLI flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::activity::{DEFAULT_FAILURE_TRAIL, DEFAULT_LOG_CAPACITY};
use crate::error::{LoopError, Result};

/// Default seconds without output before the assistant is killed.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;

/// Default consecutive non-progressing iterations before the run is stuck.
pub const DEFAULT_STUCK_THRESHOLD: u32 = 3;

/// Default task budget in points per iteration.
pub const DEFAULT_TASK_BUDGET: u32 = 4;

/// Default iteration limit.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Default model passed to the harness.
pub const DEFAULT_MODEL: &str = "opus";

/// Iteration cap for "until done" runs that have no spec to observe.
pub const UNTIL_DONE_WITHOUT_SPEC_CAP: u32 = 10;

/// Spec file name looked up in the project directory.
pub const DEFAULT_SPEC_FILE: &str = "SPEC.md";

// ============================================================================
// Harness
// ============================================================================

/// Which assistant binary to spawn.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarnessKind {
    /// The `claude` CLI in streaming JSON mode.
    #[default]
    Claude,
    /// Any program speaking the same stream protocol.
    Command { program: String, args: Vec<String> },
}

impl HarnessKind {
    /// Parse a CLI/settings value: `claude`, or a command line.
    ///
    /// ```
    /// use specloop::config::HarnessKind;
    ///
    /// assert_eq!(HarnessKind::parse("claude"), HarnessKind::Claude);
    /// assert_eq!(
    ///     HarnessKind::parse("./agent.sh --fast"),
    ///     HarnessKind::Command { program: "./agent.sh".into(), args: vec!["--fast".into()] }
    /// );
    /// ```
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let mut parts = value.split_whitespace();
        match parts.next() {
            None => Self::Claude,
            Some("claude") if parts.clone().next().is_none() => Self::Claude,
            Some(program) => Self::Command {
                program: program.to_string(),
                args: parts.map(str::to_string).collect(),
            },
        }
    }

    /// Program to resolve and spawn.
    #[must_use]
    pub fn program(&self) -> &str {
        match self {
            Self::Claude => "claude",
            Self::Command { program, .. } => program,
        }
    }

    /// Arguments for one iteration.
    #[must_use]
    pub fn args(&self, model: &str) -> Vec<String> {
        match self {
            Self::Claude => [
                "-p",
                "--output-format",
                "stream-json",
                "--verbose",
                "--dangerously-skip-permissions",
                "--model",
                model,
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            Self::Command { args, .. } => args.clone(),
        }
    }

    /// Name shown in logs and events.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Claude => "claude".to_string(),
            Self::Command { program, .. } => Path::new(program)
                .file_name()
                .map_or_else(|| program.clone(), |n| n.to_string_lossy().into_owned()),
        }
    }
}

// ============================================================================
// Error policy
// ============================================================================

/// What the run does after an iteration-fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop the run with the error exit code.
    #[default]
    Stop,
    /// Keep iterating until this many errors happen back to back.
    Continue { max_consecutive_errors: u32 },
}

impl ErrorPolicy {
    /// Whether the run stops after `consecutive_errors` failed iterations.
    #[must_use]
    pub fn should_stop(&self, consecutive_errors: u32) -> bool {
        match self {
            Self::Stop => consecutive_errors > 0,
            Self::Continue {
                max_consecutive_errors,
            } => consecutive_errors >= *max_consecutive_errors,
        }
    }
}

// ============================================================================
// Project settings
// ============================================================================

/// Per-project defaults from `.specloop/settings.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectSettings {
    pub spec_path: Option<PathBuf>,
    pub max_iterations: Option<u32>,
    pub idle_timeout_secs: Option<u64>,
    pub stuck_threshold: Option<u32>,
    pub task_budget: Option<u32>,
    pub model: Option<String>,
    pub harness: Option<String>,
    /// Switches the error policy to `Continue` with this limit.
    pub continue_on_error: Option<u32>,
}

impl ProjectSettings {
    /// Load settings for a project; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file exists but cannot be read
    /// or parsed.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = Self::settings_path(project_dir);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            LoopError::config_with_path(format!("Failed to read settings: {e}"), path.clone())
        })?;
        serde_json::from_str(&content).map_err(|e| {
            LoopError::config_with_path(format!("Failed to parse settings: {e}"), path.clone())
        })
    }

    /// Path of the settings file for a project.
    #[must_use]
    pub fn settings_path(project_dir: &Path) -> PathBuf {
        project_dir.join(".specloop").join("settings.json")
    }
}

// ============================================================================
// Loop config
// ============================================================================

/// Configuration for one run.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Working directory of the assistant.
    pub project_dir: PathBuf,
    /// Spec file the assistant works through.
    pub spec_path: PathBuf,
    /// Iteration limit; `None` runs until done.
    pub max_iterations: Option<u32>,
    /// Silence allowed before the assistant is killed.
    pub idle_timeout: Duration,
    /// Consecutive non-progressing iterations before stuck.
    pub stuck_threshold: u32,
    /// Points available per iteration.
    pub task_budget: u32,
    pub model: String,
    pub harness: HarnessKind,
    pub error_policy: ErrorPolicy,
    /// Entries kept in the activity log.
    pub activity_log_capacity: usize,
    /// Activity entries included in a failure context.
    pub failure_trail_len: usize,
}

impl LoopConfig {
    /// Create a configuration with defaults for the given project.
    #[must_use]
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        Self {
            spec_path: project_dir.join(DEFAULT_SPEC_FILE),
            project_dir,
            max_iterations: Some(DEFAULT_MAX_ITERATIONS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
            task_budget: DEFAULT_TASK_BUDGET,
            model: DEFAULT_MODEL.to_string(),
            harness: HarnessKind::default(),
            error_policy: ErrorPolicy::default(),
            activity_log_capacity: DEFAULT_LOG_CAPACITY,
            failure_trail_len: DEFAULT_FAILURE_TRAIL,
        }
    }

    /// Layer project settings over the current values.
    #[must_use]
    pub fn with_settings(mut self, settings: &ProjectSettings) -> Self {
        if let Some(path) = &settings.spec_path {
            self.spec_path = self.project_dir.join(path);
        }
        if let Some(max) = settings.max_iterations {
            self.max_iterations = Some(max);
        }
        if let Some(secs) = settings.idle_timeout_secs {
            self.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(threshold) = settings.stuck_threshold {
            self.stuck_threshold = threshold;
        }
        if let Some(budget) = settings.task_budget {
            self.task_budget = budget;
        }
        if let Some(model) = &settings.model {
            self.model.clone_from(model);
        }
        if let Some(harness) = &settings.harness {
            self.harness = HarnessKind::parse(harness);
        }
        if let Some(max) = settings.continue_on_error {
            self.error_policy = ErrorPolicy::Continue {
                max_consecutive_errors: max,
            };
        }
        self
    }

    #[must_use]
    pub fn with_spec_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.spec_path = path.into();
        self
    }

    /// Set the iteration limit; `None` runs until done.
    #[must_use]
    pub fn with_max_iterations(mut self, max: Option<u32>) -> Self {
        self.max_iterations = max;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_stuck_threshold(mut self, threshold: u32) -> Self {
        self.stuck_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_task_budget(mut self, budget: u32) -> Self {
        self.task_budget = budget;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_harness(mut self, harness: HarnessKind) -> Self {
        self.harness = harness;
        self
    }

    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    #[must_use]
    pub fn with_activity_log_capacity(mut self, capacity: usize) -> Self {
        self.activity_log_capacity = capacity;
        self
    }

    /// Check every value is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == Some(0) {
            return Err(LoopError::invalid("max_iterations", "must be at least 1"));
        }
        if self.idle_timeout.is_zero() {
            return Err(LoopError::invalid("idle_timeout", "must be greater than zero"));
        }
        if self.stuck_threshold == 0 {
            return Err(LoopError::invalid("stuck_threshold", "must be at least 1"));
        }
        if self.task_budget == 0 {
            return Err(LoopError::invalid("task_budget", "must be at least 1 point"));
        }
        if self.model.trim().is_empty() {
            return Err(LoopError::invalid("model", "must not be empty"));
        }
        if self.harness.program().is_empty() {
            return Err(LoopError::invalid("harness", "program must not be empty"));
        }
        if self.activity_log_capacity == 0 {
            return Err(LoopError::invalid("activity_log_capacity", "must be at least 1"));
        }
        if let ErrorPolicy::Continue {
            max_consecutive_errors: 0,
        } = self.error_policy
        {
            return Err(LoopError::invalid(
                "error_policy",
                "max_consecutive_errors must be at least 1",
            ));
        }
        Ok(())
    }

    /// Iteration limit actually applied to a run.
    ///
    /// Without a spec the run can never observe completion, so "until done"
    /// is capped.
    #[must_use]
    pub fn effective_max_iterations(&self, spec_available: bool) -> Option<u32> {
        match self.max_iterations {
            None if !spec_available => Some(UNTIL_DONE_WITHOUT_SPEC_CAP),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = LoopConfig::new("/tmp/project");
        assert_eq!(config.spec_path, PathBuf::from("/tmp/project/SPEC.md"));
        assert_eq!(config.max_iterations, Some(10));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.stuck_threshold, 3);
        assert_eq!(config.task_budget, 4);
        assert_eq!(config.model, "opus");
        assert_eq!(config.harness, HarnessKind::Claude);
        assert_eq!(config.error_policy, ErrorPolicy::Stop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let base = LoopConfig::new(".");
        assert!(base.clone().with_max_iterations(Some(0)).validate().is_err());
        assert!(base.clone().with_idle_timeout(Duration::ZERO).validate().is_err());
        assert!(base.clone().with_stuck_threshold(0).validate().is_err());
        assert!(base.clone().with_task_budget(0).validate().is_err());
        assert!(base.clone().with_model("  ").validate().is_err());
        assert!(base
            .clone()
            .with_error_policy(ErrorPolicy::Continue {
                max_consecutive_errors: 0
            })
            .validate()
            .is_err());
        assert!(base.with_max_iterations(None).validate().is_ok());
    }

    #[test]
    fn test_validate_names_field() {
        let err = LoopConfig::new(".").with_task_budget(0).validate().unwrap_err();
        assert!(err.to_string().contains("task_budget"));
    }

    #[test]
    fn test_effective_max_iterations() {
        let until_done = LoopConfig::new(".").with_max_iterations(None);
        assert_eq!(until_done.effective_max_iterations(true), None);
        assert_eq!(
            until_done.effective_max_iterations(false),
            Some(UNTIL_DONE_WITHOUT_SPEC_CAP)
        );

        let bounded = LoopConfig::new(".").with_max_iterations(Some(3));
        assert_eq!(bounded.effective_max_iterations(false), Some(3));
    }

    #[test]
    fn test_error_policy() {
        assert!(!ErrorPolicy::Stop.should_stop(0));
        assert!(ErrorPolicy::Stop.should_stop(1));

        let cont = ErrorPolicy::Continue {
            max_consecutive_errors: 2,
        };
        assert!(!cont.should_stop(1));
        assert!(cont.should_stop(2));
    }

    #[test]
    fn test_harness_parse_and_args() {
        assert_eq!(HarnessKind::parse("claude"), HarnessKind::Claude);
        assert_eq!(HarnessKind::parse(""), HarnessKind::Claude);

        let claude = HarnessKind::Claude.args("sonnet");
        assert!(claude.contains(&"stream-json".to_string()));
        assert_eq!(claude.last().map(String::as_str), Some("sonnet"));

        let custom = HarnessKind::parse("/usr/local/bin/agent --json");
        assert_eq!(custom.program(), "/usr/local/bin/agent");
        assert_eq!(custom.args("ignored"), vec!["--json".to_string()]);
        assert_eq!(custom.name(), "agent");
    }

    #[test]
    fn test_settings_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let settings = ProjectSettings::load(temp.path()).unwrap();
        assert_eq!(settings, ProjectSettings::default());
    }

    #[test]
    fn test_settings_layered_into_config() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".specloop");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("settings.json"),
            r#"{"specPath":"docs/TASKS.md","idleTimeoutSecs":30,"taskBudget":2,"model":"sonnet","continueOnError":3}"#,
        )
        .unwrap();

        let settings = ProjectSettings::load(temp.path()).unwrap();
        let config = LoopConfig::new(temp.path()).with_settings(&settings);

        assert_eq!(config.spec_path, temp.path().join("docs/TASKS.md"));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.task_budget, 2);
        assert_eq!(config.model, "sonnet");
        assert_eq!(config.stuck_threshold, DEFAULT_STUCK_THRESHOLD);
        assert_eq!(
            config.error_policy,
            ErrorPolicy::Continue {
                max_consecutive_errors: 3
            }
        );
    }

    #[test]
    fn test_settings_malformed_is_config_error() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".specloop");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("settings.json"), "{ not json").unwrap();

        let err = ProjectSettings::load(temp.path()).unwrap_err();
        assert!(matches!(err, LoopError::Config { path: Some(_), .. }));
    }
}
