//! Interactive terminal view.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use super::{EventSink, LoopEvent};
use crate::stream::tools::truncate_chars;

const SPINNER_TEMPLATE: &str = "{spinner:.cyan} [{elapsed_precise}] {prefix:.bold} {wide_msg}";

/// Renders loop events with colours and a live spinner.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    spinner: Option<ProgressBar>,
    prefix: String,
    tools: u32,
    errors: u32,
    commits: u32,
    latest: String,
    hidden: bool,
}

impl ConsoleSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink for non-terminal output: draws no spinner, but still prints the
    /// banner, per-iteration lines and run summaries as plain lines.
    #[must_use]
    pub fn hidden() -> Self {
        let mut sink = Self::default();
        sink.hidden = true;
        sink
    }

    fn say(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        match &self.spinner {
            Some(spinner) => spinner.suspend(|| println!("{line}")),
            None => println!("{line}"),
        }
    }

    fn start_spinner(&mut self) {
        let spinner = if self.hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        if let Ok(style) = ProgressStyle::with_template(SPINNER_TEMPLATE) {
            spinner.set_style(style);
        }
        spinner.set_prefix(self.prefix.clone());
        spinner.enable_steady_tick(Duration::from_millis(120));
        self.spinner = Some(spinner);
    }

    fn stop_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    fn refresh(&self) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!(
                "tools {} · errors {} · commits {} · {}",
                self.tools, self.errors, self.commits, self.latest
            ));
        }
    }
}

impl EventSink for ConsoleSink {
    fn emit(&mut self, event: &LoopEvent) {
        match event {
            LoopEvent::RunStarted {
                session_id,
                harness,
                spec,
                total_tasks,
                pending_tasks,
                max_iterations,
            } => {
                self.say(format!("{} {}", "specloop".cyan().bold(), session_id.dimmed()));
                match (total_tasks, pending_tasks) {
                    (Some(total), Some(pending)) => {
                        self.say(format!("   Spec:       {spec} ({pending}/{total} tasks pending)"));
                    }
                    _ => self.say(format!("   Spec:       {} {}", spec, "(unavailable)".yellow())),
                }
                self.say(format!("   Harness:    {harness}"));
                self.say(format!(
                    "   Iterations: {}",
                    max_iterations.map_or_else(|| "until done".to_string(), |m| m.to_string())
                ));
            }
            LoopEvent::IterationStarted {
                iteration,
                max_iterations,
                tasks,
                points,
                degraded,
            } => {
                self.tools = 0;
                self.errors = 0;
                self.commits = 0;
                self.latest.clear();
                self.prefix = match max_iterations {
                    Some(max) => format!("Iteration {iteration}/{max}"),
                    None => format!("Iteration {iteration}"),
                };

                let scope = if tasks.is_empty() {
                    "no task selected".to_string()
                } else {
                    format!("{} ({points} pts)", tasks.join(", "))
                };
                self.say(format!("\n{} {}", format!("▶ {}", self.prefix).bold(), scope));
                if *degraded {
                    self.say(format!(
                        "   {} no pending task fits the budget",
                        "Warning:".yellow().bold()
                    ));
                }
                self.start_spinner();
                self.refresh();
            }
            LoopEvent::ToolStarted { summary, .. } => {
                self.tools += 1;
                self.latest = truncate_chars(summary, 60);
                self.refresh();
            }
            LoopEvent::ToolCompleted { is_error, .. } => {
                if *is_error {
                    self.errors += 1;
                    self.refresh();
                }
            }
            LoopEvent::Thought { text, .. } => {
                self.latest = truncate_chars(text.lines().next().unwrap_or_default(), 60);
                self.refresh();
            }
            LoopEvent::Commit { hash, message, .. } => {
                self.commits += 1;
                self.say(format!("   {} {} {}", "commit".green(), hash.dimmed(), message));
                self.refresh();
            }
            LoopEvent::TaskCompleted { id, status, .. } => {
                self.say(format!("   {} {} {}", "✓".green().bold(), id.bold(), status));
            }
            LoopEvent::IterationDone { iteration, result } => {
                self.stop_spinner();
                let cost = result
                    .cost_usd
                    .map(|c| format!(" · ${c:.2}"))
                    .unwrap_or_default();
                let line = format!(
                    "   {} in {:.1}s · {}{}",
                    if result.success {
                        format!("Iteration {iteration} done").green()
                    } else {
                        format!("Iteration {iteration} unsuccessful").yellow()
                    },
                    result.duration_ms as f64 / 1000.0,
                    result.stats.summary(),
                    cost
                );
                self.say(line);
                if let Some(failure) = &result.failure {
                    self.say(format!("   {} {}", "Error:".red().bold(), failure.message));
                }
            }
            LoopEvent::Warning { message } => {
                self.say(format!("   {} {}", "Warning:".yellow().bold(), message));
            }
            LoopEvent::Stuck {
                iterations_without_progress,
                pending,
            } => {
                self.stop_spinner();
                self.say(format!(
                    "\n{} no progress for {} iterations",
                    "Stuck:".yellow().bold(),
                    iterations_without_progress
                ));
                if !pending.is_empty() {
                    self.say(format!("   Not progressing: {}", pending.join(", ")));
                }
            }
            LoopEvent::MaxIterations {
                iterations,
                pending,
            } => {
                self.stop_spinner();
                self.say(format!(
                    "\n{} reached after {} iterations, {} task(s) pending",
                    "Iteration limit".yellow().bold(),
                    iterations,
                    pending.len()
                ));
            }
            LoopEvent::RunComplete { iterations } => {
                self.stop_spinner();
                self.say(format!(
                    "\n{} all tasks done after {} iteration(s)",
                    "Complete:".green().bold(),
                    iterations
                ));
            }
            LoopEvent::RunFailed { failure } => {
                self.stop_spinner();
                self.say(format!(
                    "\n{} iteration {}: {}",
                    "Failed:".red().bold(),
                    failure.iteration,
                    failure.message
                ));
                for line in failure.context.render().lines() {
                    self.say(format!("   {line}"));
                }
            }
            LoopEvent::Interrupted { iteration } => {
                self.stop_spinner();
                self.say(format!(
                    "\n{} during iteration {}",
                    "Interrupted".yellow().bold(),
                    iteration
                ));
            }
        }
    }
}

impl Drop for ConsoleSink {
    fn drop(&mut self) {
        self.stop_spinner();
    }
}
