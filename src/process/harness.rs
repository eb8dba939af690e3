//! Real assistant process backed by `tokio::process`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AgentProcess, IterationRequest, OutputLine, ProcessExit};
use crate::config::HarnessKind;
use crate::error::{LoopError, Result};

const READ_CHUNK: usize = 8 * 1024;

/// Spawns the configured harness binary once per iteration.
#[derive(Debug, Clone)]
pub struct HarnessProcess {
    harness: HarnessKind,
}

impl HarnessProcess {
    #[must_use]
    pub fn new(harness: HarnessKind) -> Self {
        Self { harness }
    }

    /// Locate the harness binary on `PATH` (or as given, if it has a path).
    ///
    /// # Errors
    ///
    /// Returns `HarnessNotFound` when the binary cannot be located.
    pub fn resolve_program(&self) -> Result<PathBuf> {
        let program = self.harness.program();
        which::which(program).map_err(|e| {
            debug!(program, error = %e, "harness lookup failed");
            LoopError::HarnessNotFound {
                program: program.to_string(),
            }
        })
    }

    fn command(&self, program: &Path, request: &IterationRequest) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(self.harness.args(&request.model))
            .current_dir(&request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AgentProcess for HarnessProcess {
    async fn run_iteration(
        &self,
        request: &IterationRequest,
        cancel: &CancellationToken,
        on_output: &mut (dyn for<'a> FnMut(OutputLine<'a>) + Send),
    ) -> Result<ProcessExit> {
        let program = self.resolve_program()?;
        let started = Instant::now();

        let mut child = self.command(&program, request).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LoopError::HarnessNotFound {
                    program: program.display().to_string(),
                }
            } else {
                LoopError::spawn(program.display().to_string(), e)
            }
        })?;
        let pid = child.id();

        info!(
            iteration = request.iteration,
            harness = %self.harness.name(),
            model = %request.model,
            pid = ?pid,
            "spawned assistant process"
        );

        // Prompt is written concurrently with output draining
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = request.prompt.clone();
            tokio::spawn(async move {
                if let Err(e) = write_prompt(&mut stdin, &prompt).await {
                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        debug!("assistant closed stdin before reading the whole prompt");
                    } else {
                        warn!(error = %e, "failed to write prompt to assistant");
                    }
                }
            });
        }

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| LoopError::Other(anyhow::anyhow!("assistant stdout not captured")))?;
        let mut stderr = child.stderr.take();
        let mut out_buf = vec![0u8; READ_CHUNK];
        let mut err_buf = vec![0u8; READ_CHUNK];
        let mut out_lines = LineBuffer::default();
        let mut err_lines = LineBuffer::default();

        let idle = request.idle_timeout;
        let watchdog = tokio::time::sleep(idle);
        tokio::pin!(watchdog);

        let mut stdout_open = true;
        let mut stderr_open = stderr.is_some();
        let mut exit: Option<std::process::ExitStatus> = None;

        loop {
            if !stdout_open && !stderr_open {
                if let Some(status) = exit {
                    return Ok(process_exit(status, pid, started));
                }
            }

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    warn!(iteration = request.iteration, pid = ?pid, "interrupt received, killing assistant");
                    kill_and_reap(&mut child).await;
                    return Err(LoopError::Cancelled);
                }

                read = stdout.read(&mut out_buf), if stdout_open => {
                    let emit = |line: &[u8]| on_output(OutputLine::Stdout(decode_line(line).as_ref()));
                    match read {
                        Ok(0) => {
                            stdout_open = false;
                            out_lines.finish(emit);
                        }
                        Ok(n) => {
                            // Any bytes count as activity, complete line or not
                            watchdog.as_mut().reset(Instant::now() + idle);
                            out_lines.push(&out_buf[..n], emit);
                        }
                        Err(e) => {
                            debug!(error = %e, "assistant stdout read failed");
                            stdout_open = false;
                            out_lines.finish(emit);
                        }
                    }
                }

                read = read_optional(&mut stderr, &mut err_buf), if stderr_open => {
                    let emit = |line: &[u8]| on_output(OutputLine::Stderr(decode_line(line).as_ref()));
                    match read {
                        Ok(0) => {
                            stderr_open = false;
                            err_lines.finish(emit);
                        }
                        Ok(n) => {
                            watchdog.as_mut().reset(Instant::now() + idle);
                            err_lines.push(&err_buf[..n], emit);
                        }
                        Err(e) => {
                            debug!(error = %e, "assistant stderr read failed");
                            stderr_open = false;
                            err_lines.finish(emit);
                        }
                    }
                }

                status = child.wait(), if exit.is_none() => {
                    let status = status?;
                    debug!(pid = ?pid, ?status, "assistant exited");
                    exit = Some(status);
                }

                () = &mut watchdog => {
                    if let Some(status) = exit {
                        // Exited, but something else still holds the pipes open
                        debug!(pid = ?pid, "output pipes still open after exit, giving up on them");
                        return Ok(process_exit(status, pid, started));
                    }
                    warn!(
                        iteration = request.iteration,
                        pid = ?pid,
                        idle_timeout_secs = idle.as_secs(),
                        "assistant idle, killing"
                    );
                    kill_and_reap(&mut child).await;
                    return Err(LoopError::IdleTimeout { secs: idle.as_secs() });
                }
            }
        }
    }

    fn name(&self) -> String {
        self.harness.name()
    }
}

async fn write_prompt(stdin: &mut tokio::process::ChildStdin, prompt: &str) -> std::io::Result<()> {
    stdin.write_all(prompt.as_bytes()).await?;
    stdin.flush().await?;
    stdin.shutdown().await
}

async fn read_optional<R>(reader: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}

/// Reassembles `\n`-terminated lines from arbitrarily split reads.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and emit every line it completes.
    fn push(&mut self, chunk: &[u8], mut emit: impl FnMut(&[u8])) {
        self.pending.extend_from_slice(chunk);
        let mut start = 0;
        while let Some(pos) = self.pending[start..].iter().position(|&b| b == b'\n') {
            emit(&self.pending[start..start + pos]);
            start += pos + 1;
        }
        self.pending.drain(..start);
    }

    /// Emit a trailing unterminated line, if any.
    fn finish(&mut self, mut emit: impl FnMut(&[u8])) {
        if !self.pending.is_empty() {
            emit(&self.pending);
            self.pending.clear();
        }
    }
}

/// Lossy UTF-8 with the trailing `\r` of CRLF output removed.
fn decode_line(bytes: &[u8]) -> std::borrow::Cow<'_, str> {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes)
}

async fn kill_and_reap(child: &mut Child) {
    // kill() also waits for the child, so nothing is left as a zombie
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill assistant process");
    }
}

fn process_exit(status: std::process::ExitStatus, pid: Option<u32>, started: Instant) -> ProcessExit {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    ProcessExit {
        code: status.code(),
        signal,
        pid,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}
