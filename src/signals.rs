//! Interrupt handling.
//!
//! SIGINT/SIGTERM (Ctrl+C on Windows) cancel the run's
//! [`CancellationToken`]. The process manager reacts by killing the
//! in-flight assistant; the loop then stops without starting another
//! iteration.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;

/// Wait for the first termination signal.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, stopping run");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, stopping run");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, stopping run");
    }

    Ok(())
}

/// Cancel `token` when a termination signal arrives.
///
/// The listener also exits quietly once the token is cancelled elsewhere.
pub fn cancel_on_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = wait_for_shutdown_signal() => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to install signal handlers");
                    return;
                }
                token.cancel();
            }
            () = token.cancelled() => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_listener_exits_when_token_cancelled() {
        let token = CancellationToken::new();
        let handle = cancel_on_signal(token.clone());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener should stop")
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_cancels_token() {
        let token = CancellationToken::new();
        let _handle = cancel_on_signal(token.clone());
        // Give the listener time to install its handlers
        tokio::time::sleep(Duration::from_millis(50)).await;

        let pid = std::process::id().to_string();
        let status = std::process::Command::new("kill")
            .args(["-TERM", &pid])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(2), token.cancelled())
            .await
            .expect("token should be cancelled by SIGTERM");
    }
}
