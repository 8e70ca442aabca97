//! Background worker transport for bundle extensions.
//!
//! The worker runtime is a separate process that loads the bundle and speaks
//! newline-delimited JSON-RPC on stdin/stdout. Communication is message passing
//! only. The process never outlives its stdout: once the stream ends the
//! transport reports `Closed`, and a worker that hasn't exited within
//! [`EXIT_GRACE`] is killed.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::error::ConnectError;
use super::transport::{Transport, TransportEvent};
use crate::config::WorkerConfig;

/// How long a worker may keep running after its stdout closed.
pub const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Start a worker for `bundle_url`.
pub async fn spawn(config: &WorkerConfig, bundle_url: &str) -> Result<Transport, ConnectError> {
    let mut child = Command::new(&config.command)
        .args(&config.args)
        .arg(bundle_url)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ConnectError::Spawn {
            command: config.command.clone(),
            source,
        })?;

    let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(ConnectError::Io(std::io::Error::other(
            "worker stdio not captured",
        )));
    };
    tracing::debug!(command = %config.command, bundle = bundle_url, pid = ?child.id(), "Worker started");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                outgoing = out_rx.recv() => match outgoing {
                    Some(mut frame) => {
                        frame.push('\n');
                        if let Err(e) = stdin.write_all(frame.as_bytes()).await {
                            let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                            break;
                        }
                    }
                    // Transport dropped; `child` is killed on drop below.
                    None => return,
                },
                line = lines.next_line() => match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => {
                        if in_tx.send(TransportEvent::Message(line)).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                },
            }
        }
        let _ = in_tx.send(TransportEvent::Closed);

        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "Worker exited"),
            Ok(Err(e)) => tracing::warn!("Failed to wait for worker: {}", e),
            Err(_) => {
                tracing::warn!(pid = ?child.id(), "Worker still running after its output closed, killing it");
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill worker: {}", e);
                }
            }
        }
    });

    Ok(Transport::new(out_tx, in_rx))
}
