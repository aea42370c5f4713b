//! Sidecar process lifecycle.

use std::{collections::VecDeque, path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::Mutex,
};
use tracing::{debug, info, warn};

use relay_core::{errors::Error, Result};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;

/// How to launch the sidecar.
#[derive(Clone, Debug)]
pub struct SidecarConfig {
    pub command: PathBuf,
    pub args: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    pub(crate) fn push_line(&mut self, line: String) {
        // +1 for the '\n' we join with later.
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            let Some(front) = self.lines.pop_front() else {
                break;
            };
            self.bytes = self.bytes.saturating_sub(front.len() + 1);
        }
    }

    pub(crate) fn snapshot(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// A running sidecar with its pipes split out.
pub struct Sidecar {
    pub(crate) child: Child,
    pub(crate) stdin: ChildStdin,
    pub(crate) stdout: ChildStdout,
    pub(crate) stderr_tail: Arc<Mutex<StderrTail>>,
}

/// Spawn the sidecar and start draining its stderr.
pub fn spawn_sidecar(cfg: &SidecarConfig) -> Result<Sidecar> {
    let mut cmd = Command::new(&cfg.command);
    cmd.args(&cfg.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        Error::Bridge(format!(
            "failed to start sidecar {}: {e}",
            cfg.command.display()
        ))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Bridge("sidecar stdin was not captured".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Bridge("sidecar stdout was not captured".to_string()))?;

    // Drain stderr in background to avoid blocking on a full pipe.
    let stderr_tail = Arc::new(Mutex::new(StderrTail::default()));
    if let Some(stderr) = child.stderr.take() {
        let tail = stderr_tail.clone();
        tokio::spawn(async move {
            let mut r = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = r.next_line().await {
                debug!(target: "relay_bridge::sidecar", "{line}");
                tail.lock().await.push_line(line);
            }
        });
    }

    info!(command = %cfg.command.display(), pid = ?child.id(), "sidecar started");
    Ok(Sidecar {
        child,
        stdin,
        stdout,
        stderr_tail,
    })
}

/// Wait for the sidecar to exit, killing it once `grace` runs out.
pub(crate) async fn reap(mut child: Child, grace: Duration) -> Result<()> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(%status, "sidecar exited");
        }
        Ok(Err(e)) => {
            warn!(error = %e, "error waiting for sidecar");
        }
        Err(_) => {
            warn!("sidecar did not exit gracefully, killing");
            child.kill().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_tail_keeps_the_newest_lines() {
        let mut tail = StderrTail::default();
        for i in 0..(STDERR_TAIL_MAX_LINES + 5) {
            tail.push_line(format!("line {i}"));
        }
        let snap = tail.snapshot();
        assert!(!snap.contains("line 0\n"));
        assert!(snap.ends_with(&format!("line {}", STDERR_TAIL_MAX_LINES + 4)));
        assert_eq!(snap.lines().count(), STDERR_TAIL_MAX_LINES);
    }
}
