//! Transfer driver
//!
//! The driver owns the hot loop of a session: advancing progress,
//! honoring pause and stop cooperatively, and materializing output
//! artifacts on completion. It sits behind a trait so a real
//! piece-exchange transfer can replace the simulation without touching
//! the registry, queue, or aggregator.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::session::{DownloadSession, SessionEvent, SessionState};

/// How a transfer came to rest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// All steps done, artifacts written under `folder`
    Completed { folder: PathBuf },
    /// A stop, removal, or shutdown interrupted the transfer
    Interrupted,
}

/// Drives a session from Downloading to rest
#[async_trait]
pub trait TransferDriver: Send + Sync {
    /// Run the transfer to completion or interruption
    ///
    /// The session must already be in the Downloading state. The driver
    /// observes state changes at step boundaries only: a pause holds
    /// the current step, a stop returns `Interrupted` without writing
    /// artifacts.
    async fn run(
        &self,
        session: Arc<DownloadSession>,
        events: broadcast::Sender<SessionEvent>,
        shutdown: CancellationToken,
    ) -> Result<TransferOutcome>;
}

/// Simulated transfer: fixed step count over the torrent's total size
///
/// No bytes cross a network. Each step advances `downloaded` by
/// total/steps and sleeps; on the final step the selected files are
/// written as zero-filled placeholders of their declared sizes.
#[derive(Debug, Clone)]
pub struct SimulatedTransfer {
    steps: u32,
    step_interval: Duration,
    pause_poll: Duration,
}

impl SimulatedTransfer {
    /// Build from the engine configuration
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            steps: config.transfer_steps.max(1),
            step_interval: Duration::from_millis(config.step_interval_ms),
            pause_poll: Duration::from_millis(config.pause_poll_interval_ms),
        }
    }

    /// Write the session's selected files under its artifact folder
    async fn materialize(&self, session: &DownloadSession) -> Result<PathBuf> {
        let folder = artifact_folder(session);
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|e| EngineError::artifact(&folder, e.to_string()))?;

        if session.metainfo.is_single_file {
            let path = unique_path(folder.join(&session.metainfo.name));
            write_placeholder(&path, session.metainfo.total_size)
                .await
                .map_err(|e| EngineError::artifact(&path, e.to_string()))?;
        } else {
            for file in session.files() {
                if !file.selected {
                    continue;
                }
                let path = unique_path(folder.join(&file.path));
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| EngineError::artifact(parent, e.to_string()))?;
                }
                write_placeholder(&path, file.length)
                    .await
                    .map_err(|e| EngineError::artifact(&path, e.to_string()))?;
            }
        }

        info!(id = %session.id, folder = ?folder, "Materialized artifacts");
        Ok(folder)
    }
}

#[async_trait]
impl TransferDriver for SimulatedTransfer {
    async fn run(
        &self,
        session: Arc<DownloadSession>,
        events: broadcast::Sender<SessionEvent>,
        shutdown: CancellationToken,
    ) -> Result<TransferOutcome> {
        let total = session.metainfo.total_size;
        let steps = self.steps as u64;

        let mut step = 1u64;
        while step <= steps {
            if shutdown.is_cancelled() {
                return Ok(TransferOutcome::Interrupted);
            }
            match session.state() {
                SessionState::Paused => {
                    // Hold the current step; no progress while paused
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(TransferOutcome::Interrupted),
                        _ = tokio::time::sleep(self.pause_poll) => {}
                    }
                    continue;
                }
                SessionState::Downloading => {}
                other => {
                    debug!(id = %session.id, state = %other, "Transfer interrupted");
                    return Ok(TransferOutcome::Interrupted);
                }
            }

            session.set_downloaded(step_bytes(total, step, steps));
            let _ = events.send(SessionEvent::Progress {
                id: session.id,
                downloaded: session.downloaded(),
                total,
            });

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(TransferOutcome::Interrupted),
                _ = tokio::time::sleep(self.step_interval) => {}
            }
            step += 1;
        }

        // A stop that raced the final sleep still wins
        if session.state() != SessionState::Downloading {
            return Ok(TransferOutcome::Interrupted);
        }

        let folder = self.materialize(&session).await?;
        Ok(TransferOutcome::Completed { folder })
    }
}

/// Bytes downloaded after `step` of `steps` equal steps
///
/// Widened to u128 so totals near u64::MAX do not wrap mid-transfer.
fn step_bytes(total: u64, step: u64, steps: u64) -> u64 {
    (total as u128 * step as u128 / steps as u128) as u64
}

/// Folder a session materializes into: `<sanitized-name>-<id>`
pub fn artifact_folder(session: &DownloadSession) -> PathBuf {
    let folder_name = format!("{}-{}", sanitize_name(&session.metainfo.name), session.id);
    session.download_dir().join(folder_name)
}

/// Replace filesystem-hostile characters with underscores
///
/// Empty or whitespace-only names fall back to "download".
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    let trimmed = sanitized.trim();
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Return a path that does not collide with an existing file
///
/// On collision, ` (N)` is inserted before the extension, counting up
/// from 1 until a free name is found.
pub fn unique_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let (base, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => (name[..dot].to_string(), name[dot..].to_string()),
        _ => (name, String::new()),
    };

    let mut i = 1;
    loop {
        let candidate = dir.join(format!("{} ({}){}", base, i, ext));
        if !candidate.exists() {
            return candidate;
        }
        i += 1;
    }
}

/// Stream zeros to disk without holding the whole file in memory
async fn write_placeholder(path: &Path, size: u64) -> std::io::Result<()> {
    const CHUNK: usize = 4 * 1024 * 1024;
    let mut file = tokio::fs::File::create(path).await?;
    if size > 0 {
        let buf = vec![0u8; CHUNK.min(size as usize)];
        let mut remaining = size;
        while remaining > 0 {
            let to_write = remaining.min(buf.len() as u64) as usize;
            file.write_all(&buf[..to_write]).await?;
            remaining -= to_write as u64;
        }
    }
    file.flush().await
}
