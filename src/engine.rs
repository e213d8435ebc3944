//! Session engine - main coordinator
//!
//! The `SessionEngine` is the primary entry point for the library. It
//! owns the registry, the start queue, the transfer driver, and the
//! aggregator task, and emits events for every observable transition.

use crate::config::EngineConfig;
use crate::driver::{self, SimulatedTransfer, TransferDriver, TransferOutcome};
use crate::error::{EngineError, Result};
use crate::metainfo::Metainfo;
use crate::queue::StartQueue;
use crate::registry::SessionRegistry;
use crate::session::{
    DownloadSession, SessionEvent, SessionId, SessionState, SessionStatus, TransferSettings,
};
use crate::stats::{SessionStats, StatsAggregator};
use crate::watch;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Maximum number of events to buffer
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Options for adding a new torrent session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddTorrentOptions {
    /// Transfer settings to carry on the session
    #[serde(default)]
    pub settings: TransferSettings,
    /// Per-session download directory override
    pub download_dir: Option<PathBuf>,
    /// Name to use when the info dict has none
    pub fallback_name: Option<String>,
    /// Enqueue for download immediately after adding
    #[serde(default)]
    pub start: bool,
}

/// The main session engine
pub struct SessionEngine {
    /// Configuration
    config: RwLock<EngineConfig>,

    /// All live sessions
    registry: SessionRegistry,

    /// Sessions waiting for an admission slot
    queue: StartQueue,

    /// Transfer driver (simulated by default)
    driver: Arc<dyn TransferDriver>,

    /// Throughput and count aggregation
    stats: StatsAggregator,

    /// Event broadcaster
    event_tx: broadcast::Sender<SessionEvent>,

    /// Shutdown flag
    shutdown: CancellationToken,
}

impl SessionEngine {
    /// Create a new engine with the given configuration
    ///
    /// Starts the aggregator task, which drives admission, stats, and
    /// watch-directory scanning at the configured cadence.
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let driver: Arc<dyn TransferDriver> = Arc::new(SimulatedTransfer::new(&config));
        let stats = StatsAggregator::new(config.tick_interval_ms);

        let engine = Arc::new(Self {
            config: RwLock::new(config),
            registry: SessionRegistry::new(),
            queue: StartQueue::new(),
            driver,
            stats,
            event_tx,
            shutdown: CancellationToken::new(),
        });

        Self::start_aggregator_task(&engine);

        Ok(engine)
    }

    /// Start the background task that ticks the engine periodically.
    ///
    /// Holds only a weak reference so dropping the last external Arc
    /// ends the task.
    fn start_aggregator_task(engine: &Arc<Self>) {
        let weak = Arc::downgrade(engine);
        let shutdown = engine.shutdown.clone();
        let interval_ms = engine.config.read().tick_interval_ms;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(engine) = weak.upgrade() else { break };
                        engine.tick().await;
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    /// Run one aggregator pass: admission, stats, watch scan
    ///
    /// The background task calls this once per tick; tests can call it
    /// directly for deterministic scheduling.
    pub async fn tick(&self) {
        self.admit_queued();
        self.stats.observe(&self.registry.list(), self.queue.len());

        let watch_config = {
            let config = self.config.read();
            config.watch.enabled.then(|| config.watch.clone())
        };
        if let Some(watch_config) = watch_config {
            watch::scan_once(&watch_config, |path, data, stem| {
                self.ingest(path, data, stem, watch_config.start_added)
            })
            .await;
        }
    }

    /// Add a torrent session from .torrent file bytes
    ///
    /// Re-adding a torrent that already has a session overwrites its
    /// settings and returns the existing id.
    pub fn add_torrent(&self, data: &[u8], options: AddTorrentOptions) -> Result<SessionId> {
        let fallback = options.fallback_name.as_deref().unwrap_or("download");
        let metainfo = Metainfo::parse(data, fallback)?;
        let id = SessionId::from_info_hash(&metainfo.info_hash);

        if let Some(existing) = self.registry.get(id) {
            existing.set_settings(options.settings);
            if let Some(dir) = options.download_dir {
                existing.set_download_dir(dir);
            }
            if options.start {
                self.enqueue_start(id)?;
            }
            return Ok(id);
        }

        let download_dir = options
            .download_dir
            .unwrap_or_else(|| self.config.read().download_dir.clone());
        let session = Arc::new(DownloadSession::new(
            metainfo,
            options.settings,
            download_dir,
        ));
        info!(id = %id, name = %session.metainfo.name, "Added session");
        self.registry.insert(Arc::clone(&session));
        let _ = self.event_tx.send(SessionEvent::Added { id });

        if options.start {
            self.enqueue_start(id)?;
        }
        Ok(id)
    }

    /// Ask a session to start downloading
    ///
    /// The session joins the FIFO start queue; the next admission sweep
    /// promotes it if a slot is free. Returns `Ok(false)` when the
    /// session is already queued, running, or completed.
    pub fn enqueue_start(&self, id: SessionId) -> Result<bool> {
        let session = self.session(id)?;
        match session.state() {
            SessionState::Idle | SessionState::Stopped | SessionState::Failed { .. } => {
                self.queue.enqueue(id);
                self.update_state(&session, SessionState::Queued);
                self.recompute_queue_positions();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Pause a downloading session
    ///
    /// The transfer task observes the pause at its next step boundary
    /// and holds position without progress. Returns `Ok(false)` when
    /// the session is not downloading.
    pub fn pause(&self, id: SessionId) -> Result<bool> {
        let session = self.session(id)?;
        if session.set_state_if(&SessionState::Downloading, SessionState::Paused) {
            let _ = self.event_tx.send(SessionEvent::StateChanged {
                id,
                old_state: SessionState::Downloading,
                new_state: SessionState::Paused,
            });
            let _ = self.event_tx.send(SessionEvent::Paused { id });
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Resume a paused session
    ///
    /// Returns `Ok(false)` when the session is not paused.
    pub fn resume(&self, id: SessionId) -> Result<bool> {
        let session = self.session(id)?;
        if session.set_state_if(&SessionState::Paused, SessionState::Downloading) {
            let _ = self.event_tx.send(SessionEvent::StateChanged {
                id,
                old_state: SessionState::Paused,
                new_state: SessionState::Downloading,
            });
            let _ = self.event_tx.send(SessionEvent::Resumed { id });
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Stop a queued, downloading, or paused session
    ///
    /// A stopped session keeps its progress counters and can be
    /// re-enqueued later. Returns `Ok(false)` for other states.
    pub fn stop(&self, id: SessionId) -> Result<bool> {
        let session = self.session(id)?;
        // Compare-and-set so a completion that races in is not overwritten
        for from in [SessionState::Downloading, SessionState::Paused] {
            if session.set_state_if(&from, SessionState::Stopped) {
                let _ = self.event_tx.send(SessionEvent::StateChanged {
                    id,
                    old_state: from,
                    new_state: SessionState::Stopped,
                });
                return Ok(true);
            }
        }
        if session.set_state_if(&SessionState::Queued, SessionState::Stopped) {
            self.queue.remove(id);
            session.set_queue_position(0);
            let _ = self.event_tx.send(SessionEvent::StateChanged {
                id,
                old_state: SessionState::Queued,
                new_state: SessionState::Stopped,
            });
            self.recompute_queue_positions();
            return Ok(true);
        }
        Ok(false)
    }

    /// Remove a session and delete its artifacts
    ///
    /// A running transfer is interrupted at its next step boundary.
    /// Artifact deletion is best-effort.
    pub async fn remove(&self, id: SessionId) -> Result<()> {
        let session = self
            .registry
            .remove(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        self.queue.remove(id);
        session.set_queue_position(0);
        if !session.state().is_terminal() {
            session.set_state(SessionState::Stopped);
        }
        self.recompute_queue_positions();

        let folder = driver::artifact_folder(&session);
        if folder.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&folder).await {
                warn!(id = %id, folder = ?folder, error = %e, "Failed to delete artifacts");
            }
        }

        info!(id = %id, "Removed session");
        let _ = self.event_tx.send(SessionEvent::Removed { id });
        Ok(())
    }

    /// Overwrite a session's transfer settings
    pub fn update_settings(&self, id: SessionId, settings: TransferSettings) -> Result<()> {
        self.session(id)?.set_settings(settings);
        Ok(())
    }

    /// Update which files a session materializes on completion
    pub fn set_file_selection(&self, id: SessionId, selection: &[(usize, bool)]) -> Result<()> {
        self.session(id)?.set_file_selection(selection);
        Ok(())
    }

    /// Get the status of a session
    pub fn status(&self, id: SessionId) -> Option<SessionStatus> {
        self.registry.get(id).map(|s| s.status())
    }

    /// List all sessions
    pub fn list(&self) -> Vec<SessionStatus> {
        self.registry.list().iter().map(|s| s.status()).collect()
    }

    /// Most recent engine-wide statistics snapshot
    pub fn stats(&self) -> SessionStats {
        self.stats.latest()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Current admission limit
    pub fn max_active_downloads(&self) -> usize {
        self.config.read().max_active_downloads
    }

    /// Change the admission limit, clamped to at least 1
    ///
    /// A lowered limit does not interrupt running sessions; it only
    /// throttles future admissions.
    pub fn set_max_active_downloads(&self, max: usize) {
        self.config.write().max_active_downloads = max.max(1);
    }

    /// Default directory for new sessions
    pub fn download_dir(&self) -> PathBuf {
        self.config.read().download_dir.clone()
    }

    /// Change the default directory for new sessions
    pub fn set_download_dir(&self, dir: impl Into<PathBuf>) {
        self.config.write().download_dir = dir.into();
    }

    /// Graceful shutdown: stops the aggregator and interrupts all
    /// transfer tasks
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn session(&self, id: SessionId) -> Result<Arc<DownloadSession>> {
        self.registry
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    /// Ingest one watched torrent file
    fn ingest(&self, path: &std::path::Path, data: &[u8], stem: &str, start: bool) -> Result<SessionId> {
        let id = self
            .add_torrent(
                data,
                AddTorrentOptions {
                    fallback_name: Some(stem.to_string()),
                    start,
                    ..AddTorrentOptions::default()
                },
            )
            .map_err(|e| EngineError::ingest(path, e.to_string()))?;
        Ok(id)
    }

    /// Promote queued sessions while admission slots are free
    fn admit_queued(&self) {
        let max = self.config.read().max_active_downloads.max(1);
        let mut active = self
            .registry
            .list()
            .iter()
            .filter(|s| s.state().is_downloading())
            .count();

        while active < max {
            let Some(id) = self.queue.poll() else { break };
            let Some(session) = self.registry.get(id) else {
                continue;
            };
            // A stop or removal that raced the sweep wins
            if session.state() != SessionState::Queued {
                session.set_queue_position(0);
                continue;
            }
            self.spawn_transfer(session);
            active += 1;
        }

        self.recompute_queue_positions();
    }

    /// Move a session to Downloading and hand it to the driver
    fn spawn_transfer(&self, session: Arc<DownloadSession>) {
        session.set_queue_position(0);
        session.mark_started();
        self.update_state(&session, SessionState::Downloading);
        let _ = self.event_tx.send(SessionEvent::Started { id: session.id });

        let driver = Arc::clone(&self.driver);
        let events = self.event_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let id = session.id;
            match driver.run(Arc::clone(&session), events.clone(), shutdown).await {
                Ok(TransferOutcome::Completed { .. }) => {
                    // A pause or stop that raced the final step wins;
                    // the artifacts stay on disk either way
                    if session.set_state_if(&SessionState::Downloading, SessionState::Completed) {
                        session.mark_completed();
                        session.set_downloaded(session.metainfo.total_size);
                        let _ = events.send(SessionEvent::StateChanged {
                            id,
                            old_state: SessionState::Downloading,
                            new_state: SessionState::Completed,
                        });
                        let _ = events.send(SessionEvent::Completed { id });
                        info!(id = %id, "Session completed");
                    }
                }
                Ok(TransferOutcome::Interrupted) => {}
                Err(e) => {
                    let message = e.to_string();
                    let old_state = session.set_state(SessionState::Failed {
                        message: message.clone(),
                    });
                    let _ = events.send(SessionEvent::StateChanged {
                        id,
                        old_state,
                        new_state: SessionState::Failed {
                            message: message.clone(),
                        },
                    });
                    let _ = events.send(SessionEvent::Failed { id, error: message });
                    warn!(id = %id, error = %e, "Session failed");
                }
            }
        });
    }

    /// Refresh the 1-based positions shown on queued sessions
    fn recompute_queue_positions(&self) {
        for (i, id) in self.queue.snapshot().into_iter().enumerate() {
            if let Some(session) = self.registry.get(id) {
                session.set_queue_position(i + 1);
            }
        }
    }

    /// Helper to change a session's state and emit the transition
    fn update_state(&self, session: &DownloadSession, new_state: SessionState) {
        let old_state = session.set_state(new_state.clone());
        if old_state != new_state {
            let _ = self.event_tx.send(SessionEvent::StateChanged {
                id: session.id,
                old_state,
                new_state,
            });
        }
    }
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        // Signal shutdown on drop
        self.shutdown.cancel();
    }
}
