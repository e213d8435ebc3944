//! Session types
//!
//! A session is one torrent being driven through its lifecycle. The
//! shared state lives behind locks and atomics so the engine, the
//! transfer task, and the aggregator can observe it concurrently.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::metainfo::{FileEntry, Metainfo, Sha1Hash};

/// Unique identifier for a session
///
/// Derived from the info-hash, so the same torrent always maps to the
/// same id. Renders as a 16-char hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId([u8; 8]);

impl SessionId {
    /// Derive from an info-hash (first 8 bytes)
    pub fn from_info_hash(hash: &Sha1Hash) -> Self {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash[0..8]);
        Self(bytes)
    }

    /// Parse from the 16-char hex string form
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 16 {
            return None;
        }
        let decoded = hex::decode(s).ok()?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&decoded);
        Some(Self(bytes))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for SessionId {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Self::from_hex(&s).ok_or_else(|| format!("Invalid session id: {}", s))
    }
}

/// Current state of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SessionState {
    /// Created but not yet asked to start
    Idle,
    /// Waiting in the start queue
    Queued,
    /// Transfer task is advancing
    Downloading,
    /// Admitted but not advancing
    Paused,
    /// Stopped by the user; can be re-queued
    Stopped,
    /// All steps done, artifacts written
    Completed,
    /// Terminal failure
    Failed { message: String },
}

impl SessionState {
    /// Check if the session holds an admission slot
    pub fn is_downloading(&self) -> bool {
        matches!(self, Self::Downloading)
    }

    /// Check if the session has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Queued => write!(f, "queued"),
            Self::Downloading => write!(f, "downloading"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
            Self::Completed => write!(f, "completed"),
            Self::Failed { .. } => write!(f, "failed"),
        }
    }
}

/// Per-session transfer settings
///
/// Carried on the session and overwritten by re-adds or explicit
/// updates; the simulation does not act on them but they survive for
/// the day a real driver does.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Download speed limit in bytes/sec (None = unlimited)
    pub download_limit: Option<u64>,
    /// Upload speed limit in bytes/sec (None = unlimited)
    pub upload_limit: Option<u64>,
    /// Maximum peers
    pub max_peers: Option<u32>,
    /// Maximum connections
    pub max_connections: Option<u32>,
    /// Stop seeding once this share ratio is reached (None = seed forever)
    pub seed_ratio_limit: Option<f64>,
}

/// Shared state for one download session
#[derive(Debug)]
pub struct DownloadSession {
    /// Content-derived identifier
    pub id: SessionId,
    /// Parsed torrent metadata (immutable after creation)
    pub metainfo: Metainfo,
    state: RwLock<SessionState>,
    settings: RwLock<TransferSettings>,
    /// Mutable copy of the file layout, for selection updates
    files: RwLock<Vec<FileEntry>>,
    downloaded: AtomicU64,
    download_speed: AtomicU64,
    /// 1-based position in the start queue, 0 when not queued
    queue_position: AtomicUsize,
    download_dir: RwLock<PathBuf>,
    created_at: DateTime<Utc>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    completed_at: RwLock<Option<DateTime<Utc>>>,
}

impl DownloadSession {
    /// Create a new idle session
    pub fn new(metainfo: Metainfo, settings: TransferSettings, download_dir: PathBuf) -> Self {
        let id = SessionId::from_info_hash(&metainfo.info_hash);
        let files = metainfo.files.clone();
        Self {
            id,
            metainfo,
            state: RwLock::new(SessionState::Idle),
            settings: RwLock::new(settings),
            files: RwLock::new(files),
            downloaded: AtomicU64::new(0),
            download_speed: AtomicU64::new(0),
            queue_position: AtomicUsize::new(0),
            download_dir: RwLock::new(download_dir),
            created_at: Utc::now(),
            started_at: RwLock::new(None),
            completed_at: RwLock::new(None),
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Replace the state unconditionally, returning the previous one
    pub fn set_state(&self, new: SessionState) -> SessionState {
        std::mem::replace(&mut *self.state.write(), new)
    }

    /// Replace the state only if it currently equals `expected`
    ///
    /// The transfer task uses this at step boundaries so it never
    /// overwrites a pause or stop that raced in.
    pub fn set_state_if(&self, expected: &SessionState, new: SessionState) -> bool {
        let mut state = self.state.write();
        if *state == *expected {
            *state = new;
            true
        } else {
            false
        }
    }

    /// Bytes downloaded so far
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Record transfer progress
    pub fn set_downloaded(&self, bytes: u64) {
        self.downloaded.store(bytes, Ordering::Relaxed);
    }

    /// Most recent throughput estimate in bytes/sec
    pub fn download_speed(&self) -> u64 {
        self.download_speed.load(Ordering::Relaxed)
    }

    /// Record a throughput estimate (written by the aggregator)
    pub fn set_download_speed(&self, bytes_per_sec: u64) {
        self.download_speed.store(bytes_per_sec, Ordering::Relaxed);
    }

    /// Progress percentage (0.0 - 100.0)
    pub fn progress(&self) -> f64 {
        let total = self.metainfo.total_size;
        if total == 0 {
            // Empty torrents are trivially complete once driven
            return if self.state().is_terminal() { 100.0 } else { 0.0 };
        }
        (self.downloaded() as f64 / total as f64) * 100.0
    }

    /// 1-based queue position, None when not waiting
    pub fn queue_position(&self) -> Option<usize> {
        match self.queue_position.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    /// Set the queue position (0 clears it)
    pub fn set_queue_position(&self, position: usize) {
        self.queue_position.store(position, Ordering::Relaxed);
    }

    /// Current settings snapshot
    pub fn settings(&self) -> TransferSettings {
        self.settings.read().clone()
    }

    /// Overwrite the settings
    pub fn set_settings(&self, settings: TransferSettings) {
        *self.settings.write() = settings;
    }

    /// Current file layout snapshot
    pub fn files(&self) -> Vec<FileEntry> {
        self.files.read().clone()
    }

    /// Update the selected flag for the given file indices
    ///
    /// Indices out of range are ignored.
    pub fn set_file_selection(&self, selection: &[(usize, bool)]) {
        let mut files = self.files.write();
        for &(index, selected) in selection {
            if let Some(file) = files.get_mut(index) {
                file.selected = selected;
            }
        }
    }

    /// Directory this session materializes into
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.read().clone()
    }

    /// Change the target directory (affects future materialization)
    pub fn set_download_dir(&self, dir: PathBuf) {
        *self.download_dir.write() = dir;
    }

    /// Mark the start of a transfer attempt
    pub fn mark_started(&self) {
        *self.started_at.write() = Some(Utc::now());
    }

    /// Mark completion time
    pub fn mark_completed(&self) {
        *self.completed_at.write() = Some(Utc::now());
    }

    /// Seconds since the transfer started, 0 if it never did
    pub fn seconds_active(&self) -> u64 {
        self.started_at
            .read()
            .map(|t| (Utc::now() - t).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }

    /// Take a point-in-time status snapshot
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            id: self.id,
            name: self.metainfo.name.clone(),
            state: self.state(),
            progress: self.progress(),
            total_size: self.metainfo.total_size,
            downloaded: self.downloaded(),
            download_speed: self.download_speed(),
            queue_position: self.queue_position(),
            download_dir: self.download_dir(),
            files: self.files(),
            settings: self.settings(),
            created_at: self.created_at,
            started_at: *self.started_at.read(),
            completed_at: *self.completed_at.read(),
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Unique identifier
    pub id: SessionId,
    /// Display name
    pub name: String,
    /// Current state
    pub state: SessionState,
    /// Progress percentage (0.0 - 100.0)
    pub progress: f64,
    /// Total size in bytes
    pub total_size: u64,
    /// Bytes downloaded so far
    pub downloaded: u64,
    /// Current download speed in bytes/sec
    pub download_speed: u64,
    /// 1-based queue position, None when not waiting
    pub queue_position: Option<usize>,
    /// Target directory
    pub download_dir: PathBuf,
    /// File layout with selection flags
    pub files: Vec<FileEntry>,
    /// Carried settings
    pub settings: TransferSettings,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the transfer last started
    pub started_at: Option<DateTime<Utc>>,
    /// When the transfer completed
    pub completed_at: Option<DateTime<Utc>>,
}

/// Events emitted by the session engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Session was added
    Added { id: SessionId },
    /// Transfer task started advancing
    Started { id: SessionId },
    /// Progress update
    Progress {
        id: SessionId,
        downloaded: u64,
        total: u64,
    },
    /// State changed
    StateChanged {
        id: SessionId,
        old_state: SessionState,
        new_state: SessionState,
    },
    /// Session was paused
    Paused { id: SessionId },
    /// Session was resumed
    Resumed { id: SessionId },
    /// Transfer completed and artifacts were written
    Completed { id: SessionId },
    /// Transfer failed
    Failed { id: SessionId, error: String },
    /// Session was removed
    Removed { id: SessionId },
}
