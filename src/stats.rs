//! Stats aggregation
//!
//! Once per tick the aggregator walks the live sessions, estimates
//! per-session throughput from the change in downloaded bytes since
//! the previous tick, and folds everything into one engine-wide
//! snapshot.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::session::{DownloadSession, SessionId, SessionState};

/// Engine-wide statistics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    /// Sessions currently in the Downloading state
    pub active_count: usize,
    /// Sessions currently paused
    pub paused_count: usize,
    /// Sessions waiting in the start queue
    pub queued_count: usize,
    /// All live sessions
    pub total_count: usize,
    /// Sum of per-session download throughput estimates, bytes/sec
    pub download_speed: u64,
    /// Upload throughput, bytes/sec (always 0 for the simulation)
    pub upload_speed: u64,
    /// Sum of downloaded bytes across all sessions
    pub downloaded_bytes: u64,
    /// Uploaded bytes (always 0 for the simulation)
    pub uploaded_bytes: u64,
    /// Seconds since the engine started ticking
    pub seconds_active: u64,
}

/// Computes throughput deltas between ticks
#[derive(Debug)]
pub struct StatsAggregator {
    tick_interval_ms: u64,
    started: Instant,
    last_downloaded: Mutex<HashMap<SessionId, u64>>,
    latest: Mutex<SessionStats>,
}

impl StatsAggregator {
    /// Create an aggregator for the given tick cadence
    pub fn new(tick_interval_ms: u64) -> Self {
        Self {
            tick_interval_ms: tick_interval_ms.max(1),
            started: Instant::now(),
            last_downloaded: Mutex::new(HashMap::new()),
            latest: Mutex::new(SessionStats::default()),
        }
    }

    /// Fold the current session set into a new snapshot
    ///
    /// Writes each session's throughput estimate back onto the session
    /// and retires snapshot entries for sessions that no longer exist.
    pub fn observe(&self, sessions: &[Arc<DownloadSession>], queued_count: usize) -> SessionStats {
        let mut snapshot = self.last_downloaded.lock();
        let mut stats = SessionStats {
            queued_count,
            total_count: sessions.len(),
            seconds_active: self.started.elapsed().as_secs(),
            ..SessionStats::default()
        };

        let mut seen: HashMap<SessionId, u64> = HashMap::with_capacity(sessions.len());
        for session in sessions {
            let downloaded = session.downloaded();
            let prev = snapshot.get(&session.id).copied().unwrap_or(downloaded);
            // Negative deltas (re-added sessions) clamp to zero
            let delta = downloaded.saturating_sub(prev);
            // Widen before scaling; huge deltas with a sub-second tick
            // would otherwise wrap
            let speed = (delta as u128 * 1000 / self.tick_interval_ms as u128)
                .min(u64::MAX as u128) as u64;
            session.set_download_speed(speed);
            seen.insert(session.id, downloaded);

            match session.state() {
                SessionState::Downloading => stats.active_count += 1,
                SessionState::Paused => stats.paused_count += 1,
                _ => {}
            }
            stats.download_speed = stats.download_speed.saturating_add(speed);
            stats.downloaded_bytes = stats.downloaded_bytes.saturating_add(downloaded);
        }
        *snapshot = seen;

        *self.latest.lock() = stats.clone();
        stats
    }

    /// Most recent snapshot without recomputing deltas
    pub fn latest(&self) -> SessionStats {
        self.latest.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metainfo::{FileEntry, Metainfo, Piece};
    use crate::session::TransferSettings;
    use std::path::PathBuf;

    fn test_session(tag: u8) -> Arc<DownloadSession> {
        let mut info_hash = [0u8; 20];
        info_hash[0] = tag;
        let metainfo = Metainfo {
            info_hash,
            name: format!("t{}", tag),
            piece_length: 32768,
            pieces: vec![Piece {
                index: 0,
                size: 1000,
                hash: [0u8; 20],
                downloaded: false,
            }],
            files: vec![FileEntry {
                path: format!("t{}", tag),
                length: 1000,
                offset: 0,
                selected: true,
            }],
            total_size: 1000,
            is_single_file: true,
        };
        Arc::new(DownloadSession::new(
            metainfo,
            TransferSettings::default(),
            PathBuf::from("/tmp"),
        ))
    }

    #[test]
    fn test_speed_from_delta() {
        let aggregator = StatsAggregator::new(1000);
        let session = test_session(1);
        session.set_state(SessionState::Downloading);
        let sessions = vec![session.clone()];

        // First observation establishes the baseline
        let stats = aggregator.observe(&sessions, 0);
        assert_eq!(stats.download_speed, 0);

        session.set_downloaded(500);
        let stats = aggregator.observe(&sessions, 0);
        assert_eq!(stats.download_speed, 500);
        assert_eq!(session.download_speed(), 500);
        assert_eq!(stats.downloaded_bytes, 500);
    }

    #[test]
    fn test_negative_delta_clamps_to_zero() {
        let aggregator = StatsAggregator::new(1000);
        let session = test_session(1);
        let sessions = vec![session.clone()];

        session.set_downloaded(800);
        aggregator.observe(&sessions, 0);
        session.set_downloaded(100);
        let stats = aggregator.observe(&sessions, 0);
        assert_eq!(stats.download_speed, 0);
    }

    #[test]
    fn test_huge_delta_does_not_wrap() {
        let aggregator = StatsAggregator::new(1);
        let session = test_session(1);
        let sessions = vec![session.clone()];

        aggregator.observe(&sessions, 0);
        session.set_downloaded(u64::MAX);
        let stats = aggregator.observe(&sessions, 0);
        assert_eq!(stats.download_speed, u64::MAX);
    }

    #[test]
    fn test_state_counts() {
        let aggregator = StatsAggregator::new(1000);
        let downloading = test_session(1);
        downloading.set_state(SessionState::Downloading);
        let paused = test_session(2);
        paused.set_state(SessionState::Paused);
        let idle = test_session(3);

        let stats = aggregator.observe(&[downloading, paused, idle], 2);
        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.paused_count, 1);
        assert_eq!(stats.queued_count, 2);
        assert_eq!(stats.total_count, 3);
    }

    #[test]
    fn test_snapshot_retires_removed_sessions() {
        let aggregator = StatsAggregator::new(1000);
        let session = test_session(1);
        session.set_downloaded(400);
        aggregator.observe(&[session], 0);

        // Session gone; the map forgets it
        aggregator.observe(&[], 0);
        assert!(aggregator.last_downloaded.lock().is_empty());
    }
}
