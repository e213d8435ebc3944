//! Watch-directory ingestion
//!
//! Each tick the engine scans the configured directory for `.torrent`
//! files, hands their bytes to an ingest callback, and marks processed
//! files so they are not picked up again. A bad file never aborts the
//! scan; it is logged and left in place.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::WatchConfig;
use crate::error::Result;
use crate::session::SessionId;

/// Suffix appended to processed files when they are not deleted
const PROCESSED_SUFFIX: &str = ".added";

/// Scan the watch directory once
///
/// `ingest` receives the source path, the file bytes, and the file
/// stem (used as the fallback torrent name). Files it accepts are
/// deleted or renamed per the config; files it rejects stay put.
/// Returns the ids of the sessions ingested this scan.
pub async fn scan_once<F>(config: &WatchConfig, mut ingest: F) -> Vec<SessionId>
where
    F: FnMut(&Path, &[u8], &str) -> Result<SessionId>,
{
    let Some(dir) = config.dir.as_deref() else {
        return Vec::new();
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = ?dir, error = %e, "Watch directory scan failed");
            return Vec::new();
        }
    };

    let mut ingested = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = ?dir, error = %e, "Watch directory read failed");
                break;
            }
        };

        let path = entry.path();
        if !has_torrent_suffix(&path) {
            continue;
        }
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read watched file");
                continue;
            }
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());

        match ingest(&path, &data, &stem) {
            Ok(id) => {
                debug!(id = %id, path = ?path, "Ingested torrent from watch directory");
                ingested.push(id);
                if let Err(e) = mark_processed(&path, config.trash_original).await {
                    warn!(path = ?path, error = %e, "Failed to mark watched file processed");
                }
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to ingest watched file");
            }
        }
    }

    ingested
}

fn has_torrent_suffix(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(".torrent"))
}

/// Delete the source file or rename it to `<file>.added`
async fn mark_processed(path: &Path, trash: bool) -> std::io::Result<()> {
    if trash {
        tokio::fs::remove_file(path).await
    } else {
        let mut renamed = OsString::from(path.as_os_str());
        renamed.push(PROCESSED_SUFFIX);
        tokio::fs::rename(path, PathBuf::from(renamed)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use tempfile::tempdir;

    fn watch_config(dir: &Path, trash: bool) -> WatchConfig {
        WatchConfig {
            enabled: true,
            dir: Some(dir.to_path_buf()),
            start_added: true,
            trash_original: trash,
        }
    }

    fn fake_id(tag: u8) -> SessionId {
        let mut hash = [0u8; 20];
        hash[0] = tag;
        SessionId::from_info_hash(&hash)
    }

    #[tokio::test]
    async fn test_scan_renames_processed_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.torrent"), b"data").unwrap();

        let config = watch_config(dir.path(), false);
        let ingested = scan_once(&config, |_, _, _| Ok(fake_id(1))).await;

        assert_eq!(ingested, vec![fake_id(1)]);
        assert!(!dir.path().join("a.torrent").exists());
        assert!(dir.path().join("a.torrent.added").exists());
    }

    #[tokio::test]
    async fn test_scan_deletes_when_trashing() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.torrent"), b"data").unwrap();

        let config = watch_config(dir.path(), true);
        scan_once(&config, |_, _, _| Ok(fake_id(1))).await;

        assert!(!dir.path().join("a.torrent").exists());
        assert!(!dir.path().join("a.torrent.added").exists());
    }

    #[tokio::test]
    async fn test_scan_skips_non_torrent_and_processed_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("done.torrent.added"), b"x").unwrap();
        // A directory with the suffix is not a candidate
        std::fs::create_dir(dir.path().join("nested.torrent")).unwrap();

        let config = watch_config(dir.path(), false);
        let mut calls = 0;
        scan_once(&config, |_, _, _| {
            calls += 1;
            Ok(fake_id(1))
        })
        .await;

        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_failed_ingest_leaves_file_and_continues() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bad.torrent"), b"junk").unwrap();
        std::fs::write(dir.path().join("good.torrent"), b"data").unwrap();

        let config = watch_config(dir.path(), false);
        let ingested = scan_once(&config, |path, _, _| {
            if path.file_name().and_then(|n| n.to_str()) == Some("bad.torrent") {
                Err(EngineError::ingest(path, "unparseable"))
            } else {
                Ok(fake_id(2))
            }
        })
        .await;

        assert_eq!(ingested, vec![fake_id(2)]);
        // The bad file stays for the next scan
        assert!(dir.path().join("bad.torrent").exists());
        assert!(dir.path().join("good.torrent.added").exists());
    }

    #[tokio::test]
    async fn test_missing_dir_is_not_fatal() {
        let config = WatchConfig {
            enabled: true,
            dir: Some(PathBuf::from("/nonexistent/watch/dir")),
            start_added: true,
            trash_original: false,
        };
        let ingested = scan_once(&config, |_, _, _| Ok(fake_id(1))).await;
        assert!(ingested.is_empty());
    }

    #[tokio::test]
    async fn test_passes_file_stem_as_fallback_name() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ubuntu-22.04.torrent"), b"data").unwrap();

        let config = watch_config(dir.path(), false);
        let mut seen_stem = String::new();
        scan_once(&config, |_, _, stem| {
            seen_stem = stem.to_string();
            Ok(fake_id(3))
        })
        .await;

        assert_eq!(seen_stem, "ubuntu-22.04");
    }
}
