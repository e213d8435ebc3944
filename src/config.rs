//! Engine configuration
//!
//! This module contains all configuration options for the session engine.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the session engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory to save downloads
    pub download_dir: PathBuf,

    /// Maximum sessions in the Downloading state at once
    pub max_active_downloads: usize,

    /// Aggregator cadence in milliseconds (admission, stats, watch scan)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Number of progress steps for a simulated transfer
    #[serde(default = "default_transfer_steps")]
    pub transfer_steps: u32,

    /// Delay between simulated transfer steps in milliseconds
    #[serde(default = "default_step_interval_ms")]
    pub step_interval_ms: u64,

    /// Poll cadence while a session is paused, in milliseconds
    #[serde(default = "default_pause_poll_interval_ms")]
    pub pause_poll_interval_ms: u64,

    /// Watch-directory ingestion
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Watch-directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Enable periodic scanning
    #[serde(default)]
    pub enabled: bool,

    /// Directory to scan for .torrent files
    pub dir: Option<PathBuf>,

    /// Enqueue ingested sessions for download immediately
    #[serde(default = "default_true")]
    pub start_added: bool,

    /// Delete the source file after ingestion instead of renaming it
    /// to `<file>.added`
    #[serde(default)]
    pub trash_original: bool,
}

fn default_true() -> bool {
    true
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_transfer_steps() -> u32 {
    200
}

fn default_step_interval_ms() -> u64 {
    50
}

fn default_pause_poll_interval_ms() -> u64 {
    200
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            start_added: true,
            trash_original: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            max_active_downloads: 3,
            tick_interval_ms: 1000,
            transfer_steps: 200,
            step_interval_ms: 50,
            pause_poll_interval_ms: 200,
            watch: WatchConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the download directory
    pub fn download_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_dir = path.into();
        self
    }

    /// Set the admission limit
    pub fn max_active_downloads(mut self, max: usize) -> Self {
        self.max_active_downloads = max;
        self
    }

    /// Set the aggregator cadence
    pub fn tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    /// Set the simulated transfer step count
    pub fn transfer_steps(mut self, steps: u32) -> Self {
        self.transfer_steps = steps;
        self
    }

    /// Set the delay between transfer steps
    pub fn step_interval_ms(mut self, ms: u64) -> Self {
        self.step_interval_ms = ms;
        self
    }

    /// Set the paused poll cadence
    pub fn pause_poll_interval_ms(mut self, ms: u64) -> Self {
        self.pause_poll_interval_ms = ms;
        self
    }

    /// Enable watch-directory ingestion for the given directory
    pub fn watch_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.watch.enabled = true;
        self.watch.dir = Some(path.into());
        self
    }

    /// Set whether ingested sessions are enqueued immediately
    pub fn watch_start_added(mut self, start: bool) -> Self {
        self.watch.start_added = start;
        self
    }

    /// Set whether ingested source files are deleted instead of renamed
    pub fn watch_trash_original(mut self, trash: bool) -> Self {
        self.watch.trash_original = trash;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.download_dir.exists() {
            return Err(EngineError::invalid_input(
                "download_dir",
                format!("Directory does not exist: {:?}", self.download_dir),
            ));
        }

        if !self.download_dir.is_dir() {
            return Err(EngineError::invalid_input(
                "download_dir",
                format!("Path is not a directory: {:?}", self.download_dir),
            ));
        }

        if self.max_active_downloads == 0 {
            return Err(EngineError::invalid_input(
                "max_active_downloads",
                "Must be at least 1",
            ));
        }

        if self.transfer_steps == 0 {
            return Err(EngineError::invalid_input(
                "transfer_steps",
                "Must be at least 1",
            ));
        }

        if self.tick_interval_ms == 0 {
            return Err(EngineError::invalid_input(
                "tick_interval_ms",
                "Must be at least 1",
            ));
        }

        if self.watch.enabled && self.watch.dir.is_none() {
            return Err(EngineError::invalid_input(
                "watch.dir",
                "Watch scanning is enabled but no directory is set",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_active_downloads, 3);
        assert_eq!(config.transfer_steps, 200);
        assert_eq!(config.step_interval_ms, 50);
        assert!(!config.watch.enabled);
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .max_active_downloads(2)
            .transfer_steps(10)
            .step_interval_ms(1);

        assert_eq!(config.max_active_downloads, 2);
        assert_eq!(config.transfer_steps, 10);
        assert_eq!(config.step_interval_ms, 1);
    }

    #[test]
    fn test_config_validation() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::new().download_dir(dir.path());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_download_dir() {
        let config = EngineConfig::new().download_dir("/nonexistent/path/12345");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_watch_requires_dir() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig::new().download_dir(dir.path());
        config.watch.enabled = true;
        assert!(config.validate().is_err());

        let config = config.watch_dir(dir.path());
        assert!(config.validate().is_ok());
    }
}
