//! # seedling
//!
//! A torrent download-session engine with a simulated transfer backend.
//!
//! ## Features
//!
//! - **Bencode**: Full decoder and canonical encoder for .torrent files
//! - **Metainfo**: Single- and multi-file torrent parsing with info-hash
//!   derived session identity
//! - **Lifecycle**: Queue, pause, resume, stop, and remove sessions with
//!   FIFO admission control
//! - **Simulated transfers**: Deterministic stepped progress that
//!   materializes placeholder artifacts on disk
//! - **Watch directory**: Periodic ingestion of dropped .torrent files
//! - **Async**: Built on Tokio; every observable transition is broadcast
//!   as an event
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use seedling::{AddTorrentOptions, EngineConfig, SessionEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Create engine with default config
//!     let config = EngineConfig::default();
//!     let engine = SessionEngine::new(config)?;
//!
//!     // Add a torrent and queue it for download
//!     let data = std::fs::read("example.torrent")?;
//!     let id = engine.add_torrent(
//!         &data,
//!         AddTorrentOptions {
//!             start: true,
//!             ..AddTorrentOptions::default()
//!         },
//!     )?;
//!     println!("session {}", id);
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//!
//!     Ok(())
//! }
//! ```

// Modules
pub mod bencode;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod metainfo;
pub mod queue;
pub mod registry;
pub mod session;
pub mod stats;
pub mod watch;

// Re-exports for convenience
pub use config::{EngineConfig, WatchConfig};
pub use engine::{AddTorrentOptions, SessionEngine};
pub use error::{EngineError, MetadataErrorKind, ParseErrorKind, Result};
pub use session::{
    DownloadSession, SessionEvent, SessionId, SessionState, SessionStatus, TransferSettings,
};

// Codec and metadata exports
pub use bencode::BencodeValue;
pub use metainfo::{FileEntry, Metainfo, Piece, Sha1Hash};

// Driver exports
pub use driver::{SimulatedTransfer, TransferDriver, TransferOutcome};

// Stats exports
pub use stats::{SessionStats, StatsAggregator};
