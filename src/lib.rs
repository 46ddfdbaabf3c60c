//! # vidqa
//!
//! Building blocks for a video question-and-answer page integration.
//!
//! ## Features
//!
//! - `BoundedCache`: fixed-capacity LRU with O(1) lookups, plus an async
//!   `FetchCache` front for transcript and suggestion fetches
//! - `CappedLog`: SQLite-backed question history that trims its oldest items
//!   in the same transaction that adds a new one
//! - `ObservationRegistry` and `ElementWatcher`: find-or-wait element watches
//!   over a mutation-observed document tree
//! - `PageSession`: per-page setup that survives DOM failures
//!
//! ## Quick start
//!
//! ```no_run
//! use vidqa::{AppConfig, CappedLog, FetchCaches, HistoryItem, TranscriptKey, VideoInfo};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::from_env()?;
//!     let history = CappedLog::open(&config.history_db, config.max_history_items)?;
//!     let caches: FetchCaches<String, Vec<String>> = FetchCaches::from_config(&config)?;
//!
//!     let key = TranscriptKey::new("dQw4w9WgXcQ", "en", false);
//!     let transcript = caches
//!         .transcripts
//!         .get_or_fetch(&key, || async { Ok("never gonna give you up".to_string()) })
//!         .await?;
//!
//!     let video = VideoInfo::new("dQw4w9WgXcQ", "Some talk");
//!     history
//!         .save_item(HistoryItem::now(video, format!("Summarise: {}", transcript)))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod dom;
pub mod error;
pub mod history;
pub mod observe;
pub mod page;

pub use cache::{BoundedCache, CacheStats, FetchCache, FetchCaches, TranscriptKey};
pub use config::AppConfig;
pub use dom::{Document, NodeId, Selector};
pub use error::{Result, VidqaError};
pub use history::{CappedLog, HistoryItem, HistoryPatch, VideoInfo};
pub use observe::{ElementWatcher, HandlerKind, HandlerWiring, ObservationRegistry};
pub use page::PageSession;
