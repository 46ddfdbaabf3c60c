//! # Question history
//!
//! A durable, capacity-limited log of submitted questions, keyed and ordered
//! by timestamp. New items are appended at the tail; once the log holds more
//! than its capacity the oldest items are trimmed in the same transaction.
//!
//! ## Example
//!
//! ```rust
//! use vidqa::history::{CappedLog, HistoryItem, HistoryPatch, VideoInfo};
//!
//! # async fn example() -> vidqa::Result<()> {
//! let log = CappedLog::open_in_memory(200)?;
//!
//! let video = VideoInfo::new("dQw4w9WgXcQ", "Some talk");
//! log.save_item(HistoryItem::new(video, "What is the main point?", 1_000)).await?;
//!
//! // An answer was captured: attach it to the newest unanswered question
//! log.update_last_item(
//!     |item| !item.is_answered(),
//!     HistoryPatch::answer_url("https://chat.example/c/abc"),
//! )
//! .await?;
//!
//! let recent = log.get_items(10).await?;
//! assert_eq!(recent.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod cursor;
pub mod item;
pub mod log;
pub mod schema;

pub use cursor::ReverseCursor;
pub use item::{HistoryItem, HistoryPatch, VideoInfo};
pub use log::{CappedLog, WritePhase, DEFAULT_MAX_ITEMS};
