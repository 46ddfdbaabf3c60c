//! # Bounded caching
//!
//! A fixed-capacity least-recently-used cache, plus the thin async wrapper the
//! transcript and suggestion fetch paths consult before going to the network.
//!
//! ## Example
//!
//! ```rust
//! use vidqa::cache::BoundedCache;
//!
//! let mut cache = BoundedCache::new(2).unwrap();
//! cache.put("a".to_string(), 1);
//! cache.put("b".to_string(), 2);
//! cache.get("a");
//! cache.put("c".to_string(), 3);
//!
//! assert!(!cache.has("b"));
//! assert_eq!(cache.peek("a"), Some(&1));
//! ```

pub mod fetch;
pub mod store;
pub mod types;

pub use fetch::{FetchCache, FetchCaches, TranscriptKey};
pub use store::BoundedCache;
pub use types::{CacheKey, CacheStats};
