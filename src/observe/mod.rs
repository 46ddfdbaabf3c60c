//! # Page observation
//!
//! `ObservationRegistry` owns every mutation observer the integration starts;
//! `ElementWatcher` builds find-or-wait watches on top of it and
//! `HandlerWiring` keeps handler attachment idempotent.
//!
//! ## Example
//!
//! ```rust
//! use vidqa::dom::Document;
//! use vidqa::observe::{ElementWatcher, ObservationRegistry};
//!
//! let doc = Document::new();
//! let watcher = ElementWatcher::new(ObservationRegistry::new(doc.clone()));
//!
//! watcher
//!     .observe_with_selector("#secondary .chat", |doc, el| {
//!         println!("chat panel has {} children", doc.children(el).len());
//!     })
//!     .unwrap();
//!
//! let secondary = doc.append_new(doc.body(), "div").unwrap();
//! doc.set_attribute(secondary, "id", "secondary").unwrap();
//! let chat = doc.append_new(secondary, "div").unwrap();
//! doc.set_attribute(chat, "class", "chat").unwrap();
//! doc.flush_mutations();
//! ```

pub mod registry;
pub mod watcher;
pub mod wiring;

pub use registry::{ObservationRegistry, ObserverHandle, WeakRegistry};
pub use watcher::{ElementCallback, ElementWatcher, WatchHandle};
pub use wiring::{HandlerKind, HandlerWiring};
