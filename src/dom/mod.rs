//! In-process model of the host page
//!
//! A single-threaded element tree with the pieces the page integration needs:
//! selector queries, mutation observers with batched delivery, and event
//! listeners. Everything here is `!Send`; a page lives on one thread.

pub mod document;
pub mod mutation;
pub mod selector;

pub use document::{
    DomError, Document, EventHandler, MutationCallback, NodeId, ObserverId, MAX_DELIVERY_ROUNDS,
};
pub use mutation::{MutationKind, MutationRecord, ObserveConfig};
pub use selector::{AttrMatch, Combinator, ComplexSelector, Compound, Selector, SelectorError};
