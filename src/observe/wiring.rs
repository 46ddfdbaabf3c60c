//! At-most-once handler attachment per element
//!
//! Watch callbacks fire repeatedly for the same element, so anything they
//! attach must be recorded. The side table is keyed by `NodeId`, which never
//! resolves to a different element once the original is released.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use tracing::debug;

use crate::dom::{DomError, Document, EventHandler, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Click,
    Activation,
    Custom(String),
}

impl HandlerKind {
    /// Event name the handler listens for
    pub fn event_name(&self) -> &str {
        match self {
            HandlerKind::Click => "click",
            HandlerKind::Activation => "activate",
            HandlerKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

#[derive(Clone, Default)]
pub struct HandlerWiring {
    wired: Rc<RefCell<HashMap<NodeId, HashSet<HandlerKind>>>>,
}

impl fmt::Debug for HandlerWiring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerWiring")
            .field("elements", &self.len())
            .finish()
    }
}

impl HandlerWiring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_wired(&self, node: NodeId, kind: &HandlerKind) -> bool {
        self.wired
            .borrow()
            .get(&node)
            .is_some_and(|kinds| kinds.contains(kind))
    }

    /// Run `attach` unless `kind` is already wired on `node`
    ///
    /// Returns `Ok(true)` when `attach` ran and succeeded. A failed attach
    /// leaves nothing recorded.
    pub fn wire_once<F>(&self, node: NodeId, kind: HandlerKind, attach: F) -> Result<bool, DomError>
    where
        F: FnOnce() -> Result<(), DomError>,
    {
        if self.is_wired(node, &kind) {
            return Ok(false);
        }

        attach()?;
        debug!("Wired {} handler on {}", kind, node);
        self.wired.borrow_mut().entry(node).or_default().insert(kind);
        Ok(true)
    }

    /// Add an event listener for `kind` once per element
    pub fn attach_listener_once<F>(
        &self,
        doc: &Document,
        node: NodeId,
        kind: HandlerKind,
        handler: F,
    ) -> Result<bool, DomError>
    where
        F: Fn(&Document, NodeId) + 'static,
    {
        let event = kind.event_name().to_string();
        let handler: EventHandler = Rc::new(handler);
        self.wire_once(node, kind, || doc.add_event_listener(node, &event, handler))
    }

    /// Forget `node` and remove the listeners this table put on it
    pub fn teardown(&self, doc: &Document, node: NodeId) -> usize {
        let removed = self.wired.borrow_mut().remove(&node);
        let Some(kinds) = removed else {
            return 0;
        };

        for kind in &kinds {
            match doc.remove_event_listeners(node, kind.event_name()) {
                // A released node has no listeners left to remove
                Ok(_) | Err(DomError::UnknownNode(_)) => {}
                Err(e) => debug!("Could not remove {} listeners from {}: {}", kind, node, e),
            }
        }
        kinds.len()
    }

    /// Drop entries for elements that were released or left the page
    pub fn prune(&self, doc: &Document) -> usize {
        let stale: Vec<NodeId> = self
            .wired
            .borrow()
            .keys()
            .filter(|node| !doc.is_connected(**node))
            .copied()
            .collect();

        for node in &stale {
            self.teardown(doc, *node);
        }
        stale.len()
    }

    /// Number of elements with at least one handler wired
    pub fn len(&self) -> usize {
        self.wired.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.wired.borrow().is_empty()
    }

    /// Tear down every element; returns how many handlers were removed
    pub fn teardown_all(&self, doc: &Document) -> usize {
        let nodes: Vec<NodeId> = self.wired.borrow().keys().copied().collect();
        nodes.into_iter().map(|node| self.teardown(doc, node)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_attach_once_per_kind() {
        let doc = Document::new();
        let wiring = HandlerWiring::new();
        let button = doc.append_new(doc.body(), "button").unwrap();
        let clicks = Rc::new(Cell::new(0));

        for _ in 0..3 {
            let c = Rc::clone(&clicks);
            wiring
                .attach_listener_once(&doc, button, HandlerKind::Click, move |_: &Document, _| {
                    c.set(c.get() + 1)
                })
                .unwrap();
        }
        assert_eq!(doc.listener_count(button, "click"), 1);

        doc.dispatch_event(button, "click").unwrap();
        assert_eq!(clicks.get(), 1);

        let added = wiring
            .attach_listener_once(&doc, button, HandlerKind::Activation, |_: &Document, _| {})
            .unwrap();
        assert!(added);
        assert!(wiring.is_wired(button, &HandlerKind::Activation));
        assert_eq!(wiring.len(), 1);
    }

    #[test]
    fn test_failed_attach_is_not_recorded() {
        let doc = Document::new();
        let wiring = HandlerWiring::new();
        let gone = doc.create_element("button");
        doc.release(gone).unwrap();

        let result =
            wiring.attach_listener_once(&doc, gone, HandlerKind::Click, |_: &Document, _| {});
        assert_eq!(result, Err(DomError::UnknownNode(gone)));
        assert!(!wiring.is_wired(gone, &HandlerKind::Click));
    }

    #[test]
    fn test_teardown_removes_listeners() {
        let doc = Document::new();
        let wiring = HandlerWiring::new();
        let button = doc.append_new(doc.body(), "button").unwrap();

        wiring
            .attach_listener_once(&doc, button, HandlerKind::Click, |_: &Document, _| {})
            .unwrap();
        assert_eq!(wiring.teardown(&doc, button), 1);
        assert_eq!(doc.listener_count(button, "click"), 0);

        // Can be wired again afterwards
        let again = wiring
            .attach_listener_once(&doc, button, HandlerKind::Click, |_: &Document, _| {})
            .unwrap();
        assert!(again);
    }

    #[test]
    fn test_teardown_of_released_node() {
        let doc = Document::new();
        let wiring = HandlerWiring::new();
        let button = doc.append_new(doc.body(), "button").unwrap();

        for kind in [HandlerKind::Click, HandlerKind::Activation] {
            wiring
                .attach_listener_once(&doc, button, kind, |_: &Document, _| {})
                .unwrap();
        }
        doc.remove(button).unwrap();
        doc.release(button).unwrap();

        assert_eq!(wiring.teardown(&doc, button), 2);
        assert!(wiring.is_empty());
        assert_eq!(wiring.teardown(&doc, button), 0);
    }

    #[test]
    fn test_prune_detached() {
        let doc = Document::new();
        let wiring = HandlerWiring::new();
        let kept = doc.append_new(doc.body(), "button").unwrap();
        let dropped = doc.append_new(doc.body(), "button").unwrap();

        for node in [kept, dropped] {
            wiring
                .attach_listener_once(&doc, node, HandlerKind::Custom("hover".into()), |_: &Document, _| {})
                .unwrap();
        }

        doc.remove(dropped).unwrap();
        assert_eq!(wiring.prune(&doc), 1);
        assert!(wiring.is_wired(kept, &HandlerKind::Custom("hover".into())));
        assert!(!wiring.is_wired(dropped, &HandlerKind::Custom("hover".into())));
    }
}
