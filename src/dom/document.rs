//! Arena-backed document tree with batched mutation delivery
//!
//! `Document` is a cheap, clonable handle. Nothing is delivered to observers
//! while the tree is being changed: records queue up per observer and are
//! handed over at `flush_mutations`, one callback per observer per batch. No
//! internal borrow is held while a callback or event handler runs, so they are
//! free to change the tree, observe, disconnect or dispatch.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::dom::mutation::{MutationKind, MutationRecord, ObserveConfig};
use crate::dom::selector::{Combinator, ComplexSelector, Compound, Selector, SelectorError};

/// Rounds of delivery a single flush may run before giving up
pub const MAX_DELIVERY_ROUNDS: usize = 64;

/// Stable element identity: slot index plus the generation of that slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}v{}", self.index, self.generation)
    }
}

/// Identity of a registered mutation observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// Failures of DOM operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("unknown or released node {0}")]
    UnknownNode(NodeId),

    #[error("cannot insert {child} into {parent}: it would become its own ancestor")]
    HierarchyRequest { parent: NodeId, child: NodeId },

    #[error("{child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("{0} is still attached to the document tree")]
    StillAttached(NodeId),

    #[error("the document root and body cannot be moved or removed")]
    RootNode,

    #[error("observer must request at least one of child_list, attributes, character_data")]
    InvalidObserveConfig,
}

pub type MutationCallback = Rc<dyn Fn(&[MutationRecord], &Document)>;
pub type EventHandler = Rc<dyn Fn(&Document, NodeId)>;

struct Element {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    listeners: Vec<(String, EventHandler)>,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
            listeners: Vec::new(),
        }
    }

    fn has_class(&self, class: &str) -> bool {
        self.attrs
            .get("class")
            .is_some_and(|c| c.split_whitespace().any(|c| c == class))
    }

    fn matches(&self, compound: &Compound) -> bool {
        if let Some(tag) = &compound.tag {
            if &self.tag != tag {
                return false;
            }
        }
        if let Some(id) = &compound.id {
            if self.attrs.get("id") != Some(id) {
                return false;
            }
        }
        if !compound.classes.iter().all(|c| self.has_class(c)) {
            return false;
        }
        compound.attrs.iter().all(|a| match (&a.value, self.attrs.get(&a.name)) {
            (None, found) => found.is_some(),
            (Some(want), Some(have)) => want == have,
            (Some(_), None) => false,
        })
    }
}

struct Slot {
    generation: u32,
    element: Option<Element>,
}

struct Observer {
    target: NodeId,
    config: ObserveConfig,
    callback: MutationCallback,
    pending: Vec<MutationRecord>,
}

struct Inner {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    body: NodeId,
    observers: BTreeMap<ObserverId, Observer>,
    next_observer: u64,
    delivering: bool,
}

impl Inner {
    fn element(&self, id: NodeId) -> Result<&Element, DomError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.element.as_ref())
            .ok_or(DomError::UnknownNode(id))
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut Element, DomError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.element.as_mut())
            .ok_or(DomError::UnknownNode(id))
    }

    fn alloc(&mut self, element: Element) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.element = Some(element);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    element: Some(element),
                });
                NodeId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.element(id).ok().and_then(|e| e.parent)
    }

    /// True when `node` is `ancestor` or lies beneath it
    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    fn is_connected(&self, node: NodeId) -> bool {
        self.element(node).is_ok() && self.contains(self.root, node)
    }

    fn queue(&mut self, record: MutationRecord) {
        let mut interested = Vec::new();
        for (id, observer) in &self.observers {
            if !observer.config.wants(&record.kind) {
                continue;
            }
            let in_scope = observer.target == record.target
                || (observer.config.subtree && self.contains(observer.target, record.target));
            if in_scope {
                interested.push(*id);
            }
        }

        for id in interested {
            if let Some(observer) = self.observers.get_mut(&id) {
                observer.pending.push(record.clone());
            }
        }
    }

    fn detach(&mut self, child: NodeId) -> Result<Option<NodeId>, DomError> {
        let Some(parent) = self.element(child)?.parent else {
            return Ok(None);
        };

        self.element_mut(parent)?.children.retain(|c| *c != child);
        self.element_mut(child)?.parent = None;
        self.queue(MutationRecord {
            target: parent,
            kind: MutationKind::ChildList {
                added: Vec::new(),
                removed: vec![child],
            },
        });
        Ok(Some(parent))
    }

    fn preorder(&self, from: NodeId, out: &mut Vec<NodeId>) {
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if let Ok(element) = self.element(node) {
                out.push(node);
                stack.extend(element.children.iter().rev().copied());
            }
        }
    }

    fn matches_at(&self, node: NodeId, selector: &ComplexSelector, idx: usize) -> bool {
        let Ok(element) = self.element(node) else {
            return false;
        };
        if !element.matches(&selector.parts[idx]) {
            return false;
        }
        if idx == 0 {
            return true;
        }

        match selector.combinators[idx - 1] {
            Combinator::Child => element
                .parent
                .is_some_and(|p| self.matches_at(p, selector, idx - 1)),
            Combinator::Descendant => {
                let mut cursor = element.parent;
                while let Some(ancestor) = cursor {
                    if self.matches_at(ancestor, selector, idx - 1) {
                        return true;
                    }
                    cursor = self.parent(ancestor);
                }
                false
            }
        }
    }

    fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        selector
            .alternatives()
            .iter()
            .any(|complex| self.matches_at(node, complex, complex.parts.len() - 1))
    }
}

/// Clears the delivering flag when a flush ends, including by unwinding
struct DeliveryGuard<'a>(&'a RefCell<Inner>);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.0.try_borrow_mut() {
            inner.delivering = false;
        }
    }
}

/// Handle to a shared document tree
#[derive(Clone)]
pub struct Document {
    inner: Rc<RefCell<Inner>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Document")
            .field("nodes", &(inner.slots.len() - inner.free.len()))
            .field("observers", &inner.observers.len())
            .finish()
    }
}

impl Document {
    /// An empty page: `<html><body></body></html>`
    pub fn new() -> Self {
        let mut inner = Inner {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            body: NodeId {
                index: 0,
                generation: 0,
            },
            observers: BTreeMap::new(),
            next_observer: 1,
            delivering: false,
        };

        let root = inner.alloc(Element::new("html"));
        let mut body_element = Element::new("body");
        body_element.parent = Some(root);
        let body = inner.alloc(body_element);
        if let Ok(element) = inner.element_mut(root) {
            element.children.push(body);
        }
        inner.root = root;
        inner.body = body;

        Self {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    pub fn root(&self) -> NodeId {
        self.inner.borrow().root
    }

    pub fn body(&self) -> NodeId {
        self.inner.borrow().body
    }

    /// Create a detached element
    pub fn create_element(&self, tag: &str) -> NodeId {
        self.inner.borrow_mut().alloc(Element::new(tag))
    }

    /// Create an element and append it to `parent`
    pub fn append_new(&self, parent: NodeId, tag: &str) -> Result<NodeId, DomError> {
        let node = self.create_element(tag);
        self.append_child(parent, node)?;
        Ok(node)
    }

    pub fn is_alive(&self, node: NodeId) -> bool {
        self.inner.borrow().element(node).is_ok()
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.inner.borrow().is_connected(node)
    }

    /// Inclusive ancestry check
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.inner.borrow().contains(ancestor, node)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.borrow().parent(node)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .borrow()
            .element(node)
            .map(|e| e.children.clone())
            .unwrap_or_default()
    }

    /// `node` and everything beneath it, in document order
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.inner.borrow().preorder(node, &mut out);
        out
    }

    pub fn tag_name(&self, node: NodeId) -> Option<String> {
        self.inner.borrow().element(node).ok().map(|e| e.tag.clone())
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.inner
            .borrow()
            .element(node)
            .ok()
            .and_then(|e| e.attrs.get(name).cloned())
    }

    pub fn text(&self, node: NodeId) -> Option<String> {
        self.inner.borrow().element(node).ok().map(|e| e.text.clone())
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let mut inner = self.inner.borrow_mut();
        let name = name.to_ascii_lowercase();
        let old_value = inner
            .element_mut(node)?
            .attrs
            .insert(name.clone(), value.to_string());
        inner.queue(MutationRecord {
            target: node,
            kind: MutationKind::Attributes { name, old_value },
        });
        Ok(())
    }

    pub fn remove_attribute(&self, node: NodeId, name: &str) -> Result<(), DomError> {
        let mut inner = self.inner.borrow_mut();
        let name = name.to_ascii_lowercase();
        let old_value = inner.element_mut(node)?.attrs.remove(&name);
        if old_value.is_some() {
            inner.queue(MutationRecord {
                target: node,
                kind: MutationKind::Attributes { name, old_value },
            });
        }
        Ok(())
    }

    pub fn set_text(&self, node: NodeId, text: &str) -> Result<(), DomError> {
        let mut inner = self.inner.borrow_mut();
        let old_value = std::mem::replace(&mut inner.element_mut(node)?.text, text.to_string());
        inner.queue(MutationRecord {
            target: node,
            kind: MutationKind::CharacterData { old_value },
        });
        Ok(())
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` under `parent`, before `reference` or at the end
    ///
    /// A child that already has a parent is moved, which reports a removal on
    /// the old parent followed by an addition on the new one.
    pub fn insert_before(
        &self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        let mut inner = self.inner.borrow_mut();
        inner.element(parent)?;
        inner.element(child)?;

        if child == inner.root || child == inner.body {
            return Err(DomError::RootNode);
        }
        if inner.contains(child, parent) {
            return Err(DomError::HierarchyRequest { parent, child });
        }
        if let Some(reference) = reference {
            if inner.parent(reference) != Some(parent) {
                return Err(DomError::NotAChild {
                    parent,
                    child: reference,
                });
            }
        }

        inner.detach(child)?;

        let siblings = &mut inner.element_mut(parent)?.children;
        let at = reference
            .and_then(|r| siblings.iter().position(|c| *c == r))
            .unwrap_or(siblings.len());
        siblings.insert(at, child);
        inner.element_mut(child)?.parent = Some(parent);

        inner.queue(MutationRecord {
            target: parent,
            kind: MutationKind::ChildList {
                added: vec![child],
                removed: Vec::new(),
            },
        });
        Ok(())
    }

    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let mut inner = self.inner.borrow_mut();
        if inner.parent(child) != Some(parent) {
            inner.element(child)?;
            return Err(DomError::NotAChild { parent, child });
        }
        if child == inner.body {
            return Err(DomError::RootNode);
        }
        inner.detach(child)?;
        Ok(())
    }

    /// Detach `node` from wherever it is; a no-op for detached nodes
    pub fn remove(&self, node: NodeId) -> Result<(), DomError> {
        let mut inner = self.inner.borrow_mut();
        if node == inner.root || node == inner.body {
            return Err(DomError::RootNode);
        }
        inner.detach(node)?;
        Ok(())
    }

    /// Free a detached subtree
    ///
    /// Ids of released nodes stop resolving, listeners are dropped and
    /// observers targeting them are disconnected. Returns the number of
    /// elements freed.
    pub fn release(&self, node: NodeId) -> Result<usize, DomError> {
        let mut inner = self.inner.borrow_mut();
        if inner.element(node)?.parent.is_some() || node == inner.root {
            return Err(DomError::StillAttached(node));
        }

        let mut doomed = Vec::new();
        inner.preorder(node, &mut doomed);
        let doomed_set: HashSet<NodeId> = doomed.iter().copied().collect();

        let orphaned: Vec<ObserverId> = inner
            .observers
            .iter()
            .filter(|(_, o)| doomed_set.contains(&o.target))
            .map(|(id, _)| *id)
            .collect();
        for id in &orphaned {
            inner.observers.remove(id);
        }

        for id in &doomed {
            let slot = &mut inner.slots[id.index as usize];
            slot.element = None;
            slot.generation = slot.generation.wrapping_add(1);
            inner.free.push(id.index);
        }

        debug!(
            "Released {} nodes under {} ({} observers dropped)",
            doomed.len(),
            node,
            orphaned.len()
        );
        Ok(doomed.len())
    }

    pub fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        self.inner.borrow().matches(node, selector)
    }

    pub fn matches_compound(&self, node: NodeId, compound: &Compound) -> bool {
        self.inner
            .borrow()
            .element(node)
            .is_ok_and(|e| e.matches(compound))
    }

    /// First connected element matching `selector`, in document order
    pub fn query_selector(&self, selector: &Selector) -> Option<NodeId> {
        let inner = self.inner.borrow();
        let mut all = Vec::new();
        inner.preorder(inner.root, &mut all);
        all.into_iter().find(|n| inner.matches(*n, selector))
    }

    /// Every connected element matching `selector`, in document order
    pub fn query_selector_all(&self, selector: &Selector) -> Vec<NodeId> {
        let inner = self.inner.borrow();
        let mut all = Vec::new();
        inner.preorder(inner.root, &mut all);
        all.retain(|n| inner.matches(*n, selector));
        all
    }

    /// Parse and query in one step
    pub fn query(&self, selector: &str) -> Result<Option<NodeId>, SelectorError> {
        Ok(self.query_selector(&Selector::parse(selector)?))
    }

    /// Start delivering mutations under `target` to `callback`
    pub fn observe(
        &self,
        target: NodeId,
        config: ObserveConfig,
        callback: MutationCallback,
    ) -> Result<ObserverId, DomError> {
        if !config.is_valid() {
            return Err(DomError::InvalidObserveConfig);
        }

        let mut inner = self.inner.borrow_mut();
        inner.element(target)?;

        let id = ObserverId(inner.next_observer);
        inner.next_observer += 1;
        inner.observers.insert(
            id,
            Observer {
                target,
                config,
                callback,
                pending: Vec::new(),
            },
        );
        Ok(id)
    }

    /// Stop an observer and drop its undelivered records
    ///
    /// Returns false if it was not connected.
    pub fn disconnect(&self, id: ObserverId) -> bool {
        self.inner.borrow_mut().observers.remove(&id).is_some()
    }

    pub fn observer_count(&self) -> usize {
        self.inner.borrow().observers.len()
    }

    /// Records waiting for the next flush, summed over observers
    pub fn pending_records(&self) -> usize {
        self.inner
            .borrow()
            .observers
            .values()
            .map(|o| o.pending.len())
            .sum()
    }

    /// Deliver queued records until no observer has anything pending
    ///
    /// Records produced by callbacks are delivered in a later round of the
    /// same flush. A nested call from inside a callback returns 0 and leaves
    /// the work to the outer flush. Returns the number of callbacks invoked.
    pub fn flush_mutations(&self) -> usize {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.delivering {
                return 0;
            }
            inner.delivering = true;
        }
        let _guard = DeliveryGuard(&self.inner);

        let mut delivered = 0;
        let mut quiesced = false;

        for _ in 0..MAX_DELIVERY_ROUNDS {
            let batches: Vec<(MutationCallback, Vec<MutationRecord>)> = {
                let mut inner = self.inner.borrow_mut();
                inner
                    .observers
                    .values_mut()
                    .filter(|o| !o.pending.is_empty())
                    .map(|o| (Rc::clone(&o.callback), std::mem::take(&mut o.pending)))
                    .collect()
            };

            if batches.is_empty() {
                quiesced = true;
                break;
            }

            for (callback, records) in batches {
                callback(&records, self);
                delivered += 1;
            }
        }

        if !quiesced {
            warn!(
                "Mutation delivery did not settle after {} rounds; {} records left queued",
                MAX_DELIVERY_ROUNDS,
                self.pending_records()
            );
        }

        delivered
    }

    pub fn add_event_listener(
        &self,
        node: NodeId,
        kind: &str,
        handler: EventHandler,
    ) -> Result<(), DomError> {
        self.inner
            .borrow_mut()
            .element_mut(node)?
            .listeners
            .push((kind.to_string(), handler));
        Ok(())
    }

    /// Drop every listener of `kind` on `node`; returns how many were dropped
    pub fn remove_event_listeners(&self, node: NodeId, kind: &str) -> Result<usize, DomError> {
        let mut inner = self.inner.borrow_mut();
        let listeners = &mut inner.element_mut(node)?.listeners;
        let before = listeners.len();
        listeners.retain(|(k, _)| k != kind);
        Ok(before - listeners.len())
    }

    pub fn listener_count(&self, node: NodeId, kind: &str) -> usize {
        self.inner
            .borrow()
            .element(node)
            .map(|e| e.listeners.iter().filter(|(k, _)| k == kind).count())
            .unwrap_or(0)
    }

    /// Run every `kind` listener on `node`; returns how many ran
    pub fn dispatch_event(&self, node: NodeId, kind: &str) -> Result<usize, DomError> {
        let handlers: Vec<EventHandler> = self
            .inner
            .borrow()
            .element(node)?
            .listeners
            .iter()
            .filter(|(k, _)| k == kind)
            .map(|(_, h)| Rc::clone(h))
            .collect();

        for handler in &handlers {
            handler(self, node);
        }
        Ok(handlers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn sel(s: &str) -> Selector {
        Selector::parse(s).unwrap()
    }

    #[test]
    fn test_new_document_shape() {
        let doc = Document::new();
        assert_eq!(doc.parent(doc.body()), Some(doc.root()));
        assert_eq!(doc.tag_name(doc.body()).as_deref(), Some("body"));
        assert_eq!(doc.query_selector(&sel("body")), Some(doc.body()));
    }

    #[test]
    fn test_query_and_match() {
        let doc = Document::new();
        let list = doc.append_new(doc.body(), "ul").unwrap();
        doc.set_attribute(list, "id", "items").unwrap();
        let first = doc.append_new(list, "li").unwrap();
        let second = doc.append_new(list, "li").unwrap();
        doc.set_attribute(second, "class", "active big").unwrap();

        assert_eq!(doc.query_selector(&sel("#items > li")), Some(first));
        assert_eq!(doc.query_selector(&sel("li.active")), Some(second));
        assert_eq!(doc.query_selector_all(&sel("body li")).len(), 2);
        assert_eq!(doc.query_selector(&sel("body > li")), None);
        assert!(doc.matches(second, &sel("ul .big")));
        assert!(doc.matches(first, &sel("p, li")));
    }

    #[test]
    fn test_detached_nodes_are_not_queried() {
        let doc = Document::new();
        let div = doc.create_element("div");
        doc.set_attribute(div, "id", "x").unwrap();
        assert_eq!(doc.query("#x").unwrap(), None);

        doc.append_child(doc.body(), div).unwrap();
        assert_eq!(doc.query("#x").unwrap(), Some(div));
        assert!(doc.is_connected(div));
    }

    #[test]
    fn test_insert_before_and_move() {
        let doc = Document::new();
        let list = doc.append_new(doc.body(), "ul").unwrap();
        let last = doc.append_new(list, "li").unwrap();
        let first = doc.create_element("li");
        doc.insert_before(list, first, Some(last)).unwrap();
        assert_eq!(doc.children(list), vec![first, last]);

        // Moving a node takes it out of its old parent
        let other = doc.append_new(doc.body(), "ol").unwrap();
        doc.append_child(other, first).unwrap();
        assert_eq!(doc.children(list), vec![last]);
        assert_eq!(doc.parent(first), Some(other));
        assert!(doc.contains(doc.body(), first));

        let stray = doc.create_element("li");
        assert_eq!(
            doc.insert_before(list, stray, Some(first)),
            Err(DomError::NotAChild {
                parent: list,
                child: first
            })
        );
    }

    #[test]
    fn test_hierarchy_errors() {
        let doc = Document::new();
        let a = doc.append_new(doc.body(), "div").unwrap();
        let b = doc.append_new(a, "div").unwrap();

        assert_eq!(
            doc.append_child(b, a),
            Err(DomError::HierarchyRequest { parent: b, child: a })
        );
        assert_eq!(doc.append_child(a, doc.body()), Err(DomError::RootNode));
        assert_eq!(
            doc.remove_child(doc.body(), b),
            Err(DomError::NotAChild {
                parent: doc.body(),
                child: b
            })
        );
    }

    #[test]
    fn test_release_invalidates_ids() {
        let doc = Document::new();
        let a = doc.append_new(doc.body(), "div").unwrap();
        let b = doc.append_new(a, "span").unwrap();

        assert_eq!(doc.release(a), Err(DomError::StillAttached(a)));
        doc.remove(a).unwrap();
        assert_eq!(doc.release(a).unwrap(), 2);

        assert!(!doc.is_alive(a));
        assert!(!doc.is_alive(b));
        assert_eq!(doc.set_text(b, "x"), Err(DomError::UnknownNode(b)));

        // Slot reuse gets a fresh generation
        let c = doc.create_element("p");
        assert_ne!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn test_mutations_are_batched_until_flush() {
        let doc = Document::new();
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::new(Cell::new(0));

        let (c, s) = (Rc::clone(&calls), Rc::clone(&seen));
        doc.observe(
            doc.body(),
            ObserveConfig::subtree_changes(),
            Rc::new(move |records: &[MutationRecord], _: &Document| {
                c.set(c.get() + 1);
                s.set(s.get() + records.len());
            }),
        )
        .unwrap();

        let a = doc.append_new(doc.body(), "div").unwrap();
        doc.append_new(a, "span").unwrap();
        doc.set_attribute(a, "id", "ignored").unwrap();
        assert_eq!(calls.get(), 0);

        assert_eq!(doc.flush_mutations(), 1);
        assert_eq!(calls.get(), 1);
        assert_eq!(seen.get(), 2);

        assert_eq!(doc.flush_mutations(), 0);
    }

    #[test]
    fn test_subtree_scope() {
        let doc = Document::new();
        let a = doc.append_new(doc.body(), "div").unwrap();
        let b = doc.append_new(doc.body(), "div").unwrap();
        let hits = Rc::new(Cell::new(0));

        let h = Rc::clone(&hits);
        doc.observe(
            a,
            ObserveConfig::children(),
            Rc::new(move |_: &[MutationRecord], _: &Document| h.set(h.get() + 1)),
        )
        .unwrap();
        doc.flush_mutations();

        let inner = doc.append_new(b, "p").unwrap();
        doc.flush_mutations();
        assert_eq!(hits.get(), 0);

        let child = doc.append_new(a, "p").unwrap();
        doc.flush_mutations();
        assert_eq!(hits.get(), 1);

        // Grandchildren need `subtree`
        doc.append_child(child, inner).unwrap();
        doc.flush_mutations();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_callback_mutations_delivered_in_same_flush() {
        let doc = Document::new();
        let target = doc.append_new(doc.body(), "div").unwrap();
        let rounds = Rc::new(Cell::new(0));

        let r = Rc::clone(&rounds);
        doc.observe(
            target,
            ObserveConfig::children(),
            Rc::new(move |_: &[MutationRecord], doc: &Document| {
                r.set(r.get() + 1);
                if doc.children(target).len() < 3 {
                    doc.append_new(target, "span").unwrap();
                }
            }),
        )
        .unwrap();

        doc.append_new(target, "span").unwrap();
        assert_eq!(doc.flush_mutations(), 3);
        assert_eq!(rounds.get(), 3);
        assert_eq!(doc.children(target).len(), 3);
    }

    #[test]
    fn test_panicking_callback_does_not_wedge_delivery() {
        let doc = Document::new();
        let target = doc.append_new(doc.body(), "div").unwrap();
        let hits = Rc::new(Cell::new(0));

        let faulty = doc
            .observe(
                target,
                ObserveConfig::children(),
                Rc::new(|_: &[MutationRecord], _: &Document| panic!("callback failed")),
            )
            .unwrap();
        doc.append_new(target, "span").unwrap();

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            doc.flush_mutations()
        }));
        assert!(unwound.is_err());
        assert!(doc.disconnect(faulty));

        let h = Rc::clone(&hits);
        doc.observe(
            target,
            ObserveConfig::children(),
            Rc::new(move |_: &[MutationRecord], _: &Document| h.set(h.get() + 1)),
        )
        .unwrap();
        doc.append_new(target, "p").unwrap();

        assert_eq!(doc.flush_mutations(), 1);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_runaway_callbacks_are_bounded() {
        let doc = Document::new();
        let target = doc.append_new(doc.body(), "div").unwrap();

        doc.observe(
            target,
            ObserveConfig::children(),
            Rc::new(move |_: &[MutationRecord], doc: &Document| {
                doc.append_new(target, "span").unwrap();
            }),
        )
        .unwrap();

        doc.append_new(target, "span").unwrap();
        assert_eq!(doc.flush_mutations(), MAX_DELIVERY_ROUNDS);
        assert_eq!(doc.pending_records(), 1);
    }

    #[test]
    fn test_disconnect_drops_pending() {
        let doc = Document::new();
        let id = doc
            .observe(
                doc.body(),
                ObserveConfig::children(),
                Rc::new(|_: &[MutationRecord], _: &Document| panic!("should not fire")),
            )
            .unwrap();

        doc.append_new(doc.body(), "div").unwrap();
        assert!(doc.disconnect(id));
        assert!(!doc.disconnect(id));
        assert_eq!(doc.flush_mutations(), 0);
    }

    #[test]
    fn test_invalid_observe_config() {
        let doc = Document::new();
        let result = doc.observe(
            doc.body(),
            ObserveConfig::default(),
            Rc::new(|_: &[MutationRecord], _: &Document| {}),
        );
        assert_eq!(result, Err(DomError::InvalidObserveConfig));
    }

    #[test]
    fn test_events() {
        let doc = Document::new();
        let button = doc.append_new(doc.body(), "button").unwrap();
        let clicks = Rc::new(Cell::new(0));

        let c = Rc::clone(&clicks);
        doc.add_event_listener(button, "click", Rc::new(move |_: &Document, _| c.set(c.get() + 1)))
            .unwrap();

        assert_eq!(doc.dispatch_event(button, "click").unwrap(), 1);
        assert_eq!(doc.dispatch_event(button, "keydown").unwrap(), 0);
        assert_eq!(clicks.get(), 1);

        assert_eq!(doc.remove_event_listeners(button, "click").unwrap(), 1);
        assert_eq!(doc.listener_count(button, "click"), 0);
    }
}
