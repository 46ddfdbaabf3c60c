//! Find-or-wait element watches on top of the observation registry
//!
//! Three kinds of watch, all returning a `WatchHandle`:
//!
//! - `observe_parent` fires for every element that appears under a parent,
//!   waiting for the parent itself if it is not on the page yet
//! - `observe_with_selector` fires once when an element is present and again
//!   on every later change inside it
//! - `find_or_observe_element` follows an element across re-renders that
//!   replace it with a fresh copy
//!
//! Callbacks run during `Document::flush_mutations`. A stopped watch never
//! invokes its callback again, even for a batch that was already taken for
//! delivery.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

use crate::dom::{
    Combinator, Compound, DomError, Document, MutationRecord, NodeId, ObserveConfig, Selector,
};
use crate::error::Result;
use crate::observe::registry::{ObservationRegistry, ObserverHandle, WeakRegistry};

pub type ElementCallback = Rc<dyn Fn(&Document, NodeId)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(u64);

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

/// The observers currently serving a watch; they change when a watch re-homes
///
/// `observer` is the one the watch is anchored on. `companion` watches the
/// body while the anchor could be replaced by a re-render. Every re-home bumps
/// `epoch`, so batches taken for a retired observer are ignored.
#[derive(Default)]
struct WatchSlot {
    observer: Cell<Option<ObserverHandle>>,
    companion: Cell<Option<ObserverHandle>>,
    epoch: Cell<u64>,
    stopped: Cell<bool>,
}

impl WatchSlot {
    fn is_stopped(&self) -> bool {
        self.stopped.get()
    }

    fn advance(&self) -> u64 {
        let next = self.epoch.get() + 1;
        self.epoch.set(next);
        next
    }

    fn is_current(&self, epoch: u64) -> bool {
        !self.is_stopped() && self.epoch.get() == epoch
    }

    fn install(
        &self,
        registry: &ObservationRegistry,
        observer: Option<ObserverHandle>,
        companion: Option<ObserverHandle>,
    ) {
        for (cell, next) in [(&self.observer, observer), (&self.companion, companion)] {
            if let Some(old) = cell.replace(next) {
                if Some(old) != next {
                    registry.cleanup_observer(old);
                }
            }
        }
    }

    fn clear(&self, registry: &ObservationRegistry) {
        self.install(registry, None, None);
    }
}

struct WatchContext {
    registry: WeakRegistry,
    slot: Rc<WatchSlot>,
    callback: ElementCallback,
}

impl WatchContext {
    fn fire(&self, doc: &Document, node: NodeId) {
        if !self.slot.is_stopped() {
            (self.callback)(doc, node);
        }
    }
}

#[derive(Default)]
struct WatchTable {
    next: u64,
    slots: HashMap<WatchHandle, Rc<WatchSlot>>,
}

/// Element watches for one page
#[derive(Clone)]
pub struct ElementWatcher {
    registry: ObservationRegistry,
    watches: Rc<RefCell<WatchTable>>,
}

impl fmt::Debug for ElementWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementWatcher")
            .field("watches", &self.active_watches())
            .finish()
    }
}

impl ElementWatcher {
    pub fn new(registry: ObservationRegistry) -> Self {
        Self {
            registry,
            watches: Rc::new(RefCell::new(WatchTable::default())),
        }
    }

    pub fn registry(&self) -> &ObservationRegistry {
        &self.registry
    }

    pub fn document(&self) -> &Document {
        self.registry.document()
    }

    /// Fire `callback` for every element that appears under a parent
    ///
    /// `A > B` watches direct children matching `B` of the element matching
    /// `A`; `A B` watches descendants. A lone compound watches the body's
    /// descendants. Matching elements nested inside an added subtree are
    /// reported too, each at most once per batch. If the parent is not on the
    /// page yet the watch waits on the body, then moves onto the parent and
    /// reports the matching elements it arrived with.
    pub fn observe_parent<F>(&self, selector: &str, callback: F) -> Result<WatchHandle>
    where
        F: Fn(&Document, NodeId) + 'static,
    {
        let selector = Selector::parse(selector)?;
        let complex = selector.single()?;
        let (parent, relation, child) = match complex.split_last() {
            Some((parent, relation, child)) => {
                (Some(Selector::from_complex(parent)), relation, child)
            }
            None => (None, Combinator::Descendant, complex.subject().clone()),
        };

        let (handle, ctx) = self.begin(Rc::new(callback));
        let watch = Rc::new(ParentWatch {
            ctx,
            parent,
            relation,
            child,
        });

        let doc = self.document();
        let existing = match &watch.parent {
            Some(parent) => doc.query_selector(parent),
            None => Some(doc.body()),
        };

        let attached = match existing {
            Some(parent) => watch_parent(Rc::clone(&watch), &self.registry, parent),
            None => wait_for_parent(Rc::clone(&watch), &self.registry, doc.body()),
        };
        if let Err(e) = attached {
            self.abandon(handle);
            return Err(e.into());
        }

        debug!("{} watching children of {:?}", handle, selector.as_str());
        Ok(handle)
    }

    /// Fire once for the element matching `selector`, then on every change
    /// inside it
    ///
    /// When the element is not there yet, the closest ancestor the selector
    /// pins down uniquely (or the body) is watched until it appears.
    pub fn observe_with_selector<F>(&self, selector: &str, callback: F) -> Result<WatchHandle>
    where
        F: Fn(&Document, NodeId) + 'static,
    {
        let selector = Rc::new(Selector::parse(selector)?);
        let (handle, ctx) = self.begin(Rc::new(callback));
        let ctx = Rc::new(ctx);
        let doc = self.document().clone();

        let attached = match doc.query_selector(&selector) {
            Some(element) => {
                ctx.fire(&doc, element);
                if ctx.slot.is_stopped() {
                    Ok(())
                } else {
                    watch_element(Rc::clone(&ctx), &self.registry, element, Rc::clone(&selector))
                }
            }
            None => {
                let anchor = resolve_anchor(&doc, &selector);
                debug!("{} waiting for {:?} under {}", handle, selector.as_str(), anchor);
                wait_for_element(Rc::clone(&ctx), &self.registry, anchor, selector)
            }
        };

        if let Err(e) = attached {
            self.abandon(handle);
            return Err(e.into());
        }
        Ok(handle)
    }

    /// Keep `callback` pointed at whatever element currently matches
    ///
    /// Fires immediately when the element exists, when it first appears, when
    /// the page swaps it for a new element, and when content inside the
    /// current element changes.
    pub fn find_or_observe_element<F>(&self, selector: &str, callback: F) -> Result<WatchHandle>
    where
        F: Fn(&Document, NodeId) + 'static,
    {
        let selector = Selector::parse(selector)?;
        let (handle, ctx) = self.begin(Rc::new(callback));
        let doc = self.document().clone();

        let current = Rc::new(Cell::new(doc.query_selector(&selector)));
        if let Some(element) = current.get() {
            ctx.fire(&doc, element);
        }

        let slot = Rc::clone(&ctx.slot);
        let result = self.registry.create_observer(
            doc.body(),
            move |records: &[MutationRecord], doc: &Document| {
                if ctx.slot.is_stopped() {
                    return;
                }
                match (doc.query_selector(&selector), current.get()) {
                    (Some(found), Some(previous)) if found == previous => {
                        if records.iter().any(|r| doc.contains(found, r.target)) {
                            ctx.fire(doc, found);
                        }
                    }
                    (Some(found), _) => {
                        current.set(Some(found));
                        ctx.fire(doc, found);
                    }
                    (None, _) => current.set(None),
                }
            },
            ObserveConfig::subtree_content(),
        );

        match result {
            Ok(observer) => {
                slot.install(&self.registry, Some(observer), None);
                Ok(handle)
            }
            Err(e) => {
                self.abandon(handle);
                Err(e.into())
            }
        }
    }

    /// Tear down a watch and whichever observer currently serves it
    pub fn stop(&self, handle: WatchHandle) -> bool {
        let slot = self.watches.borrow_mut().slots.remove(&handle);
        match slot {
            Some(slot) => {
                slot.stopped.set(true);
                slot.clear(&self.registry);
                debug!("Stopped {}", handle);
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) -> usize {
        let slots: Vec<Rc<WatchSlot>> = self
            .watches
            .borrow_mut()
            .slots
            .drain()
            .map(|(_, slot)| slot)
            .collect();

        for slot in &slots {
            slot.stopped.set(true);
            slot.clear(&self.registry);
        }
        slots.len()
    }

    pub fn active_watches(&self) -> usize {
        self.watches.borrow().slots.len()
    }

    /// The node the watch's current observer is attached to
    pub fn anchor(&self, handle: WatchHandle) -> Option<NodeId> {
        let observer = self.watches.borrow().slots.get(&handle)?.observer.get()?;
        self.registry.target(observer)
    }

    fn begin(&self, callback: ElementCallback) -> (WatchHandle, WatchContext) {
        let slot = Rc::new(WatchSlot::default());
        let mut table = self.watches.borrow_mut();
        table.next += 1;
        let handle = WatchHandle(table.next);
        table.slots.insert(handle, Rc::clone(&slot));

        let ctx = WatchContext {
            registry: self.registry.downgrade(),
            slot,
            callback,
        };
        (handle, ctx)
    }

    fn abandon(&self, handle: WatchHandle) {
        self.stop(handle);
    }
}

struct ParentWatch {
    ctx: WatchContext,
    parent: Option<Selector>,
    relation: Combinator,
    child: Compound,
}

impl ParentWatch {
    fn parent_still_matches(&self, doc: &Document, parent: NodeId) -> bool {
        doc.is_connected(parent)
            && self
                .parent
                .as_ref()
                .map_or(true, |selector| doc.matches(parent, selector))
    }

    fn is_target(&self, doc: &Document, parent: NodeId, node: NodeId) -> bool {
        let related = match self.relation {
            Combinator::Child => doc.parent(node) == Some(parent),
            Combinator::Descendant => node != parent && doc.contains(parent, node),
        };
        related && doc.matches_compound(node, &self.child)
    }

    fn report_added(&self, doc: &Document, parent: NodeId, records: &[MutationRecord]) {
        let mut seen = HashSet::new();
        for added in records.iter().flat_map(|r| r.added_nodes()) {
            for node in doc.descendants(*added) {
                if self.is_target(doc, parent, node) && seen.insert(node) {
                    self.ctx.fire(doc, node);
                }
            }
        }
    }

    fn report_existing(&self, doc: &Document, parent: NodeId) {
        for node in doc.descendants(parent).into_iter().skip(1) {
            if self.is_target(doc, parent, node) {
                self.ctx.fire(doc, node);
            }
        }
    }
}

fn watch_parent(
    watch: Rc<ParentWatch>,
    registry: &ObservationRegistry,
    parent: NodeId,
) -> std::result::Result<(), DomError> {
    let epoch = watch.ctx.slot.advance();
    let body = registry.document().body();

    let w = Rc::clone(&watch);
    let observer = registry.create_observer(
        parent,
        move |records: &[MutationRecord], doc: &Document| {
            if !w.ctx.slot.is_current(epoch) || !w.parent_still_matches(doc, parent) {
                return;
            }
            w.report_added(doc, parent, records);
        },
        ObserveConfig::subtree_changes(),
    )?;

    // A re-render can swap the parent out; follow its replacement
    let companion = if parent == body {
        None
    } else {
        let w = Rc::clone(&watch);
        let companion = registry.create_observer(
            body,
            move |_: &[MutationRecord], doc: &Document| {
                if !w.ctx.slot.is_current(epoch) || doc.is_connected(parent) {
                    return;
                }
                debug!("Parent {} left the page, looking for a replacement", parent);
                rehome_parent(&w, doc);
            },
            ObserveConfig::subtree_changes(),
        );
        match companion {
            Ok(companion) => Some(companion),
            Err(e) => {
                registry.cleanup_observer(observer);
                return Err(e);
            }
        }
    };

    watch.ctx.slot.install(registry, Some(observer), companion);
    Ok(())
}

fn wait_for_parent(
    watch: Rc<ParentWatch>,
    registry: &ObservationRegistry,
    body: NodeId,
) -> std::result::Result<(), DomError> {
    let epoch = watch.ctx.slot.advance();

    let w = Rc::clone(&watch);
    let observer = registry.create_observer(
        body,
        move |_: &[MutationRecord], doc: &Document| {
            if !w.ctx.slot.is_current(epoch) {
                return;
            }
            let appeared = w
                .parent
                .as_ref()
                .is_some_and(|selector| doc.query_selector(selector).is_some());
            if appeared {
                rehome_parent(&w, doc);
            }
        },
        ObserveConfig::subtree_changes(),
    )?;
    watch.ctx.slot.install(registry, Some(observer), None);
    Ok(())
}

/// Move a parent watch onto whatever now matches its parent selector, or
/// back to waiting on the body when nothing does
fn rehome_parent(watch: &Rc<ParentWatch>, doc: &Document) {
    let Some(registry) = watch.ctx.registry.upgrade() else {
        return;
    };
    let Some(selector) = &watch.parent else {
        return;
    };

    match doc.query_selector(selector) {
        Some(parent) => match watch_parent(Rc::clone(watch), &registry, parent) {
            Ok(()) => {
                debug!("Parent {:?} found as {}", selector.as_str(), parent);
                watch.report_existing(doc, parent);
            }
            Err(e) => warn!("Could not move watch onto parent {}: {}", parent, e),
        },
        None => {
            if let Err(e) = wait_for_parent(Rc::clone(watch), &registry, doc.body()) {
                warn!("Could not resume waiting for {:?}: {}", selector.as_str(), e);
            }
        }
    }
}

fn watch_element(
    ctx: Rc<WatchContext>,
    registry: &ObservationRegistry,
    element: NodeId,
    selector: Rc<Selector>,
) -> std::result::Result<(), DomError> {
    let epoch = ctx.slot.advance();

    let c = Rc::clone(&ctx);
    let observer = registry.create_observer(
        element,
        move |_: &[MutationRecord], doc: &Document| {
            if !c.slot.is_current(epoch) {
                return;
            }
            if !doc.is_connected(element) || !doc.matches(element, &selector) {
                debug!("{} no longer matches {:?}", element, selector.as_str());
                return;
            }
            c.fire(doc, element);
        },
        ObserveConfig::subtree_changes(),
    )?;
    ctx.slot.install(registry, Some(observer), None);
    Ok(())
}

fn wait_for_element(
    ctx: Rc<WatchContext>,
    registry: &ObservationRegistry,
    anchor: NodeId,
    selector: Rc<Selector>,
) -> std::result::Result<(), DomError> {
    let epoch = ctx.slot.advance();
    let body = registry.document().body();

    let (c, s) = (Rc::clone(&ctx), Rc::clone(&selector));
    let observer = registry.create_observer(
        anchor,
        move |_: &[MutationRecord], doc: &Document| {
            if !c.slot.is_current(epoch) {
                return;
            }
            if let Some(element) = doc.query_selector(&s) {
                found_element(&c, doc, element, &s);
            }
        },
        ObserveConfig::subtree_changes(),
    )?;

    // An anchor below the body can be replaced before the element shows up
    let companion = if anchor == body {
        None
    } else {
        let (c, s) = (Rc::clone(&ctx), Rc::clone(&selector));
        let companion = registry.create_observer(
            body,
            move |_: &[MutationRecord], doc: &Document| {
                if !c.slot.is_current(epoch) || doc.is_connected(anchor) {
                    return;
                }
                if let Some(element) = doc.query_selector(&s) {
                    found_element(&c, doc, element, &s);
                    return;
                }
                let Some(registry) = c.registry.upgrade() else {
                    return;
                };
                let next = resolve_anchor(doc, &s);
                debug!("Anchor {} left the page, waiting under {}", anchor, next);
                if let Err(e) = wait_for_element(Rc::clone(&c), &registry, next, Rc::clone(&s)) {
                    warn!("Could not move wait for {:?} onto {}: {}", s.as_str(), next, e);
                }
            },
            ObserveConfig::subtree_changes(),
        );
        match companion {
            Ok(companion) => Some(companion),
            Err(e) => {
                registry.cleanup_observer(observer);
                return Err(e);
            }
        }
    };

    ctx.slot.install(registry, Some(observer), companion);
    Ok(())
}

/// Leave the waiting phase: fire once, then follow the element itself
fn found_element(ctx: &Rc<WatchContext>, doc: &Document, element: NodeId, selector: &Rc<Selector>) {
    let Some(registry) = ctx.registry.upgrade() else {
        return;
    };

    // Retire the wait before the callback can see the element
    ctx.slot.advance();
    ctx.slot.clear(&registry);
    ctx.fire(doc, element);
    if ctx.slot.is_stopped() {
        return;
    }
    if let Err(e) = watch_element(Rc::clone(ctx), &registry, element, Rc::clone(selector)) {
        warn!("Could not watch {} after it appeared: {}", element, e);
    }
}

/// Closest ancestor prefix with exactly one match on the page, else the body
fn resolve_anchor(doc: &Document, selector: &Selector) -> NodeId {
    if let [complex] = selector.alternatives() {
        for prefix in complex.ancestor_prefixes() {
            let found = doc.query_selector_all(&Selector::from_complex(prefix));
            if let [only] = found.as_slice() {
                return *only;
            }
        }
    }
    doc.body()
}
