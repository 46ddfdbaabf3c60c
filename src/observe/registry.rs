//! Ownership of live mutation subscriptions

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, info, warn};

use crate::dom::{DomError, Document, MutationRecord, NodeId, ObserveConfig, ObserverId};

/// Opaque handle for targeted cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverHandle(u64);

impl fmt::Display for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registration#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    target: NodeId,
    config: ObserveConfig,
    observer: ObserverId,
}

#[derive(Default)]
struct RegistryState {
    next: u64,
    live: HashMap<ObserverHandle, Registration>,
}

struct RegistryShared {
    document: Document,
    state: RefCell<RegistryState>,
}

/// Every observer the page integration has running
///
/// The registry is the only owner of the underlying observers; callers hold
/// `ObserverHandle`s. Clones share the same set of registrations.
#[derive(Clone)]
pub struct ObservationRegistry {
    inner: Rc<RegistryShared>,
}

/// Non-owning reference for use inside observer callbacks
#[derive(Clone)]
pub struct WeakRegistry {
    inner: Weak<RegistryShared>,
}

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<ObservationRegistry> {
        self.inner.upgrade().map(|inner| ObservationRegistry { inner })
    }
}

impl fmt::Debug for ObservationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationRegistry")
            .field("active", &self.active_count())
            .finish()
    }
}

impl ObservationRegistry {
    pub fn new(document: Document) -> Self {
        Self {
            inner: Rc::new(RegistryShared {
                document,
                state: RefCell::new(RegistryState::default()),
            }),
        }
    }

    pub fn document(&self) -> &Document {
        &self.inner.document
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Start observing `target` right away
    pub fn create_observer<F>(
        &self,
        target: NodeId,
        callback: F,
        config: ObserveConfig,
    ) -> Result<ObserverHandle, DomError>
    where
        F: Fn(&[MutationRecord], &Document) + 'static,
    {
        let observer = self
            .inner
            .document
            .observe(target, config, Rc::new(callback))?;

        let mut state = self.inner.state.borrow_mut();
        state.next += 1;
        let handle = ObserverHandle(state.next);
        state.live.insert(
            handle,
            Registration {
                target,
                config,
                observer,
            },
        );

        debug!("Created {} on {} ({:?})", handle, target, config);
        Ok(handle)
    }

    /// Disconnect one subscription
    ///
    /// Unknown or already cleaned handles are ignored. Returns whether
    /// anything was live.
    pub fn cleanup_observer(&self, handle: ObserverHandle) -> bool {
        let removed = self.inner.state.borrow_mut().live.remove(&handle);
        let Some(registration) = removed else {
            return false;
        };

        if !self.inner.document.disconnect(registration.observer) {
            debug!(
                "{} on {} was already gone from the document",
                handle, registration.target
            );
        }
        debug!("Cleaned up {}", handle);
        true
    }

    /// Disconnect everything; returns how many registrations were dropped
    pub fn cleanup_all(&self) -> usize {
        let drained: Vec<(ObserverHandle, Registration)> =
            self.inner.state.borrow_mut().live.drain().collect();

        let mut stale = 0;
        for (handle, registration) in &drained {
            if !self.inner.document.disconnect(registration.observer) {
                stale += 1;
                warn!(
                    "Could not disconnect {} on {}: observer no longer connected",
                    handle, registration.target
                );
            }
        }

        if !drained.is_empty() {
            info!(
                "Cleaned up {} observers ({} already disconnected)",
                drained.len(),
                stale
            );
        }
        drained.len()
    }

    /// Forget registrations whose target has been released
    pub fn prune(&self) -> usize {
        let dead: Vec<(ObserverHandle, ObserverId)> = self
            .inner
            .state
            .borrow()
            .live
            .iter()
            .filter(|(_, r)| !self.inner.document.is_alive(r.target))
            .map(|(h, r)| (*h, r.observer))
            .collect();

        let mut state = self.inner.state.borrow_mut();
        for (handle, _) in &dead {
            state.live.remove(handle);
        }
        drop(state);

        for (_, observer) in &dead {
            self.inner.document.disconnect(*observer);
        }
        dead.len()
    }

    pub fn active_count(&self) -> usize {
        self.inner.state.borrow().live.len()
    }

    pub fn is_active(&self, handle: ObserverHandle) -> bool {
        self.inner.state.borrow().live.contains_key(&handle)
    }

    pub fn target(&self, handle: ObserverHandle) -> Option<NodeId> {
        self.inner.state.borrow().live.get(&handle).map(|r| r.target)
    }

    pub fn config(&self, handle: ObserverHandle) -> Option<ObserveConfig> {
        self.inner.state.borrow().live.get(&handle).map(|r| r.config)
    }
}
