//! Per-page integration lifecycle
//!
//! A `PageSession` bundles the observation pieces for one loaded page and is
//! the boundary where DOM failures during setup are absorbed: a feature that
//! cannot be wired is logged and skipped while the rest of the page keeps
//! working.

use serde::Serialize;
use tracing::{info, warn};

use crate::dom::Document;
use crate::error::{Result, VidqaError};
use crate::observe::{ElementWatcher, HandlerWiring, ObservationRegistry};

/// Outcome of the features installed so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetupReport {
    pub installed: Vec<String>,
    pub degraded: Vec<String>,
}

impl SetupReport {
    pub fn is_complete(&self) -> bool {
        self.degraded.is_empty()
    }
}

#[derive(Debug)]
pub struct PageSession {
    document: Document,
    registry: ObservationRegistry,
    watcher: ElementWatcher,
    wiring: HandlerWiring,
    report: SetupReport,
    torn_down: bool,
}

impl PageSession {
    pub fn new(document: Document) -> Self {
        let registry = ObservationRegistry::new(document.clone());
        let watcher = ElementWatcher::new(registry.clone());
        Self {
            document,
            registry,
            watcher,
            wiring: HandlerWiring::new(),
            report: SetupReport::default(),
            torn_down: false,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn registry(&self) -> &ObservationRegistry {
        &self.registry
    }

    pub fn watcher(&self) -> &ElementWatcher {
        &self.watcher
    }

    pub fn wiring(&self) -> &HandlerWiring {
        &self.wiring
    }

    pub fn report(&self) -> &SetupReport {
        &self.report
    }

    /// Run one feature's setup
    ///
    /// Returns `Ok(false)` when the setup hit a DOM failure; that feature is
    /// recorded as degraded and the session stays usable. Any other error,
    /// including a malformed selector, is returned to the caller.
    pub fn install<F>(&mut self, feature: &str, setup: F) -> Result<bool>
    where
        F: FnOnce(&ElementWatcher, &HandlerWiring, &Document) -> Result<()>,
    {
        match setup(&self.watcher, &self.wiring, &self.document) {
            Ok(()) => {
                info!("Installed page feature '{}'", feature);
                self.report.installed.push(feature.to_string());
                Ok(true)
            }
            Err(VidqaError::Dom(e)) => {
                warn!("Page feature '{}' skipped: {}", feature, e);
                self.report.degraded.push(feature.to_string());
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop every watch, disconnect every observer and unhook handlers
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let watches = self.watcher.stop_all();
        let observers = self.registry.cleanup_all();
        let handlers = self.wiring.teardown_all(&self.document);
        info!(
            "Page session torn down: {} watches, {} stray observers, {} handlers",
            watches, observers, handlers
        );
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
