//! Active catalogs, one slot per app id.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::catalog::Catalog;
use super::definition::CubeDefinition;
use super::error::SchemaResult;
use super::loader::load;
use super::source::SchemaSource;

/// App id used when no mapping is configured.
pub const DEFAULT_APP_ID: &str = "CUBE_APP";

/// Opaque request security context. Only `context_to_app_id` looks inside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityContext(pub serde_json::Value);

type AppIdFn = dyn Fn(&SecurityContext) -> String + Send + Sync;

/// Holds the last-good catalog for every app id.
///
/// A successful reload replaces the slot's `Arc<Catalog>` in one step, so a
/// reader sees either the old catalog or the new one. A failed reload leaves
/// the slot untouched.
pub struct SchemaRegistry {
    slots: DashMap<String, watch::Sender<Arc<Catalog>>>,
    next_version: AtomicU64,
    context_to_app_id: Arc<AppIdFn>,
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("apps", &self.app_ids())
            .finish()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// Every context maps to [`DEFAULT_APP_ID`].
    pub fn new() -> Self {
        Self::with_app_id(|_| DEFAULT_APP_ID.to_string())
    }

    pub fn with_app_id<F>(context_to_app_id: F) -> Self
    where
        F: Fn(&SecurityContext) -> String + Send + Sync + 'static,
    {
        Self {
            slots: DashMap::new(),
            next_version: AtomicU64::new(1),
            context_to_app_id: Arc::new(context_to_app_id),
        }
    }

    pub fn app_id(&self, context: &SecurityContext) -> String {
        (self.context_to_app_id)(context)
    }

    /// App ids with an active catalog, sorted.
    pub fn app_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Validate `definitions` and make them the active catalog for the
    /// context's app id.
    pub fn reload(
        &self,
        context: &SecurityContext,
        definitions: &[CubeDefinition],
    ) -> SchemaResult<Arc<Catalog>> {
        let app_id = self.app_id(context);
        let catalog = match load(definitions) {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::warn!(
                    app_id = %app_id,
                    violations = e.violations().len(),
                    "schema rejected; keeping the active catalog"
                );
                return Err(e);
            }
        };

        // Versions are taken under the slot lock so activations stay ordered.
        let catalog = match self.slots.entry(app_id.clone()) {
            Entry::Occupied(slot) => {
                let catalog = Arc::new(catalog.with_version(self.bump()));
                slot.get().send_replace(catalog.clone());
                catalog
            }
            Entry::Vacant(slot) => {
                let catalog = Arc::new(catalog.with_version(self.bump()));
                slot.insert(watch::channel(catalog.clone()).0);
                catalog
            }
        };
        let version = catalog.version();
        tracing::info!(
            app_id = %app_id,
            version,
            cubes = catalog.cubes().len(),
            "catalog activated"
        );
        Ok(catalog)
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Read definitions from `source`, then [`reload`](Self::reload).
    pub fn reload_from(
        &self,
        context: &SecurityContext,
        source: &dyn SchemaSource,
    ) -> SchemaResult<Arc<Catalog>> {
        let definitions = source.read().inspect_err(|e| {
            tracing::warn!(source = %source.name(), error = %e, "schema source unreadable");
        })?;
        self.reload(context, &definitions)
    }

    /// Snapshot of the active catalog.
    pub fn catalog(&self, context: &SecurityContext) -> Option<Arc<Catalog>> {
        let app_id = self.app_id(context);
        self.slots.get(&app_id).map(|slot| slot.borrow().clone())
    }

    /// Watch catalog activations for the context's app id.
    pub fn subscribe(&self, context: &SecurityContext) -> Option<watch::Receiver<Arc<Catalog>>> {
        let app_id = self.app_id(context);
        self.slots.get(&app_id).map(|slot| slot.subscribe())
    }
}
