//! Materialized pre-aggregations and their refresh state.
//!
//! Entries are replaced whole under the map's entry lock, so a reader
//! holding an `Arc<MaterializedPreAgg>` never observes a partial commit.
//! A failed refresh keeps the previous rows servable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{RefreshError, RefreshResult};
use super::state::RefreshState;
use crate::cache::RowsetCache;
use crate::driver::QueryResult;

/// One pre-aggregation's materialized rowset.
#[derive(Debug, Clone)]
pub struct MaterializedPreAgg {
    pub key: String,
    /// Fingerprint of the definition the rows were built from.
    pub fingerprint: String,
    pub refresh_state: RefreshState,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Result of the refresh key query at the last refresh.
    pub refresh_key_value: Option<Value>,
    pub data: Arc<QueryResult>,
}

impl MaterializedPreAgg {
    fn empty(key: &str, fingerprint: &str) -> Self {
        Self {
            key: key.to_string(),
            fingerprint: fingerprint.to_string(),
            refresh_state: RefreshState::Stale,
            last_refreshed_at: None,
            last_error: None,
            refresh_key_value: None,
            data: Arc::new(QueryResult::default()),
        }
    }

    /// Has it ever been materialized?
    pub fn is_servable(&self) -> bool {
        self.last_refreshed_at.is_some()
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }
}

#[derive(Serialize)]
struct PersistedRef<'a> {
    fingerprint: &'a str,
    last_refreshed_at: Option<DateTime<Utc>>,
    refresh_key_value: &'a Option<Value>,
    data: &'a QueryResult,
}

#[derive(Deserialize)]
struct Persisted {
    fingerprint: String,
    last_refreshed_at: Option<DateTime<Utc>>,
    refresh_key_value: Option<Value>,
    data: QueryResult,
}

/// Concurrent map of materialized pre-aggregations keyed by `Cube.preAgg`,
/// optionally written through to a [`RowsetCache`].
#[derive(Debug, Default)]
pub struct PreAggStore {
    entries: DashMap<String, Arc<MaterializedPreAgg>>,
    cache: Option<RowsetCache>,
}

impl PreAggStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store backed by `cache`. Persisted rowsets come back as `Stale`.
    pub fn with_cache(cache: RowsetCache) -> Self {
        let store = Self {
            entries: DashMap::new(),
            cache: Some(cache),
        };
        store.restore();
        store
    }

    fn restore(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        let keys = match cache.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list persisted pre-aggregations");
                return;
            }
        };
        let mut restored = 0;
        for key in keys {
            match cache.get::<Persisted>(&key) {
                Ok(Some(p)) => {
                    let entry = MaterializedPreAgg {
                        fingerprint: p.fingerprint,
                        last_refreshed_at: p.last_refreshed_at,
                        refresh_key_value: p.refresh_key_value,
                        data: Arc::new(p.data),
                        ..MaterializedPreAgg::empty(&key, "")
                    };
                    self.entries.insert(key, Arc::new(entry));
                    restored += 1;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(preagg = %key, error = %e, "skipping unreadable rowset"),
            }
        }
        if restored > 0 {
            tracing::info!(count = restored, "restored persisted pre-aggregations");
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<MaterializedPreAgg>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn state(&self, key: &str) -> Option<RefreshState> {
        self.entries.get(key).map(|e| e.refresh_state)
    }

    /// All entries, sorted by key.
    pub fn entries(&self) -> Vec<Arc<MaterializedPreAgg>> {
        let mut entries: Vec<_> = self.entries.iter().map(|e| Arc::clone(e.value())).collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Track `key` at `fingerprint`. An entry built from a different
    /// definition loses its rows; its refresh state is kept so an in-flight
    /// refresh still completes.
    pub fn ensure(&self, key: &str, fingerprint: &str) {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(MaterializedPreAgg::empty(key, fingerprint)));
        if entry.fingerprint != fingerprint {
            tracing::info!(preagg = %key, "definition changed; discarding materialized rows");
            let next = MaterializedPreAgg {
                refresh_state: entry.refresh_state,
                ..MaterializedPreAgg::empty(key, fingerprint)
            };
            *entry = Arc::new(next);
            drop(entry);
            self.forget(key);
        }
    }

    /// Start `key` over at `fingerprint`: no rows, `Stale`. Used when the
    /// refresh task that owned the entry was cancelled mid-refresh.
    pub fn reset(&self, key: &str, fingerprint: &str) {
        self.entries.insert(
            key.to_string(),
            Arc::new(MaterializedPreAgg::empty(key, fingerprint)),
        );
        self.forget(key);
    }

    /// Stop tracking `key` and drop its persisted rows.
    pub fn remove(&self, key: &str) -> Option<Arc<MaterializedPreAgg>> {
        let removed = self.entries.remove(key).map(|(_, v)| v);
        self.forget(key);
        removed
    }

    fn forget(&self, key: &str) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete(key) {
                tracing::warn!(preagg = %key, error = %e, "failed to delete persisted rowset");
            }
        }
    }

    /// Apply `f` to a copy of the entry and swap it in, validating each
    /// state transition it makes.
    fn update<F>(&self, key: &str, f: F) -> RefreshResult<Arc<MaterializedPreAgg>>
    where
        F: FnOnce(&mut MaterializedPreAgg) -> RefreshResult<()>,
    {
        let mut entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| RefreshError::UnknownPreAggregation(key.to_string()))?;
        let mut next = MaterializedPreAgg::clone(&entry);
        f(&mut next)?;
        let next = Arc::new(next);
        *entry = Arc::clone(&next);
        Ok(next)
    }

    /// Claim `key` for refreshing. `Fresh` and `Failed` entries pass through
    /// `Stale` first; a key already `Refreshing` is refused.
    pub fn begin_refresh(&self, key: &str) -> RefreshResult<()> {
        self.update(key, |m| {
            if m.refresh_state == RefreshState::Refreshing {
                return Err(RefreshError::AlreadyRefreshing(key.to_string()));
            }
            if m.refresh_state != RefreshState::Stale {
                transition(m, RefreshState::Stale)?;
            }
            transition(m, RefreshState::Refreshing)
        })
        .map(|_| ())
    }

    /// `Fresh` -> `Stale`, once the refresh interval has elapsed. Other
    /// states are left alone.
    pub fn mark_stale(&self, key: &str) {
        let marked = self.update(key, |m| {
            if m.refresh_state == RefreshState::Fresh {
                transition(m, RefreshState::Stale)?;
            }
            Ok(())
        });
        if let Err(e) = marked {
            tracing::debug!(preagg = %key, error = %e, "not marked stale");
        }
    }

    /// Swap in a new rowset and mark the entry `Fresh`. The transition is
    /// checked before anything is persisted, and the rows are persisted
    /// before they become visible.
    pub fn commit(
        &self,
        key: &str,
        fingerprint: &str,
        data: QueryResult,
        refresh_key_value: Option<Value>,
    ) -> RefreshResult<Arc<MaterializedPreAgg>> {
        let now = Utc::now();
        self.update(key, move |m| {
            transition(m, RefreshState::Fresh)?;
            if let Some(cache) = &self.cache {
                cache.set(
                    key,
                    &PersistedRef {
                        fingerprint,
                        last_refreshed_at: Some(now),
                        refresh_key_value: &refresh_key_value,
                        data: &data,
                    },
                )?;
            }
            m.fingerprint = fingerprint.to_string();
            m.data = Arc::new(data);
            m.refresh_key_value = refresh_key_value;
            m.last_refreshed_at = Some(now);
            m.last_error = None;
            Ok(())
        })
    }

    /// The refresh key did not change: keep the rows, mark `Fresh`.
    pub fn confirm(&self, key: &str) -> RefreshResult<Arc<MaterializedPreAgg>> {
        self.update(key, |m| {
            transition(m, RefreshState::Fresh)?;
            m.last_refreshed_at = Some(Utc::now());
            m.last_error = None;
            Ok(())
        })
    }

    /// Record a failed refresh: `Refreshing` -> `Failed` -> `Stale`, keeping
    /// the previous rows.
    pub fn fail(&self, key: &str, error: &str) -> RefreshResult<Arc<MaterializedPreAgg>> {
        self.update(key, |m| {
            transition(m, RefreshState::Failed)?;
            m.last_error = Some(error.to_string());
            transition(m, RefreshState::Stale)
        })
    }
}

fn transition(m: &mut MaterializedPreAgg, to: RefreshState) -> RefreshResult<()> {
    if !m.refresh_state.can_transition_to(to) {
        return Err(RefreshError::InvalidTransition {
            key: m.key.clone(),
            from: m.refresh_state,
            to,
        });
    }
    m.refresh_state = to;
    Ok(())
}
