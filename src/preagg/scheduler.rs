//! Background refresh of pre-aggregations.
//!
//! One task per pre-aggregation ticks at its `refreshKey.every` interval.
//! A supervisor task follows catalog activations and reconciles the set of
//! per-key tasks: new specs get a task, removed specs lose theirs and their
//! rows, and a changed definition restarts its task from empty.
//!
//! Refreshes of different keys run concurrently; the store guarantees at
//! most one refresh per key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::error::{RefreshError, RefreshResult};
use super::rollup::materialization;
use super::store::{MaterializedPreAgg, PreAggStore};
use crate::driver::Driver;
use crate::model::{Cube, PreAggregation};
use crate::schema::{pre_aggregation_key, Catalog};
use crate::sql::Dialect;

/// Interval used when a spec has no `refreshKey.every`.
pub const DEFAULT_REFRESH_EVERY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct RefreshOptions {
    pub dialect: Dialect,
    pub default_every: Duration,
    /// Spawn per-key timers. When off, refreshes only happen on demand.
    pub scheduled: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            default_every: DEFAULT_REFRESH_EVERY,
            scheduled: true,
        }
    }
}

struct RefreshTask {
    fingerprint: String,
    handle: Option<JoinHandle<()>>,
}

impl RefreshTask {
    fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// A key claimed by `begin_refresh`. Dropped unsettled, as when the
/// refreshing future is cancelled, it records a failure so the key goes
/// back to `Stale`.
struct RefreshClaim<'a> {
    store: &'a PreAggStore,
    key: &'a str,
    settled: bool,
}

impl RefreshClaim<'_> {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for RefreshClaim<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::warn!(preagg = %self.key, "refresh cancelled");
        if let Err(e) = self.store.fail(self.key, "refresh cancelled") {
            tracing::debug!(preagg = %self.key, error = %e, "cancelled refresh already released");
        }
    }
}

pub struct RefreshScheduler {
    store: Arc<PreAggStore>,
    driver: Arc<dyn Driver>,
    options: RefreshOptions,
    tasks: Mutex<HashMap<String, RefreshTask>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("options", &self.options)
            .field("tasks", &self.tasks().len())
            .finish_non_exhaustive()
    }
}

impl RefreshScheduler {
    pub fn new(store: Arc<PreAggStore>, driver: Arc<dyn Driver>, options: RefreshOptions) -> Self {
        Self {
            store,
            driver,
            options,
            tasks: Mutex::new(HashMap::new()),
            supervisor: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<PreAggStore> {
        &self.store
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, RefreshTask>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Keys with a live refresh task, sorted.
    pub fn scheduled_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .tasks()
            .iter()
            .filter(|(_, t)| t.handle.is_some())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Refresh `key` now, unconditionally.
    pub async fn refresh_now(
        &self,
        catalog: &Catalog,
        key: &str,
    ) -> RefreshResult<Arc<MaterializedPreAgg>> {
        self.refresh(catalog, key, false).await
    }

    /// Refresh `key`. With `check_key`, a `refreshKey.sql` whose value has
    /// not changed since the last refresh keeps the current rows.
    async fn refresh(
        &self,
        catalog: &Catalog,
        key: &str,
        check_key: bool,
    ) -> RefreshResult<Arc<MaterializedPreAgg>> {
        let (cube, spec) = catalog
            .pre_aggregation(key)
            .ok_or_else(|| RefreshError::UnknownPreAggregation(key.to_string()))?;
        let fingerprint = catalog.fingerprint(cube, spec);
        self.store.ensure(key, &fingerprint);
        self.store.begin_refresh(key)?;
        let claim = RefreshClaim {
            store: &self.store,
            key,
            settled: false,
        };

        let started = Instant::now();
        tracing::debug!(preagg = %key, "refresh started");
        let outcome = self.materialize(catalog, cube, spec, &fingerprint, check_key).await;
        claim.settle();
        match outcome {
            Ok(m) => {
                tracing::info!(
                    preagg = %key,
                    rows = m.row_count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "refreshed"
                );
                Ok(m)
            }
            Err(e) => {
                tracing::warn!(preagg = %key, error = %e, "refresh failed");
                if let Err(state) = self.store.fail(key, &e.to_string()) {
                    tracing::error!(preagg = %key, error = %state, "could not record refresh failure");
                }
                Err(e)
            }
        }
    }

    async fn materialize(
        &self,
        catalog: &Catalog,
        cube: &Cube,
        spec: &PreAggregation,
        fingerprint: &str,
        check_key: bool,
    ) -> RefreshResult<Arc<MaterializedPreAgg>> {
        let key = pre_aggregation_key(cube, spec);
        let key_value = match &spec.refresh_key.sql {
            Some(sql) => Some(
                self.driver
                    .execute(sql)
                    .await?
                    .scalar()
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
            ),
            None => None,
        };

        if check_key && key_value.is_some() {
            if let Some(current) = self.store.get(&key) {
                if current.is_servable()
                    && current.fingerprint == fingerprint
                    && current.refresh_key_value == key_value
                {
                    tracing::debug!(preagg = %key, "refresh key unchanged");
                    return self.store.confirm(&key);
                }
            }
        }

        let plan = materialization(catalog, cube, spec, self.options.dialect)?;
        let data = self.driver.execute(&plan.sql).await?;
        self.store.commit(&key, fingerprint, data, key_value)
    }

    /// Follow catalog activations on `catalogs` until the sender is dropped
    /// or [`shutdown`](Self::shutdown) is called.
    pub fn start(self: &Arc<Self>, mut catalogs: watch::Receiver<Arc<Catalog>>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let catalog = catalogs.borrow_and_update().clone();
                this.reconcile(&catalog, &catalogs);
                if catalogs.changed().await.is_err() {
                    tracing::debug!("catalog channel closed; supervisor exiting");
                    break;
                }
            }
        });
        let mut supervisor = self.supervisor.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = supervisor.replace(handle) {
            previous.abort();
        }
    }

    /// Bring the task set in line with `catalog`.
    pub fn reconcile(self: &Arc<Self>, catalog: &Catalog, catalogs: &watch::Receiver<Arc<Catalog>>) {
        let desired: HashMap<String, (String, Duration)> = catalog
            .pre_aggregations()
            .map(|(cube, spec)| {
                let every = spec
                    .refresh_key
                    .every
                    .as_ref()
                    .map(|e| e.as_duration())
                    .unwrap_or(self.options.default_every);
                (
                    pre_aggregation_key(cube, spec),
                    (catalog.fingerprint(cube, spec), every),
                )
            })
            .collect();

        let mut tasks = self.tasks();
        tasks.retain(|key, task| {
            if desired.contains_key(key) {
                return true;
            }
            task.abort();
            self.store.remove(key);
            tracing::info!(preagg = %key, "pre-aggregation removed");
            false
        });

        for (key, (fingerprint, every)) in desired {
            if let Some(task) = tasks.get(&key) {
                if task.fingerprint == fingerprint {
                    continue;
                }
                task.abort();
                tracing::info!(preagg = %key, "pre-aggregation changed; restarting refresh");
                self.store.reset(&key, &fingerprint);
            } else {
                self.store.ensure(&key, &fingerprint);
            }
            let handle = self
                .options
                .scheduled
                .then(|| self.spawn_refresh_task(key.clone(), every, catalogs.clone()));
            tasks.insert(key, RefreshTask { fingerprint, handle });
        }
    }

    fn spawn_refresh_task(
        self: &Arc<Self>,
        key: String,
        every: Duration,
        catalogs: watch::Receiver<Arc<Catalog>>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // The first tick completes immediately.
                ticker.tick().await;
                let catalog = catalogs.borrow().clone();
                this.store.mark_stale(&key);
                match this.refresh(&catalog, &key, true).await {
                    Ok(_) => {}
                    Err(RefreshError::AlreadyRefreshing(_)) => {
                        tracing::debug!(preagg = %key, "refresh in progress; skipping tick");
                    }
                    // Already logged; the next tick retries.
                    Err(_) => {}
                }
            }
        })
    }

    /// Abort the supervisor and every refresh task.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .supervisor
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
        for (_, task) in self.tasks().drain() {
            task.abort();
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
