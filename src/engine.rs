//! The query pipeline: compile, match a pre-aggregation, execute.
//!
//! A query served from a pre-aggregation is re-aggregated in memory and
//! never reaches the driver. Everything else runs against the driver under
//! a concurrency bound. Each load runs under a deadline; expiry abandons
//! the in-flight work without touching shared state.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::cache::{CacheError, RowsetCache};
use crate::config::{Settings, SettingsError};
use crate::driver::{Driver, DriverError, QueryResult};
use crate::preagg::{
    match_materialized, MaterializedPreAgg, PreAggStore, RefreshError, RefreshOptions,
    RefreshScheduler,
};
use crate::query::{
    compile, ColumnInfo, CompileError, CompileOptions, CompiledQuery, QueryRequest, DEFAULT_LIMIT,
    MAX_LIMIT,
};
use crate::schema::{Catalog, DirectorySource, SchemaError, SchemaRegistry, SecurityContext};
use crate::sql::Dialect;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no active catalog for app '{0}'")]
    NoCatalog(String),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error("query timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("engine is shut down")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub dialect: Dialect,
    pub timeout: Duration,
    pub max_concurrency: usize,
    pub default_limit: u64,
    pub max_limit: u64,
    pub refresh: RefreshOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            timeout: Duration::from_secs(30),
            max_concurrency: 8,
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
            refresh: RefreshOptions::default(),
        }
    }
}

impl EngineOptions {
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        Ok(Self {
            dialect: settings.query.dialect,
            timeout: settings.query.timeout(),
            max_concurrency: settings.query.max_concurrency,
            default_limit: settings.query.default_limit,
            max_limit: settings.query.max_limit,
            refresh: settings.refresh_options()?,
        })
    }
}

/// A query's result and how it was produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub query_id: Uuid,
    /// The SQL the query compiles to, whether or not it was executed.
    pub sql: String,
    /// Key of the pre-aggregation that served the query.
    pub pre_aggregation: Option<String>,
    pub columns: Vec<ColumnInfo>,
    pub data: QueryResult,
    pub fanout_warnings: Vec<String>,
}

pub struct Engine {
    registry: Arc<SchemaRegistry>,
    driver: Arc<dyn Driver>,
    store: Arc<PreAggStore>,
    scheduler: Arc<RefreshScheduler>,
    permits: Semaphore,
    options: EngineOptions,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        driver: Arc<dyn Driver>,
        store: Arc<PreAggStore>,
        options: EngineOptions,
    ) -> Self {
        let scheduler = Arc::new(RefreshScheduler::new(
            Arc::clone(&store),
            Arc::clone(&driver),
            options.refresh.clone(),
        ));
        Self {
            registry,
            driver,
            store,
            scheduler,
            permits: Semaphore::new(options.max_concurrency.max(1)),
            options,
        }
    }

    /// Build an engine from settings: load `schema.path` under `schema.app_id`
    /// and open the rowset store at `refresh.store_path`, if set.
    pub fn from_settings(settings: &Settings, driver: Arc<dyn Driver>) -> EngineResult<Self> {
        let app_id = settings.schema.app_id.clone();
        let registry = SchemaRegistry::with_app_id(move |_| app_id.clone());
        let source = DirectorySource::new(settings.schema.resolved_path()?);
        registry.reload_from(&SecurityContext::default(), &source)?;

        let store = match settings.refresh.resolved_store_path()? {
            Some(path) => PreAggStore::with_cache(RowsetCache::open(RowsetCache::resolve_path(&path)?)?),
            None => PreAggStore::new(),
        };

        Ok(Self::new(
            Arc::new(registry),
            driver,
            Arc::new(store),
            EngineOptions::from_settings(settings)?,
        ))
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<PreAggStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    fn catalog(&self, context: &SecurityContext) -> EngineResult<Arc<Catalog>> {
        self.registry
            .catalog(context)
            .ok_or_else(|| EngineError::NoCatalog(self.registry.app_id(context)))
    }

    fn compile_options(&self) -> CompileOptions {
        CompileOptions::default()
            .with_dialect(self.options.dialect)
            .with_limits(self.options.default_limit, self.options.max_limit)
    }

    /// Compile without executing.
    pub fn compile(
        &self,
        context: &SecurityContext,
        request: &QueryRequest,
    ) -> EngineResult<CompiledQuery> {
        let catalog = self.catalog(context)?;
        Ok(compile(&catalog, request, &self.compile_options())?)
    }

    /// Start scheduled refresh for the context's app, following reloads.
    pub fn start_refresh(&self, context: &SecurityContext) -> EngineResult<()> {
        let catalogs = self
            .registry
            .subscribe(context)
            .ok_or_else(|| EngineError::NoCatalog(self.registry.app_id(context)))?;
        self.scheduler.start(catalogs);
        Ok(())
    }

    pub async fn refresh_now(
        &self,
        context: &SecurityContext,
        key: &str,
    ) -> EngineResult<Arc<MaterializedPreAgg>> {
        let catalog = self.catalog(context)?;
        Ok(self.scheduler.refresh_now(&catalog, key).await?)
    }

    /// Run `request` under the configured deadline.
    pub async fn load(
        &self,
        context: &SecurityContext,
        request: &QueryRequest,
    ) -> EngineResult<QueryResponse> {
        self.load_with_timeout(context, request, self.options.timeout)
            .await
    }

    pub async fn load_with_timeout(
        &self,
        context: &SecurityContext,
        request: &QueryRequest,
        timeout: Duration,
    ) -> EngineResult<QueryResponse> {
        let query_id = Uuid::new_v4();
        match tokio::time::timeout(timeout, self.run(query_id, context, request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    query_id = %query_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "query timed out"
                );
                Err(EngineError::Timeout(timeout))
            }
        }
    }

    /// Run requests concurrently; results come back in request order.
    pub async fn load_many(
        &self,
        context: &SecurityContext,
        requests: &[QueryRequest],
    ) -> Vec<EngineResult<QueryResponse>> {
        join_all(requests.iter().map(|r| self.load(context, r))).await
    }

    async fn run(
        &self,
        query_id: Uuid,
        context: &SecurityContext,
        request: &QueryRequest,
    ) -> EngineResult<QueryResponse> {
        let catalog = self.catalog(context)?;
        let compiled = compile(&catalog, request, &self.compile_options())?;

        let (pre_aggregation, data) = match match_materialized(&catalog, &self.store, &compiled)? {
            Some(matched) => {
                tracing::debug!(query_id = %query_id, preagg = %matched.key, "serving from pre-aggregation");
                let data = matched.execute();
                (Some(matched.key), data)
            }
            None => {
                tracing::debug!(query_id = %query_id, "no pre-aggregation; querying source");
                let _permit = self.permits.acquire().await.map_err(|_| EngineError::Closed)?;
                (None, self.driver.execute(&compiled.sql).await?)
            }
        };

        Ok(QueryResponse {
            query_id,
            sql: compiled.sql,
            pre_aggregation,
            columns: compiled.columns,
            data,
            fanout_warnings: compiled.fanout_warnings,
        })
    }

    /// Stop refresh tasks and refuse new driver queries.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::StaticDriver;
    use crate::schema::fixtures::TAXI_MODEL;
    use crate::schema::parse_definitions;
    use serde_json::json;

    fn engine(driver: StaticDriver) -> Engine {
        let registry = SchemaRegistry::new();
        registry
            .reload(
                &SecurityContext::default(),
                &parse_definitions(TAXI_MODEL).unwrap(),
            )
            .unwrap();
        Engine::new(
            Arc::new(registry),
            Arc::new(driver),
            Arc::new(PreAggStore::new()),
            EngineOptions {
                refresh: RefreshOptions {
                    scheduled: false,
                    ..RefreshOptions::default()
                },
                ..EngineOptions::default()
            },
        )
    }

    fn boroughs() -> QueryRequest {
        QueryRequest::new()
            .measure("TaxiTrips.tripCount")
            .dimension("TaxiTrips.pickupBorough")
    }

    #[tokio::test]
    async fn test_load_from_source() {
        let rows = QueryResult::new(
            vec![
                "taxi_trips__pickup_borough".into(),
                "taxi_trips__trip_count".into(),
            ],
            vec![vec![json!("Queens"), json!(12)]],
        );
        let engine = engine(StaticDriver::new().with_result("GROUP BY 1", rows.clone()));
        let response = engine
            .load(&SecurityContext::default(), &boroughs())
            .await
            .unwrap();
        assert!(response.pre_aggregation.is_none());
        assert_eq!(response.data, rows);
        assert_eq!(response.columns.len(), 2);
    }

    #[tokio::test]
    async fn test_load_from_pre_aggregation() {
        let rows = QueryResult::new(
            vec![
                "taxi_trips__payment_method".into(),
                "taxi_trips__pickup_borough".into(),
                "taxi_trips__trip_count__count".into(),
            ],
            vec![
                vec![json!("card"), json!("Queens"), json!(5)],
                vec![json!("cash"), json!("Queens"), json!(2)],
                vec![json!("card"), json!("Bronx"), json!(4)],
            ],
        );
        let driver = StaticDriver::new().with_result("payment_name", rows);
        let engine = engine(driver);
        let context = SecurityContext::default();
        engine
            .refresh_now(&context, "TaxiTrips.paymentAnalysis")
            .await
            .unwrap();

        let response = engine.load(&context, &boroughs()).await.unwrap();
        assert_eq!(
            response.pre_aggregation.as_deref(),
            Some("TaxiTrips.paymentAnalysis")
        );
        assert_eq!(
            response.data.rows,
            vec![
                vec![json!("Queens"), json!(7)],
                vec![json!("Bronx"), json!(4)],
            ]
        );
    }

    #[tokio::test]
    async fn test_no_catalog() {
        let engine = Engine::new(
            Arc::new(SchemaRegistry::new()),
            Arc::new(StaticDriver::new()),
            Arc::new(PreAggStore::new()),
            EngineOptions::default(),
        );
        let err = engine
            .load(&SecurityContext::default(), &boroughs())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoCatalog(app) if app == "CUBE_APP"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let engine = engine(StaticDriver::new().with_delay(Duration::from_secs(60)));
        let err = engine
            .load_with_timeout(
                &SecurityContext::default(),
                &boroughs(),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_load_many_keeps_order() {
        let engine = engine(StaticDriver::new());
        let requests = vec![
            boroughs(),
            QueryRequest::new().measure("TaxiTrips.nope"),
            QueryRequest::new().measure("TaxiZones.totalZones"),
        ];
        let results = engine
            .load_many(&SecurityContext::default(), &requests)
            .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(EngineError::Compile(_))));
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_refuses_source_queries() {
        let engine = engine(StaticDriver::new());
        engine.shutdown();
        let err = engine
            .load(&SecurityContext::default(), &boroughs())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Closed));
    }
}
