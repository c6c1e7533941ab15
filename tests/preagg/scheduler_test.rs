// tests/preagg/scheduler_test.rs
#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{taxi_registry, TAXI_MODEL};
use cubist::driver::{QueryResult, StaticDriver};
use cubist::preagg::{
    PreAggStore, RefreshError, RefreshOptions, RefreshScheduler, RefreshState,
};
use cubist::schema::{parse_definitions, SchemaRegistry, SecurityContext};
use serde_json::json;

const KEYS: [&str; 4] = [
    "TaxiTrips.dailyOperations",
    "TaxiTrips.paymentAnalysis",
    "TaxiTrips.tripFlow",
    "TaxiZones.boroughSummary",
];

fn scheduler(driver: Arc<StaticDriver>, scheduled: bool) -> Arc<RefreshScheduler> {
    Arc::new(RefreshScheduler::new(
        Arc::new(PreAggStore::new()),
        driver,
        RefreshOptions {
            scheduled,
            ..RefreshOptions::default()
        },
    ))
}

/// Let spawned refresh tasks run to completion without reaching the next
/// interval tick.
async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn reload(registry: &SchemaRegistry, model: &str) {
    registry
        .reload(&SecurityContext::default(), &parse_definitions(model).unwrap())
        .unwrap();
}

fn executed_matching(driver: &StaticDriver, needle: &str) -> usize {
    driver.executed().iter().filter(|sql| sql.contains(needle)).count()
}

#[tokio::test(start_paused = true)]
async fn test_start_refreshes_every_pre_aggregation() {
    let registry = taxi_registry();
    let driver = Arc::new(StaticDriver::new());
    let scheduler = scheduler(driver.clone(), true);

    scheduler.start(registry.subscribe(&SecurityContext::default()).unwrap());
    settle().await;

    assert_eq!(scheduler.scheduled_keys(), KEYS);
    for key in KEYS {
        assert_eq!(scheduler.store().state(key), Some(RefreshState::Fresh), "{key}");
    }
    assert_eq!(driver.executed().len(), 4);
    scheduler.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_interval_elapses_and_refreshes_again() {
    let registry = taxi_registry();
    let driver = Arc::new(StaticDriver::new());
    let scheduler = scheduler(driver.clone(), true);
    scheduler.start(registry.subscribe(&SecurityContext::default()).unwrap());
    settle().await;

    // dailyOperations refreshes hourly; the zone summary daily.
    tokio::time::advance(Duration::from_secs(60 * 60)).await;
    settle().await;
    assert_eq!(executed_matching(&driver, "DATE_TRUNC('day'"), 2);
    assert_eq!(executed_matching(&driver, "dim_taxi_zones_geospatial"), 1);
    assert_eq!(
        scheduler.store().state("TaxiTrips.dailyOperations"),
        Some(RefreshState::Fresh)
    );
    scheduler.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_reload_reconciles_tasks() {
    let registry = taxi_registry();
    let driver = Arc::new(StaticDriver::new());
    let scheduler = scheduler(driver.clone(), true);
    scheduler.start(registry.subscribe(&SecurityContext::default()).unwrap());
    settle().await;
    let before = scheduler.store().get("TaxiTrips.tripFlow").unwrap();

    // Rename one spec and change the grain of another.
    let model = TAXI_MODEL
        .replace("boroughSummary", "zoneSummary")
        .replace(r#""granularity": "day""#, r#""granularity": "hour""#);
    reload(&registry, &model);
    settle().await;

    let keys = scheduler.scheduled_keys();
    assert!(keys.contains(&"TaxiZones.zoneSummary".to_string()));
    assert!(!keys.contains(&"TaxiZones.boroughSummary".to_string()));
    assert!(scheduler.store().get("TaxiZones.boroughSummary").is_none());
    assert_eq!(
        scheduler.store().state("TaxiZones.zoneSummary"),
        Some(RefreshState::Fresh)
    );

    // The changed spec rebuilt at the new grain.
    assert_eq!(executed_matching(&driver, "DATE_TRUNC('hour'"), 1);
    assert_eq!(
        scheduler.store().state("TaxiTrips.dailyOperations"),
        Some(RefreshState::Fresh)
    );

    // Untouched specs kept their task and rows.
    let after = scheduler.store().get("TaxiTrips.tripFlow").unwrap();
    assert_eq!(after.last_refreshed_at, before.last_refreshed_at);
    assert_eq!(executed_matching(&driver, "fct_taxi_trips"), 3 + 1);
    scheduler.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_refresh_key_skips_materialization() {
    let model = TAXI_MODEL.replace(
        r#""refreshKey": { "every": "4 hours" }"#,
        r#""refreshKey": { "every": "4 hours", "sql": "SELECT MAX(updated_at) FROM trip_log" }"#,
    );
    let registry = SchemaRegistry::new();
    reload(&registry, &model);

    let driver = Arc::new(StaticDriver::new().with_result(
        "MAX(updated_at)",
        QueryResult::new(vec!["max".into()], vec![vec![json!("2024-03-13T00:00:00")]]),
    ));
    let scheduler = scheduler(driver.clone(), true);
    scheduler.start(registry.subscribe(&SecurityContext::default()).unwrap());
    settle().await;

    let key = "TaxiTrips.paymentAnalysis";
    let first = scheduler.store().get(key).unwrap();
    assert_eq!(first.refresh_key_value, Some(json!("2024-03-13T00:00:00")));
    assert_eq!(executed_matching(&driver, "payment_name"), 1);

    tokio::time::advance(Duration::from_secs(4 * 60 * 60)).await;
    settle().await;

    // Key checked again, rows kept.
    assert_eq!(executed_matching(&driver, "MAX(updated_at)"), 2);
    assert_eq!(executed_matching(&driver, "payment_name"), 1);
    let second = scheduler.store().get(key).unwrap();
    assert_eq!(second.refresh_state, RefreshState::Fresh);
    assert!(Arc::ptr_eq(&first.data, &second.data));
    assert_eq!(second.refresh_key_value, first.refresh_key_value);
    scheduler.shutdown();
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_rows() {
    let registry = taxi_registry();
    let catalog = registry.catalog(&SecurityContext::default()).unwrap();
    let key = "TaxiTrips.paymentAnalysis";

    let rows = QueryResult::new(
        vec!["taxi_trips__payment_method".into()],
        vec![vec![json!("card")]],
    );
    let good = RefreshScheduler::new(
        Arc::new(PreAggStore::new()),
        Arc::new(StaticDriver::new().with_result("payment_name", rows)),
        RefreshOptions {
            scheduled: false,
            ..RefreshOptions::default()
        },
    );
    good.refresh_now(&catalog, key).await.unwrap();

    let failing = RefreshScheduler::new(
        good.store().clone(),
        Arc::new(StaticDriver::new().with_error("payment_name", "warehouse offline")),
        RefreshOptions {
            scheduled: false,
            ..RefreshOptions::default()
        },
    );
    let err = failing.refresh_now(&catalog, key).await.unwrap_err();
    assert!(matches!(err, RefreshError::Driver(_)));

    let m = good.store().get(key).unwrap();
    assert_eq!(m.refresh_state, RefreshState::Stale);
    assert!(m.is_servable());
    assert_eq!(m.row_count(), 1);
    assert!(m.last_error.as_deref().unwrap_or("").contains("warehouse offline"));
}

#[tokio::test(start_paused = true)]
async fn test_one_refresh_per_key_at_a_time() {
    let registry = taxi_registry();
    let catalog = registry.catalog(&SecurityContext::default()).unwrap();
    let driver = Arc::new(StaticDriver::new().with_delay(Duration::from_secs(5)));
    let scheduler = scheduler(driver.clone(), false);

    let key = "TaxiTrips.tripFlow";
    let (first, second) = tokio::join!(
        scheduler.refresh_now(&catalog, key),
        scheduler.refresh_now(&catalog, key)
    );
    assert!(first.is_ok());
    assert!(matches!(second, Err(RefreshError::AlreadyRefreshing(_))));
    assert_eq!(driver.executed().len(), 1);

    // Different keys refresh concurrently.
    let (a, b) = tokio::join!(
        scheduler.refresh_now(&catalog, "TaxiTrips.dailyOperations"),
        scheduler.refresh_now(&catalog, "TaxiZones.boroughSummary")
    );
    assert!(a.is_ok() && b.is_ok());
}
