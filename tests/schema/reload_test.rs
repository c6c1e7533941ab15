// tests/schema/reload_test.rs
#[path = "../common/mod.rs"]
mod common;

use common::{taxi_registry, TAXI_MODEL};
use cubist::schema::{parse_definitions, SecurityContext, ViolationKind};

const ORDERS: &str = r#"{
    "name": "Orders",
    "sql_table": "orders",
    "dimensions": { "status": { "sql": "status", "type": "string" } },
    "measures": { "count": { "type": "count" } }
}"#;

#[test]
fn test_rejected_reload_keeps_active_catalog() {
    let registry = taxi_registry();
    let ctx = SecurityContext::default();
    let before = registry.catalog(&ctx).unwrap();

    let mut definitions = parse_definitions(TAXI_MODEL).unwrap();
    definitions.extend(parse_definitions(TAXI_MODEL).unwrap());
    let err = registry.reload(&ctx, &definitions).unwrap_err();
    assert!(err.has_kind(ViolationKind::DuplicateName));

    let after = registry.catalog(&ctx).unwrap();
    assert_eq!(after.version(), before.version());
    assert!(after.cube("TaxiTrips").is_some());
}

#[test]
fn test_all_violations_are_reported() {
    let registry = taxi_registry();
    let broken = r#"[
        {
            "name": "Orders",
            "sql_table": "orders",
            "joins": { "Customers": { "relationship": "many_to_one", "sql": "${CUBE}.customer_id = ${Customers}.id" } },
            "measures": { "total": { "type": "sum" } }
        },
        { "name": "Orders", "sql_table": "orders_copy" }
    ]"#;
    let err = registry
        .reload(&SecurityContext::default(), &parse_definitions(broken).unwrap())
        .unwrap_err();

    assert!(err.has_kind(ViolationKind::DuplicateName));
    assert!(err.has_kind(ViolationKind::UnresolvedReference));
    assert!(err.has_kind(ViolationKind::InvalidMeasureSpec));
}

#[test]
fn test_versions_increase() {
    let registry = taxi_registry();
    let ctx = SecurityContext::default();
    let first = registry.catalog(&ctx).unwrap().version();

    let second = registry
        .reload(&ctx, &parse_definitions(ORDERS).unwrap())
        .unwrap()
        .version();
    let third = registry
        .reload(&ctx, &parse_definitions(TAXI_MODEL).unwrap())
        .unwrap()
        .version();
    assert!(first < second && second < third);
}

#[tokio::test]
async fn test_subscribers_see_activation() {
    let registry = taxi_registry();
    let ctx = SecurityContext::default();
    let mut rx = registry.subscribe(&ctx).unwrap();
    let initial = rx.borrow_and_update().version();

    registry
        .reload(&ctx, &parse_definitions(ORDERS).unwrap())
        .unwrap();

    rx.changed().await.unwrap();
    let current = rx.borrow().clone();
    assert!(current.version() > initial);
    assert!(current.cube("Orders").is_some());
    assert!(current.cube("TaxiTrips").is_none());
}

#[test]
fn test_rejected_reload_does_not_notify() {
    let registry = taxi_registry();
    let ctx = SecurityContext::default();
    let mut rx = registry.subscribe(&ctx).unwrap();
    rx.borrow_and_update();

    let dup = format!("[{ORDERS}, {ORDERS}]");
    assert!(registry
        .reload(&ctx, &parse_definitions(&dup).unwrap())
        .is_err());
    assert!(!rx.has_changed().unwrap());
}
