// tests/query/filter_test.rs
#[path = "../common/mod.rs"]
mod common;

use common::{compile_ok, request, taxi_catalog};
use cubist::query::{compile, CompileErrorKind, CompileOptions, Filter, FilterNode, QueryRequest};
use serde_json::json;

fn where_clause(sql: &str) -> &str {
    let start = sql.find("WHERE").expect("no WHERE clause");
    let end = ["GROUP BY", "HAVING", "ORDER BY", "LIMIT"]
        .iter()
        .filter_map(|kw| sql[start..].find(kw).map(|i| start + i))
        .min()
        .unwrap_or(sql.len());
    &sql[start..end]
}

#[test]
fn test_nested_boolean_groups() {
    let catalog = taxi_catalog();
    let compiled = compile_ok(
        &catalog,
        &request(
            r#"{
                "measures": ["TaxiTrips.tripCount"],
                "filters": [{
                    "or": [
                        { "member": "TaxiTrips.pickupBorough", "operator": "equals", "values": ["Queens"] },
                        { "and": [
                            { "member": "TaxiTrips.pickupBorough", "operator": "equals", "values": ["Manhattan"] },
                            { "member": "TaxiTrips.passengerCount", "operator": "gte", "values": [3] }
                        ]}
                    ]
                }]
            }"#,
        ),
    );

    assert_eq!(compiled.filters.len(), 1);
    let FilterNode::Or(branches) = &compiled.filters[0] else {
        panic!("expected an or group, got {:?}", compiled.filters[0]);
    };
    assert!(matches!(branches[1], FilterNode::And(_)));

    let clause = where_clause(&compiled.sql);
    assert!(clause.contains("pickup_borough = 'Queens'"));
    assert!(clause.contains("pickup_borough = 'Manhattan'"));
    assert!(clause.contains("passenger_count >= 3"));
    assert!(clause.contains(" OR "));
    assert!(clause.contains(" AND "));
}

#[test]
fn test_top_level_filters_are_anded() {
    let catalog = taxi_catalog();
    let compiled = compile_ok(
        &catalog,
        &QueryRequest::new()
            .measure("TaxiTrips.tripCount")
            .filter(Filter::member("TaxiTrips.pickupBorough", "notEquals", vec![json!("Bronx")]))
            .filter(Filter::member("TaxiTrips.vendorName", "startsWith", vec![json!("Cre")])),
    );
    let clause = where_clause(&compiled.sql);
    assert!(clause.contains("pickup_borough <> 'Bronx'"));
    assert!(clause.contains("pickup_borough IS NULL"));
    assert!(clause.contains("vendor_name ILIKE 'Cre%'"));
    assert!(clause.contains(" AND "));
}

#[test]
fn test_set_and_not_set() {
    let catalog = taxi_catalog();
    let set = compile_ok(
        &catalog,
        &QueryRequest::new()
            .measure("TaxiTrips.tripCount")
            .filter(Filter::member("TaxiTrips.dropoffZone", "set", vec![])),
    );
    assert!(where_clause(&set.sql).contains("dropoff_zone IS NOT NULL"));

    let not_set = compile_ok(
        &catalog,
        &QueryRequest::new()
            .measure("TaxiTrips.tripCount")
            .filter(Filter::member("TaxiTrips.dropoffZone", "notSet", vec![])),
    );
    let clause = where_clause(&not_set.sql);
    assert!(clause.contains("dropoff_zone IS NULL"));
    assert!(!clause.contains("NOT NULL"));
}

#[test]
fn test_date_operators() {
    let catalog = taxi_catalog();
    let before = compile_ok(
        &catalog,
        &QueryRequest::new().measure("TaxiTrips.tripCount").filter(Filter::member(
            "TaxiTrips.pickupDatetime",
            "beforeDate",
            vec![json!("2024-02-01")],
        )),
    );
    assert!(where_clause(&before.sql)
        .contains("tpep_pickup_datetime < TIMESTAMP '2024-02-01T00:00:00.000'"));

    let after = compile_ok(
        &catalog,
        &QueryRequest::new().measure("TaxiTrips.tripCount").filter(Filter::member(
            "TaxiTrips.pickupDatetime",
            "afterDate",
            vec![json!("2024-02-01")],
        )),
    );
    assert!(where_clause(&after.sql)
        .contains("tpep_pickup_datetime > TIMESTAMP '2024-02-01T23:59:59.999'"));

    let in_range = compile_ok(
        &catalog,
        &QueryRequest::new().measure("TaxiTrips.tripCount").filter(Filter::member(
            "TaxiTrips.pickupDatetime",
            "inDateRange",
            vec![json!("2024-01-01"), json!("2024-01-07")],
        )),
    );
    let clause = where_clause(&in_range.sql);
    assert!(clause.contains(">= TIMESTAMP '2024-01-01T00:00:00.000'"));
    assert!(clause.contains("<= TIMESTAMP '2024-01-07T23:59:59.999'"));
}

#[test]
fn test_measure_filters_go_to_having() {
    let catalog = taxi_catalog();
    let compiled = compile_ok(
        &catalog,
        &QueryRequest::new()
            .measure("TaxiTrips.totalRevenueCharged")
            .dimension("TaxiTrips.pickupBorough")
            .filter(Filter::member("TaxiTrips.totalRevenueCharged", "lt", vec![json!(5000)])),
    );
    assert!(!compiled.sql.contains("WHERE"));
    assert!(compiled
        .sql
        .contains("HAVING SUM(\"TaxiTrips\".total_amount) < 5000"));
    assert_eq!(compiled.measure_filters().count(), 1);
    assert_eq!(compiled.dimension_filters().count(), 0);
}

#[test]
fn test_filter_errors() {
    let catalog = taxi_catalog();
    let options = CompileOptions::default();
    let kind = |filter: Filter| {
        compile(
            &catalog,
            &QueryRequest::new().measure("TaxiTrips.tripCount").filter(filter),
            &options,
        )
        .unwrap_err()
        .kind()
    };

    assert_eq!(
        kind(Filter::member("TaxiTrips.pickupBorough", "like", vec![json!("Q%")])),
        CompileErrorKind::UnsupportedFilterOperator
    );
    assert_eq!(
        kind(Filter::member("TaxiTrips.pickupBorough", "afterDate", vec![json!("2024-01-01")])),
        CompileErrorKind::UnsupportedFilterOperator
    );
    assert_eq!(
        kind(Filter::member("TaxiTrips.passengerCount", "gt", vec![json!("many")])),
        CompileErrorKind::InvalidFilterValue
    );
    assert_eq!(
        kind(Filter::member("TaxiTrips.passengerCount", "gt", vec![json!(1), json!(2)])),
        CompileErrorKind::InvalidFilterValue
    );
    assert_eq!(
        kind(Filter::member("TaxiTrips.pickupBorough", "equals", vec![])),
        CompileErrorKind::InvalidFilterValue
    );
    assert_eq!(
        kind(Filter::member("TaxiTrips.pickupBorough", "equals", vec![json!(null)])),
        CompileErrorKind::InvalidFilterValue
    );
    assert_eq!(
        kind(Filter::member(
            "TaxiTrips.pickupDatetime",
            "inDateRange",
            vec![json!("2024-01-01")]
        )),
        CompileErrorKind::InvalidFilterValue
    );
    assert_eq!(
        kind(Filter::member("TaxiTrips.ghost", "set", vec![])),
        CompileErrorKind::UnknownField
    );
    // Dimension and measure conditions cannot share a boolean group.
    assert_eq!(
        kind(Filter::Or {
            or: vec![
                Filter::member("TaxiTrips.pickupBorough", "equals", vec![json!("Queens")]),
                Filter::member("TaxiTrips.tripCount", "gt", vec![json!(10)]),
            ]
        }),
        CompileErrorKind::InvalidFilterValue
    );
}

#[test]
fn test_dimension_alias_for_member_key() {
    let parsed = request(
        r#"{
            "measures": ["TaxiTrips.tripCount"],
            "filters": [{ "dimension": "TaxiTrips.vendorName", "operator": "contains", "values": ["cab"] }]
        }"#,
    );
    assert_eq!(
        parsed.filters[0],
        Filter::member("TaxiTrips.vendorName", "contains", vec![json!("cab")])
    );
}
