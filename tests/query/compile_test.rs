// tests/query/compile_test.rs
#[path = "../common/mod.rs"]
mod common;

use common::{compile_ok, request, taxi_catalog};
use cubist::query::{compile, CompileErrorKind, CompileOptions, ColumnKind, QueryRequest, DEFAULT_LIMIT};
use cubist::sql::test_utils::validate_sql;
use cubist::sql::Dialect;

#[test]
fn test_alias_instances_join_separately() {
    let catalog = taxi_catalog();
    let compiled = compile_ok(
        &catalog,
        &request(
            r#"{
                "measures": ["TaxiTrips.tripCount"],
                "dimensions": ["PickupZone.zoneName", "DropoffZone.zoneName"]
            }"#,
        ),
    );

    assert_eq!(compiled.join_tree.edges.len(), 2);
    assert_ne!(compiled.join_tree.edges[0].join, compiled.join_tree.edges[1].join);
    assert_eq!(compiled.sql.matches("LEFT JOIN").count(), 2);
    assert!(compiled.sql.contains("\"TaxiTrips\".PULocationID = \"PickupZone\".LocationID"));
    assert!(compiled.sql.contains("\"TaxiTrips\".DOLocationID = \"DropoffZone\".LocationID"));
    assert!(compiled.sql.contains("\"DropoffZone\".Zone AS \"dropoff_zone__zone_name\""));
}

#[test]
fn test_groups_by_requested_dimensions_only() {
    let catalog = taxi_catalog();
    let compiled = compile_ok(
        &catalog,
        &QueryRequest::new()
            .measure("TaxiTrips.tripCount")
            .measure("TaxiTrips.totalTips")
            .dimension("TaxiTrips.vendorName")
            .dimension("TaxiTrips.paymentMethod"),
    );
    insta::assert_snapshot!(compiled.sql, @r#"
    SELECT
      "TaxiTrips".vendor_name AS "taxi_trips__vendor_name",
      "TaxiTrips".payment_name AS "taxi_trips__payment_method",
      COUNT(*) AS "taxi_trips__trip_count",
      SUM("TaxiTrips".tip_amount) AS "taxi_trips__total_tips"
    FROM (SELECT * FROM fct_taxi_trips) AS "TaxiTrips"
    GROUP BY 1, 2
    ORDER BY "taxi_trips__trip_count" DESC
    LIMIT 10000
    "#);
    assert_eq!(compiled.limit, DEFAULT_LIMIT);
}

#[test]
fn test_measures_only_has_no_group_by() {
    let catalog = taxi_catalog();
    let compiled = compile_ok(
        &catalog,
        &QueryRequest::new().measure("TaxiTrips.avgFareAmount"),
    );
    assert!(compiled.sql.contains("AVG(\"TaxiTrips\".fare_amount) AS \"taxi_trips__avg_fare_amount\""));
    assert!(!compiled.sql.contains("GROUP BY"));
    assert!(compiled.fanout_warnings.is_empty());
}

#[test]
fn test_column_metadata() {
    let catalog = taxi_catalog();
    let compiled = compile_ok(
        &catalog,
        &request(
            r#"{
                "measures": ["TaxiTrips.totalRevenueCharged"],
                "timeDimensions": [{ "dimension": "TaxiTrips.pickupDatetime", "granularity": "month" }]
            }"#,
        ),
    );
    let aliases: Vec<&str> = compiled.aliases().collect();
    assert_eq!(
        aliases,
        vec!["taxi_trips__pickup_datetime_month", "taxi_trips__total_revenue_charged"]
    );
    let time = compiled.column("TaxiTrips.pickupDatetime").unwrap();
    assert!(matches!(time.kind, ColumnKind::TimeDimension { .. }));
    let revenue = compiled.column("TaxiTrips.totalRevenueCharged").unwrap();
    assert!(matches!(revenue.kind, ColumnKind::Measure { .. }));
    // Time dimensions order ascending by default.
    assert!(compiled
        .sql
        .contains("ORDER BY \"taxi_trips__pickup_datetime_month\" ASC"));
}

#[test]
fn test_order_map_keeps_request_order() {
    let catalog = taxi_catalog();
    let compiled = compile_ok(
        &catalog,
        &request(
            r#"{
                "measures": ["TaxiTrips.tripCount"],
                "dimensions": ["TaxiTrips.vendorName", "TaxiTrips.pickupBorough"],
                "order": { "TaxiTrips.pickupBorough": "asc", "TaxiTrips.tripCount": "desc" },
                "limit": 50
            }"#,
        ),
    );
    let order: Vec<(&str, bool)> = compiled
        .order
        .iter()
        .map(|o| (o.alias.as_str(), o.descending))
        .collect();
    assert_eq!(
        order,
        vec![
            ("taxi_trips__pickup_borough", false),
            ("taxi_trips__trip_count", true)
        ]
    );
    assert!(compiled.sql.contains("LIMIT 50"));
}

#[test]
fn test_postgres_output_parses() {
    let catalog = taxi_catalog();
    let request = request(
        r#"{
            "measures": ["TaxiTrips.avgTripDistance"],
            "dimensions": ["VendorDim.vendorName"],
            "timeDimensions": [{
                "dimension": "TaxiTrips.pickupDatetime",
                "granularity": "week",
                "dateRange": ["2024-01-01", "2024-03-31"]
            }]
        }"#,
    );
    let compiled = compile(
        &catalog,
        &request,
        &CompileOptions::default().with_dialect(Dialect::Postgres),
    )
    .unwrap();
    assert_eq!(compiled.dialect, Dialect::Postgres);
    validate_sql(&compiled.sql, Dialect::Postgres).unwrap();
    assert!(compiled.sql.contains("DATE_TRUNC('week', \"TaxiTrips\".tpep_pickup_datetime)"));
}

#[test]
fn test_compile_is_deterministic() {
    let catalog = taxi_catalog();
    let request = QueryRequest::new()
        .measure("TaxiTrips.tripCount")
        .dimension("DropoffZone.borough")
        .dimension("PickupZone.borough")
        .dimension("VendorDim.vendorName");
    let first = compile_ok(&catalog, &request);
    for _ in 0..5 {
        assert_eq!(compile_ok(&taxi_catalog(), &request).sql, first.sql);
    }
}

#[test]
fn test_request_errors() {
    let catalog = taxi_catalog();
    let options = CompileOptions::default();
    let kind = |json: &str| {
        compile(&catalog, &request(json), &options)
            .unwrap_err()
            .kind()
    };

    assert_eq!(kind("{}"), CompileErrorKind::EmptyQuery);
    assert_eq!(
        kind(r#"{ "measures": ["TaxiTrips.tripCount"], "dimensions": ["TaxiZones.zoneName"] }"#),
        CompileErrorKind::AmbiguousJoin
    );
    assert_eq!(
        kind(r#"{ "measures": ["TaxiTrips"] }"#),
        CompileErrorKind::UnknownField
    );
    assert_eq!(
        kind(
            r#"{ "measures": ["TaxiTrips.tripCount"],
                 "timeDimensions": [{ "dimension": "TaxiTrips.pickupDatetime", "dateRange": ["2024-02-01", "2024-01-01"] }] }"#
        ),
        CompileErrorKind::InvalidDateRange
    );
    assert_eq!(
        kind(
            r#"{ "measures": ["TaxiTrips.tripCount"],
                 "timeDimensions": [{ "dimension": "TaxiTrips.vendorName", "granularity": "day" }] }"#
        ),
        CompileErrorKind::UnknownField
    );
    assert_eq!(
        kind(
            r#"{ "measures": ["TaxiTrips.tripCount"],
                 "timeDimensions": [{ "dimension": "TaxiTrips.pickupDatetime", "granularity": "decade" }] }"#
        ),
        CompileErrorKind::InvalidGranularity
    );
}
