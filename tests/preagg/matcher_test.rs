// tests/preagg/matcher_test.rs
#[path = "../common/mod.rs"]
mod common;

use common::{request, taxi_catalog, TAXI_MODEL};
use cubist::preagg::{candidates, find_match};
use cubist::query::{compile, CompileOptions, CompiledQuery};
use cubist::schema::{load, parse_definitions, Catalog};

fn compiled(catalog: &Catalog, json: &str) -> CompiledQuery {
    compile(catalog, &request(json), &CompileOptions::default()).unwrap()
}

fn keys(catalog: &Catalog, json: &str) -> Vec<String> {
    candidates(catalog, &compiled(catalog, json))
        .into_iter()
        .map(|c| c.key)
        .collect()
}

#[test]
fn test_matching_is_idempotent() {
    let catalog = taxi_catalog();
    let query = compiled(
        &catalog,
        r#"{ "measures": ["TaxiTrips.totalRevenueCharged"], "dimensions": ["TaxiTrips.pickupBorough"] }"#,
    );
    let first = find_match(&catalog, &query).map(|s| s.name.clone());
    for _ in 0..3 {
        assert_eq!(find_match(&catalog, &query).map(|s| s.name.clone()), first);
    }
    assert_eq!(first.as_deref(), Some("paymentAnalysis"));
}

#[test]
fn test_exact_daily_grain() {
    let catalog = taxi_catalog();
    let matched = keys(
        &catalog,
        r#"{
            "measures": ["TaxiTrips.tripCount", "TaxiTrips.avgFareAmount"],
            "dimensions": ["TaxiTrips.pickupBorough", "TaxiTrips.vendorName"],
            "timeDimensions": [{ "dimension": "TaxiTrips.pickupDatetime", "granularity": "day" }]
        }"#,
    );
    assert_eq!(matched, vec!["TaxiTrips.dailyOperations"]);
    assert_eq!(
        candidates(
            &catalog,
            &compiled(
                &catalog,
                r#"{
                    "measures": ["TaxiTrips.tripCount"],
                    "dimensions": ["TaxiTrips.pickupBorough", "TaxiTrips.vendorName"],
                    "timeDimensions": [{ "dimension": "TaxiTrips.pickupDatetime", "granularity": "day" }]
                }"#
            )
        )[0]
        .extra_dimensions,
        0
    );
}

#[test]
fn test_week_rolls_up_from_day_but_hour_does_not() {
    let catalog = taxi_catalog();
    let week = keys(
        &catalog,
        r#"{
            "measures": ["TaxiTrips.totalMilesTraveled"],
            "timeDimensions": [{ "dimension": "TaxiTrips.pickupDatetime", "granularity": "week" }]
        }"#,
    );
    assert_eq!(week, vec!["TaxiTrips.dailyOperations"]);

    let hour = keys(
        &catalog,
        r#"{
            "measures": ["TaxiTrips.totalMilesTraveled"],
            "timeDimensions": [{ "dimension": "TaxiTrips.pickupDatetime", "granularity": "hour" }]
        }"#,
    );
    assert!(hour.is_empty());
}

#[test]
fn test_other_time_dimension_is_not_stored() {
    let catalog = taxi_catalog();
    let matched = keys(
        &catalog,
        r#"{
            "measures": ["TaxiTrips.tripCount"],
            "timeDimensions": [{ "dimension": "TaxiTrips.dropoffDatetime", "granularity": "month" }]
        }"#,
    );
    assert!(matched.is_empty());
}

#[test]
fn test_zone_pre_aggregation() {
    let catalog = taxi_catalog();
    assert_eq!(
        keys(
            &catalog,
            r#"{ "measures": ["TaxiZones.totalZones"], "dimensions": ["TaxiZones.borough"] }"#
        ),
        vec!["TaxiZones.boroughSummary"]
    );
    // Same cube, reached as a join alias: not the stored instance.
    assert!(keys(
        &catalog,
        r#"{ "measures": ["PickupZone.totalZones"], "dimensions": ["PickupZone.borough"] }"#
    )
    .is_empty());
}

/// paymentAnalysis additionally stores uniqueVendors.
fn with_count_distinct() -> Catalog {
    let model = TAXI_MODEL.replace(
        r#""TaxiTrips.avgTipAmount"],"#,
        r#""TaxiTrips.avgTipAmount", "TaxiTrips.uniqueVendors"],"#,
    );
    assert_ne!(model, TAXI_MODEL);
    load(&parse_definitions(&model).unwrap()).unwrap()
}

#[test]
fn test_count_distinct_needs_exact_grain() {
    let catalog = with_count_distinct();
    let exact = keys(
        &catalog,
        r#"{
            "measures": ["TaxiTrips.uniqueVendors"],
            "dimensions": ["TaxiTrips.paymentMethod", "TaxiTrips.pickupBorough"]
        }"#,
    );
    assert_eq!(exact, vec!["TaxiTrips.paymentAnalysis"]);

    let merged = keys(
        &catalog,
        r#"{ "measures": ["TaxiTrips.uniqueVendors"], "dimensions": ["TaxiTrips.paymentMethod"] }"#,
    );
    assert!(merged.is_empty());
}
