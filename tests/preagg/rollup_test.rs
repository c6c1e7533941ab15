// tests/preagg/rollup_test.rs
#[path = "../common/mod.rs"]
mod common;

use std::collections::BTreeMap;

use common::{request, taxi_catalog};
use cubist::driver::QueryResult;
use cubist::preagg::{match_materialized, materialization, PreAggStore};
use cubist::query::{compile, CompileOptions, CompiledQuery};
use cubist::schema::Catalog;
use cubist::sql::test_utils::validate_sql;
use cubist::sql::Dialect;
use serde_json::{json, Value};

const TRIP_FLOW: &str = "TaxiTrips.tripFlow";

/// One hundred trips: trip `i` picks up in "Even" or "Odd" by parity, in
/// zone `Z{i % 5}`, and has fare `i` except every tenth trip, which is NULL.
struct Trip {
    pickup_zone: String,
    pickup_borough: &'static str,
    fare: Option<f64>,
    distance: f64,
}

fn trips() -> Vec<Trip> {
    (1..=100)
        .map(|i| Trip {
            pickup_zone: format!("Z{}", i % 5),
            pickup_borough: if i % 2 == 0 { "Even" } else { "Odd" },
            fare: (i % 10 != 0).then_some(i as f64),
            distance: 1.0,
        })
        .collect()
}

/// The rowset the tripFlow materialization query would return for
/// [`trips`], grouped by (pickupZone, dropoffZone, pickupBorough, dropoffBorough).
fn trip_flow_rows() -> QueryResult {
    #[derive(Default)]
    struct Group {
        count: i64,
        fare_sum: Option<f64>,
        fare_count: i64,
        distance_sum: f64,
        distance_count: i64,
    }
    let mut groups: BTreeMap<(String, &'static str), Group> = BTreeMap::new();
    for trip in trips() {
        let g = groups
            .entry((trip.pickup_zone.clone(), trip.pickup_borough))
            .or_default();
        g.count += 1;
        if let Some(fare) = trip.fare {
            g.fare_sum = Some(g.fare_sum.unwrap_or(0.0) + fare);
            g.fare_count += 1;
        }
        g.distance_sum += trip.distance;
        g.distance_count += 1;
    }

    let columns = [
        "taxi_trips__pickup_zone",
        "taxi_trips__dropoff_zone",
        "taxi_trips__pickup_borough",
        "taxi_trips__dropoff_borough",
        "taxi_trips__trip_count__count",
        "taxi_trips__avg_fare_amount__sum",
        "taxi_trips__avg_fare_amount__count",
        "taxi_trips__avg_trip_distance__sum",
        "taxi_trips__avg_trip_distance__count",
    ];
    let rows = groups
        .into_iter()
        .map(|((zone, borough), g)| {
            vec![
                json!(zone),
                json!("Airport"),
                json!(borough),
                json!("Manhattan"),
                json!(g.count),
                g.fare_sum.map(|s| json!(s)).unwrap_or(Value::Null),
                json!(g.fare_count),
                json!(g.distance_sum),
                json!(g.distance_count),
            ]
        })
        .collect();
    QueryResult::new(columns.iter().map(|c| c.to_string()).collect(), rows)
}

fn store_with_trip_flow(catalog: &Catalog) -> PreAggStore {
    store_with_rows(catalog, trip_flow_rows())
}

fn store_with_rows(catalog: &Catalog, rows: QueryResult) -> PreAggStore {
    let (cube, spec) = catalog.pre_aggregation(TRIP_FLOW).unwrap();
    let fingerprint = catalog.fingerprint(cube, spec);
    let store = PreAggStore::new();
    store.ensure(TRIP_FLOW, &fingerprint);
    store.begin_refresh(TRIP_FLOW).unwrap();
    store.commit(TRIP_FLOW, &fingerprint, rows, None).unwrap();
    store
}

fn compiled(catalog: &Catalog, json: &str) -> CompiledQuery {
    compile(catalog, &request(json), &CompileOptions::default()).unwrap()
}

/// Answer from the stored rowset, checking it was tripFlow that matched.
fn from_rollup(catalog: &Catalog, store: &PreAggStore, json: &str) -> QueryResult {
    let query = compiled(catalog, json);
    let matched = match_materialized(catalog, store, &query)
        .unwrap()
        .expect("tripFlow should serve the query");
    assert_eq!(matched.key, TRIP_FLOW);
    let result = matched.execute();
    // Same aliases as the SQL path.
    assert_eq!(
        result.columns,
        query.aliases().map(str::to_string).collect::<Vec<_>>()
    );
    result
}

#[test]
fn test_materialization_stores_avg_components() {
    let catalog = taxi_catalog();
    let (cube, spec) = catalog.pre_aggregation(TRIP_FLOW).unwrap();
    let m = materialization(&catalog, cube, spec, Dialect::DuckDb).unwrap();
    validate_sql(&m.sql, Dialect::DuckDb).unwrap();

    assert!(m.sql.contains("SUM(\"TaxiTrips\".trip_distance) AS \"taxi_trips__avg_trip_distance__sum\""));
    assert!(m.sql.contains("COUNT(\"TaxiTrips\".trip_distance) AS \"taxi_trips__avg_trip_distance__count\""));
    assert!(!m.sql.contains("AVG("));
    assert!(m.sql.contains("GROUP BY 1, 2, 3, 4"));
    assert!(m.time_dimension.is_none());
}

#[test]
fn test_avg_rolls_up_like_avg_over_raw_rows() {
    let catalog = taxi_catalog();
    let store = store_with_trip_flow(&catalog);

    let result = from_rollup(
        &catalog,
        &store,
        r#"{
            "measures": ["TaxiTrips.avgFareAmount", "TaxiTrips.tripCount"],
            "dimensions": ["TaxiTrips.pickupBorough"],
            "order": { "TaxiTrips.pickupBorough": "asc" }
        }"#,
    );
    // Even: fares 2..98 without multiples of ten, 2000 over 40 trips.
    // Odd: fares 1..99, 2500 over 50 trips.
    assert_eq!(
        result.rows,
        vec![
            vec![json!("Even"), json!(50.0), json!(50)],
            vec![json!("Odd"), json!(50.0), json!(50)],
        ]
    );

    let total = from_rollup(&catalog, &store, r#"{ "measures": ["TaxiTrips.avgFareAmount"] }"#);
    let raw: Vec<f64> = trips().iter().filter_map(|t| t.fare).collect();
    let expected = raw.iter().sum::<f64>() / raw.len() as f64;
    assert_eq!(total.rows, vec![vec![json!(expected)]]);
}

#[test]
fn test_dimension_filters_apply_to_stored_rows() {
    let catalog = taxi_catalog();
    let store = store_with_trip_flow(&catalog);

    let result = from_rollup(
        &catalog,
        &store,
        r#"{
            "measures": ["TaxiTrips.tripCount"],
            "dimensions": ["TaxiTrips.pickupZone"],
            "filters": [
                { "member": "TaxiTrips.pickupBorough", "operator": "equals", "values": ["Odd"] },
                { "member": "TaxiTrips.pickupZone", "operator": "notEquals", "values": ["Z0"] }
            ],
            "order": { "TaxiTrips.pickupZone": "asc" }
        }"#,
    );
    // Odd trips spread ten per zone.
    assert_eq!(
        result.rows,
        vec![
            vec![json!("Z1"), json!(10)],
            vec![json!("Z2"), json!(10)],
            vec![json!("Z3"), json!(10)],
            vec![json!("Z4"), json!(10)],
        ]
    );
}

#[test]
fn test_having_order_and_limit() {
    let catalog = taxi_catalog();
    let store = store_with_trip_flow(&catalog);

    // Per zone average fares: Z0 50.0 (only its ten odd fares are set),
    // Z1 48.5, Z2 49.5, Z3 50.5, Z4 51.5. Every zone has 20 trips.
    let result = from_rollup(
        &catalog,
        &store,
        r#"{
            "measures": ["TaxiTrips.tripCount"],
            "dimensions": ["TaxiTrips.pickupZone"],
            "filters": [
                { "member": "TaxiTrips.avgFareAmount", "operator": "gte", "values": [50] }
            ],
            "order": { "TaxiTrips.pickupZone": "desc" },
            "limit": 2,
            "offset": 1
        }"#,
    );
    // The filter-only measure is not an output column.
    assert_eq!(
        result.columns,
        vec!["taxi_trips__pickup_zone", "taxi_trips__trip_count"]
    );
    assert_eq!(
        result.rows,
        vec![vec![json!("Z3"), json!(20)], vec![json!("Z0"), json!(20)]]
    );
}

#[test]
fn test_null_measure_sorts_last_descending() {
    let catalog = taxi_catalog();
    let mut rows = trip_flow_rows();
    rows.rows = vec![
        vec![
            json!("Z1"), json!("Airport"), json!("Queens"), json!("Manhattan"),
            json!(1), json!(10.0), json!(1), json!(2.0), json!(1),
        ],
        vec![
            json!("Z2"), json!("Airport"), json!("Bronx"), json!("Manhattan"),
            json!(3), Value::Null, json!(0), json!(6.0), json!(3),
        ],
    ];
    let store = store_with_rows(&catalog, rows);

    let json = r#"{
        "measures": ["TaxiTrips.avgFareAmount"],
        "dimensions": ["TaxiTrips.pickupBorough"],
        "limit": 1
    }"#;
    // Default order is the first measure, descending.
    assert!(compiled(&catalog, json)
        .sql
        .contains("ORDER BY \"taxi_trips__avg_fare_amount\" DESC"));

    let result = from_rollup(&catalog, &store, json);
    assert_eq!(result.rows, vec![vec![json!("Queens"), json!(10.0)]]);

    let all = from_rollup(
        &catalog,
        &store,
        r#"{
            "measures": ["TaxiTrips.avgFareAmount"],
            "dimensions": ["TaxiTrips.pickupBorough"],
            "order": { "TaxiTrips.avgFareAmount": "asc" }
        }"#,
    );
    assert_eq!(
        all.rows,
        vec![
            vec![json!("Queens"), json!(10.0)],
            vec![json!("Bronx"), Value::Null],
        ]
    );
}

#[test]
fn test_empty_store_falls_back() {
    let catalog = taxi_catalog();
    let query = compiled(&catalog, r#"{ "measures": ["TaxiTrips.tripCount"] }"#);
    assert!(match_materialized(&catalog, &PreAggStore::new(), &query)
        .unwrap()
        .is_none());
}
