// tests/common/mod.rs
#![allow(dead_code)]

use cubist::query::{compile, CompileOptions, CompiledQuery, QueryRequest};
use cubist::schema::{load, parse_definitions, Catalog, SchemaRegistry, SecurityContext};
use cubist::sql::test_utils::validate_sql;

/// TaxiTrips, TaxiZones (joined as PickupZone and DropoffZone) and VendorDim.
pub const TAXI_MODEL: &str = include_str!("../fixtures/taxi.json");

pub fn taxi_catalog() -> Catalog {
    load(&parse_definitions(TAXI_MODEL).unwrap()).unwrap()
}

pub fn taxi_registry() -> SchemaRegistry {
    let registry = SchemaRegistry::new();
    registry
        .reload(&SecurityContext::default(), &parse_definitions(TAXI_MODEL).unwrap())
        .unwrap();
    registry
}

/// Parse a JSON request.
pub fn request(json: &str) -> QueryRequest {
    serde_json::from_str(json).unwrap()
}

/// Compile with a fixed clock (2024-03-13 15:30) and check the SQL parses.
pub fn compile_ok(catalog: &Catalog, request: &QueryRequest) -> CompiledQuery {
    let now = chrono::NaiveDate::from_ymd_opt(2024, 3, 13)
        .and_then(|d| d.and_hms_opt(15, 30, 0))
        .unwrap();
    let compiled = compile(catalog, request, &CompileOptions::default().with_now(now)).unwrap();
    validate_sql(&compiled.sql, compiled.dialect).unwrap();
    compiled
}
