//! Shared catalog for unit tests.

use super::{load, parse_definitions, Catalog};

pub(crate) const TAXI_MODEL: &str = include_str!("../../tests/fixtures/taxi.json");

pub(crate) fn taxi_catalog() -> Catalog {
    load(&parse_definitions(TAXI_MODEL).unwrap()).unwrap()
}
