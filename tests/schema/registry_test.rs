// tests/schema/registry_test.rs
#[path = "../common/mod.rs"]
mod common;

use common::{taxi_catalog, TAXI_MODEL};
use cubist::model::MemberKind;
use cubist::schema::{
    DirectorySource, InMemorySource, MemberLookupError, SchemaRegistry, SchemaSource,
    SecurityContext, ViolationKind,
};

#[test]
fn test_taxi_catalog_shape() {
    let catalog = taxi_catalog();

    let cubes: Vec<&str> = catalog.cubes().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(cubes, vec!["TaxiTrips", "TaxiZones", "VendorDim"]);

    let instances: Vec<&str> = catalog.instances().iter().map(|i| i.name.as_str()).collect();
    for name in ["TaxiTrips", "TaxiZones", "VendorDim", "PickupZone", "DropoffZone"] {
        assert!(instances.contains(&name), "missing instance {name}");
    }

    let keys: Vec<String> = catalog
        .pre_aggregations()
        .map(|(cube, spec)| format!("{}.{}", cube.name, spec.name))
        .collect();
    assert_eq!(
        keys,
        vec![
            "TaxiTrips.dailyOperations",
            "TaxiTrips.paymentAnalysis",
            "TaxiTrips.tripFlow",
            "TaxiZones.boroughSummary"
        ]
    );
}

#[test]
fn test_alias_members_resolve_to_target_cube() {
    let catalog = taxi_catalog();
    let zones = catalog.cube("TaxiZones").unwrap().id;

    let pickup = catalog.resolve_member("PickupZone.zoneName").unwrap();
    let dropoff = catalog.resolve_member("DropoffZone.zoneName").unwrap();
    assert_eq!(pickup.cube, zones);
    assert_eq!(dropoff.cube, zones);
    assert_ne!(pickup.instance, dropoff.instance);
    assert_eq!(pickup.kind, MemberKind::Dimension);
    assert_eq!(catalog.dimension(&pickup).unwrap().name, "zoneName");

    let measure = catalog.resolve_member("TaxiTrips.avgFareAmount").unwrap();
    assert_eq!(measure.kind, MemberKind::Measure);
}

#[test]
fn test_member_lookup_errors() {
    let catalog = taxi_catalog();
    assert_eq!(
        catalog.resolve_member("TaxiTrips.nope").unwrap_err(),
        MemberLookupError::UnknownMember
    );
    assert_eq!(
        catalog.resolve_member("Nowhere.tripCount").unwrap_err(),
        MemberLookupError::UnknownCube
    );
    assert_eq!(
        catalog.resolve_member("tripCount").unwrap_err(),
        MemberLookupError::Malformed
    );
}

#[test]
fn test_pre_aggregation_refs_qualified_or_not() {
    let catalog = taxi_catalog();
    // paymentAnalysis lists "TaxiTrips.x" paths, dailyOperations bare names.
    let (_, payment) = catalog.pre_aggregation("TaxiTrips.paymentAnalysis").unwrap();
    let (_, daily) = catalog.pre_aggregation("TaxiTrips.dailyOperations").unwrap();
    assert_eq!(payment.measures.len(), 4);
    assert_eq!(payment.dimensions.len(), 2);
    assert_eq!(daily.measures.len(), 4);
    assert!(daily.time_dimension.is_some());
    assert!(catalog.pre_aggregation("TaxiTrips.missing").is_none());
}

#[test]
fn test_reload_from_directory() {
    let dir = std::env::temp_dir().join(format!("cubist-model-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(dir.join("nested")).unwrap();
    std::fs::write(dir.join("taxi.json"), TAXI_MODEL).unwrap();
    std::fs::write(
        dir.join("nested").join("orders.json"),
        r#"{ "name": "Orders", "sql_table": "orders", "measures": { "count": { "type": "count" } } }"#,
    )
    .unwrap();
    std::fs::write(dir.join("README.md"), "not a cube").unwrap();

    let registry = SchemaRegistry::new();
    let catalog = registry
        .reload_from(&SecurityContext::default(), &DirectorySource::new(&dir))
        .unwrap();
    assert_eq!(catalog.cubes().len(), 4);
    assert!(catalog.cube("Orders").is_some());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_unparseable_document_is_a_violation() {
    let source = InMemorySource::new()
        .with_document("taxi.json", TAXI_MODEL)
        .with_document("broken.json", "{ not json");
    let err = source.read().unwrap_err();
    assert!(err.has_kind(ViolationKind::InvalidDefinition));
    assert!(err.to_string().contains("broken.json"));
}

#[test]
fn test_snapshot_survives_reload() {
    let registry = common::taxi_registry();
    let ctx = SecurityContext::default();
    let before = registry.catalog(&ctx).unwrap();

    let source = InMemorySource::new().with_document("a", r#"{ "name": "A", "sql_table": "a" }"#);
    let after = registry.reload_from(&ctx, &source).unwrap();

    // A reader holding the old snapshot still sees the old cubes.
    assert!(before.cube("TaxiTrips").is_some());
    assert!(after.cube("TaxiTrips").is_none());
    assert!(after.version() > before.version());
}

#[test]
fn test_app_ids_are_isolated() {
    let registry = SchemaRegistry::with_app_id(|ctx| {
        ctx.0
            .get("tenant")
            .and_then(|t| t.as_str())
            .unwrap_or("default")
            .to_string()
    });
    let acme = SecurityContext(serde_json::json!({ "tenant": "acme" }));
    let globex = SecurityContext(serde_json::json!({ "tenant": "globex" }));

    registry
        .reload_from(&acme, &InMemorySource::new().with_document("taxi", TAXI_MODEL))
        .unwrap();
    registry
        .reload_from(
            &globex,
            &InMemorySource::new().with_document("a", r#"{ "name": "A", "sql_table": "a" }"#),
        )
        .unwrap();

    assert_eq!(registry.app_ids(), vec!["acme", "globex"]);
    assert!(registry.catalog(&acme).unwrap().cube("TaxiTrips").is_some());
    assert!(registry.catalog(&globex).unwrap().cube("TaxiTrips").is_none());
    assert!(registry.catalog(&SecurityContext::default()).is_none());
}
