// tests/graph/join_path_test.rs
#[path = "../common/mod.rs"]
mod common;

use common::taxi_catalog;
use cubist::graph::GraphError;
use cubist::model::Relationship;
use cubist::schema::{load, parse_definitions, Catalog};

#[test]
fn test_taxi_graph_shape() {
    let catalog = taxi_catalog();
    let graph = catalog.graph();
    // TaxiTrips, TaxiZones, VendorDim, PickupZone, DropoffZone
    assert_eq!(graph.node_count(), 5);
    // Three declared joins, each walkable both ways.
    assert_eq!(graph.edge_count(), 6);

    let zones = catalog.cube("TaxiZones").unwrap().id;
    let aliases: Vec<&str> = graph
        .aliases_of(zones)
        .into_iter()
        .map(|id| graph.instance_name(id))
        .collect();
    assert_eq!(aliases, vec!["PickupZone", "DropoffZone"]);
}

#[test]
fn test_forward_paths() {
    let catalog = taxi_catalog();
    let graph = catalog.graph();

    let pickup = graph.find_path("TaxiTrips", "PickupZone").unwrap();
    assert_eq!(pickup.len(), 1);
    assert_eq!(pickup.edges[0].relationship, Relationship::ManyToOne);
    assert!(!pickup.edges[0].reverse);
    assert!(!pickup.causes_fanout());

    let dropoff = graph.find_path("TaxiTrips", "DropoffZone").unwrap();
    assert_eq!(dropoff.len(), 1);
    // Distinct declared joins, distinct edges.
    assert_ne!(pickup.edges[0].join, dropoff.edges[0].join);

    assert!(graph.find_path("TaxiTrips", "TaxiTrips").unwrap().is_empty());
}

#[test]
fn test_reverse_walk_fans_out() {
    let catalog = taxi_catalog();
    let path = catalog.graph().find_path("PickupZone", "TaxiTrips").unwrap();
    assert_eq!(path.len(), 1);
    assert!(path.edges[0].reverse);
    assert!(path.causes_fanout());
}

#[test]
fn test_alias_to_alias_goes_through_declaring_cube() {
    let catalog = taxi_catalog();
    let graph = catalog.graph();
    let path = graph.find_path("PickupZone", "DropoffZone").unwrap();
    let hops: Vec<&str> = path.edges.iter().map(|e| graph.instance_name(e.to)).collect();
    assert_eq!(hops, vec!["TaxiTrips", "DropoffZone"]);
    assert!(path.causes_fanout());

    assert_eq!(graph.find_path("VendorDim", "PickupZone").unwrap().len(), 2);
}

#[test]
fn test_base_cube_reachable_only_through_aliases() {
    let catalog = taxi_catalog();
    let err = catalog.graph().find_path("TaxiTrips", "TaxiZones").unwrap_err();
    assert_eq!(
        err,
        GraphError::AmbiguousJoin {
            cube: "TaxiZones".into(),
            aliases: vec!["PickupZone".into(), "DropoffZone".into()],
        }
    );
    assert!(!catalog.graph().has_path("TaxiZones", "TaxiTrips"));
}

#[test]
fn test_unknown_instance() {
    let catalog = taxi_catalog();
    assert_eq!(
        catalog.graph().find_path("TaxiTrips", "Weather"),
        Err(GraphError::UnknownCube("Weather".into()))
    );
}

/// A diamond where two routes to `D` have the same length; the route using
/// the earlier declared join wins on every load.
fn diamond() -> Catalog {
    load(
        &parse_definitions(
            r#"[
            { "name": "A", "sql_table": "a",
              "joins": {
                "B": { "relationship": "many_to_one", "sql": "${CUBE}.b = ${B}.id" },
                "C": { "relationship": "many_to_one", "sql": "${CUBE}.c = ${C}.id" } } },
            { "name": "B", "sql_table": "b",
              "joins": { "D": { "relationship": "many_to_one", "sql": "${CUBE}.d = ${D}.id" } } },
            { "name": "C", "sql_table": "c",
              "joins": { "D": { "relationship": "many_to_one", "sql": "${CUBE}.d = ${D}.id" } } },
            { "name": "D", "sql_table": "d" }
        ]"#,
        )
        .unwrap(),
    )
    .unwrap()
}

#[test]
fn test_equal_length_paths_break_ties_by_declaration_order() {
    for _ in 0..5 {
        let catalog = diamond();
        let graph = catalog.graph();
        let path = graph.find_path("A", "D").unwrap();
        let hops: Vec<&str> = path.edges.iter().map(|e| graph.instance_name(e.to)).collect();
        assert_eq!(hops, vec!["B", "D"]);
    }
}

#[test]
fn test_join_tree_shares_edges() {
    let catalog = diamond();
    let graph = catalog.graph();
    let root = graph.instance_id("A").unwrap();
    let targets = [
        graph.instance_id("D").unwrap(),
        graph.instance_id("B").unwrap(),
        graph.instance_id("C").unwrap(),
    ];
    let tree = graph.find_join_tree(root, &targets).unwrap();
    let joined: Vec<&str> = tree.edges.iter().map(|e| graph.instance_name(e.to)).collect();
    assert_eq!(joined, vec!["B", "C", "D"]);
    assert!(!tree.causes_fanout());
}
