//! End-to-end tests for the property model against MemoryStore.
//!
//! Covers cardinality binding, reserved keys, meta-properties, typed values
//! surviving the document round trip, and graph variables.

use chrono::{TimeZone, Utc};
use docgraph::model::PrimitiveArray;
use docgraph::{
    Cardinality, DocumentId, DocumentStore, ElementKind, Error, Graph, GraphConfig, MemoryStore, Value,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn no_meta() -> Vec<(String, Value)> {
    Vec::new()
}

async fn graph() -> Graph<MemoryStore> {
    Graph::open_memory(GraphConfig::new("g")).unwrap()
}

// ============================================================================
// Cardinality
// ============================================================================

#[tokio::test]
async fn test_single_and_set_properties() {
    let graph = graph().await;
    graph.add_vertex(Some("marko"), Some("person")).await.unwrap();
    graph.put_property(ElementKind::Vertex, "marko", "name", "marko").await.unwrap();
    for skill in ["java", "python", "java"] {
        graph
            .add_vertex_property("marko", "skills", skill, Cardinality::Set, no_meta())
            .await
            .unwrap();
    }

    let v = graph.vertex("marko").await.unwrap().unwrap();
    assert_eq!(v.value("name"), Some(&Value::from("marko")));
    let skills: Vec<&Value> = v.property("skills").values().collect();
    assert_eq!(skills, vec![&Value::from("java"), &Value::from("python")]);
    assert_eq!(v.property("skills").cardinality(), Some(Cardinality::Set));

    // Raw projection is queryable as an array.
    let doc = graph
        .store()
        .get_document(&DocumentId::new("g_vertex", "marko"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc["skills"], json!(["java", "python"]));
    assert_eq!(doc["name"], json!("marko"));
}

#[tokio::test]
async fn test_list_keeps_duplicates_in_order() {
    let graph = graph().await;
    graph.add_vertex(Some("v"), None).await.unwrap();
    for n in [3, 1, 3] {
        graph.add_vertex_property("v", "n", n, Cardinality::List, no_meta()).await.unwrap();
    }
    let v = graph.vertex("v").await.unwrap().unwrap();
    let values: Vec<&Value> = v.property("n").values().collect();
    assert_eq!(values, vec![&Value::Int(3), &Value::Int(1), &Value::Int(3)]);
    let ids: Vec<&str> = v.property("n").entries().iter().map(|e| e.id()).collect();
    assert_eq!(ids.len(), 3);
    assert!(ids[0] != ids[2]);
}

#[tokio::test]
async fn test_cardinality_conflict_leaves_property_unchanged() {
    let graph = graph().await;
    graph.add_vertex(Some("v"), None).await.unwrap();
    graph.add_vertex_property("v", "tag", "a", Cardinality::Set, no_meta()).await.unwrap();

    let err = graph
        .add_vertex_property("v", "tag", "b", Cardinality::List, no_meta())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::CardinalityConflict { bound: Cardinality::Set, requested: Cardinality::List, .. }
    ));
    assert!(graph.put_property(ElementKind::Vertex, "v", "tag", "c").await.is_err());

    let v = graph.vertex("v").await.unwrap().unwrap();
    assert_eq!(v.property("tag").values().count(), 1);
}

#[tokio::test]
async fn test_removing_last_entry_unbinds_cardinality() {
    let graph = graph().await;
    graph.add_vertex(Some("v"), None).await.unwrap();
    let entry = graph.add_vertex_property("v", "tag", "a", Cardinality::Set, no_meta()).await.unwrap();

    let removed = graph
        .remove_property_entry(ElementKind::Vertex, "v", "tag", entry.id())
        .await
        .unwrap();
    assert_eq!(removed.map(|e| e.value().clone()), Some(Value::from("a")));

    // Rebinding with another cardinality is allowed now.
    graph.add_vertex_property("v", "tag", "a", Cardinality::List, no_meta()).await.unwrap();
    let v = graph.vertex("v").await.unwrap().unwrap();
    assert_eq!(v.property("tag").cardinality(), Some(Cardinality::List));
}

#[tokio::test]
async fn test_edges_are_single_cardinality_only() {
    let graph = graph().await;
    graph.add_vertex(Some("a"), None).await.unwrap();
    graph.add_vertex(Some("b"), None).await.unwrap();
    graph.add_edge(Some("e"), "a", "b", Some("knows")).await.unwrap();

    graph.put_property(ElementKind::Edge, "e", "weight", 0.5).await.unwrap();
    let e = graph.edge("e").await.unwrap().unwrap();
    assert_eq!(e.value("weight"), Some(&Value::Double(0.5)));
    assert_eq!(e.label(), "knows");
    assert!(matches!(
        graph.put_property(ElementKind::Edge, "e", "label", "x").await,
        Err(Error::ReservedKey(_))
    ));
}

// ============================================================================
// Keys
// ============================================================================

#[tokio::test]
async fn test_reserved_and_empty_keys() {
    let graph = graph().await;
    graph.add_vertex(Some("v"), None).await.unwrap();
    assert!(matches!(
        graph.put_property(ElementKind::Vertex, "v", "id", 1).await,
        Err(Error::ReservedKey(_))
    ));
    assert!(matches!(
        graph.put_property(ElementKind::Vertex, "v", " ", 1).await,
        Err(Error::EmptyKey)
    ));
    assert!(matches!(
        graph.put_property(ElementKind::Vertex, "v", "«a»x", 1).await,
        Err(Error::ReservedKey(_))
    ));
}

#[tokio::test]
async fn test_underscore_keys_are_escaped_in_storage() {
    let graph = graph().await;
    graph.add_vertex(Some("v"), None).await.unwrap();
    graph.put_property(ElementKind::Vertex, "v", "_rev", "user data").await.unwrap();

    let doc = graph
        .store()
        .get_document(&DocumentId::new("g_vertex", "v"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc["«a»rev"], json!("user data"));
    assert!(doc["_rev"] != json!("user data"));

    let v = graph.vertex("v").await.unwrap().unwrap();
    assert_eq!(v.value("_rev"), Some(&Value::from("user data")));
}

// ============================================================================
// Meta-properties
// ============================================================================

#[tokio::test]
async fn test_meta_properties_round_trip() {
    let graph = graph().await;
    graph.add_vertex(Some("v"), None).await.unwrap();
    let entry = graph
        .add_vertex_property(
            "v",
            "location",
            "santa fe",
            Cardinality::List,
            vec![("startTime", Value::Int(2005))],
        )
        .await
        .unwrap();
    graph
        .set_meta_property("v", "location", entry.id(), "endTime", 2009)
        .await
        .unwrap();

    let v = graph.vertex("v").await.unwrap().unwrap();
    let stored = &v.property("location").entries()[0];
    assert_eq!(stored.meta("startTime"), Some(&Value::Int(2005)));
    assert_eq!(stored.meta("endTime"), Some(&Value::Int(2009)));

    let removed = graph
        .remove_meta_property("v", "location", entry.id(), "startTime")
        .await
        .unwrap();
    assert_eq!(removed, Some(Value::Int(2005)));
}

#[tokio::test]
async fn test_edges_reject_meta_properties() {
    let graph = graph().await;
    graph.add_vertex(Some("a"), None).await.unwrap();
    graph.add_edge(Some("e"), "a", "a", None).await.unwrap();
    let v = graph.edge("e").await.unwrap().unwrap();
    assert!(!v.capabilities().has_meta_properties);
    assert!(!v.capabilities().has_cardinality);
}

#[tokio::test]
async fn test_property_documents_follow_their_owner() {
    let graph = Graph::open_memory(GraphConfig::new("g").with_property_documents(true)).unwrap();
    graph.add_vertex(Some("v"), None).await.unwrap();
    graph.add_vertex_property("v", "skills", "java", Cardinality::Set, no_meta()).await.unwrap();
    graph.add_vertex_property("v", "skills", "rust", Cardinality::Set, no_meta()).await.unwrap();
    assert_eq!(graph.store().document_count("g_properties"), 2);
    assert_eq!(graph.store().document_count("g_element_has_properties"), 2);

    graph.remove_property(ElementKind::Vertex, "v", "skills").await.unwrap();
    assert_eq!(graph.store().document_count("g_properties"), 0);

    graph.put_property(ElementKind::Vertex, "v", "name", "x").await.unwrap();
    assert_eq!(graph.store().document_count("g_properties"), 1);
    assert!(graph.remove_vertex("v").await.unwrap());
    assert_eq!(graph.store().document_count("g_properties"), 0);
    assert_eq!(graph.store().document_count("g_element_has_properties"), 0);
}

// ============================================================================
// Typed values
// ============================================================================

#[tokio::test]
async fn test_typed_values_survive_storage() {
    let graph = graph().await;
    graph.add_vertex(Some("v"), None).await.unwrap();
    let when = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
    let values = [
        ("i32", Value::Int(7)),
        ("i64", Value::Long(1 << 40)),
        ("f32", Value::Float(1.5)),
        ("f64", Value::Double(2.0)),
        ("bytes", Value::Array(PrimitiveArray::Byte(vec![1, 2, 3]))),
        ("list", Value::List(vec![Value::Int(1), Value::from("a")])),
        ("when", Value::DateTime(when)),
    ];
    for (k, v) in &values {
        graph.put_property(ElementKind::Vertex, "v", k, v.clone()).await.unwrap();
    }
    let v = graph.vertex("v").await.unwrap().unwrap();
    for (k, expected) in &values {
        assert_eq!(v.value(k), Some(expected), "property {k}");
    }
}

#[tokio::test]
async fn test_unknown_type_tag_stays_opaque() {
    let graph = graph().await;
    graph.add_vertex(Some("v"), None).await.unwrap();
    let point = Value::Opaque { type_name: "point".into(), raw: json!({"x": 1, "y": 2}) };
    graph.put_property(ElementKind::Vertex, "v", "at", point.clone()).await.unwrap();

    let v = graph.vertex("v").await.unwrap().unwrap();
    assert_eq!(v.value("at"), Some(&point));

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }
    let p: Point = v.value("at").unwrap().deserialize_opaque().unwrap();
    assert_eq!(p, Point { x: 1, y: 2 });
}

// ============================================================================
// Variables
// ============================================================================

#[tokio::test]
async fn test_graph_variables() {
    let graph = graph().await;
    assert!(graph.variables().await.unwrap().properties().is_empty());

    graph.set_variable("version", 3).await.unwrap();
    graph.set_variable("owner", "ops").await.unwrap();
    let vars = graph.variables().await.unwrap();
    assert_eq!(vars.value("version"), Some(&Value::Int(3)));
    assert_eq!(vars.kind(), ElementKind::Variables);

    assert_eq!(graph.remove_variable("version").await.unwrap(), Some(Value::Int(3)));
    assert_eq!(graph.remove_variable("version").await.unwrap(), None);
    assert!(graph.variables().await.unwrap().value("version").is_none());
}
