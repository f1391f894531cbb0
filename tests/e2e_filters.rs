//! End-to-end tests for filters, queries and traversals.
//!
//! Each test builds a query, checks what is sent to the store where that
//! matters, and checks what comes back from MemoryStore.

use docgraph::{
    Cardinality, Comparator, Direction, Element, ElementKind, FilterBuilder, Graph, GraphConfig, MemoryStore,
    QueryBuilder, Value,
};
use pretty_assertions::assert_eq;
use serde_json::json;

async fn people() -> Graph<MemoryStore> {
    let graph = Graph::open_memory(GraphConfig::new("g").with_page_size(2)).unwrap();
    for (key, label, age) in [("a", "person", 20), ("b", "person", 25), ("c", "robot", 35), ("d", "person", 45)] {
        graph.add_vertex(Some(key), Some(label)).await.unwrap();
        graph.put_property(ElementKind::Vertex, key, "age", age).await.unwrap();
    }
    graph
}

async fn keys(graph: &Graph<MemoryStore>, filter: FilterBuilder) -> Vec<String> {
    let mut cursor = graph.vertices(filter).await.unwrap();
    let mut out: Vec<String> = cursor
        .collect_remaining()
        .await
        .unwrap()
        .iter()
        .map(|v: &Element| v.key().to_owned())
        .collect();
    out.sort();
    out
}

// ============================================================================
// Comparisons
// ============================================================================

#[tokio::test]
async fn test_conjunctive_range() {
    let graph = people().await;
    let filter = FilterBuilder::new()
        .compare("age", Comparator::Gt, 30)
        .compare("age", Comparator::Lt, 40);
    assert_eq!(keys(&graph, filter).await, vec!["c"]);
}

#[tokio::test]
async fn test_half_open_interval() {
    let graph = Graph::open_memory(GraphConfig::new("g")).unwrap();
    for n in 1..=6 {
        let key = format!("n{n}");
        graph.add_vertex(Some(&key), None).await.unwrap();
        graph.put_property(ElementKind::Vertex, &key, "n", n).await.unwrap();
    }
    let found = keys(&graph, FilterBuilder::new().interval("n", 2, 5)).await;
    assert_eq!(found, vec!["n2", "n3", "n4"]);
}

#[tokio::test]
async fn test_membership_and_negated_comparisons() {
    let graph = people().await;
    graph.add_vertex(Some("ageless"), Some("person")).await.unwrap();

    assert_eq!(keys(&graph, FilterBuilder::new().is_in("age", [20, 45])).await, vec!["a", "d"]);
    // Elements without the key never match a negated comparison.
    assert_eq!(keys(&graph, FilterBuilder::new().not_in("age", [20, 45])).await, vec!["b", "c"]);
    assert_eq!(
        keys(&graph, FilterBuilder::new().compare("age", Comparator::Neq, 20)).await,
        vec!["b", "c", "d"]
    );
    assert_eq!(keys(&graph, FilterBuilder::new().has_not("age")).await, vec!["ageless"]);
    assert_eq!(keys(&graph, FilterBuilder::new().has("age")).await.len(), 4);
}

#[tokio::test]
async fn test_labels_are_ored_and_anded_with_clauses() {
    let graph = people().await;
    let filter = FilterBuilder::new().labels(["robot", "person"]).compare("age", Comparator::Gte, 25);
    assert_eq!(keys(&graph, filter).await, vec!["b", "c", "d"]);
    assert_eq!(keys(&graph, FilterBuilder::new().label("robot")).await, vec!["c"]);
}

#[tokio::test]
async fn test_id_key_filters_document_key() {
    let graph = people().await;
    assert_eq!(keys(&graph, FilterBuilder::new().has_value("id", "b")).await, vec!["b"]);
}

#[tokio::test]
async fn test_string_literals_are_never_inlined() {
    let c = docgraph::Collections::for_graph("g");
    let hostile = "x\" || true || \"";
    let query = QueryBuilder::vertices(&c)
        .filter(FilterBuilder::new().has_value("name`) OR 1", hostile))
        .build()
        .unwrap();
    assert!(!query.text().contains(hostile));
    assert_eq!(query.bind_vars().get("p0"), Some(&json!(hostile)));
}

#[tokio::test]
async fn test_membership_binds_one_parameter_per_element() {
    let c = docgraph::Collections::for_graph("g");
    for n in [1usize, 3, 7] {
        let values: Vec<i32> = (0..n as i32).collect();
        let query = QueryBuilder::vertices(&c)
            .filter(FilterBuilder::new().not_in("age", values))
            .build()
            .unwrap();
        assert_eq!(query.bind_vars().value_params(), n);
    }
}

// ============================================================================
// Multi-valued keys
// ============================================================================

async fn multi_valued() -> Graph<MemoryStore> {
    let graph = Graph::open_memory(GraphConfig::new("g")).unwrap();
    let no_meta = Vec::<(String, Value)>::new;
    graph.add_vertex(Some("marko"), Some("person")).await.unwrap();
    graph.put_property(ElementKind::Vertex, "marko", "name", "marko").await.unwrap();
    for skill in ["java", "python"] {
        graph
            .add_vertex_property("marko", "skills", skill, Cardinality::Set, no_meta())
            .await
            .unwrap();
    }
    graph.add_vertex(Some("vadas"), Some("person")).await.unwrap();
    graph
        .add_vertex_property("vadas", "skills", "rust", Cardinality::Set, no_meta())
        .await
        .unwrap();
    for (key, ages) in [("young", [20, 20]), ("old", [20, 50])] {
        graph.add_vertex(Some(key), None).await.unwrap();
        for age in ages {
            graph
                .add_vertex_property(key, "age", age, Cardinality::List, no_meta())
                .await
                .unwrap();
        }
    }
    graph
}

#[tokio::test]
async fn test_set_values_match_individually() {
    let graph = multi_valued().await;
    assert_eq!(keys(&graph, FilterBuilder::new().has_value("skills", "java")).await, vec!["marko"]);
    assert_eq!(keys(&graph, FilterBuilder::new().has_value("skills", "python")).await, vec!["marko"]);
    assert_eq!(
        keys(&graph, FilterBuilder::new().is_in("skills", ["python", "rust"])).await,
        vec!["marko", "vadas"]
    );
    assert_eq!(keys(&graph, FilterBuilder::new().not_in("skills", ["java"])).await, vec!["marko", "vadas"]);
    assert_eq!(keys(&graph, FilterBuilder::new().not_in("skills", ["rust"])).await, vec!["marko"]);
    assert_eq!(keys(&graph, FilterBuilder::new().has("skills")).await, vec!["marko", "vadas"]);
    assert_eq!(
        keys(&graph, FilterBuilder::new().has_value("skills", "java").has_value("name", "marko")).await,
        vec!["marko"]
    );
}

#[tokio::test]
async fn test_list_values_match_individually() {
    let graph = multi_valued().await;
    assert_eq!(keys(&graph, FilterBuilder::new().compare("age", Comparator::Gt, 30)).await, vec!["old"]);
    assert_eq!(
        keys(&graph, FilterBuilder::new().compare("age", Comparator::Eq, 20)).await,
        vec!["old", "young"]
    );
    assert_eq!(keys(&graph, FilterBuilder::new().compare("age", Comparator::Neq, 20)).await, vec!["old"]);
    assert_eq!(keys(&graph, FilterBuilder::new().is_in("age", [50, 60])).await, vec!["old"]);
    assert_eq!(keys(&graph, FilterBuilder::new().interval("age", 40, 60)).await, vec!["old"]);
    assert_eq!(keys(&graph, FilterBuilder::new().has_not("age")).await, vec!["marko", "vadas"]);
}

#[tokio::test]
async fn test_multi_valued_clause_text() {
    let c = docgraph::Collections::for_graph("g");
    let query = QueryBuilder::vertices(&c)
        .filter(FilterBuilder::new().has_value("skills", "java"))
        .build()
        .unwrap();
    assert!(query.text().contains("v.`skills` ANY == @p0"), "{}", query.text());
    assert!(query.text().contains("v.`_properties`.`skills`.`cardinality`"), "{}", query.text());
    assert_eq!(query.bind_vars().value_params(), 1);
}

// ============================================================================
// Counting, lookup, limits
// ============================================================================

#[tokio::test]
async fn test_count_and_lookup() {
    let graph = people().await;
    assert_eq!(graph.count(ElementKind::Vertex, FilterBuilder::new()).await.unwrap(), 4);
    assert_eq!(graph.count(ElementKind::Vertex, FilterBuilder::new().label("person")).await.unwrap(), 3);
    assert_eq!(graph.count(ElementKind::Edge, FilterBuilder::new()).await.unwrap(), 0);

    let found = graph.vertices_by_keys(&["d", "missing", "a"]).await.unwrap();
    let found: Vec<&str> = found.iter().map(|v| v.key()).collect();
    assert_eq!(found, vec!["d", "a"]);
}

#[tokio::test]
async fn test_limit() {
    let graph = people().await;
    let query = QueryBuilder::vertices(graph.collections()).limit(3).build().unwrap();
    let items = graph.execute(&query).await.unwrap().collect_remaining().await.unwrap();
    assert_eq!(items.len(), 3);
}

// ============================================================================
// Traversals
// ============================================================================

async fn triangle() -> Graph<MemoryStore> {
    let graph = people().await;
    graph.add_edge(Some("ab"), "a", "b", Some("knows")).await.unwrap();
    graph.add_edge(Some("ac"), "a", "c", Some("owns")).await.unwrap();
    graph.add_edge(Some("db"), "d", "b", Some("knows")).await.unwrap();
    graph
}

async fn neighbor_keys(graph: &Graph<MemoryStore>, start: &str, dir: Direction, labels: &[&str]) -> Vec<String> {
    let mut cursor = graph.neighbors(start, dir, labels).await.unwrap();
    let mut out: Vec<String> =
        cursor.collect_remaining().await.unwrap().iter().map(|v| v.key().to_owned()).collect();
    out.sort();
    out
}

#[tokio::test]
async fn test_neighbors_by_direction() {
    let graph = triangle().await;
    assert_eq!(neighbor_keys(&graph, "a", Direction::Outgoing, &[]).await, vec!["b", "c"]);
    assert_eq!(neighbor_keys(&graph, "b", Direction::Incoming, &[]).await, vec!["a", "d"]);
    assert_eq!(neighbor_keys(&graph, "b", Direction::Outgoing, &[]).await, Vec::<String>::new());
    assert_eq!(neighbor_keys(&graph, "c", Direction::Both, &[]).await, vec!["a"]);
    assert_eq!(neighbor_keys(&graph, "a", Direction::Outgoing, &["knows"]).await, vec!["b"]);
}

#[tokio::test]
async fn test_incident_edges() {
    let graph = triangle().await;
    graph.put_property(ElementKind::Edge, "ab", "weight", 0.5).await.unwrap();

    let mut cursor = graph.incident_edges("b", Direction::Incoming, &[]).await.unwrap();
    let mut edges = cursor.collect_remaining().await.unwrap();
    edges.sort_by(|x, y| x.key().cmp(y.key()));
    assert_eq!(edges.len(), 2);
    assert_eq!(edges[0].value("weight"), Some(&Value::Double(0.5)));
    assert_eq!(edges[1].endpoints().map(|e| e.from.as_str()), Some("d"));
}

#[tokio::test]
async fn test_remove_vertex_cascades_to_edges() {
    let graph = triangle().await;
    assert!(graph.remove_vertex("b").await.unwrap());
    assert!(graph.edge("ab").await.unwrap().is_none());
    assert!(graph.edge("db").await.unwrap().is_none());
    assert!(graph.edge("ac").await.unwrap().is_some());
    assert!(!graph.remove_vertex("b").await.unwrap());
    assert_eq!(graph.store().open_cursors(), 0);
}

#[tokio::test]
async fn test_edge_requires_existing_endpoints() {
    let graph = people().await;
    assert!(matches!(
        graph.add_edge(None, "a", "nobody", None).await,
        Err(docgraph::Error::NotFound(_))
    ));
    assert!(matches!(
        graph.add_vertex(Some("a"), None).await,
        Err(docgraph::Error::DuplicateId(_))
    ));
}
