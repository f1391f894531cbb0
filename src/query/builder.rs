//! Query builder: the read entry point of the graph.
//!
//! ```text
//! QueryBuilder::neighbors(&collections, "v1", Direction::Outgoing)
//!     .edge_labels(["knows"])
//!     .filter(FilterBuilder::new().compare("age", Comparator::Gt, 30))
//!     .limit(10)
//!
//! FOR v, e IN 1..1 OUTBOUND @start GRAPH @graph
//!   FILTER (e.`_label` == @p0)
//!   FILTER (v.`_properties`.`age`.`cardinality` IN ["set", "list"]
//!       ? (v.`age` ANY > @p1) : v.`age` > @p1)
//!   LIMIT @limit
//!   RETURN v
//! ```

use serde_json::Value as Json;

use super::filter::{Filter, FilterBuilder};
use super::{BindVars, Query, QueryPlan, TraversalTarget};
use crate::config::Collections;
use crate::model::{Direction, DocumentId, ElementKind};
use crate::Result;

/// Store token of a traversal direction.
pub fn direction_token(direction: Direction) -> &'static str {
    match direction {
        Direction::Outgoing => "OUTBOUND",
        Direction::Incoming => "INBOUND",
        Direction::Both => "ANY",
    }
}

#[derive(Debug)]
enum Target {
    Scan(ElementKind),
    Count(ElementKind),
    Lookup(ElementKind, Vec<String>),
    Traverse { start: String, direction: Direction, target: TraversalTarget },
}

#[derive(Debug)]
pub struct QueryBuilder<'c> {
    collections: &'c Collections,
    target: Target,
    filter: FilterBuilder,
    edge_labels: Vec<String>,
    limit: Option<usize>,
}

impl<'c> QueryBuilder<'c> {
    fn new(collections: &'c Collections, target: Target) -> Self {
        Self {
            collections,
            target,
            filter: FilterBuilder::new(),
            edge_labels: Vec::new(),
            limit: None,
        }
    }

    pub fn vertices(collections: &'c Collections) -> Self {
        Self::new(collections, Target::Scan(ElementKind::Vertex))
    }

    pub fn edges(collections: &'c Collections) -> Self {
        Self::new(collections, Target::Scan(ElementKind::Edge))
    }

    pub fn count(collections: &'c Collections, kind: ElementKind) -> Self {
        Self::new(collections, Target::Count(kind))
    }

    pub fn lookup<I, S>(collections: &'c Collections, kind: ElementKind, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(collections, Target::Lookup(kind, keys.into_iter().map(Into::into).collect()))
    }

    /// Vertices one hop from `start`.
    pub fn neighbors(collections: &'c Collections, start: impl Into<String>, direction: Direction) -> Self {
        Self::new(
            collections,
            Target::Traverse { start: start.into(), direction, target: TraversalTarget::Vertices },
        )
    }

    /// Edges incident to `start`.
    pub fn incident_edges(collections: &'c Collections, start: impl Into<String>, direction: Direction) -> Self {
        Self::new(
            collections,
            Target::Traverse { start: start.into(), direction, target: TraversalTarget::Edges },
        )
    }

    /// Filter applied to each result document.
    pub fn filter(mut self, filter: FilterBuilder) -> Self {
        self.filter = filter;
        self
    }

    /// Only traverse edges with one of these labels.
    pub fn edge_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.edge_labels.extend(labels.into_iter().map(Into::into));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(self) -> Result<Query> {
        let filter = self.filter.build()?;
        let mut binds = BindVars::default();
        let mut lines = Vec::new();
        let c = self.collections;

        let plan = match self.target {
            Target::Scan(kind) => {
                let collection = c.of(kind).to_owned();
                lines.push(format!("FOR v IN {}", binds.bind_collection("collection", &collection)));
                push_filter(&mut lines, &filter, "v", &mut binds);
                push_limit(&mut lines, self.limit, &mut binds);
                lines.push("RETURN v".into());
                QueryPlan::Scan { collection, filter, limit: self.limit }
            }
            Target::Count(kind) => {
                let collection = c.of(kind).to_owned();
                lines.push(format!("FOR v IN {}", binds.bind_collection("collection", &collection)));
                push_filter(&mut lines, &filter, "v", &mut binds);
                lines.push("COLLECT WITH COUNT INTO n".into());
                lines.push("RETURN n".into());
                QueryPlan::Count { collection, filter }
            }
            Target::Lookup(kind, keys) => {
                let collection = c.of(kind).to_owned();
                lines.push(format!("FOR key IN {}", binds.bind_named("keys", Json::from(keys.clone()))));
                lines.push(format!(
                    "LET v = DOCUMENT({}, key)",
                    binds.bind_collection("collection", &collection)
                ));
                lines.push("FILTER v != null".into());
                lines.push("RETURN v".into());
                QueryPlan::Lookup { collection, keys }
            }
            Target::Traverse { start, direction, target } => {
                let start = DocumentId::new(c.vertices.clone(), start);
                lines.push(format!(
                    "FOR v, e IN 1..1 {} {} GRAPH {}",
                    direction_token(direction),
                    binds.bind_named("start", Json::String(start.to_string())),
                    binds.bind_named("graph", Json::String(c.graph.clone())),
                ));
                if !self.edge_labels.is_empty() {
                    let labels = FilterBuilder::new().labels(self.edge_labels.iter().cloned()).build()?;
                    push_filter(&mut lines, &labels, "e", &mut binds);
                }
                let var = match target {
                    TraversalTarget::Vertices => "v",
                    TraversalTarget::Edges => "e",
                };
                push_filter(&mut lines, &filter, var, &mut binds);
                push_limit(&mut lines, self.limit, &mut binds);
                lines.push(format!("RETURN {var}"));
                QueryPlan::Traverse {
                    graph: c.graph.clone(),
                    start,
                    direction,
                    edge_collection: c.edges.clone(),
                    edge_labels: self.edge_labels,
                    filter,
                    target,
                    limit: self.limit,
                }
            }
        };

        Ok(Query::new(lines.join("\n  "), binds, plan))
    }
}

fn push_filter(lines: &mut Vec<String>, filter: &Filter, var: &str, binds: &mut BindVars) {
    if let Some(predicate) = filter.render(var, binds) {
        lines.push(format!("FILTER {predicate}"));
    }
}

fn push_limit(lines: &mut Vec<String>, limit: Option<usize>, binds: &mut BindVars) {
    if let Some(limit) = limit {
        lines.push(format!("LIMIT {}", binds.bind_named("limit", Json::from(limit))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Comparator;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn collections() -> Collections {
        Collections::for_graph("g")
    }

    #[test]
    fn test_scan_query_text() {
        let c = collections();
        let q = QueryBuilder::vertices(&c)
            .filter(FilterBuilder::new().compare("age", Comparator::Gt, 30).label("person"))
            .limit(5)
            .build()
            .unwrap();
        assert_eq!(
            q.text(),
            "FOR v IN @@collection\n  FILTER (v.`_properties`.`age`.`cardinality` IN [\"set\", \"list\"] \
             ? (v.`age` ANY > @p0) : v.`age` > @p0) AND (v.`_label` == @p1)\n  LIMIT @limit\n  RETURN v"
        );
        assert_eq!(q.bind_vars().get("@collection"), Some(&json!("g_vertex")));
        assert_eq!(q.bind_vars().get("limit"), Some(&json!(5)));
        assert_eq!(q.bind_vars().value_params(), 2);
    }

    #[test]
    fn test_traversal_direction_tokens() {
        let c = collections();
        for (dir, token) in [
            (Direction::Outgoing, "OUTBOUND"),
            (Direction::Incoming, "INBOUND"),
            (Direction::Both, "ANY"),
        ] {
            let q = QueryBuilder::neighbors(&c, "v1", dir).build().unwrap();
            assert!(q.text().starts_with(&format!("FOR v, e IN 1..1 {token} @start GRAPH @graph")));
            assert_eq!(q.bind_vars().get("start"), Some(&json!("g_vertex/v1")));
        }
    }

    #[test]
    fn test_traversal_with_labels_and_filter() {
        let c = collections();
        let q = QueryBuilder::incident_edges(&c, "v1", Direction::Both)
            .edge_labels(["knows", "likes"])
            .filter(FilterBuilder::new().has("weight"))
            .build()
            .unwrap();
        assert!(q.text().contains("FILTER (e.`_label` == @p0 OR e.`_label` == @p1)"));
        assert!(q.text().contains("FILTER e.`weight` != null"));
        assert!(q.text().ends_with("RETURN e"));
        match q.plan() {
            QueryPlan::Traverse { edge_labels, target, .. } => {
                assert_eq!(edge_labels, &vec!["knows".to_string(), "likes".to_string()]);
                assert_eq!(*target, TraversalTarget::Edges);
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn test_invalid_filter_fails_build() {
        let c = collections();
        assert!(QueryBuilder::vertices(&c).filter(FilterBuilder::new().has("")).build().is_err());
    }
}
