//! Query construction.
//!
//! A [`Query`] carries three things: the query text sent to the store, the
//! bind variables it references, and the structured [`QueryPlan`] it was
//! rendered from. Stores that speak the query language execute the text;
//! embedded stores may evaluate the plan directly.

pub mod filter;
pub mod builder;

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value as Json;

use crate::model::{Direction, DocumentId};

pub use builder::QueryBuilder;
pub use filter::{Comparator, Filter, FilterBuilder, FilterClause, Predicate};

/// Named bind variables of one query.
///
/// Value parameters are numbered `p0, p1, ...`; collection parameters are
/// stored under `@name` and referenced as `@@name`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindVars {
    vars: BTreeMap<String, Json>,
    next: usize,
}

impl BindVars {
    /// Bind a value, returning its placeholder (`@p<n>`).
    pub fn bind(&mut self, value: Json) -> String {
        let name = format!("p{}", self.next);
        self.next += 1;
        self.vars.insert(name.clone(), value);
        format!("@{name}")
    }

    pub fn bind_named(&mut self, name: &str, value: Json) -> String {
        self.vars.insert(name.to_owned(), value);
        format!("@{name}")
    }

    pub fn bind_collection(&mut self, name: &str, collection: &str) -> String {
        self.vars.insert(format!("@{name}"), Json::String(collection.to_owned()));
        format!("@@{name}")
    }

    pub fn get(&self, name: &str) -> Option<&Json> {
        self.vars.get(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Json)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Value parameters only (`p<n>`), excluding named and collection binds.
    pub fn value_params(&self) -> usize {
        self.next
    }
}

/// What the store returns for each result item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalTarget {
    Vertices,
    Edges,
}

/// Structured form of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// Documents of one collection matching a filter.
    Scan { collection: String, filter: Filter, limit: Option<usize> },
    /// Number of matching documents, returned as a single item.
    Count { collection: String, filter: Filter },
    /// Documents by key, in the order the keys are given.
    Lookup { collection: String, keys: Vec<String> },
    /// One-hop neighbors or incident edges of a start vertex.
    Traverse {
        graph: String,
        start: DocumentId,
        direction: Direction,
        edge_collection: String,
        edge_labels: Vec<String>,
        filter: Filter,
        target: TraversalTarget,
        limit: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    text: String,
    bind_vars: BindVars,
    plan: QueryPlan,
}

impl Query {
    pub fn new(text: String, bind_vars: BindVars, plan: QueryPlan) -> Self {
        Self { text, bind_vars, plan }
    }

    pub fn text(&self) -> &str { &self.text }
    pub fn bind_vars(&self) -> &BindVars { &self.bind_vars }
    pub fn plan(&self) -> &QueryPlan { &self.plan }
}

/// Per-request execution options handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Items per page.
    pub batch_size: usize,
    /// Transport-level timeout; enforcement is up to the store.
    pub timeout: Option<Duration>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { batch_size: 1_000, timeout: None }
    }
}
