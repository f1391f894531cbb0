//! Graph configuration.
//!
//! ```rust
//! use docgraph::GraphConfig;
//!
//! let cfg = GraphConfig::from_json(r#"{ "name": "social", "page_size": 50 }"#).unwrap();
//! assert_eq!(cfg.name, "social");
//! assert_eq!(cfg.page_size, 50);
//! assert_eq!(cfg.collections().vertices, "social_vertex");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::ElementKind;
use crate::{Error, Result};

/// Settings for one graph. Every field has a default, so a config file only
/// lists what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Graph name; also the prefix of every collection name.
    pub name: String,
    /// Pending vertices that trigger a bulk flush.
    pub vertex_batch_size: usize,
    /// Pending edges that trigger a bulk flush.
    pub edge_batch_size: usize,
    /// Documents per result page.
    pub page_size: usize,
    /// Per-request timeout handed to the store. `None` waits indefinitely.
    pub query_timeout_ms: Option<u64>,
    /// Also keep every vertex-property value as its own document, linked to
    /// its owner by an edge, so values can be traversal targets.
    pub property_documents: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            name: "graph".into(),
            vertex_batch_size: 10_000,
            edge_batch_size: 10_000,
            page_size: 1_000,
            query_timeout_ms: None,
            property_documents: false,
        }
    }
}

impl GraphConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: GraphConfig = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_batch_sizes(mut self, vertices: usize, edges: usize) -> Self {
        self.vertex_batch_size = vertices;
        self.edge_batch_size = edges;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_property_documents(mut self, enabled: bool) -> Self {
        self.property_documents = enabled;
        self
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.name.contains('/') {
            return Err(Error::Config(format!("invalid graph name '{}'", self.name)));
        }
        if self.vertex_batch_size == 0 || self.edge_batch_size == 0 {
            return Err(Error::Config("batch sizes must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(Error::Config("page_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn collections(&self) -> Collections {
        Collections::for_graph(&self.name)
    }
}

/// Collection names of one graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collections {
    pub graph: String,
    pub vertices: String,
    pub edges: String,
    pub variables: String,
    /// Property documents (meta-property layout only).
    pub properties: String,
    /// Element → property document ownership edges.
    pub property_edges: String,
}

impl Collections {
    pub fn for_graph(name: &str) -> Self {
        Self {
            graph: name.to_owned(),
            vertices: format!("{name}_vertex"),
            edges: format!("{name}_edge"),
            variables: format!("{name}_variables"),
            properties: format!("{name}_properties"),
            property_edges: format!("{name}_element_has_properties"),
        }
    }

    pub fn of(&self, kind: ElementKind) -> &str {
        match kind {
            ElementKind::Vertex => &self.vertices,
            ElementKind::Edge => &self.edges,
            ElementKind::Variables => &self.variables,
        }
    }
}
