//! # docgraph: Property Graphs on a Document Store
//!
//! A multi-valued, meta-propertied property graph stored in a schema-less
//! document store. Vertices, edges and graph variables are documents; every
//! property value keeps its origin type through a type tag.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `DocumentStore` is the contract between the graph and storage
//! 2. **Pure model**: `Element`, `PropertyContainer`, `Value` do no I/O
//! 3. **Bound parameters only**: query text never contains a user literal
//! 4. **Explicit cardinality**: a key's first write decides single/set/list
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docgraph::{Graph, GraphConfig, Cardinality, FilterBuilder, Comparator};
//!
//! # async fn example() -> docgraph::Result<()> {
//! let graph = Graph::open_memory(GraphConfig::new("social"))?;
//!
//! let marko = graph.add_vertex(Some("marko"), Some("person")).await?;
//! graph.put_property(marko.kind(), marko.key(), "age", 29).await?;
//! graph.add_vertex_property("marko", "skills", "java", Cardinality::Set, Vec::<(String, docgraph::Value)>::new()).await?;
//!
//! let mut older = graph.vertices(FilterBuilder::new().compare("age", Comparator::Gt, 25)).await?;
//! while older.has_next().await? {
//!     println!("{:?}", older.next().await?.key());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Stores
//!
//! | Store | Description |
//! |-------|-------------|
//! | `MemoryStore` | In-memory store for testing/embedding |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod config;
pub mod query;
pub mod storage;
pub mod cursor;
pub mod batch;

use serde_json::Value as Json;
use tracing::debug;

use model::document;
use model::element::DEFAULT_LABEL;

// ============================================================================
// Re-exports
// ============================================================================

pub use model::{
    Value, PrimitiveArray, TypeTag, ValueCodec,
    Cardinality, Property, PropertyEntry,
    Capabilities, Element, ElementKind, Endpoints,
    Document, DocumentId, Direction,
};

pub use config::{Collections, GraphConfig};
pub use query::{Comparator, Filter, FilterBuilder, Query, QueryBuilder, QueryOptions};
pub use storage::{DocumentStore, MemoryStore, Page, BulkSummary};
pub use cursor::ResultCursor;
pub use batch::{BatchCoordinator, ElementRef};

// ============================================================================
// Top-level Graph handle
// ============================================================================

/// The primary entry point. A `Graph` wraps a document store and maps the
/// property graph onto its collections.
///
/// Outside a bulk load every property write is an eager read-modify-write of
/// the owning document. There is no optimistic concurrency control.
pub struct Graph<S: DocumentStore> {
    store: S,
    config: GraphConfig,
    collections: Collections,
    codec: ValueCodec,
}

impl<S: DocumentStore> Graph<S> {
    /// Create a Graph over the given store.
    pub fn with_store(store: S, config: GraphConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            collections: config.collections(),
            config,
            codec: ValueCodec::default(),
        })
    }

    /// Replace the value codec, e.g. to register structured decoders.
    pub fn with_codec(mut self, codec: ValueCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn collections(&self) -> &Collections {
        &self.collections
    }

    pub fn codec(&self) -> &ValueCodec {
        &self.codec
    }

    /// Access the underlying store (for advanced use).
    pub fn store(&self) -> &S {
        &self.store
    }

    fn query_options(&self) -> QueryOptions {
        QueryOptions { batch_size: self.config.page_size, timeout: self.config.query_timeout() }
    }

    // ========================================================================
    // Elements
    // ========================================================================

    /// Create a vertex. Without `id` the store assigns the key.
    pub async fn add_vertex(&self, id: Option<&str>, label: Option<&str>) -> Result<Element> {
        let mut doc = Document::new();
        if let Some(id) = id {
            self.ensure_absent(ElementKind::Vertex, id).await?;
            doc.insert(document::KEY.into(), Json::from(id));
        }
        doc.insert(document::LABEL.into(), Json::from(label.unwrap_or(DEFAULT_LABEL)));
        doc.insert(document::PROPERTIES.into(), Json::Object(Document::new()));

        let stored = self.store.put_document(&self.collections.vertices, doc).await?;
        let vertex = Element::from_document(ElementKind::Vertex, &stored, &self.codec)?;
        debug!(key = vertex.key(), label = vertex.label(), "vertex created");
        Ok(vertex)
    }

    /// Create an edge between two existing vertices.
    pub async fn add_edge(&self, id: Option<&str>, from: &str, to: &str, label: Option<&str>) -> Result<Element> {
        for end in [from, to] {
            if self.vertex(end).await?.is_none() {
                return Err(Error::NotFound(format!("vertex '{end}'")));
            }
        }
        let mut doc = Document::new();
        if let Some(id) = id {
            self.ensure_absent(ElementKind::Edge, id).await?;
            doc.insert(document::KEY.into(), Json::from(id));
        }
        let vertices = &self.collections.vertices;
        doc.insert(document::LABEL.into(), Json::from(label.unwrap_or(DEFAULT_LABEL)));
        doc.insert(document::FROM.into(), Json::from(DocumentId::new(vertices.clone(), from).to_string()));
        doc.insert(document::TO.into(), Json::from(DocumentId::new(vertices.clone(), to).to_string()));
        doc.insert(document::PROPERTIES.into(), Json::Object(Document::new()));

        let stored = self.store.put_document(&self.collections.edges, doc).await?;
        let edge = Element::from_document(ElementKind::Edge, &stored, &self.codec)?;
        debug!(key = edge.key(), from, to, "edge created");
        Ok(edge)
    }

    pub async fn vertex(&self, key: &str) -> Result<Option<Element>> {
        self.element(ElementKind::Vertex, key).await
    }

    pub async fn edge(&self, key: &str) -> Result<Option<Element>> {
        self.element(ElementKind::Edge, key).await
    }

    /// Fetch any element. Missing documents are `None`, not an error.
    pub async fn element(&self, kind: ElementKind, key: &str) -> Result<Option<Element>> {
        let id = DocumentId::new(self.collections.of(kind), key);
        match self.store.get_document(&id).await? {
            Some(doc) => Element::from_document(kind, &doc, &self.codec).map(Some),
            None => Ok(None),
        }
    }

    /// Remove a vertex with its incident edges and property documents.
    pub async fn remove_vertex(&self, key: &str) -> Result<bool> {
        let Some(vertex) = self.vertex(key).await? else {
            return Ok(false);
        };
        let edges = self.incident_edges(key, Direction::Both, &[]).await?.collect_remaining().await?;
        for edge in &edges {
            self.store.delete_document(&edge.document_id(&self.collections)).await?;
        }
        if self.config.property_documents {
            self.delete_property_documents(&vertex.property_document_keys()).await?;
        }
        debug!(key, edges = edges.len(), "vertex removed");
        self.store.delete_document(&vertex.document_id(&self.collections)).await
    }

    pub async fn remove_edge(&self, key: &str) -> Result<bool> {
        let id = DocumentId::new(self.collections.edges.clone(), key);
        self.store.delete_document(&id).await
    }

    async fn ensure_absent(&self, kind: ElementKind, key: &str) -> Result<()> {
        model::key::validate(key)?;
        let id = DocumentId::new(self.collections.of(kind), key);
        if self.store.get_document(&id).await?.is_some() {
            return Err(Error::DuplicateId(format!("{kind} '{key}'")));
        }
        Ok(())
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Set a single-valued property.
    pub async fn put_property(
        &self,
        kind: ElementKind,
        key: &str,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<PropertyEntry> {
        let value = value.into();
        self.modify(kind, key, |e| e.put_property(name, value).cloned()).await
    }

    /// Add a vertex-property value under `cardinality`, with meta-properties.
    pub async fn add_vertex_property<I, K>(
        &self,
        vertex: &str,
        name: &str,
        value: impl Into<Value>,
        cardinality: Cardinality,
        meta: I,
    ) -> Result<PropertyEntry>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let value = value.into();
        let meta: Vec<(String, Value)> = meta.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.modify(ElementKind::Vertex, vertex, |e| e.add_property(name, value, cardinality, meta).cloned())
            .await
    }

    /// Remove one property value by entry id.
    pub async fn remove_property_entry(
        &self,
        kind: ElementKind,
        key: &str,
        name: &str,
        entry_id: &str,
    ) -> Result<Option<PropertyEntry>> {
        self.modify(kind, key, |e| e.remove_entry(name, entry_id)).await
    }

    /// Remove every value of a property.
    pub async fn remove_property(&self, kind: ElementKind, key: &str, name: &str) -> Result<Vec<PropertyEntry>> {
        self.modify(kind, key, |e| e.remove_property(name)).await
    }

    pub async fn set_meta_property(
        &self,
        vertex: &str,
        name: &str,
        entry_id: &str,
        meta_key: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        self.modify(ElementKind::Vertex, vertex, |e| e.set_meta(name, entry_id, meta_key, value)).await
    }

    pub async fn remove_meta_property(
        &self,
        vertex: &str,
        name: &str,
        entry_id: &str,
        meta_key: &str,
    ) -> Result<Option<Value>> {
        self.modify(ElementKind::Vertex, vertex, |e| e.remove_meta(name, entry_id, meta_key)).await
    }

    async fn modify<R>(&self, kind: ElementKind, key: &str, f: impl FnOnce(&mut Element) -> Result<R>) -> Result<R> {
        let mut element = self
            .element(kind, key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{kind} '{key}'")))?;
        let previous = element.property_document_keys();
        let out = f(&mut element)?;
        self.save(&element, &previous).await?;
        Ok(out)
    }

    async fn save(&self, element: &Element, previous: &[String]) -> Result<()> {
        let doc = element.to_document(&self.collections)?;
        self.store.put_document(self.collections.of(element.kind()), doc).await?;
        if self.config.property_documents && element.kind() == ElementKind::Vertex {
            self.delete_property_documents(previous).await?;
            for (property, ownership) in element.property_documents(&self.collections)? {
                self.store.put_document(&self.collections.properties, property).await?;
                self.store.put_document(&self.collections.property_edges, ownership).await?;
            }
        }
        Ok(())
    }

    async fn delete_property_documents(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            let c = &self.collections;
            self.store.delete_document(&DocumentId::new(c.property_edges.clone(), key.clone())).await?;
            self.store.delete_document(&DocumentId::new(c.properties.clone(), key.clone())).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Graph variables
    // ========================================================================

    /// The graph's variables element; empty if none were ever set.
    pub async fn variables(&self) -> Result<Element> {
        Ok(self
            .element(ElementKind::Variables, &self.config.name)
            .await?
            .unwrap_or_else(|| Element::variables(self.config.name.clone())))
    }

    pub async fn set_variable(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let mut vars = self.variables().await?;
        vars.put_property(name, value)?;
        self.save(&vars, &[]).await
    }

    pub async fn remove_variable(&self, name: &str) -> Result<Option<Value>> {
        let mut vars = self.variables().await?;
        let removed = vars.remove_property(name)?;
        if removed.is_empty() {
            return Ok(None);
        }
        self.save(&vars, &[]).await?;
        Ok(removed.into_iter().next().map(|e| e.value().clone()))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Run a built query and return a cursor over the raw result items.
    pub async fn execute(&self, query: &Query) -> Result<ResultCursor<'_, S, Json>> {
        ResultCursor::raw(&self.store, query, &self.query_options()).await
    }

    /// Run a built query whose items are documents of `kind`.
    pub async fn elements(&self, kind: ElementKind, query: &Query) -> Result<ResultCursor<'_, S, Element>> {
        let codec = &self.codec;
        let decode: cursor::DecodeFn<'_, Element> = Box::new(move |item| match item {
            Json::Object(doc) => Element::from_document(kind, &doc, codec),
            other => Err(Error::Storage(format!("expected a {kind} document, got {other}"))),
        });
        ResultCursor::open(&self.store, query, &self.query_options(), decode).await
    }

    pub async fn vertices(&self, filter: FilterBuilder) -> Result<ResultCursor<'_, S, Element>> {
        let query = QueryBuilder::vertices(&self.collections).filter(filter).build()?;
        self.elements(ElementKind::Vertex, &query).await
    }

    pub async fn edges(&self, filter: FilterBuilder) -> Result<ResultCursor<'_, S, Element>> {
        let query = QueryBuilder::edges(&self.collections).filter(filter).build()?;
        self.elements(ElementKind::Edge, &query).await
    }

    /// Vertices by key, in key order; missing keys are skipped.
    pub async fn vertices_by_keys(&self, keys: &[&str]) -> Result<Vec<Element>> {
        let query = QueryBuilder::lookup(&self.collections, ElementKind::Vertex, keys.iter().copied()).build()?;
        self.elements(ElementKind::Vertex, &query).await?.collect_remaining().await
    }

    /// Vertices one hop from `start`, optionally through edges with the given labels.
    pub async fn neighbors(
        &self,
        start: &str,
        direction: Direction,
        edge_labels: &[&str],
    ) -> Result<ResultCursor<'_, S, Element>> {
        let query = QueryBuilder::neighbors(&self.collections, start, direction)
            .edge_labels(edge_labels.iter().copied())
            .build()?;
        self.elements(ElementKind::Vertex, &query).await
    }

    pub async fn incident_edges(
        &self,
        start: &str,
        direction: Direction,
        edge_labels: &[&str],
    ) -> Result<ResultCursor<'_, S, Element>> {
        let query = QueryBuilder::incident_edges(&self.collections, start, direction)
            .edge_labels(edge_labels.iter().copied())
            .build()?;
        self.elements(ElementKind::Edge, &query).await
    }

    /// Number of elements of `kind` matching `filter`.
    pub async fn count(&self, kind: ElementKind, filter: FilterBuilder) -> Result<u64> {
        let query = QueryBuilder::count(&self.collections, kind).filter(filter).build()?;
        let mut cursor = self.execute(&query).await?;
        let n = cursor.next().await?;
        cursor.close().await?;
        n.as_u64().ok_or_else(|| Error::Storage(format!("count query returned {n}")))
    }

    // ========================================================================
    // Bulk loading
    // ========================================================================

    /// Start a bulk-load session. Call `shutdown` on it to write what is left.
    pub fn bulk_loader(&self) -> BatchCoordinator<'_, S> {
        BatchCoordinator::new(&self.store, &self.config)
    }
}

/// In-memory graph for testing and embedding.
impl Graph<MemoryStore> {
    pub fn open_memory(config: GraphConfig) -> Result<Self> {
        Self::with_store(MemoryStore::new(), config)
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Empty property key")]
    EmptyKey,

    #[error("Reserved property key: {0}")]
    ReservedKey(String),

    #[error("Cardinality conflict on '{key}': bound as {bound}, requested {requested}")]
    CardinalityConflict { key: String, bound: Cardinality, requested: Cardinality },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Bulk flush failed: {0}")]
    Flush(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
