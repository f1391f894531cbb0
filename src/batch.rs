//! Bulk loading.
//!
//! A [`BatchCoordinator`] buffers newly created vertices and edges and writes
//! them with `bulk_insert` instead of one request per element.
//!
//! ```text
//! add_vertex ──► identity cache ──► pending vertices ─┐
//! add_edge   ──► identity cache ──► pending edges ────┤
//!                                                     ▼
//!                       flush: vertices ─► property docs ─► edges
//! ```
//!
//! Rules:
//! - ids are caller-supplied or drawn from a counter, skipping ids already
//!   buffered or already stored
//! - reaching a threshold flushes everything before the next add is accepted
//! - vertices are always written before edges
//! - flushed elements are frozen: mutating them returns `Unsupported`
//! - a failed flush poisons the coordinator; later calls return `Flush`

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::config::{Collections, GraphConfig};
use crate::model::element::DEFAULT_LABEL;
use crate::model::{Capabilities, Document, DocumentId, Element, ElementKind};
use crate::storage::DocumentStore;
use crate::{Error, Result};

/// Shared handle to a buffered element. Properties may be set through it
/// until the element is flushed.
pub type ElementRef = Arc<RwLock<Element>>;

pub struct BatchCoordinator<'g, S: DocumentStore + ?Sized> {
    store: &'g S,
    collections: Collections,
    vertex_threshold: usize,
    edge_threshold: usize,
    property_documents: bool,
    next_id: AtomicU64,
    cache: Mutex<HashMap<(ElementKind, String), ElementRef>>,
    pending_vertices: Mutex<Vec<ElementRef>>,
    pending_edges: Mutex<Vec<ElementRef>>,
    poisoned: AtomicBool,
}

impl<'g, S: DocumentStore + ?Sized> BatchCoordinator<'g, S> {
    pub fn new(store: &'g S, config: &GraphConfig) -> Self {
        Self {
            store,
            collections: config.collections(),
            vertex_threshold: config.vertex_batch_size.max(1),
            edge_threshold: config.edge_batch_size.max(1),
            property_documents: config.property_documents,
            next_id: AtomicU64::new(1),
            cache: Mutex::new(HashMap::new()),
            pending_vertices: Mutex::new(Vec::new()),
            pending_edges: Mutex::new(Vec::new()),
            poisoned: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Adds
    // ========================================================================

    /// Buffer a new vertex. Without `id`, one is drawn from the counter.
    pub async fn add_vertex(&self, id: Option<&str>, label: Option<&str>) -> Result<ElementRef> {
        self.ensure_healthy()?;
        if self.pending_vertices.lock().len() >= self.vertex_threshold {
            self.flush().await?;
        }
        let caps = Capabilities::VERTEX.frozen();
        let label = label.unwrap_or(DEFAULT_LABEL);
        let element = self
            .register(ElementKind::Vertex, id, |key| Element::vertex(key, label).with_capabilities(caps))
            .await?;
        self.pending_vertices.lock().push(Arc::clone(&element));
        Ok(element)
    }

    /// Buffer a new edge between two vertex keys.
    pub async fn add_edge(&self, id: Option<&str>, from: &str, to: &str, label: Option<&str>) -> Result<ElementRef> {
        self.ensure_healthy()?;
        let full = self.pending_edges.lock().len() >= self.edge_threshold
            || self.pending_vertices.lock().len() >= self.vertex_threshold;
        if full {
            self.flush().await?;
        }
        let caps = Capabilities::EDGE.frozen();
        let label = label.unwrap_or(DEFAULT_LABEL);
        let element = self
            .register(ElementKind::Edge, id, |key| Element::edge(key, label, from, to).with_capabilities(caps))
            .await?;
        self.pending_edges.lock().push(Arc::clone(&element));
        Ok(element)
    }

    async fn register(
        &self,
        kind: ElementKind,
        id: Option<&str>,
        build: impl Fn(String) -> Element,
    ) -> Result<ElementRef> {
        if let Some(id) = id {
            return self
                .claim(kind, id.to_owned(), &build)
                .ok_or_else(|| Error::DuplicateId(format!("{kind} '{id}'")));
        }
        loop {
            let candidate = self.fresh_key(kind).await?;
            // A caller-supplied id may have taken the candidate meanwhile.
            if let Some(element) = self.claim(kind, candidate, &build) {
                return Ok(element);
            }
        }
    }

    /// Next counter value that is neither in the identity cache nor stored.
    async fn fresh_key(&self, kind: ElementKind) -> Result<String> {
        loop {
            let candidate = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
            if self.cache.lock().contains_key(&(kind, candidate.clone())) {
                continue;
            }
            let id = DocumentId::new(self.collections.of(kind), candidate.as_str());
            if self.store.get_document(&id).await?.is_none() {
                return Ok(candidate);
            }
            trace!(%kind, key = %candidate, "generated id already stored");
        }
    }

    fn claim(&self, kind: ElementKind, key: String, build: &impl Fn(String) -> Element) -> Option<ElementRef> {
        match self.cache.lock().entry((kind, key)) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let element = Arc::new(RwLock::new(build(slot.key().1.clone())));
                slot.insert(Arc::clone(&element));
                Some(element)
            }
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// A vertex added through this coordinator, flushed or not.
    pub fn vertex(&self, id: &str) -> Option<ElementRef> {
        self.cache.lock().get(&(ElementKind::Vertex, id.to_owned())).cloned()
    }

    pub fn edge(&self, id: &str) -> Option<ElementRef> {
        self.cache.lock().get(&(ElementKind::Edge, id.to_owned())).cloned()
    }

    pub fn pending(&self) -> (usize, usize) {
        (self.pending_vertices.lock().len(), self.pending_edges.lock().len())
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    // ========================================================================
    // Flush
    // ========================================================================

    /// Write every pending element: vertices first, then edges.
    pub async fn flush(&self) -> Result<()> {
        self.ensure_healthy()?;
        let vertices = mem::take(&mut *self.pending_vertices.lock());
        let edges = mem::take(&mut *self.pending_edges.lock());
        if vertices.is_empty() && edges.is_empty() {
            return Ok(());
        }
        debug!(vertices = vertices.len(), edges = edges.len(), "flushing batch");

        let result = self.write(&vertices, &edges).await;
        if let Err(e) = &result {
            warn!(error = %e, "batch flush failed; coordinator poisoned");
            self.poisoned.store(true, Ordering::Release);
        }
        result
    }

    /// Flush what is left and end the session.
    pub async fn shutdown(self) -> Result<()> {
        self.flush().await
    }

    async fn write(&self, vertices: &[ElementRef], edges: &[ElementRef]) -> Result<()> {
        self.insert(ElementKind::Vertex, self.collections.vertices.clone(), vertices).await?;
        if self.property_documents && !vertices.is_empty() {
            let mut properties = Vec::new();
            let mut ownership = Vec::new();
            for v in vertices {
                for (doc, edge) in v.read().property_documents(&self.collections)? {
                    properties.push(doc);
                    ownership.push(edge);
                }
            }
            self.bulk(&self.collections.properties, properties).await?;
            self.bulk(&self.collections.property_edges, ownership).await?;
        }
        self.insert(ElementKind::Edge, self.collections.edges.clone(), edges).await?;
        Ok(())
    }

    async fn insert(&self, kind: ElementKind, collection: String, elements: &[ElementRef]) -> Result<()> {
        if elements.is_empty() {
            return Ok(());
        }
        let docs = elements
            .iter()
            .map(|e| e.read().to_document(&self.collections))
            .collect::<Result<Vec<_>>>()?;
        self.bulk(&collection, docs).await?;
        for e in elements {
            e.write().mark_created();
        }
        debug!(%kind, count = elements.len(), "bulk inserted");
        Ok(())
    }

    async fn bulk(&self, collection: &str, docs: Vec<Document>) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let total = docs.len();
        let summary = self.store.bulk_insert(collection, docs).await?;
        match summary.errors.first() {
            None => Ok(()),
            Some(first) => Err(Error::Flush(format!(
                "{} of {total} documents rejected by '{collection}'; first at index {}: {}",
                summary.errors.len(),
                first.index,
                first.message
            ))),
        }
    }

    fn ensure_healthy(&self) -> Result<()> {
        if self.is_poisoned() {
            return Err(Error::Flush("coordinator poisoned by an earlier failed flush".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use crate::storage::MemoryStore;

    fn config(threshold: usize) -> GraphConfig {
        GraphConfig::new("g").with_batch_sizes(threshold, threshold)
    }

    #[tokio::test]
    async fn test_generated_ids_are_distinct_and_skip_taken() {
        let store = MemoryStore::new();
        let cfg = config(100);
        let batch = BatchCoordinator::new(&store, &cfg);
        batch.add_vertex(Some("2"), None).await.unwrap();
        let a = batch.add_vertex(None, None).await.unwrap();
        let b = batch.add_vertex(None, None).await.unwrap();
        assert_eq!(a.read().key(), "1");
        assert_eq!(b.read().key(), "3");
        assert!(matches!(batch.add_vertex(Some("1"), None).await, Err(Error::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_generated_ids_skip_stored_keys() {
        let store = MemoryStore::new();
        let cfg = config(100);
        for key in ["1", "2"] {
            let mut doc = Document::new();
            doc.insert("_key".into(), key.into());
            store.put_document("g_vertex", doc).await.unwrap();
        }
        let batch = BatchCoordinator::new(&store, &cfg);
        let v = batch.add_vertex(None, None).await.unwrap();
        assert_eq!(v.read().key(), "3");
        // Edges are drawn against their own collection.
        batch.add_vertex(Some("a"), None).await.unwrap();
        let e = batch.add_edge(None, "a", "a", None).await.unwrap();
        assert_eq!(e.read().key(), "4");
        batch.shutdown().await.unwrap();
        assert_eq!(store.document_count("g_vertex"), 4);
    }

    #[test]
    fn test_counter_is_shared_across_threads() {
        let store = MemoryStore::new();
        let cfg = config(10_000);
        let batch = BatchCoordinator::new(&store, &cfg);
        let batch = &batch;
        let keys: Vec<String> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(move || {
                        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                        rt.block_on(async {
                            let mut keys = Vec::new();
                            for _ in 0..100 {
                                let v = batch.add_vertex(None, None).await.unwrap();
                                keys.push(v.read().key().to_owned());
                            }
                            keys
                        })
                    })
                })
                .collect();
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });
        let distinct: std::collections::HashSet<&String> = keys.iter().collect();
        assert_eq!(keys.len(), 800);
        assert_eq!(distinct.len(), 800);
        assert_eq!(batch.pending(), (800, 0));
    }

    #[tokio::test]
    async fn test_threshold_triggers_flush() {
        let store = MemoryStore::new();
        let cfg = config(2);
        let batch = BatchCoordinator::new(&store, &cfg);
        batch.add_vertex(None, None).await.unwrap();
        batch.add_vertex(None, None).await.unwrap();
        assert_eq!(store.document_count("g_vertex"), 0);
        batch.add_vertex(None, None).await.unwrap();
        assert_eq!(store.document_count("g_vertex"), 2);
        assert_eq!(batch.pending(), (1, 0));
        batch.shutdown().await.unwrap();
        assert_eq!(store.document_count("g_vertex"), 3);
    }

    #[tokio::test]
    async fn test_flushed_elements_are_frozen() {
        let store = MemoryStore::new();
        let cfg = config(10);
        let batch = BatchCoordinator::new(&store, &cfg);
        let v = batch.add_vertex(Some("v"), Some("person")).await.unwrap();
        v.write().put_property("name", "ada").unwrap();
        batch.flush().await.unwrap();
        assert!(matches!(v.write().put_property("name", "bob"), Err(Error::Unsupported(_))));
        assert_eq!(v.read().value("name"), Some(&Value::from("ada")));
        assert!(batch.vertex("v").is_some());
    }

    #[tokio::test]
    async fn test_failed_flush_poisons() {
        let store = MemoryStore::new();
        let cfg = config(10);
        let batch = BatchCoordinator::new(&store, &cfg);
        batch.add_vertex(Some("a"), None).await.unwrap();
        batch.add_edge(None, "a", "missing", None).await.unwrap();

        let err = batch.flush().await.unwrap_err();
        assert!(matches!(err, Error::Flush(_)));
        assert!(batch.is_poisoned());
        assert!(matches!(batch.add_vertex(None, None).await, Err(Error::Flush(_))));
        assert_eq!(store.document_count("g_vertex"), 1);
    }
}
