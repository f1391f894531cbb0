//! In-memory document store.
//!
//! This is the reference implementation of `DocumentStore`. Collections are
//! `BTreeMap`s keyed by `_key`, protected by one RwLock. Queries are
//! answered from the structured plan carried by each `Query`; the query text
//! is not parsed.
//!
//! ## Limitations
//!
//! - **No transactions**: every write is applied immediately.
//! - **No timeouts**: `QueryOptions::timeout` is accepted and ignored, every
//!   call completes synchronously.
//! - **Full scans**: filters are evaluated document by document.
//!
//! Unlike most stores, `bulk_insert` rejects edges whose `_from`/`_to`
//! documents do not exist yet. That makes insertion-order mistakes visible
//! in tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value as Json;
use tracing::trace;

use super::{BulkItemError, BulkSummary, DocumentStore, Page};
use crate::model::document::{self, Document, DocumentId};
use crate::model::Direction;
use crate::query::{Query, QueryOptions, QueryPlan, TraversalTarget};
use crate::{Error, Result};

type Collection = BTreeMap<String, Document>;

/// Items of a query result not yet handed out.
struct ServerCursor {
    remaining: VecDeque<Json>,
    batch_size: usize,
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory document storage.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    collections: RwLock<HashMap<String, Collection>>,
    cursors: RwLock<HashMap<String, ServerCursor>>,
    next_key: AtomicU64,
    next_rev: AtomicU64,
    next_cursor: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server-side cursors not yet exhausted or closed.
    pub fn open_cursors(&self) -> usize {
        self.inner.cursors.read().len()
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.inner.collections.read().get(collection).map_or(0, BTreeMap::len)
    }

    fn next_rev(&self) -> String {
        format!("_r{}", self.inner.next_rev.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Fill in `_key`, `_id` and `_rev`. Keys are assigned from a counter
    /// when absent, skipping keys already in `existing`.
    fn stamp(&self, collection: &str, existing: Option<&Collection>, doc: &mut Document) -> Result<String> {
        let key = match document::str_attr(doc, document::KEY) {
            Some(key) if key.is_empty() || key.contains('/') => {
                return Err(Error::Storage(format!("illegal document key '{key}'")));
            }
            Some(key) => key.to_owned(),
            None => loop {
                let candidate = (self.inner.next_key.fetch_add(1, Ordering::Relaxed) + 1).to_string();
                if !existing.is_some_and(|c| c.contains_key(&candidate)) {
                    break candidate;
                }
            },
        };
        doc.insert(document::KEY.into(), Json::String(key.clone()));
        doc.insert(
            document::ID.into(),
            Json::String(DocumentId::new(collection, key.clone()).to_string()),
        );
        doc.insert(document::REV.into(), Json::String(self.next_rev()));
        Ok(key)
    }

    fn paginate(&self, mut items: VecDeque<Json>, batch_size: usize) -> Page {
        let batch_size = batch_size.max(1);
        let first: Vec<Json> = items.drain(..batch_size.min(items.len())).collect();
        if items.is_empty() {
            return Page { items: first, cursor_id: None, has_more: false };
        }
        let id = format!("cursor-{}", self.inner.next_cursor.fetch_add(1, Ordering::Relaxed) + 1);
        self.inner
            .cursors
            .write()
            .insert(id.clone(), ServerCursor { remaining: items, batch_size });
        Page { items: first, cursor_id: Some(id), has_more: true }
    }

    fn execute(&self, plan: &QueryPlan) -> Result<Vec<Json>> {
        let collections = self.inner.collections.read();
        let empty = Collection::new();
        let scan = |name: &str| collections.get(name).unwrap_or(&empty);

        let items = match plan {
            QueryPlan::Scan { collection, filter, limit } => scan(collection)
                .values()
                .filter(|doc| filter.matches(doc))
                .take(limit.unwrap_or(usize::MAX))
                .map(|doc| Json::Object(doc.clone()))
                .collect(),
            QueryPlan::Count { collection, filter } => {
                let n = scan(collection).values().filter(|doc| filter.matches(doc)).count();
                vec![Json::from(n)]
            }
            QueryPlan::Lookup { collection, keys } => {
                let docs = scan(collection);
                keys.iter()
                    .filter_map(|k| docs.get(k))
                    .map(|doc| Json::Object(doc.clone()))
                    .collect()
            }
            QueryPlan::Traverse { start, direction, edge_collection, edge_labels, filter, target, limit, .. } => {
                let start = start.to_string();
                let mut out = Vec::new();
                for edge in scan(edge_collection).values() {
                    if out.len() >= limit.unwrap_or(usize::MAX) {
                        break;
                    }
                    let from = document::str_attr(edge, document::FROM).unwrap_or_default();
                    let to = document::str_attr(edge, document::TO).unwrap_or_default();
                    let other = match direction {
                        Direction::Outgoing if from == start => to,
                        Direction::Incoming if to == start => from,
                        Direction::Both if from == start => to,
                        Direction::Both if to == start => from,
                        _ => continue,
                    };
                    if !edge_labels.is_empty() {
                        let label = document::str_attr(edge, document::LABEL);
                        if !edge_labels.iter().any(|l| Some(l.as_str()) == label) {
                            continue;
                        }
                    }
                    let candidate = match target {
                        TraversalTarget::Edges => edge,
                        TraversalTarget::Vertices => {
                            let id = DocumentId::parse(other)?;
                            match collections.get(&id.collection).and_then(|c| c.get(&id.key)) {
                                Some(vertex) => vertex,
                                None => continue,
                            }
                        }
                    };
                    if filter.matches(candidate) {
                        out.push(Json::Object(candidate.clone()));
                    }
                }
                out
            }
        };
        Ok(items)
    }
}

// ============================================================================
// DocumentStore impl
// ============================================================================

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>> {
        Ok(self
            .inner
            .collections
            .read()
            .get(&id.collection)
            .and_then(|c| c.get(&id.key))
            .cloned())
    }

    async fn put_document(&self, collection: &str, mut doc: Document) -> Result<Document> {
        let mut collections = self.inner.collections.write();
        let target = collections.entry(collection.to_owned()).or_default();
        let key = self.stamp(collection, Some(&*target), &mut doc)?;
        trace!(collection, key = %key, "put document");
        target.insert(key, doc.clone());
        Ok(doc)
    }

    async fn delete_document(&self, id: &DocumentId) -> Result<bool> {
        Ok(self
            .inner
            .collections
            .write()
            .get_mut(&id.collection)
            .and_then(|c| c.remove(&id.key))
            .is_some())
    }

    async fn run_query(&self, query: &Query, options: &QueryOptions) -> Result<Page> {
        trace!(text = query.text(), binds = query.bind_vars().len(), "run query");
        let items = self.execute(query.plan())?;
        Ok(self.paginate(items.into(), options.batch_size))
    }

    async fn fetch_page(&self, cursor_id: &str) -> Result<Page> {
        let mut cursors = self.inner.cursors.write();
        let cursor = cursors
            .get_mut(cursor_id)
            .ok_or_else(|| Error::NotFound(format!("cursor {cursor_id}")))?;
        let n = cursor.batch_size.min(cursor.remaining.len());
        let items: Vec<Json> = cursor.remaining.drain(..n).collect();
        if cursor.remaining.is_empty() {
            cursors.remove(cursor_id);
            return Ok(Page { items, cursor_id: None, has_more: false });
        }
        Ok(Page { items, cursor_id: Some(cursor_id.to_owned()), has_more: true })
    }

    async fn close_cursor(&self, cursor_id: &str) -> Result<()> {
        self.inner.cursors.write().remove(cursor_id);
        Ok(())
    }

    async fn bulk_insert(&self, collection: &str, docs: Vec<Document>) -> Result<BulkSummary> {
        let mut summary = BulkSummary::default();
        let mut collections = self.inner.collections.write();
        for (index, mut doc) in docs.into_iter().enumerate() {
            let key = match self.stamp(collection, collections.get(collection), &mut doc) {
                Ok(key) => key,
                Err(e) => {
                    summary.errors.push(BulkItemError { index, message: e.to_string() });
                    continue;
                }
            };
            if let Some(missing) = [document::FROM, document::TO]
                .iter()
                .filter_map(|attr| document::str_attr(&doc, attr))
                .find(|handle| !handle_exists(&collections, handle))
            {
                summary.errors.push(BulkItemError {
                    index,
                    message: format!("edge endpoint '{missing}' not found"),
                });
                continue;
            }
            let target = collections.entry(collection.to_owned()).or_default();
            if target.contains_key(&key) {
                summary.errors.push(BulkItemError {
                    index,
                    message: format!("unique constraint violated: '{key}'"),
                });
                continue;
            }
            target.insert(key, doc);
            summary.created += 1;
        }
        trace!(collection, created = summary.created, failed = summary.errors.len(), "bulk insert");
        Ok(summary)
    }
}

fn handle_exists(collections: &HashMap<String, Collection>, handle: &str) -> bool {
    DocumentId::parse(handle)
        .ok()
        .and_then(|id| collections.get(&id.collection).map(|c| c.contains_key(&id.key)))
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================
