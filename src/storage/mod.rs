//! # Document Store Trait
//!
//! This is the contract between docgraph and the document store it runs on.
//! The graph layer never talks to a driver directly; everything goes
//! through [`DocumentStore`].
//!
//! ## Implementations
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `MemoryStore` | `memory` | In-memory for testing/embedding |
//!
//! Retries, connection handling, and request timeouts belong to the
//! implementation. The graph layer surfaces every store error unchanged.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::model::{Document, DocumentId};
use crate::query::{Query, QueryOptions};
use crate::Result;

pub use memory::MemoryStore;

/// One page of a query result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Json>,
    /// Server-side cursor holding the remaining items, if any.
    pub cursor_id: Option<String>,
    pub has_more: bool,
}

/// Outcome of a bulk insert, item by item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkSummary {
    pub created: usize,
    pub errors: Vec<BulkItemError>,
}

impl BulkSummary {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemError {
    /// Position of the failed document in the submitted batch.
    pub index: usize,
    pub message: String,
}

/// The document store contract.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    // ========================================================================
    // Documents
    // ========================================================================

    /// Fetch a document. Returns None if it does not exist.
    async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>>;

    /// Insert or replace a document. A document without `_key` gets a
    /// store-assigned key. Returns the stored document including `_id`,
    /// `_key` and `_rev`.
    async fn put_document(&self, collection: &str, doc: Document) -> Result<Document>;

    /// Delete a document. Returns true if it existed.
    async fn delete_document(&self, id: &DocumentId) -> Result<bool>;

    // ========================================================================
    // Queries
    // ========================================================================

    /// Execute a query and return its first page.
    async fn run_query(&self, query: &Query, options: &QueryOptions) -> Result<Page>;

    /// Fetch the next page of an open server-side cursor.
    async fn fetch_page(&self, cursor_id: &str) -> Result<Page>;

    /// Release a server-side cursor. Unknown ids are ignored.
    async fn close_cursor(&self, cursor_id: &str) -> Result<()>;

    // ========================================================================
    // Bulk
    // ========================================================================

    /// Insert many documents into one collection. Item failures are reported
    /// in the summary; the call itself only fails on transport errors.
    async fn bulk_insert(&self, collection: &str, docs: Vec<Document>) -> Result<BulkSummary>;
}
