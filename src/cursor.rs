//! Lazy, paginated query results.
//!
//! A [`ResultCursor`] holds one page of results at a time. When the page is
//! drained, [`ResultCursor::has_next`] asks the store for the next one; it
//! never fetches more than one page per call.
//!
//! ```text
//! run_query ──► [page 1] ──has_next──► fetch_page ──► [page 2] ──► ... ──► exhausted
//!                    │                                                   │
//!                    └───────────────── close() ─────────────────────────┘
//! ```

use std::collections::VecDeque;
use std::fmt;

use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::query::{Query, QueryOptions};
use crate::storage::{DocumentStore, Page};
use crate::{Error, Result};

/// Turns one raw result item into the cursor's item type.
pub type DecodeFn<'s, T> = Box<dyn Fn(Json) -> Result<T> + Send + Sync + 's>;

pub struct ResultCursor<'s, S: DocumentStore + ?Sized, T> {
    store: &'s S,
    buffer: VecDeque<Json>,
    cursor_id: Option<String>,
    has_more: bool,
    closed: bool,
    decode: DecodeFn<'s, T>,
}

impl<'s, S: DocumentStore + ?Sized> ResultCursor<'s, S, Json> {
    /// Cursor yielding raw result items.
    pub async fn raw(store: &'s S, query: &Query, options: &QueryOptions) -> Result<Self> {
        Self::open(store, query, options, Box::new(Ok::<Json, Error>)).await
    }
}

impl<'s, S: DocumentStore + ?Sized, T> ResultCursor<'s, S, T> {
    /// Run `query` and hold its first page.
    pub async fn open(
        store: &'s S,
        query: &Query,
        options: &QueryOptions,
        decode: DecodeFn<'s, T>,
    ) -> Result<Self> {
        debug!(text = query.text(), batch_size = options.batch_size, "open cursor");
        let page = store.run_query(query, options).await?;
        let mut cursor = Self {
            store,
            buffer: VecDeque::new(),
            cursor_id: None,
            has_more: false,
            closed: false,
            decode,
        };
        cursor.accept(page);
        Ok(cursor)
    }

    fn accept(&mut self, page: Page) {
        self.buffer.extend(page.items);
        self.has_more = page.has_more && page.cursor_id.is_some();
        self.cursor_id = if self.has_more { page.cursor_id } else { None };
    }

    /// Whether another item is available, fetching at most one page.
    pub async fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        if self.buffer.is_empty() && self.has_more {
            if let Some(id) = self.cursor_id.clone() {
                let page = self.store.fetch_page(&id).await?;
                self.accept(page);
            }
        }
        Ok(!self.buffer.is_empty())
    }

    /// The next item. Fails with `NotFound` once the cursor is exhausted.
    pub async fn next(&mut self) -> Result<T> {
        if !self.has_next().await? {
            return Err(Error::NotFound("cursor exhausted".into()));
        }
        match self.buffer.pop_front() {
            Some(item) => (self.decode)(item),
            None => Err(Error::NotFound("cursor exhausted".into())),
        }
    }

    /// Drain every remaining item.
    pub async fn collect_remaining(&mut self) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(self.buffer.len());
        while self.has_next().await? {
            out.push(self.next().await?);
        }
        Ok(out)
    }

    /// Release the server-side cursor. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buffer.clear();
        self.has_more = false;
        if let Some(id) = self.cursor_id.take() {
            self.store.close_cursor(&id).await?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Items already fetched and not yet returned.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl<S: DocumentStore + ?Sized, T> fmt::Debug for ResultCursor<'_, S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCursor")
            .field("buffered", &self.buffer.len())
            .field("cursor_id", &self.cursor_id)
            .field("has_more", &self.has_more)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<S: DocumentStore + ?Sized, T> Drop for ResultCursor<'_, S, T> {
    fn drop(&mut self) {
        if let Some(id) = &self.cursor_id {
            warn!(cursor = %id, "result cursor dropped while open; server cursor leaked");
        }
    }
}
