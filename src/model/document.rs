//! Persisted document shape.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{Error, Result};

/// A schema-less JSON document as exchanged with the store.
pub type Document = serde_json::Map<String, Json>;

/// Document key, unique within a collection. Store-assigned if absent.
pub const KEY: &str = "_key";
/// `<collection>/<key>` handle. Store-assigned.
pub const ID: &str = "_id";
/// Revision. Store-assigned on every write.
pub const REV: &str = "_rev";
/// Edge source handle.
pub const FROM: &str = "_from";
/// Edge target handle.
pub const TO: &str = "_to";
/// Element label.
pub const LABEL: &str = "_label";
/// Typed property record.
pub const PROPERTIES: &str = "_properties";

/// Fully qualified document handle, `<collection>/<key>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId {
    pub collection: String,
    pub key: String,
}

impl DocumentId {
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self { collection: collection.into(), key: key.into() }
    }

    pub fn parse(handle: &str) -> Result<Self> {
        match handle.split_once('/') {
            Some((collection, key)) if !collection.is_empty() && !key.is_empty() => {
                Ok(Self::new(collection, key))
            }
            _ => Err(Error::InvalidInput(format!("malformed document handle '{handle}'"))),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

pub fn str_attr<'d>(doc: &'d Document, name: &str) -> Option<&'d str> {
    doc.get(name).and_then(Json::as_str)
}
