//! Vertices, edges, and graph variables.
//!
//! There is one [`Element`] type. What an element may do is fixed at
//! construction by its [`Capabilities`]:
//!
//! | Kind      | cardinality | meta-properties | mutable after create |
//! |-----------|-------------|-----------------|----------------------|
//! | Vertex    | single/set/list | yes         | yes (no in bulk load) |
//! | Edge      | single      | no              | yes (no in bulk load) |
//! | Variables | single      | no              | yes                  |

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::codec::{self, ValueCodec};
use super::key;
use super::document::{self, Document, DocumentId};
use super::property::{Cardinality, Property, PropertyContainer, PropertyEntry, PropertyPolicy};
use super::value::Value;
use crate::config::Collections;
use crate::{Error, Result};

/// Label given to vertices and edges created without one.
pub const DEFAULT_LABEL: &str = "vertex";

/// Label of the edges linking a vertex to its property documents.
pub const PROPERTY_EDGE_LABEL: &str = "has_property";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Vertex,
    Edge,
    Variables,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ElementKind::Vertex => "vertex",
            ElementKind::Edge => "edge",
            ElementKind::Variables => "variables",
        })
    }
}

/// Feature set of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub has_cardinality: bool,
    pub has_meta_properties: bool,
    pub mutable_after_create: bool,
}

impl Capabilities {
    pub const VERTEX: Capabilities =
        Capabilities { has_cardinality: true, has_meta_properties: true, mutable_after_create: true };
    pub const EDGE: Capabilities =
        Capabilities { has_cardinality: false, has_meta_properties: false, mutable_after_create: true };
    pub const VARIABLES: Capabilities = Capabilities::EDGE;

    pub fn for_kind(kind: ElementKind) -> Capabilities {
        match kind {
            ElementKind::Vertex => Capabilities::VERTEX,
            ElementKind::Edge => Capabilities::EDGE,
            ElementKind::Variables => Capabilities::VARIABLES,
        }
    }

    /// Same capabilities, frozen once the element has been persisted.
    pub fn frozen(self) -> Capabilities {
        Capabilities { mutable_after_create: false, ..self }
    }

    fn policy(self, kind: ElementKind) -> PropertyPolicy {
        PropertyPolicy {
            multi_valued: self.has_cardinality,
            meta_properties: self.has_meta_properties,
            reserve_label: kind == ElementKind::Edge,
        }
    }
}

/// Edge endpoints as vertex keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoints {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    kind: ElementKind,
    caps: Capabilities,
    key: String,
    label: String,
    endpoints: Option<Endpoints>,
    rev: Option<String>,
    created: bool,
    properties: PropertyContainer,
}

impl Element {
    pub fn new(kind: ElementKind, caps: Capabilities, key: impl Into<String>, label: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            kind,
            caps,
            properties: PropertyContainer::new(key.clone(), caps.policy(kind)),
            key,
            label: label.into(),
            endpoints: None,
            rev: None,
            created: false,
        }
    }

    pub fn vertex(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(ElementKind::Vertex, Capabilities::VERTEX, key, label)
    }

    pub fn edge(
        key: impl Into<String>,
        label: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        let mut edge = Self::new(ElementKind::Edge, Capabilities::EDGE, key, label);
        edge.endpoints = Some(Endpoints { from: from.into(), to: to.into() });
        edge
    }

    pub fn variables(graph: impl Into<String>) -> Self {
        Self::new(ElementKind::Variables, Capabilities::VARIABLES, graph, "")
    }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        let rebuilt = PropertyContainer::new(self.key.clone(), caps.policy(self.kind));
        debug_assert!(self.properties.is_empty(), "capabilities are chosen before properties");
        self.properties = rebuilt;
        self
    }

    pub fn kind(&self) -> ElementKind { self.kind }
    pub fn capabilities(&self) -> Capabilities { self.caps }
    pub fn key(&self) -> &str { &self.key }
    pub fn label(&self) -> &str { &self.label }
    pub fn endpoints(&self) -> Option<&Endpoints> { self.endpoints.as_ref() }
    pub fn rev(&self) -> Option<&str> { self.rev.as_deref() }

    /// Whether the element has been persisted.
    pub fn is_created(&self) -> bool { self.created }

    pub(crate) fn mark_created(&mut self) {
        self.created = true;
    }

    pub fn properties(&self) -> &PropertyContainer { &self.properties }

    pub fn property(&self, key: &str) -> Property<'_> {
        self.properties.get(key)
    }

    /// The single value of `key`, or the first value of a multi-valued key.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).value()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    pub fn put_property(&mut self, key: &str, value: impl Into<Value>) -> Result<&PropertyEntry> {
        self.ensure_mutable()?;
        self.properties.put(key, value)
    }

    pub fn add_property<I, K>(
        &mut self,
        key: &str,
        value: impl Into<Value>,
        cardinality: Cardinality,
        meta: I,
    ) -> Result<&PropertyEntry>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.ensure_mutable()?;
        self.properties.add(key, value, cardinality, meta)
    }

    pub fn remove_entry(&mut self, key: &str, entry_id: &str) -> Result<Option<PropertyEntry>> {
        self.ensure_mutable()?;
        Ok(self.properties.remove(key, entry_id))
    }

    pub fn remove_property(&mut self, key: &str) -> Result<Vec<PropertyEntry>> {
        self.ensure_mutable()?;
        Ok(self.properties.remove_property(key))
    }

    pub fn set_meta(&mut self, key: &str, entry_id: &str, meta_key: &str, value: impl Into<Value>) -> Result<()> {
        self.ensure_mutable()?;
        self.properties.set_meta(key, entry_id, meta_key, value)
    }

    pub fn remove_meta(&mut self, key: &str, entry_id: &str, meta_key: &str) -> Result<Option<Value>> {
        self.ensure_mutable()?;
        self.properties.remove_meta(key, entry_id, meta_key)
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.created && !self.caps.mutable_after_create {
            return Err(Error::Unsupported(format!(
                "{} '{}' cannot be modified after bulk creation",
                self.kind, self.key
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Document form
    // ========================================================================

    pub fn document_id(&self, collections: &Collections) -> DocumentId {
        DocumentId::new(collections.of(self.kind), self.key.clone())
    }

    pub fn to_document(&self, collections: &Collections) -> Result<Document> {
        let mut doc = Document::new();
        doc.insert(document::KEY.into(), Json::String(self.key.clone()));
        if self.kind != ElementKind::Variables {
            doc.insert(document::LABEL.into(), Json::String(self.label.clone()));
        }
        if let Some(ends) = &self.endpoints {
            let from = DocumentId::new(collections.vertices.clone(), ends.from.clone());
            let to = DocumentId::new(collections.vertices.clone(), ends.to.clone());
            doc.insert(document::FROM.into(), Json::String(from.to_string()));
            doc.insert(document::TO.into(), Json::String(to.to_string()));
        }
        self.properties.write_document(&mut doc, document::PROPERTIES)?;
        Ok(doc)
    }

    /// Rebuild a persisted element. System attributes come from the store;
    /// a document without `_key` is rejected.
    pub fn from_document(kind: ElementKind, doc: &Document, codec: &ValueCodec) -> Result<Self> {
        let key = document::str_attr(doc, document::KEY)
            .ok_or_else(|| Error::Storage(format!("{kind} document without {}", document::KEY)))?;
        let label = document::str_attr(doc, document::LABEL).unwrap_or(DEFAULT_LABEL);
        let caps = Capabilities::for_kind(kind);
        let mut element = Self::new(kind, caps, key, label);
        element.properties =
            PropertyContainer::read_document(key, caps.policy(kind), doc, document::PROPERTIES, codec)?;
        if kind == ElementKind::Edge {
            let from = document::str_attr(doc, document::FROM)
                .ok_or_else(|| Error::Storage(format!("edge '{key}' without {}", document::FROM)))?;
            let to = document::str_attr(doc, document::TO)
                .ok_or_else(|| Error::Storage(format!("edge '{key}' without {}", document::TO)))?;
            element.endpoints = Some(Endpoints {
                from: DocumentId::parse(from)?.key,
                to: DocumentId::parse(to)?.key,
            });
        }
        element.rev = document::str_attr(doc, document::REV).map(str::to_owned);
        element.created = true;
        Ok(element)
    }

    // ========================================================================
    // Property documents
    // ========================================================================
    //
    //   <graph>_properties/<owner>-<n>               one vertex-property value
    //   <graph>_element_has_properties/<owner>-<n>   owner vertex -> value

    /// Keys of the property documents this element owns, in entry order.
    pub fn property_document_keys(&self) -> Vec<String> {
        let count: usize = self.properties.keys().map(|k| self.properties.get(k).entries().len()).sum();
        (0..count).map(|n| format!("{}-{n}", self.key)).collect()
    }

    /// One `(property document, ownership edge)` pair per property entry.
    pub fn property_documents(&self, collections: &Collections) -> Result<Vec<(Document, Document)>> {
        let owner = self.document_id(collections).to_string();
        let keys = self.property_document_keys();
        let entries = self.properties.keys().flat_map(|k| self.properties.get(k).entries());

        let mut out = Vec::with_capacity(keys.len());
        for (doc_key, entry) in keys.into_iter().zip(entries) {
            let typed = codec::encode(entry.value());
            let mut meta = serde_json::Map::new();
            for (mk, mv) in entry.meta_properties() {
                meta.insert(key::normalize(mk)?, serde_json::to_value(codec::encode(mv))?);
            }
            let cardinality = self.properties.cardinality(entry.key());
            let mut property = Document::new();
            property.insert(document::KEY.into(), Json::String(doc_key.clone()));
            property.insert("owner".into(), Json::String(self.key.clone()));
            property.insert("key".into(), Json::String(key::normalize(entry.key())?));
            property.insert("id".into(), Json::String(entry.id().to_owned()));
            property.insert("cardinality".into(), serde_json::to_value(cardinality)?);
            property.insert("value".into(), typed.raw);
            property.insert("type".into(), serde_json::to_value(&typed.tag)?);
            property.insert("meta".into(), Json::Object(meta));

            let handle = DocumentId::new(collections.properties.clone(), doc_key.clone());
            let mut ownership = Document::new();
            ownership.insert(document::KEY.into(), Json::String(doc_key));
            ownership.insert(document::FROM.into(), Json::String(owner.clone()));
            ownership.insert(document::TO.into(), Json::String(handle.to_string()));
            ownership.insert(document::LABEL.into(), Json::from(PROPERTY_EDGE_LABEL));
            out.push((property, ownership));
        }
        Ok(out)
    }
}
