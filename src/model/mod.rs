//! # Property Graph Model
//!
//! The vertex/edge/property model as it is stored in a document store.
//! Everything here is pure data plus the codecs that map it to and from
//! documents. No I/O, no async.

pub mod value;
pub mod key;
pub mod codec;
pub mod property;
pub mod element;
pub mod document;

pub use value::{Value, PrimitiveArray};
pub use codec::{TypeTag, TypedValue, ValueCodec, ArrayKind};
pub use property::{Cardinality, Property, PropertyContainer, PropertyEntry, PropertyPolicy};
pub use element::{Capabilities, Element, ElementKind, Endpoints};
pub use document::{Document, DocumentId};

/// Traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}
