//! Typed value encoding.
//!
//! The store only knows JSON: one number type, no distinction between a list
//! and a primitive array, no dates. [`encode`] splits a [`Value`] into the raw
//! JSON that gets stored (and queried) plus a [`TypeTag`] describing the
//! origin type. The tag mirrors the value's shape, so nested lists and maps
//! keep per-element types:
//!
//! ```text
//! Value::List([Int(1), String("a")])
//!   raw: [1, "a"]
//!   tag: ["int32", "string"]
//! ```
//!
//! [`ValueCodec::decode`] reverses the split with a fixed conversion table.
//! Tags outside the table are resolved through registered structured
//! decoders and otherwise kept as [`Value::Opaque`]. Decoding never fails;
//! a tag that does not fit its raw value logs a warning and falls back to the
//! untagged reading of the raw JSON.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use hashbrown::HashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value as Json};
use tracing::warn;

use super::value::{PrimitiveArray, Value};

/// Type name under which `Value::DateTime` is stored.
pub const DATETIME_TYPE: &str = "datetime";

/// Prefix for declared type names that would otherwise read back as a
/// built-in tag.
pub const OPAQUE_PREFIX: &str = "opaque:";

// ============================================================================
// TypeTag
// ============================================================================

/// Logical origin type of a stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeTag {
    Null,
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Array(ArrayKind),
    List(Vec<TypeTag>),
    Map(BTreeMap<String, TypeTag>),
    /// Declared type outside the fixed table (e.g. `"datetime"`).
    Other(String),
}

/// Element type of a primitive array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    Bool,
    Byte,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl ArrayKind {
    fn name(self) -> &'static str {
        match self {
            ArrayKind::Bool => "bool[]",
            ArrayKind::Byte => "byte[]",
            ArrayKind::Int32 => "int32[]",
            ArrayKind::Int64 => "int64[]",
            ArrayKind::Float32 => "float32[]",
            ArrayKind::Float64 => "float64[]",
        }
    }
}

impl TypeTag {
    /// JSON form stored next to the raw value.
    pub fn to_json(&self) -> Json {
        match self {
            TypeTag::List(items) => Json::Array(items.iter().map(TypeTag::to_json).collect()),
            TypeTag::Map(fields) => Json::Object(
                fields.iter().map(|(k, t)| (k.clone(), t.to_json())).collect(),
            ),
            TypeTag::Other(name) => Json::String(TypeTag::other_name(name)),
            scalar => Json::String(scalar.scalar_name().to_owned()),
        }
    }

    /// Stored name of a declared type: as is, unless it clashes with a
    /// built-in name or the prefix itself.
    fn other_name(name: &str) -> String {
        let clashes =
            name.starts_with(OPAQUE_PREFIX) || !matches!(TypeTag::from_name(name), TypeTag::Other(_));
        if clashes { format!("{OPAQUE_PREFIX}{name}") } else { name.to_owned() }
    }

    /// Parse a stored tag. JSON `null` means "no tag".
    pub fn from_json(json: &Json) -> Option<TypeTag> {
        match json {
            Json::Null => None,
            Json::String(name) => Some(TypeTag::from_name(name)),
            Json::Array(items) => Some(TypeTag::List(
                items.iter().map(|t| TypeTag::from_json(t).unwrap_or(TypeTag::Null)).collect(),
            )),
            Json::Object(fields) => Some(TypeTag::Map(
                fields
                    .iter()
                    .filter_map(|(k, t)| TypeTag::from_json(t).map(|t| (k.clone(), t)))
                    .collect(),
            )),
            other => Some(TypeTag::Other(other.to_string())),
        }
    }

    fn from_name(name: &str) -> TypeTag {
        if let Some(declared) = name.strip_prefix(OPAQUE_PREFIX) {
            return TypeTag::Other(declared.to_owned());
        }
        match name {
            "null" => TypeTag::Null,
            "bool" => TypeTag::Bool,
            "int32" => TypeTag::Int32,
            "int64" => TypeTag::Int64,
            "float32" => TypeTag::Float32,
            "float64" => TypeTag::Float64,
            "string" => TypeTag::String,
            "bool[]" => TypeTag::Array(ArrayKind::Bool),
            "byte[]" => TypeTag::Array(ArrayKind::Byte),
            "int32[]" => TypeTag::Array(ArrayKind::Int32),
            "int64[]" => TypeTag::Array(ArrayKind::Int64),
            "float32[]" => TypeTag::Array(ArrayKind::Float32),
            "float64[]" => TypeTag::Array(ArrayKind::Float64),
            other => TypeTag::Other(other.to_owned()),
        }
    }

    fn scalar_name(&self) -> &str {
        match self {
            TypeTag::Null => "null",
            TypeTag::Bool => "bool",
            TypeTag::Int32 => "int32",
            TypeTag::Int64 => "int64",
            TypeTag::Float32 => "float32",
            TypeTag::Float64 => "float64",
            TypeTag::String => "string",
            TypeTag::Array(kind) => kind.name(),
            TypeTag::Other(name) => name,
            TypeTag::List(_) => "list",
            TypeTag::Map(_) => "map",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::List(_) | TypeTag::Map(_) => write!(f, "{}", self.to_json()),
            scalar => f.write_str(scalar.scalar_name()),
        }
    }
}

impl Serialize for TypeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TypeTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        Ok(TypeTag::from_json(&json).unwrap_or(TypeTag::Null))
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// A value split into its stored JSON and its type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    #[serde(rename = "value")]
    pub raw: Json,
    #[serde(rename = "type")]
    pub tag: Option<TypeTag>,
}

/// Split a value into raw JSON and type tag. Infallible: non-finite floats
/// are stored as the strings `"NaN"`, `"inf"` and `"-inf"`.
pub fn encode(value: &Value) -> TypedValue {
    let (raw, tag) = encode_parts(value);
    TypedValue { raw, tag: Some(tag) }
}

/// Raw JSON form of a value, as compared by store-side filters.
pub fn to_raw(value: &Value) -> Json {
    encode_parts(value).0
}

fn encode_parts(value: &Value) -> (Json, TypeTag) {
    match value {
        Value::Null => (Json::Null, TypeTag::Null),
        Value::Bool(b) => (Json::Bool(*b), TypeTag::Bool),
        Value::Int(i) => (Json::from(*i), TypeTag::Int32),
        Value::Long(i) => (Json::from(*i), TypeTag::Int64),
        Value::Float(f) => (float_to_json(*f as f64), TypeTag::Float32),
        Value::Double(f) => (float_to_json(*f), TypeTag::Float64),
        Value::String(s) => (Json::String(s.clone()), TypeTag::String),
        Value::List(items) => {
            let (raws, tags) = items.iter().map(encode_parts).unzip();
            (Json::Array(raws), TypeTag::List(tags))
        }
        Value::Map(fields) => {
            let mut raws = serde_json::Map::with_capacity(fields.len());
            let mut tags = BTreeMap::new();
            for (k, v) in fields {
                let (raw, tag) = encode_parts(v);
                raws.insert(k.clone(), raw);
                tags.insert(k.clone(), tag);
            }
            (Json::Object(raws), TypeTag::Map(tags))
        }
        Value::Array(array) => encode_array(array),
        Value::DateTime(dt) => (
            Json::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            TypeTag::Other(DATETIME_TYPE.into()),
        ),
        Value::Opaque { type_name, raw } => (raw.clone(), TypeTag::Other(type_name.clone())),
    }
}

fn encode_array(array: &PrimitiveArray) -> (Json, TypeTag) {
    let (raws, kind): (Vec<Json>, ArrayKind) = match array {
        PrimitiveArray::Bool(v) => (v.iter().map(|b| Json::Bool(*b)).collect(), ArrayKind::Bool),
        PrimitiveArray::Byte(v) => (v.iter().map(|b| Json::from(*b)).collect(), ArrayKind::Byte),
        PrimitiveArray::Int(v) => (v.iter().map(|i| Json::from(*i)).collect(), ArrayKind::Int32),
        PrimitiveArray::Long(v) => (v.iter().map(|i| Json::from(*i)).collect(), ArrayKind::Int64),
        PrimitiveArray::Float(v) => {
            (v.iter().map(|f| float_to_json(*f as f64)).collect(), ArrayKind::Float32)
        }
        PrimitiveArray::Double(v) => {
            (v.iter().map(|f| float_to_json(*f)).collect(), ArrayKind::Float64)
        }
    };
    (Json::Array(raws), TypeTag::Array(kind))
}

fn float_to_json(f: f64) -> Json {
    match Number::from_f64(f) {
        Some(n) => Json::Number(n),
        None if f.is_nan() => Json::String("NaN".into()),
        None if f > 0.0 => Json::String("inf".into()),
        None => Json::String("-inf".into()),
    }
}

// ============================================================================
// Decoding
// ============================================================================

type DecodeFn = Box<dyn Fn(&Json) -> std::result::Result<Value, serde_json::Error> + Send + Sync>;

/// Decoder for stored values.
///
/// Holds the structured decoders for tags outside the fixed table. The
/// default codec knows `"datetime"`.
pub struct ValueCodec {
    decoders: HashMap<String, DecodeFn>,
}

impl Default for ValueCodec {
    fn default() -> Self {
        let mut codec = Self::empty();
        codec.register(DATETIME_TYPE, |dt: DateTime<Utc>| Value::DateTime(dt));
        codec
    }
}

impl fmt::Debug for ValueCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCodec")
            .field("decoders", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ValueCodec {
    /// Codec with no structured decoders; every `Other` tag stays opaque.
    pub fn empty() -> Self {
        Self { decoders: HashMap::new() }
    }

    /// Register a structured decoder: raw JSON tagged `type_name` is
    /// deserialized as `T` and mapped to a `Value`.
    pub fn register<T, F>(&mut self, type_name: &str, into_value: F)
    where
        T: DeserializeOwned,
        F: Fn(T) -> Value + Send + Sync + 'static,
    {
        let decode = move |raw: &Json| serde_json::from_value::<T>(raw.clone()).map(&into_value);
        self.decoders.insert(type_name.to_owned(), Box::new(decode));
    }

    pub fn decode_typed(&self, typed: &TypedValue) -> Value {
        self.decode(&typed.raw, typed.tag.as_ref())
    }

    /// Reconstruct a value from its stored JSON and tag.
    pub fn decode(&self, raw: &Json, tag: Option<&TypeTag>) -> Value {
        let Some(tag) = tag else {
            return untagged(raw);
        };
        match (tag, raw) {
            (TypeTag::Null, _) => Value::Null,
            (TypeTag::Bool, Json::Bool(b)) => Value::Bool(*b),
            (TypeTag::String, Json::String(s)) => Value::String(s.clone()),
            (TypeTag::Int32, _) => match json_to_i64(raw) {
                // Narrowing cast, no overflow check.
                Some(i) => Value::Int(i as i32),
                None => mismatch(raw, tag),
            },
            (TypeTag::Int64, _) => match json_to_i64(raw) {
                Some(i) => Value::Long(i),
                None => mismatch(raw, tag),
            },
            (TypeTag::Float32, _) => match json_to_f64(raw) {
                Some(f) => Value::Float(f as f32),
                None => mismatch(raw, tag),
            },
            (TypeTag::Float64, _) => match json_to_f64(raw) {
                Some(f) => Value::Double(f),
                None => mismatch(raw, tag),
            },
            (TypeTag::Array(kind), Json::Array(items)) => match decode_array(*kind, items) {
                Some(array) => Value::Array(array),
                None => mismatch(raw, tag),
            },
            (TypeTag::List(tags), Json::Array(items)) => Value::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.decode(item, tags.get(i)))
                    .collect(),
            ),
            (TypeTag::Map(tags), Json::Object(fields)) => Value::Map(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.decode(v, tags.get(k))))
                    .collect(),
            ),
            (TypeTag::Other(name), _) => self.decode_other(name, raw),
            _ => mismatch(raw, tag),
        }
    }

    fn decode_other(&self, type_name: &str, raw: &Json) -> Value {
        let opaque = || Value::Opaque { type_name: type_name.to_owned(), raw: raw.clone() };
        match self.decoders.get(type_name) {
            Some(decode) => decode(raw).unwrap_or_else(|e| {
                warn!(type_name, error = %e, "structured decode failed, keeping raw value");
                opaque()
            }),
            None => opaque(),
        }
    }
}

fn mismatch(raw: &Json, tag: &TypeTag) -> Value {
    warn!(%tag, raw = %raw, "stored value does not match its type tag, decoding untagged");
    untagged(raw)
}

/// Reading of raw JSON with no type information.
fn untagged(raw: &Json) -> Value {
    match raw {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Long(i),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(untagged).collect()),
        Json::Object(fields) => {
            Value::Map(fields.iter().map(|(k, v)| (k.clone(), untagged(v))).collect())
        }
    }
}

/// Stored integers come back as i64 or, after passing through a double-only
/// store, as f64. Doubles are truncated toward zero.
fn json_to_i64(raw: &Json) -> Option<i64> {
    let n = raw.as_number()?;
    n.as_i64()
        .or_else(|| n.as_u64().map(|u| u as i64))
        .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
}

fn json_to_f64(raw: &Json) -> Option<f64> {
    match raw {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "inf" => Some(f64::INFINITY),
            "-inf" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

fn decode_array(kind: ArrayKind, items: &[Json]) -> Option<PrimitiveArray> {
    Some(match kind {
        ArrayKind::Bool => PrimitiveArray::Bool(items.iter().map(Json::as_bool).collect::<Option<_>>()?),
        ArrayKind::Byte => PrimitiveArray::Byte(
            items.iter().map(|j| json_to_i64(j).map(|i| i as u8)).collect::<Option<_>>()?,
        ),
        ArrayKind::Int32 => PrimitiveArray::Int(
            items.iter().map(|j| json_to_i64(j).map(|i| i as i32)).collect::<Option<_>>()?,
        ),
        ArrayKind::Int64 => PrimitiveArray::Long(items.iter().map(json_to_i64).collect::<Option<_>>()?),
        ArrayKind::Float32 => PrimitiveArray::Float(
            items.iter().map(|j| json_to_f64(j).map(|f| f as f32)).collect::<Option<_>>()?,
        ),
        ArrayKind::Float64 => PrimitiveArray::Double(items.iter().map(json_to_f64).collect::<Option<_>>()?),
    })
}
