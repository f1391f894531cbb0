//! Property container with per-key cardinality.
//!
//! Every element owns one [`PropertyContainer`]. A key is bound to a
//! [`Cardinality`] by its first write and stays bound until its last value
//! is removed. Writes with a different cardinality while bound are rejected
//! with `Error::CardinalityConflict`; nothing is migrated.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use smallvec::SmallVec;

use super::codec::{self, TypedValue, ValueCodec};
use super::key;
use super::value::Value;
use crate::{Error, Result};

/// How many values a key may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// At most one value; writes overwrite.
    Single,
    /// Unique values, compared by value equality.
    Set,
    /// Ordered values, duplicates allowed.
    List,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cardinality::Single => "single",
            Cardinality::Set => "set",
            Cardinality::List => "list",
        })
    }
}

/// What a container accepts. Derived from the owning element's capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyPolicy {
    /// `set` and `list` cardinality allowed.
    pub multi_valued: bool,
    /// Meta-properties on values allowed.
    pub meta_properties: bool,
    /// The `label` key is reserved.
    pub reserve_label: bool,
}

// ============================================================================
// PropertyEntry
// ============================================================================

/// One stored value of a key, with its identity and meta-properties.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEntry {
    key: String,
    id: String,
    value: Value,
    owner: String,
    meta: BTreeMap<String, Value>,
}

impl PropertyEntry {
    pub fn key(&self) -> &str { &self.key }

    /// Equal to the key under single cardinality, a per-value id otherwise.
    pub fn id(&self) -> &str { &self.id }
    pub fn value(&self) -> &Value { &self.value }

    /// Key of the element this value belongs to.
    pub fn owner(&self) -> &str { &self.owner }

    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    pub fn meta_properties(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }
}

// ============================================================================
// Property (read view)
// ============================================================================

/// Result of [`PropertyContainer::get`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Property<'a> {
    Absent,
    Single(&'a PropertyEntry),
    Multi { cardinality: Cardinality, entries: &'a [PropertyEntry] },
}

impl<'a> Property<'a> {
    pub fn is_present(&self) -> bool {
        !matches!(self, Property::Absent)
    }

    /// The single value, or the first of a multi-valued key.
    pub fn value(&self) -> Option<&'a Value> {
        self.entries().first().map(PropertyEntry::value)
    }

    pub fn entries(&self) -> &'a [PropertyEntry] {
        match *self {
            Property::Absent => &[],
            Property::Single(entry) => std::slice::from_ref(entry),
            Property::Multi { entries, .. } => entries,
        }
    }

    pub fn values(self) -> impl Iterator<Item = &'a Value> {
        self.entries().iter().map(PropertyEntry::value)
    }

    pub fn cardinality(&self) -> Option<Cardinality> {
        match self {
            Property::Absent => None,
            Property::Single(_) => Some(Cardinality::Single),
            Property::Multi { cardinality, .. } => Some(*cardinality),
        }
    }
}

// ============================================================================
// PropertyContainer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    cardinality: Cardinality,
    entries: SmallVec<[PropertyEntry; 1]>,
}

/// Key → values map of one element.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyContainer {
    owner: String,
    policy: PropertyPolicy,
    slots: BTreeMap<String, Slot>,
    next_seq: u64,
}

impl PropertyContainer {
    pub fn new(owner: impl Into<String>, policy: PropertyPolicy) -> Self {
        Self {
            owner: owner.into(),
            policy,
            slots: BTreeMap::new(),
            next_seq: 1,
        }
    }

    pub fn owner(&self) -> &str { &self.owner }
    pub fn policy(&self) -> PropertyPolicy { self.policy }
    pub fn len(&self) -> usize { self.slots.len() }
    pub fn is_empty(&self) -> bool { self.slots.is_empty() }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Cardinality currently bound to `key`.
    pub fn cardinality(&self, key: &str) -> Option<Cardinality> {
        self.slots.get(key).map(|s| s.cardinality)
    }

    pub fn get(&self, key: &str) -> Property<'_> {
        match self.slots.get(key) {
            None => Property::Absent,
            Some(slot) if slot.cardinality == Cardinality::Single => match slot.entries.first() {
                Some(entry) => Property::Single(entry),
                None => Property::Absent,
            },
            Some(slot) => Property::Multi { cardinality: slot.cardinality, entries: &slot.entries },
        }
    }

    pub fn entry(&self, key: &str, entry_id: &str) -> Option<&PropertyEntry> {
        self.slots.get(key)?.entries.iter().find(|e| e.id == entry_id)
    }

    /// Overwrite a single-valued key.
    pub fn put(&mut self, key: &str, value: impl Into<Value>) -> Result<&PropertyEntry> {
        self.add(key, value, Cardinality::Single, Vec::<(String, Value)>::new())
    }

    /// Add a value under `cardinality`.
    ///
    /// - unbound key: binds `cardinality` and stores the first value
    /// - `single`: replaces the value and its meta-properties
    /// - `set`: an equal value already present keeps its id; `meta` is merged
    ///   into its meta-properties, overwriting keys given again
    /// - `list`: always appends
    pub fn add<I, K>(
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
        self.check_key(key)?;
        if cardinality != Cardinality::Single && !self.policy.multi_valued {
            return Err(Error::Unsupported(format!(
                "{cardinality} cardinality on '{key}': element only supports single"
            )));
        }
        let meta = self.collect_meta(meta)?;
        if let Some(bound) = self.cardinality(key) {
            if bound != cardinality {
                return Err(Error::CardinalityConflict {
                    key: key.to_owned(),
                    bound,
                    requested: cardinality,
                });
            }
        }

        let value = value.into();
        let id = match cardinality {
            Cardinality::Single => key.to_owned(),
            _ => {
                let seq = self.next_seq;
                self.next_seq += 1;
                format!("{key}:{seq}")
            }
        };
        let owner = self.owner.clone();
        let slot = self.slots.entry(key.to_owned()).or_insert_with(|| Slot {
            cardinality,
            entries: SmallVec::new(),
        });

        let entry = PropertyEntry { key: key.to_owned(), id, value, owner, meta };
        let index = match cardinality {
            Cardinality::Single => {
                slot.entries.clear();
                slot.entries.push(entry);
                0
            }
            Cardinality::Set => match slot.entries.iter().position(|e| e.value == entry.value) {
                Some(existing) => {
                    slot.entries[existing].meta.extend(entry.meta);
                    existing
                }
                None => {
                    slot.entries.push(entry);
                    slot.entries.len() - 1
                }
            },
            Cardinality::List => {
                slot.entries.push(entry);
                slot.entries.len() - 1
            }
        };
        Ok(&slot.entries[index])
    }

    /// Remove one value by identity. Removing the last value unbinds the key.
    pub fn remove(&mut self, key: &str, entry_id: &str) -> Option<PropertyEntry> {
        let slot = self.slots.get_mut(key)?;
        let index = slot.entries.iter().position(|e| e.id == entry_id)?;
        let removed = slot.entries.remove(index);
        if slot.entries.is_empty() {
            self.slots.remove(key);
        }
        Some(removed)
    }

    /// Remove every value of `key`, whatever its cardinality.
    pub fn remove_property(&mut self, key: &str) -> Vec<PropertyEntry> {
        self.slots
            .remove(key)
            .map(|slot| slot.entries.into_vec())
            .unwrap_or_default()
    }

    /// Set a meta-property on one value.
    pub fn set_meta(
        &mut self,
        key: &str,
        entry_id: &str,
        meta_key: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        if !self.policy.meta_properties {
            return Err(Error::Unsupported("element does not support meta-properties".into()));
        }
        check_meta_key(meta_key)?;
        let entry = self.entry_mut(key, entry_id)?;
        entry.meta.insert(meta_key.to_owned(), value.into());
        Ok(())
    }

    pub fn remove_meta(&mut self, key: &str, entry_id: &str, meta_key: &str) -> Result<Option<Value>> {
        Ok(self.entry_mut(key, entry_id)?.meta.remove(meta_key))
    }

    fn entry_mut(&mut self, key: &str, entry_id: &str) -> Result<&mut PropertyEntry> {
        self.slots
            .get_mut(key)
            .and_then(|slot| slot.entries.iter_mut().find(|e| e.id == entry_id))
            .ok_or_else(|| Error::NotFound(format!("property '{key}' value '{entry_id}'")))
    }

    fn check_key(&self, key: &str) -> Result<()> {
        key::validate(key)?;
        if key == key::ID_KEY || (self.policy.reserve_label && key == key::LABEL_KEY) {
            return Err(Error::ReservedKey(key.to_owned()));
        }
        // Rejects escape-prefixed keys that could not be stored faithfully.
        key::normalize(key).map(drop)
    }

    fn collect_meta<I, K>(&self, meta: I) -> Result<BTreeMap<String, Value>>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let meta: BTreeMap<String, Value> = meta.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if !meta.is_empty() && !self.policy.meta_properties {
            return Err(Error::Unsupported("element does not support meta-properties".into()));
        }
        for meta_key in meta.keys() {
            check_meta_key(meta_key)?;
        }
        Ok(meta)
    }

    // ========================================================================
    // Document form
    // ========================================================================
    //
    //   "<nk>": <raw> | [<raw>, ...]                       queryable projection
    //   "_properties": { "<nk>": { "cardinality": "set",
    //       "entries": [ { "id", "value", "type", "meta": { "<nk>": {value, type} } } ] } }

    /// Write the container into `doc`: the raw projection under each
    /// normalized key, and the full typed record under `record_attr`.
    pub fn write_document(&self, doc: &mut Map<String, Json>, record_attr: &str) -> Result<()> {
        let mut record = Map::with_capacity(self.slots.len());
        for (key, slot) in &self.slots {
            let stored_key = key::normalize(key)?;
            let projection = match slot.cardinality {
                Cardinality::Single => slot
                    .entries
                    .first()
                    .map(|e| codec::to_raw(&e.value))
                    .unwrap_or(Json::Null),
                _ => Json::Array(slot.entries.iter().map(|e| codec::to_raw(&e.value)).collect()),
            };
            doc.insert(stored_key.clone(), projection);

            let mut entries = Vec::with_capacity(slot.entries.len());
            for entry in &slot.entries {
                let typed = codec::encode(&entry.value);
                let mut meta = Map::new();
                for (mk, mv) in &entry.meta {
                    meta.insert(key::normalize(mk)?, serde_json::to_value(codec::encode(mv))?);
                }
                entries.push(serde_json::json!({
                    "id": entry.id,
                    "value": typed.raw,
                    "type": typed.tag,
                    "meta": meta,
                }));
            }
            record.insert(
                stored_key,
                serde_json::json!({ "cardinality": slot.cardinality, "entries": entries }),
            );
        }
        doc.insert(record_attr.to_owned(), Json::Object(record));
        Ok(())
    }

    /// Rebuild a container from the record written by [`write_document`].
    ///
    /// [`write_document`]: PropertyContainer::write_document
    pub fn read_document(
        owner: impl Into<String>,
        policy: PropertyPolicy,
        doc: &Map<String, Json>,
        record_attr: &str,
        codec: &ValueCodec,
    ) -> Result<Self> {
        let mut container = Self::new(owner, policy);
        let Some(record) = doc.get(record_attr).and_then(Json::as_object) else {
            return Ok(container);
        };
        for (stored_key, slot_json) in record {
            let stored: StoredSlot = serde_json::from_value(slot_json.clone())?;
            if stored.entries.is_empty() {
                continue;
            }
            let key = key::denormalize(stored_key);
            let mut entries = SmallVec::new();
            for e in stored.entries {
                if let Some(seq) = e.id.rsplit(':').next().and_then(|s| s.parse::<u64>().ok()) {
                    container.next_seq = container.next_seq.max(seq + 1);
                }
                let value = codec.decode(&e.value, e.tag.as_ref());
                let meta = e
                    .meta
                    .into_iter()
                    .map(|(mk, mv)| (key::denormalize(&mk), codec.decode_typed(&mv)))
                    .collect();
                entries.push(PropertyEntry {
                    key: key.clone(),
                    id: e.id,
                    value,
                    owner: container.owner.clone(),
                    meta,
                });
            }
            container.slots.insert(key, Slot { cardinality: stored.cardinality, entries });
        }
        Ok(container)
    }
}

fn check_meta_key(meta_key: &str) -> Result<()> {
    key::validate(meta_key)?;
    if meta_key == key::ID_KEY || meta_key == key::LABEL_KEY {
        return Err(Error::ReservedKey(meta_key.to_owned()));
    }
    key::normalize(meta_key).map(drop)
}

#[derive(Deserialize)]
struct StoredSlot {
    cardinality: Cardinality,
    #[serde(default)]
    entries: Vec<StoredEntry>,
}

#[derive(Deserialize)]
struct StoredEntry {
    id: String,
    value: Json,
    #[serde(rename = "type", default)]
    tag: Option<codec::TypeTag>,
    #[serde(default)]
    meta: BTreeMap<String, TypedValue>,
}
