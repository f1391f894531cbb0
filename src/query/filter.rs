//! Property, label, and existence filters.
//!
//! A [`Filter`] renders to a predicate fragment in which every literal is a
//! bind variable and every attribute name is backtick-quoted:
//!
//! ```text
//! FilterBuilder::new()
//!     .compare("age", Comparator::Gt, 30)
//!     .is_in("city", ["sf", "ny"])
//!     .labels(["person", "robot"])
//!
//! (v.`_properties`.`age`.`cardinality` IN ["set", "list"]
//!     ? (v.`age` ANY > @p0) : v.`age` > @p0)
//!   AND (v.`_properties`.`city`.`cardinality` IN ["set", "list"]
//!     ? (v.`city` ANY IN [@p1, @p2]) : v.`city` IN [@p1, @p2])
//!   AND (v.`_label` == @p3 OR v.`_label` == @p4)
//! ```
//!
//! Property clauses are ANDed; labels are ORed among themselves and ANDed
//! with the rest. `!=`, `<`, `<=` and `NOT IN` additionally require the
//! attribute to exist, since the store orders `null` below every value.
//!
//! Set and list keys are stored as an array of their values. A comparison
//! or membership clause on such a key holds when any one value satisfies it.

use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;
use serde_json::{Number, Value as Json};

use super::BindVars;
use crate::model::document::{self, Document};
use crate::model::{codec, key, Cardinality, Value};
use crate::{Error, Result};

/// Comparison operator of a `has(key, value, comparator)` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparator {
    pub fn token(self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::Neq => "!=",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
        }
    }

    /// Operators a missing attribute would otherwise satisfy.
    fn needs_existence(self) -> bool {
        matches!(self, Comparator::Neq | Comparator::Lt | Comparator::Lte)
    }

    fn accepts(self, ord: Ordering) -> bool {
        match self {
            Comparator::Eq => ord == Ordering::Equal,
            Comparator::Neq => ord != Ordering::Equal,
            Comparator::Gt => ord == Ordering::Greater,
            Comparator::Gte => ord != Ordering::Less,
            Comparator::Lt => ord == Ordering::Less,
            Comparator::Lte => ord != Ordering::Greater,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Exists,
    Missing,
    Compare(Comparator, Json),
    In(Vec<Json>),
    NotIn(Vec<Json>),
}

/// One conjunct: a stored attribute name and the predicate applied to it.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub attribute: String,
    pub predicate: Predicate,
}

impl FilterClause {
    fn render(&self, var: &str, binds: &mut BindVars) -> String {
        let path = attribute_path(var, &self.attribute);
        let (single, each) = match &self.predicate {
            Predicate::Exists => return format!("{path} != null"),
            Predicate::Missing => return format!("{path} == null"),
            Predicate::Compare(cmp, value) => {
                let param = binds.bind(value.clone());
                let single = if cmp.needs_existence() {
                    format!("({path} != null AND {path} {cmp} {param})")
                } else {
                    format!("{path} {cmp} {param}")
                };
                (single, format!("{path} ANY {cmp} {param}"))
            }
            Predicate::In(values) => {
                let list = bind_all(values, binds);
                (format!("{path} IN [{list}]"), format!("{path} ANY IN [{list}]"))
            }
            Predicate::NotIn(values) => {
                let list = bind_all(values, binds);
                (
                    format!("({path} != null AND {path} NOT IN [{list}])"),
                    format!("{path} ANY NOT IN [{list}]"),
                )
            }
        };
        if self.is_system_attribute() {
            return single;
        }
        // Set and list keys project to an array; compare element-wise there.
        let slot = attribute_path(&attribute_path(var, document::PROPERTIES), &self.attribute);
        let cardinality = attribute_path(&slot, "cardinality");
        format!(
            "({cardinality} IN [\"{}\", \"{}\"] ? ({each}) : {single})",
            Cardinality::Set,
            Cardinality::List
        )
    }

    fn matches(&self, doc: &Document) -> bool {
        let actual = doc.get(&self.attribute).unwrap_or(&Json::Null);
        let per_value = !matches!(self.predicate, Predicate::Exists | Predicate::Missing)
            && self.is_multi_valued_in(doc);
        match actual {
            Json::Array(items) if per_value => items.iter().any(|item| self.accepts(item)),
            _ => self.accepts(actual),
        }
    }

    fn accepts(&self, actual: &Json) -> bool {
        match &self.predicate {
            Predicate::Exists => !actual.is_null(),
            Predicate::Missing => actual.is_null(),
            Predicate::Compare(cmp, expected) => {
                if cmp.needs_existence() && actual.is_null() {
                    return false;
                }
                cmp.accepts(compare_json(actual, expected))
            }
            Predicate::In(values) => values.iter().any(|v| compare_json(actual, v).is_eq()),
            Predicate::NotIn(values) => {
                !actual.is_null() && !values.iter().any(|v| compare_json(actual, v).is_eq())
            }
        }
    }

    /// `_key`, `_label` and the like; user keys never start with `_` once
    /// normalized.
    fn is_system_attribute(&self) -> bool {
        self.attribute.starts_with('_')
    }

    fn is_multi_valued_in(&self, doc: &Document) -> bool {
        if self.is_system_attribute() {
            return false;
        }
        let cardinality = doc
            .get(document::PROPERTIES)
            .and_then(|slots| slots.get(&self.attribute))
            .and_then(|slot| slot.get("cardinality"))
            .and_then(|c| Cardinality::deserialize(c).ok());
        matches!(cardinality, Some(Cardinality::Set | Cardinality::List))
    }
}

fn bind_all(values: &[Json], binds: &mut BindVars) -> String {
    values
        .iter()
        .map(|v| binds.bind(v.clone()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `` var.`name` `` with backticks and backslashes in the name escaped.
pub fn attribute_path(var: &str, attribute: &str) -> String {
    let mut quoted = String::with_capacity(attribute.len() + 2);
    quoted.push('`');
    for c in attribute.chars() {
        if c == '`' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('`');
    format!("{var}.{quoted}")
}

// ============================================================================
// Filter
// ============================================================================

/// A validated set of clauses and labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<FilterClause>,
    labels: Vec<String>,
}

impl Filter {
    /// Filter that matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn clauses(&self) -> &[FilterClause] { &self.clauses }
    pub fn labels(&self) -> &[String] { &self.labels }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty() && self.labels.is_empty()
    }

    /// Predicate over document variable `var`, or `None` for an empty filter.
    pub fn render(&self, var: &str, binds: &mut BindVars) -> Option<String> {
        let mut parts: Vec<String> = self.clauses.iter().map(|c| c.render(var, binds)).collect();
        if !self.labels.is_empty() {
            let path = attribute_path(var, document::LABEL);
            let alternatives: Vec<String> = self
                .labels
                .iter()
                .map(|l| format!("{path} == {}", binds.bind(Json::String(l.clone()))))
                .collect();
            parts.push(format!("({})", alternatives.join(" OR ")));
        }
        if parts.is_empty() { None } else { Some(parts.join(" AND ")) }
    }

    /// Evaluate against a stored document, with the semantics of the
    /// rendered predicate.
    pub fn matches(&self, doc: &Document) -> bool {
        if !self.labels.is_empty() {
            let label = document::str_attr(doc, document::LABEL);
            if !self.labels.iter().any(|l| Some(l.as_str()) == label) {
                return false;
            }
        }
        self.clauses.iter().all(|c| c.matches(doc))
    }
}

// ============================================================================
// FilterBuilder
// ============================================================================

/// Chainable filter construction. Key errors are deferred to [`build`].
///
/// [`build`]: FilterBuilder::build
#[derive(Debug, Default)]
pub struct FilterBuilder {
    filter: Filter,
    error: Option<Error>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key is present.
    pub fn has(self, key: &str) -> Self {
        self.clause(key, Predicate::Exists)
    }

    /// Key is absent.
    pub fn has_not(self, key: &str) -> Self {
        self.clause(key, Predicate::Missing)
    }

    /// Key equals `value`.
    pub fn has_value(self, key: &str, value: impl Into<Value>) -> Self {
        self.compare(key, Comparator::Eq, value)
    }

    pub fn compare(self, key: &str, cmp: Comparator, value: impl Into<Value>) -> Self {
        let raw = codec::to_raw(&value.into());
        self.clause(key, Predicate::Compare(cmp, raw))
    }

    /// Key is one of `values`; one bind variable per element.
    pub fn is_in<I, V>(self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let raws = values.into_iter().map(|v| codec::to_raw(&v.into())).collect();
        self.clause(key, Predicate::In(raws))
    }

    /// Key is present and none of `values`.
    pub fn not_in<I, V>(self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let raws = values.into_iter().map(|v| codec::to_raw(&v.into())).collect();
        self.clause(key, Predicate::NotIn(raws))
    }

    /// `lo <= key < hi`. The upper bound is exclusive.
    pub fn interval(self, key: &str, lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        self.compare(key, Comparator::Gte, lo).compare(key, Comparator::Lt, hi)
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if label.trim().is_empty() {
            self.error.get_or_insert(Error::InvalidInput("blank label in filter".into()));
        } else if !self.filter.labels.contains(&label) {
            self.filter.labels.push(label);
        }
        self
    }

    pub fn labels<I, S>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        labels.into_iter().fold(self, |b, l| b.label(l))
    }

    pub fn build(self) -> Result<Filter> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.filter),
        }
    }

    fn clause(mut self, key: &str, predicate: Predicate) -> Self {
        if self.error.is_some() {
            return self;
        }
        match stored_attribute(key) {
            Ok(attribute) => self.filter.clauses.push(FilterClause { attribute, predicate }),
            Err(e) => self.error = Some(e),
        }
        self
    }
}

/// The element id is addressed through the document key; every other key is
/// normalized.
fn stored_attribute(key: &str) -> Result<String> {
    if key == key::ID_KEY {
        return Ok(document::KEY.to_owned());
    }
    key::normalize(key)
}

// ============================================================================
// Value ordering
// ============================================================================

/// Integers compare exactly; anything involving a float goes through `f64`.
fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    match (x.as_i64(), y.as_i64()) {
        (Some(x), Some(y)) => return x.cmp(&y),
        // Only one side fits i64: the other is a u64 above i64::MAX.
        (Some(_), None) if y.is_u64() => return Ordering::Less,
        (None, Some(_)) if x.is_u64() => return Ordering::Greater,
        _ => {}
    }
    if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
        return x.cmp(&y);
    }
    let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

fn type_rank(v: &Json) -> u8 {
    match v {
        Json::Null => 0,
        Json::Bool(_) => 1,
        Json::Number(_) => 2,
        Json::String(_) => 3,
        Json::Array(_) => 4,
        Json::Object(_) => 5,
    }
}

/// Total order over stored values: null < bool < number < string < array <
/// object, then by value within a type.
pub fn compare_json(a: &Json, b: &Json) -> Ordering {
    match (a, b) {
        (Json::Bool(x), Json::Bool(y)) => x.cmp(y),
        (Json::Number(x), Json::Number(y)) => compare_numbers(x, y),
        (Json::String(x), Json::String(y)) => x.cmp(y),
        (Json::Array(xs), Json::Array(ys)) => xs
            .iter()
            .zip(ys)
            .map(|(x, y)| compare_json(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| xs.len().cmp(&ys.len())),
        (Json::Object(xs), Json::Object(ys)) => {
            let mut xk: Vec<_> = xs.iter().collect();
            let mut yk: Vec<_> = ys.iter().collect();
            xk.sort_by(|a, b| a.0.cmp(b.0));
            yk.sort_by(|a, b| a.0.cmp(b.0));
            xk.iter()
                .zip(&yk)
                .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| compare_json(va, vb)))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| xk.len().cmp(&yk.len()))
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
