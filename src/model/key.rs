//! Property key normalization.
//!
//! Document stores reserve attribute names that start with `_` for their own
//! bookkeeping (`_id`, `_key`, `_rev`, ...). User keys with that shape are
//! rewritten on the way in and restored on the way out:
//!
//! ```text
//! "_secret"  --normalize-->  "«a»secret"  --denormalize-->  "_secret"
//! "name"     --normalize-->  "name"       --denormalize-->  "name"
//! ```
//!
//! A user key that already begins with the escape prefix would be restored
//! as a different key, so [`normalize`] refuses it.

use crate::{Error, Result};

/// First character of every store-reserved attribute name.
pub const RESERVED_MARKER: char = '_';

/// Replacement for [`RESERVED_MARKER`] in normalized keys.
pub const ESCAPE_PREFIX: &str = "«a»";

/// Property key that aliases an element's identity.
pub const ID_KEY: &str = "id";

/// Property key that aliases an element's label.
pub const LABEL_KEY: &str = "label";

/// Fail with `EmptyKey` when the key is empty or whitespace.
pub fn validate(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(Error::EmptyKey);
    }
    Ok(())
}

/// Map a user key to the attribute name stored in the document.
pub fn normalize(key: &str) -> Result<String> {
    validate(key)?;
    if key.starts_with(ESCAPE_PREFIX) {
        return Err(Error::ReservedKey(format!(
            "'{key}' starts with the internal escape prefix {ESCAPE_PREFIX}"
        )));
    }
    match key.strip_prefix(RESERVED_MARKER) {
        Some(rest) => Ok(format!("{ESCAPE_PREFIX}{rest}")),
        None => Ok(key.to_owned()),
    }
}

/// Inverse of [`normalize`]. Never fails; unescaped names pass through.
pub fn denormalize(stored: &str) -> String {
    match stored.strip_prefix(ESCAPE_PREFIX) {
        Some(rest) => format!("{RESERVED_MARKER}{rest}"),
        None => stored.to_owned(),
    }
}

/// True for attribute names owned by the store or by this layer rather than
/// by user properties.
pub fn is_system_attribute(name: &str) -> bool {
    name.starts_with(RESERVED_MARKER)
}
