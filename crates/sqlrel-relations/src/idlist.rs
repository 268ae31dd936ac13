//! Sorted, comma-joined id lists stored in a single text column.
//!
//! Set-membership relations keep related ids as `"a,b,c"`. Lists are
//! always written sorted and de-duplicated; an empty list is stored as
//! NULL.

use std::collections::BTreeSet;

use sqlrel_core::{Result, Value};

pub const SEPARATOR: char = ',';

/// Parse a stored list. NULL and the empty string are the empty list.
pub fn parse(value: &Value, column: &str) -> Result<BTreeSet<String>> {
    if value.is_null() {
        return Ok(BTreeSet::new());
    }
    Ok(value
        .expect_text(column)?
        .split(SEPARATOR)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect())
}

/// Render a list for storage.
pub fn join(ids: &BTreeSet<String>) -> Value {
    if ids.is_empty() {
        return Value::Null;
    }
    let mut out = String::new();
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(id);
    }
    Value::Text(out)
}

/// Exact membership test on a stored list.
pub fn contains(value: &Value, id: &str) -> bool {
    value
        .as_str()
        .is_some_and(|text| text.split(SEPARATOR).any(|part| part.trim() == id))
}
