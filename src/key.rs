//! Key Normalization Module
//!
//! Maps arbitrary structured key values to canonical string identifiers.
//!
//! Normalization is pure and deterministic: two structurally equal keys
//! always produce the same identifier regardless of field insertion order.
//! Field names are sorted with a locale-aware collator, not byte order,
//! so non-ASCII field names order the way a human-facing sort would.

use icu_collator::{Collator, CollatorOptions, Strength};
use icu_locid::locale;
use serde::Serialize;
use serde_json::Value;

use crate::error::{CacheError, Result};

// == Collator ==
// The collator's data payloads are not Sync, so it lives in thread-local
// storage: built once per thread, collation data compiled into the binary.
thread_local! {
    static COLLATOR: Collator = {
        let mut options = CollatorOptions::new();
        options.strength = Some(Strength::Tertiary);
        Collator::try_new(&locale!("en").into(), options)
            .expect("compiled collation data is always available")
    };
}

// == Generic Entry Point ==
/// Normalizes any serializable key into its canonical string identifier.
///
/// This is the default normalizer installed by
/// [`ReactiveCache::new`](crate::ReactiveCache::new). The key is first
/// converted to a [`serde_json::Value`] and then handed to
/// [`normalize_value`].
///
/// # Errors
/// * [`CacheError::UnsupportedKey`] if the key cannot be serialized
/// * Any error from [`normalize_value`]
pub fn normalize<K: Serialize>(key: &K) -> Result<String> {
    let value =
        serde_json::to_value(key).map_err(|err| CacheError::UnsupportedKey(err.to_string()))?;
    normalize_value(&value)
}

// == Value Normalization ==
/// Normalizes a structured value into its canonical string identifier.
///
/// Rules, in order:
/// 1. Null keys are rejected.
/// 2. Primitives (strings, numbers, booleans) map to their natural textual
///    form. Strings pass through unquoted, so the empty string is a valid
///    (if odd) key.
/// 3. Records and arrays enumerate their own fields (array indices count as
///    field names), sort the field names with the locale-aware collator and
///    join `"<name>=<value>"` pairs with `|`.
/// 4. A structured key with zero fields normalizes to the empty string,
///    which is rejected with both the original key and the computed string.
///
/// Field values render shallowly: a nested record collapses to a fixed
/// `[object]` placeholder and a nested array to its comma-joined element
/// text. Two structurally different nested records therefore collide.
/// This is a known limitation of shallow normalization, kept intentionally;
/// callers needing deep identity should install a custom normalizer.
///
/// # Errors
/// * [`CacheError::NullKey`] for the null value
/// * [`CacheError::EmptyKey`] for structured keys with no fields
pub fn normalize_value(key: &Value) -> Result<String> {
    let mut fields: Vec<(String, &Value)> = match key {
        Value::Null => return Err(CacheError::NullKey),
        Value::String(s) => return Ok(s.clone()),
        Value::Number(n) => return Ok(n.to_string()),
        Value::Bool(b) => return Ok(b.to_string()),
        Value::Object(map) => map.iter().map(|(name, value)| (name.clone(), value)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, value)| (index.to_string(), value))
            .collect(),
    };

    COLLATOR.with(|collator| {
        fields.sort_by(|(left, _), (right, _)| collator.compare(left, right));
    });

    let string_key = fields
        .iter()
        .map(|(name, value)| format!("{}={}", name, field_text(value)))
        .collect::<Vec<_>>()
        .join("|");

    if string_key.is_empty() {
        return Err(CacheError::EmptyKey {
            key: key.to_string(),
            normalized: string_key,
        });
    }

    Ok(string_key)
}

// == Field Value Rendering ==
/// Shallow textual form of a field value.
fn field_text(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(field_text)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object]".to_string(),
    }
}
