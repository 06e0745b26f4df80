//! Assertions over normalized outcomes.
//!
//! Deployments disagree on response shapes (`{"notes": [...]}` versus a bare
//! array, `id` versus `note_id`), so every lookup here goes through an explicit
//! alias list and accepts any shape that carries the documented minimum.

use crate::{Error, ErrorCategory, Failure, Result};
use serde_json::Value;

/// Fails the enclosing function with [`Error::Check`] unless `$cond` holds.
#[macro_export]
macro_rules! check {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::Error::Check(format!($($arg)+)));
        }
    };
}

pub const ID_ALIASES: &[&str] = &["id", "note_id", "uuid", "result.id", "note.id", "data.id"];
pub const NOTE_LIST_ALIASES: &[&str] = &["notes", "items", "data", "results", "result.notes"];
pub const COLLECTION_LIST_ALIASES: &[&str] = &["collections", "items", "data", "result.collections"];
pub const LINK_LIST_ALIASES: &[&str] = &["links", "outgoing", "items", "result.links"];
pub const JOB_LIST_ALIASES: &[&str] = &["jobs", "items", "data", "result.jobs"];
pub const TEMPLATE_LIST_ALIASES: &[&str] = &["templates", "items", "data", "result.templates"];
pub const KEYSET_LIST_ALIASES: &[&str] = &["keysets", "items", "data", "result.keysets"];
pub const CONTENT_ALIASES: &[&str] = &["content", "original.content", "note.content", "text"];

/// Looks up a dotted path (`"result.notes"`).
pub fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(payload, |value, key| value.get(key))
}

pub fn field<'a>(payload: &'a Value, path: &str) -> Result<&'a Value> {
    lookup(payload, path)
        .ok_or_else(|| Error::Check(format!("missing field `{path}` in {payload}")))
}

pub fn str_field<'a>(payload: &'a Value, path: &str) -> Result<&'a str> {
    field(payload, path)?
        .as_str()
        .ok_or_else(|| Error::Check(format!("field `{path}` is not a string in {payload}")))
}

/// Returns the first alias present (and non-null) in the payload.
pub fn resolve<'a>(payload: &'a Value, aliases: &[&str]) -> Result<&'a Value> {
    aliases
        .iter()
        .find_map(|alias| lookup(payload, alias).filter(|v| !v.is_null()))
        .ok_or_else(|| Error::Check(format!("none of {aliases:?} present in {payload}")))
}

/// Returns the list a payload carries, either directly or under an alias.
pub fn list<'a>(payload: &'a Value, aliases: &[&str]) -> Result<&'a Vec<Value>> {
    if let Some(items) = payload.as_array() {
        return Ok(items);
    }
    resolve(payload, aliases)?
        .as_array()
        .ok_or_else(|| Error::Check(format!("expected one of {aliases:?} to be an array")))
}

/// Extracts a record identifier. A bare string payload counts as the id.
pub fn id_of(payload: &Value) -> Result<String> {
    id_with(payload, ID_ALIASES)
}

pub fn id_with(payload: &Value, aliases: &[&str]) -> Result<String> {
    if let Some(id) = payload.as_str() {
        return Ok(id.to_string());
    }
    match resolve(payload, aliases)? {
        Value::String(id) => Ok(id.clone()),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(Error::Check(format!("identifier {other} is not a scalar"))),
    }
}

/// Whether any item in the list carries the given id.
pub fn contains_id(items: &[Value], id: &str) -> bool {
    items
        .iter()
        .any(|item| id_of(item).is_ok_and(|candidate| candidate == id))
}

pub fn expect_eq(actual: &Value, expected: &Value, what: &str) -> Result<()> {
    check!(actual == expected, "{what}: expected {expected}, got {actual}");
    Ok(())
}

pub fn expect_contains(text: &str, needle: &str) -> Result<()> {
    check!(text.contains(needle), "expected {needle:?} in {text:?}");
    Ok(())
}

/// Rendered template output must not leak `{{placeholders}}`.
pub fn expect_no_placeholders(text: &str) -> Result<()> {
    check!(
        !text.contains("{{"),
        "unsubstituted placeholder left in {text:?}"
    );
    Ok(())
}

pub fn expect_category(failure: &Failure, accepted: &[ErrorCategory]) -> Result<()> {
    check!(
        accepted.contains(&failure.category),
        "expected one of {accepted:?}, got {failure}"
    );
    Ok(())
}

/// Case-insensitive match on any of the phrases.
pub fn expect_mentions(failure: &Failure, phrases: &[&str]) -> Result<()> {
    check!(
        failure.mentions_any(phrases),
        "expected message mentioning one of {phrases:?}, got {:?}",
        failure.message
    );
    Ok(())
}

/// Turns "feature absent in this deployment" into [`Error::Unavailable`].
///
/// This is a best-effort reading of the failure wording; anything else passes
/// through untouched and fails the case as usual.
pub fn tolerate_unavailable<T>(result: Result<T>) -> Result<T> {
    match result {
        Err(Error::Call { failure, .. }) if failure.category == ErrorCategory::Unavailable => {
            Err(Error::Unavailable(failure.message))
        }
        other => other,
    }
}
