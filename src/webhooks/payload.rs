//! Best-effort field extraction from webhook payloads.
//!
//! Only two fields matter to the listener: `repository.full_name` and `ref`.
//! Payloads are not bound to a schema; a body that is not JSON, lacks a field,
//! or has the wrong type there simply yields `None`. The two lookups are
//! independent, so a payload without `ref` (e.g. a `ping` event) still yields
//! its repository.

use serde_json::Value;

/// Extracts `repository.full_name` from a raw payload.
///
/// Returns `None` for malformed JSON, a missing field, a non-string value, or
/// an empty string.
///
/// # Examples
///
/// ```
/// use webhook_listener::webhooks::extract_repository;
///
/// let body = br#"{"repository": {"full_name": "acme/app"}}"#;
/// assert_eq!(extract_repository(body).as_deref(), Some("acme/app"));
/// assert_eq!(extract_repository(b"not json"), None);
/// ```
pub fn extract_repository(body: &[u8]) -> Option<String> {
    let value = parse_loose(body)?;
    value
        .get("repository")
        .and_then(|r| r.get("full_name"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Extracts the branch name from the payload's `ref` field.
///
/// The branch is the last `/`-separated segment of `ref`, so
/// `refs/heads/feature/x` yields `x`. Returns `None` when `ref` is absent or
/// not a string.
///
/// # Examples
///
/// ```
/// use webhook_listener::webhooks::extract_branch;
///
/// assert_eq!(extract_branch(br#"{"ref": "refs/heads/main"}"#).as_deref(), Some("main"));
/// assert_eq!(extract_branch(br#"{"zen": "Keep it simple."}"#), None);
/// ```
pub fn extract_branch(body: &[u8]) -> Option<String> {
    let value = parse_loose(body)?;
    let git_ref = value.get("ref")?.as_str()?;
    git_ref.rsplit('/').next().map(str::to_string)
}

/// Parses the body as untyped JSON, discarding the error.
fn parse_loose(body: &[u8]) -> Option<Value> {
    serde_json::from_slice(body).ok()
}
