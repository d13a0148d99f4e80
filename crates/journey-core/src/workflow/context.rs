//! Execution context keys, field lookup and message template rendering.
//!
//! The execution context is a flat JSON map persisted with the execution.
//! Node evaluators record their decisions under `<kind>:<node_id>` keys so a
//! re-evaluation of the same node (after a retry or a crash) reuses the
//! stored decision instead of drawing a new one.

use std::collections::HashMap;

use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum serialized size of an execution context (256 KB).
pub const MAX_CONTEXT_SIZE: usize = 262_144;

/// Mirror of the execution's wake time while it is waiting.
pub const WAIT_UNTIL_KEY: &str = "wait_until";

/// Context key holding a split node's branch assignment.
pub fn split_key(node_id: &str) -> String {
    format!("split:{node_id}")
}

/// Context key holding a wait node's due time.
pub fn wait_key(node_id: &str) -> String {
    format!("wait:{node_id}")
}

/// Context key holding the delivery receipt id of a message node.
pub fn message_key(node_id: &str) -> String {
    format!("message:{node_id}")
}

/// Context key set once a goal node has been recorded.
pub fn goal_key(node_id: &str) -> String {
    format!("goal:{node_id}")
}

/// Serialized size of a context map in bytes.
pub fn context_size(context: &Map<String, Value>) -> usize {
    serde_json::to_string(context).map(|s| s.len()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Field lookup
// ---------------------------------------------------------------------------

/// Look up a dotted path (`order.total`) in the context.
///
/// The full path is tried as a literal key first, so keys containing dots
/// or colons (`split:choose`) resolve directly.
pub fn context_lookup<'a>(context: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(value) = context.get(path) {
        return Some(value);
    }
    let mut parts = path.split('.');
    let mut current = context.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a JSON value as template text. Strings are inserted without quotes.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// A `{{ ... }}` reference inside a message template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Placeholder {
    /// `{{ contact.<field> }}`, resolved through the contact resolver.
    Contact(String),
    /// `{{ vars.<key> }}` or a bare `{{ <key> }}`, resolved from the context.
    Var(String),
}

impl Placeholder {
    fn parse(expr: &str) -> Option<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return None;
        }
        if let Some(field) = expr.strip_prefix("contact.") {
            return Some(Placeholder::Contact(field.to_string()));
        }
        let key = expr.strip_prefix("vars.").unwrap_or(expr);
        Some(Placeholder::Var(key.to_string()))
    }
}

/// Every placeholder referenced by `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<Placeholder> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        if let Some(placeholder) = Placeholder::parse(&after[..end]) {
            if !found.contains(&placeholder) {
                found.push(placeholder);
            }
        }
        rest = &after[end + 2..];
    }
    found
}

/// Substitute placeholders in `template`.
///
/// Contact fields come from `contact_fields` (pre-resolved by the caller);
/// variables come from the execution context. Unresolved references render
/// as an empty string so raw markers never reach a recipient.
pub fn render_template(
    template: &str,
    context: &Map<String, Value>,
    contact_fields: &HashMap<String, Value>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        let value = match Placeholder::parse(&after[..end]) {
            Some(Placeholder::Contact(field)) => contact_fields.get(&field),
            Some(Placeholder::Var(key)) => context_lookup(context, &key),
            None => None,
        };
        if let Some(value) = value {
            out.push_str(&value_to_string(value));
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}
