//! Condition predicate evaluation.
//!
//! Evaluation is synchronous: the caller gathers every referenced field
//! (context first, then the contact resolver) into a `FieldValues` map and
//! the predicate is evaluated against it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use journey_types::workflow::Predicate;
use serde_json::Value;

/// Resolved values of the fields a predicate references. Absent fields are
/// simply missing from the map.
pub type FieldValues = HashMap<String, Value>;

/// Collect every field name referenced by `predicate`, deduplicated.
pub fn referenced_fields(predicate: &Predicate) -> Vec<String> {
    let mut fields = Vec::new();
    collect_fields(predicate, &mut fields);
    fields
}

fn collect_fields(predicate: &Predicate, out: &mut Vec<String>) {
    match predicate {
        Predicate::Equals { field, .. }
        | Predicate::NotEquals { field, .. }
        | Predicate::Exists { field }
        | Predicate::GreaterThan { field, .. }
        | Predicate::LessThan { field, .. }
        | Predicate::Contains { field, .. } => {
            if !out.contains(field) {
                out.push(field.clone());
            }
        }
        Predicate::All { predicates } | Predicate::Any { predicates } => {
            for p in predicates {
                collect_fields(p, out);
            }
        }
        Predicate::Not { predicate } => collect_fields(predicate, out),
        Predicate::Before { .. } | Predicate::After { .. } => {}
    }
}

/// Evaluate `predicate` against resolved field values at time `now`.
pub fn evaluate(predicate: &Predicate, fields: &FieldValues, now: DateTime<Utc>) -> bool {
    match predicate {
        Predicate::Equals { field, value } => fields.get(field).is_some_and(|v| loosely_equal(v, value)),
        Predicate::NotEquals { field, value } => {
            !fields.get(field).is_some_and(|v| loosely_equal(v, value))
        }
        Predicate::Exists { field } => fields.get(field).is_some_and(|v| !v.is_null()),
        Predicate::GreaterThan { field, value } => {
            fields.get(field).and_then(as_number).is_some_and(|n| n > *value)
        }
        Predicate::LessThan { field, value } => {
            fields.get(field).and_then(as_number).is_some_and(|n| n < *value)
        }
        Predicate::Contains { field, value } => match fields.get(field) {
            Some(Value::String(haystack)) => match value {
                Value::String(needle) => haystack.contains(needle.as_str()),
                _ => false,
            },
            Some(Value::Array(items)) => items.iter().any(|item| loosely_equal(item, value)),
            _ => false,
        },
        Predicate::Before { at } => now < *at,
        Predicate::After { at } => now >= *at,
        Predicate::All { predicates } => predicates.iter().all(|p| evaluate(p, fields, now)),
        Predicate::Any { predicates } => predicates.iter().any(|p| evaluate(p, fields, now)),
        Predicate::Not { predicate } => !evaluate(predicate, fields, now),
    }
}

/// Numbers compare by value across representations ("42" == 42).
fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> FieldValues {
        value
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn predicate(value: Value) -> Predicate {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_equals_and_numeric_coercion() {
        let f = fields(json!({"tier": "gold", "score": "42"}));
        let now = Utc::now();
        assert!(evaluate(&predicate(json!({"op": "equals", "field": "tier", "value": "gold"})), &f, now));
        assert!(evaluate(&predicate(json!({"op": "equals", "field": "score", "value": 42})), &f, now));
        assert!(evaluate(&predicate(json!({"op": "not_equals", "field": "tier", "value": "silver"})), &f, now));
        assert!(evaluate(&predicate(json!({"op": "not_equals", "field": "missing", "value": 1})), &f, now));
    }

    #[test]
    fn test_comparisons_on_missing_field_are_false() {
        let f = FieldValues::new();
        let now = Utc::now();
        assert!(!evaluate(&predicate(json!({"op": "greater_than", "field": "x", "value": 1.0})), &f, now));
        assert!(!evaluate(&predicate(json!({"op": "less_than", "field": "x", "value": 1.0})), &f, now));
        assert!(!evaluate(&predicate(json!({"op": "exists", "field": "x"})), &f, now));
    }

    #[test]
    fn test_contains_string_and_array() {
        let f = fields(json!({"email": "ada@example.com", "tags": ["vip", "beta"]}));
        let now = Utc::now();
        assert!(evaluate(&predicate(json!({"op": "contains", "field": "email", "value": "@example"})), &f, now));
        assert!(evaluate(&predicate(json!({"op": "contains", "field": "tags", "value": "vip"})), &f, now));
        assert!(!evaluate(&predicate(json!({"op": "contains", "field": "tags", "value": "churned"})), &f, now));
    }

    #[test]
    fn test_combinators_and_time() {
        let f = fields(json!({"total": 120}));
        let now = "2026-05-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let p = predicate(json!({
            "op": "all",
            "predicates": [
                {"op": "greater_than", "field": "total", "value": 100.0},
                {"op": "after", "at": "2026-04-01T00:00:00Z"},
                {"op": "not", "predicate": {"op": "before", "at": "2026-04-01T00:00:00Z"}},
                {"op": "any", "predicates": [
                    {"op": "exists", "field": "coupon"},
                    {"op": "less_than", "field": "total", "value": 500.0}
                ]}
            ]
        }));
        assert!(evaluate(&p, &f, now));
    }

    #[test]
    fn test_referenced_fields_dedup() {
        let p = predicate(json!({
            "op": "any",
            "predicates": [
                {"op": "exists", "field": "a"},
                {"op": "not", "predicate": {"op": "equals", "field": "a", "value": 1}},
                {"op": "less_than", "field": "b", "value": 2.0}
            ]
        }));
        assert_eq!(referenced_fields(&p), vec!["a".to_string(), "b".to_string()]);
    }
}
