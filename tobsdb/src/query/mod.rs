//! Row comparator used by the find paths.
//!
//! A query value is either a plain JSON value (an equality predicate) or an
//! object of operators, e.g. `{ "gte": 18, "lt": 65 }`. Every operator in the
//! object must hold. The comparator never fails: a query value that cannot
//! be coerced to the field's type simply does not match.
//!
//! Vector fields compare against an array query by exact equality and
//! against a scalar query by membership over all nested elements.

use crate::schema::Field;
use crate::validation::{coerce_field, coerce_leaf};
use crate::value::Value;
use std::cmp::Ordering;

/// Flat field-predicate filter: field name to query value
pub type WhereClause = serde_json::Map<String, serde_json::Value>;

/// Decide whether a stored value satisfies a query value
pub fn compare(field: &Field, stored: Option<&Value>, query: &serde_json::Value) -> bool {
    let Some(stored) = stored else {
        return false;
    };
    match query {
        serde_json::Value::Object(ops) => {
            !ops.is_empty() && ops.iter().all(|(op, operand)| apply_op(field, stored, op, operand))
        }
        _ => equals(field, stored, query),
    }
}

/// Whether a query value can be answered by an exact index lookup
pub fn is_lookup(field: &Field, query: &serde_json::Value) -> bool {
    match query {
        serde_json::Value::Object(_) | serde_json::Value::Null => false,
        serde_json::Value::Array(_) => field.is_vector(),
        _ => !field.is_vector(),
    }
}

fn equals(field: &Field, stored: &Value, query: &serde_json::Value) -> bool {
    if field.is_vector() && !query.is_array() {
        return contains(field, stored, query);
    }
    match coerce_field(field, query) {
        Ok(query) => *stored == query,
        Err(_) => false,
    }
}

fn contains(field: &Field, stored: &Value, query: &serde_json::Value) -> bool {
    match coerce_leaf(field, query) {
        Ok(query) => stored.leaves().into_iter().any(|leaf| *leaf == query),
        Err(_) => false,
    }
}

fn apply_op(field: &Field, stored: &Value, op: &str, operand: &serde_json::Value) -> bool {
    match op {
        "eq" => equals(field, stored, operand),
        "ne" => !equals(field, stored, operand),
        "gt" => ordering(field, stored, operand) == Some(Ordering::Greater),
        "gte" => matches!(
            ordering(field, stored, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        "lt" => ordering(field, stored, operand) == Some(Ordering::Less),
        "lte" => matches!(
            ordering(field, stored, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        "contains" if field.is_vector() => contains(field, stored, operand),
        "contains" => text_op(stored, operand, |s, q| s.contains(q)),
        "startsWith" => text_op(stored, operand, |s, q| s.starts_with(q)),
        "endsWith" => text_op(stored, operand, |s, q| s.ends_with(q)),
        _ => false,
    }
}

fn ordering(field: &Field, stored: &Value, operand: &serde_json::Value) -> Option<Ordering> {
    if field.is_vector() {
        return None;
    }
    let operand = coerce_field(field, operand).ok()?;
    stored.compare_to(&operand)
}

fn text_op(stored: &Value, operand: &serde_json::Value, test: impl Fn(&str, &str) -> bool) -> bool {
    match (stored.as_str(), operand.as_str()) {
        (Some(s), Some(q)) => test(s, q),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{compile_schema, parse_schema_str, TableSchema};
    use serde_json::json;
    use std::sync::Arc;

    fn table() -> Arc<TableSchema> {
        let schema = parse_schema_str(
            r#"
tables:
  example:
    fields:
      name: { type: string }
      age: { type: int }
      active: { type: bool }
      seen: { type: date }
      tags: { type: vector, vector: string }
      grid: { type: vector, vector: "int, 2" }
"#,
        )
        .unwrap();
        compile_schema(&schema).unwrap().remove("example").unwrap()
    }

    #[test]
    fn test_equality_with_coercion() {
        let t = table();
        let age = t.field("age").unwrap();
        assert!(compare(age, Some(&Value::Int(30)), &json!(30)));
        assert!(compare(age, Some(&Value::Int(30)), &json!("30")));
        assert!(!compare(age, Some(&Value::Int(30)), &json!(31)));
        // type mismatch is not an error, just no match
        assert!(!compare(age, Some(&Value::Int(30)), &json!("thirty")));
        assert!(!compare(age, None, &json!(30)));
    }

    #[test]
    fn test_date_equality_across_formats() {
        let t = table();
        let seen = t.field("seen").unwrap();
        let stored = coerce_field(seen, &json!("2024-05-01T10:00:00Z")).unwrap();
        assert!(compare(seen, Some(&stored), &json!("2024-05-01T10:00:00.000Z")));
        assert!(compare(seen, Some(&stored), &json!(1714557600000i64)));
    }

    #[test]
    fn test_vector_array_query_is_equality() {
        let t = table();
        let tags = t.field("tags").unwrap();
        let stored = Value::Vector(vec![Value::String("a".into()), Value::String("b".into())]);
        assert!(compare(tags, Some(&stored), &json!(["a", "b"])));
        assert!(!compare(tags, Some(&stored), &json!(["b", "a"])));
        assert!(!compare(tags, Some(&stored), &json!(["a"])));
    }

    #[test]
    fn test_vector_scalar_query_is_membership() {
        let t = table();
        let tags = t.field("tags").unwrap();
        let stored = Value::Vector(vec![Value::String("a".into()), Value::String("b".into())]);
        assert!(compare(tags, Some(&stored), &json!("b")));
        assert!(!compare(tags, Some(&stored), &json!("c")));

        let grid = t.field("grid").unwrap();
        let stored = coerce_field(grid, &json!([[1, 2], [3]])).unwrap();
        assert!(compare(grid, Some(&stored), &json!(3)));
        assert!(!compare(grid, Some(&stored), &json!(4)));
    }

    #[test]
    fn test_ordering_operators() {
        let t = table();
        let age = t.field("age").unwrap();
        let stored = Value::Int(30);
        assert!(compare(age, Some(&stored), &json!({ "gte": 18, "lt": 65 })));
        assert!(compare(age, Some(&stored), &json!({ "gt": 29, "lte": 30 })));
        assert!(!compare(age, Some(&stored), &json!({ "gt": 30 })));
        assert!(compare(age, Some(&stored), &json!({ "ne": 31 })));
        assert!(!compare(age, Some(&stored), &json!({ "eq": 31 })));
    }

    #[test]
    fn test_string_operators() {
        let t = table();
        let name = t.field("name").unwrap();
        let stored = Value::String("Ada Lovelace".into());
        assert!(compare(name, Some(&stored), &json!({ "startsWith": "Ada" })));
        assert!(compare(name, Some(&stored), &json!({ "endsWith": "lace" })));
        assert!(compare(name, Some(&stored), &json!({ "contains": "a L" })));
        assert!(!compare(name, Some(&stored), &json!({ "contains": 1 })));
    }

    #[test]
    fn test_unknown_or_empty_operator_never_matches() {
        let t = table();
        let age = t.field("age").unwrap();
        assert!(!compare(age, Some(&Value::Int(1)), &json!({ "near": 1 })));
        assert!(!compare(age, Some(&Value::Int(1)), &json!({})));
        let active = t.field("active").unwrap();
        assert!(!compare(active, Some(&Value::Bool(true)), &json!({ "gt": false })));
    }

    #[test]
    fn test_is_lookup() {
        let t = table();
        assert!(is_lookup(t.field("age").unwrap(), &json!(1)));
        assert!(!is_lookup(t.field("age").unwrap(), &json!({ "gt": 1 })));
        assert!(is_lookup(t.field("tags").unwrap(), &json!(["a"])));
        assert!(!is_lookup(t.field("tags").unwrap(), &json!("a")));
    }
}
