use crate::error::{Result, TdbError};
use crate::schema::{Field, FieldType};
use crate::value::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};

/// Default literal that resolves to the current time on date fields
pub const NOW: &str = "now";

/// Validate a raw input value against a field definition.
///
/// A missing value (or JSON null) resolves to the field's default, fails
/// with `MissingRequiredField` on create when the field is required, and is
/// `Ok(None)` otherwise. Present values are coerced to the field's type.
/// Uniqueness is left to the caller.
pub fn validate(
    field: &Field,
    raw: Option<&serde_json::Value>,
    is_create: bool,
) -> Result<Option<Value>> {
    match raw.filter(|v| !v.is_null()) {
        Some(raw) => coerce_field(field, raw).map(Some),
        None => {
            if let Some(default) = &field.default {
                return resolve_default(field, default).map(Some);
            }
            if is_create && field.required {
                return Err(TdbError::MissingRequiredField {
                    table: field.table.clone(),
                    field: field.name.clone(),
                });
            }
            Ok(None)
        }
    }
}

/// Resolve a configured default into a value of the field's type
pub fn resolve_default(field: &Field, default: &serde_json::Value) -> Result<Value> {
    if field.field_type == FieldType::Date && default.as_str() == Some(NOW) {
        return Ok(Value::Date(Utc::now().trunc_subsecs(3)));
    }
    coerce_field(field, default)
}

/// Coerce a present value to the field's full shape (a whole vector for vector fields)
pub fn coerce_field(field: &Field, raw: &serde_json::Value) -> Result<Value> {
    match &field.vector {
        Some(spec) => coerce_vector(field, spec.item, spec.depth, raw),
        None => coerce_scalar(field, field.field_type, raw),
    }
}

/// Coerce one element of a vector field (one nesting level below the field itself)
pub fn coerce_element(field: &Field, raw: &serde_json::Value) -> Result<Value> {
    match &field.vector {
        Some(spec) if spec.depth > 1 => coerce_vector(field, spec.item, spec.depth - 1, raw),
        Some(spec) => coerce_scalar(field, spec.item, raw),
        None => coerce_scalar(field, field.field_type, raw),
    }
}

/// Coerce a value to the field's scalar element type
pub fn coerce_leaf(field: &Field, raw: &serde_json::Value) -> Result<Value> {
    coerce_scalar(field, field.effective_type(), raw)
}

fn coerce_vector(
    field: &Field,
    item: FieldType,
    depth: usize,
    raw: &serde_json::Value,
) -> Result<Value> {
    let items = raw
        .as_array()
        .ok_or_else(|| mismatch(field, &vector_name(item, depth), raw))?;

    let mut out = Vec::with_capacity(items.len());
    for element in items {
        let value = if depth > 1 {
            coerce_vector(field, item, depth - 1, element)?
        } else {
            coerce_scalar(field, item, element)?
        };
        out.push(value);
    }
    Ok(Value::Vector(out))
}

fn coerce_scalar(field: &Field, ty: FieldType, raw: &serde_json::Value) -> Result<Value> {
    let coerced = match ty {
        FieldType::Int => coerce_int(raw).map(Value::Int),
        FieldType::Float => coerce_float(raw).map(Value::Float),
        FieldType::String => raw.as_str().map(|s| Value::String(s.to_string())),
        FieldType::Bool => raw.as_bool().map(Value::Bool),
        FieldType::Date => coerce_date(raw).map(Value::Date),
        // compile_schema never lets a vector be an element type
        FieldType::Vector => None,
    };
    coerced.ok_or_else(|| mismatch(field, &ty.to_string(), raw))
}

fn coerce_int(raw: &serde_json::Value) -> Option<i64> {
    match raw {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn coerce_float(raw: &serde_json::Value) -> Option<f64> {
    match raw {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn coerce_date(raw: &serde_json::Value) -> Option<DateTime<Utc>> {
    let date = match raw {
        serde_json::Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))?;
            DateTime::from_timestamp_millis(millis)?
        }
        serde_json::Value::String(s) => parse_date(s.trim())?,
        _ => return None,
    };
    Some(date.trunc_subsecs(3))
}

/// Parse RFC 3339, or a naive `YYYY-MM-DD[THH:MM:SS[.fff]]` read as UTC
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn vector_name(item: FieldType, depth: usize) -> String {
    format!("vector({item}, {depth})")
}

pub(crate) fn mismatch(field: &Field, expected: &str, raw: &serde_json::Value) -> TdbError {
    TdbError::TypeMismatch {
        field: field.name.clone(),
        expected: expected.to_string(),
        got: json_type_name(raw).to_string(),
    }
}

pub fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{compile_schema, parse_schema_str, TableSchema};
    use chrono::{Datelike, TimeZone};
    use serde_json::json;
    use std::sync::Arc;

    fn test_table() -> Arc<TableSchema> {
        let schema = parse_schema_str(
            r#"
tables:
  example:
    fields:
      name: { type: string, required: true }
      age: { type: int }
      score: { type: float, default: 1.5 }
      active: { type: bool }
      createdAt: { type: date, default: now }
      birthday: { type: date }
      tags: { type: vector, vector: "string, 1" }
      grid: { type: vector, vector: "int, 2" }
"#,
        )
        .unwrap();
        compile_schema(&schema).unwrap().remove("example").unwrap()
    }

    fn field<'a>(table: &'a TableSchema, name: &str) -> &'a Field {
        table.field(name).unwrap()
    }

    #[test]
    fn test_missing_required_field() {
        let table = test_table();
        let err = validate(field(&table, "name"), None, true).unwrap_err();
        assert!(matches!(err, TdbError::MissingRequiredField { ref field, .. } if field == "name"));

        // required-ness is only enforced on create
        assert_eq!(validate(field(&table, "name"), None, false).unwrap(), None);
        // null counts as absent
        assert!(validate(field(&table, "name"), Some(&json!(null)), true).is_err());
    }

    #[test]
    fn test_optional_field_absent() {
        let table = test_table();
        assert_eq!(validate(field(&table, "age"), None, true).unwrap(), None);
    }

    #[test]
    fn test_default_applied() {
        let table = test_table();
        assert_eq!(
            validate(field(&table, "score"), None, true).unwrap(),
            Some(Value::Float(1.5))
        );
        let before = Utc::now().trunc_subsecs(3);
        match validate(field(&table, "createdAt"), None, true).unwrap() {
            Some(Value::Date(d)) => assert!(d >= before),
            other => panic!("expected a date, got {other:?}"),
        }
    }

    #[test]
    fn test_int_coercion() {
        let table = test_table();
        let age = field(&table, "age");
        assert_eq!(coerce_field(age, &json!(30)).unwrap(), Value::Int(30));
        assert_eq!(coerce_field(age, &json!(30.0)).unwrap(), Value::Int(30));
        assert_eq!(coerce_field(age, &json!("42")).unwrap(), Value::Int(42));
        assert!(coerce_field(age, &json!(30.5)).is_err());
        assert!(coerce_field(age, &json!("forty")).is_err());
        assert!(coerce_field(age, &json!(true)).is_err());
    }

    #[test]
    fn test_float_and_string_coercion() {
        let table = test_table();
        assert_eq!(
            coerce_field(field(&table, "score"), &json!("2.25")).unwrap(),
            Value::Float(2.25)
        );
        assert_eq!(
            coerce_field(field(&table, "score"), &json!(3)).unwrap(),
            Value::Float(3.0)
        );
        // numbers are never turned into strings
        let err = coerce_field(field(&table, "name"), &json!(1)).unwrap_err();
        assert!(matches!(err, TdbError::TypeMismatch { ref got, .. } if got == "number"));
        assert!(coerce_field(field(&table, "active"), &json!("true")).is_err());
    }

    #[test]
    fn test_date_coercion() {
        let table = test_table();
        let birthday = field(&table, "birthday");
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        assert_eq!(
            coerce_field(birthday, &json!(expected.timestamp_millis())).unwrap(),
            Value::Date(expected)
        );
        assert_eq!(
            coerce_field(birthday, &json!("2024-01-02T03:04:05Z")).unwrap(),
            Value::Date(expected)
        );
        assert_eq!(
            coerce_field(birthday, &json!("2024-01-02T05:04:05+02:00")).unwrap(),
            Value::Date(expected)
        );
        assert_eq!(
            coerce_field(birthday, &json!("2024-01-02T03:04:05")).unwrap(),
            Value::Date(expected)
        );
        match coerce_field(birthday, &json!("2024-01-02")).unwrap() {
            Value::Date(d) => assert_eq!((d.year(), d.month(), d.day()), (2024, 1, 2)),
            other => panic!("expected a date, got {other:?}"),
        }
        assert!(coerce_field(birthday, &json!("yesterday")).is_err());
    }

    #[test]
    fn test_date_truncated_to_millis() {
        let table = test_table();
        let value = coerce_field(field(&table, "birthday"), &json!("2024-01-02T03:04:05.123456Z"))
            .unwrap();
        assert_eq!(value.to_json(), json!("2024-01-02T03:04:05.123Z"));
    }

    #[test]
    fn test_vector_coercion() {
        let table = test_table();
        assert_eq!(
            coerce_field(field(&table, "tags"), &json!(["a", "b"])).unwrap(),
            Value::Vector(vec![Value::String("a".into()), Value::String("b".into())])
        );
        assert_eq!(
            coerce_field(field(&table, "grid"), &json!([[1, "2"], []])).unwrap(),
            Value::Vector(vec![
                Value::Vector(vec![Value::Int(1), Value::Int(2)]),
                Value::Vector(vec![]),
            ])
        );
        assert!(coerce_field(field(&table, "tags"), &json!("a")).is_err());
        assert!(coerce_field(field(&table, "tags"), &json!(["a", 1])).is_err());
    }

    #[test]
    fn test_vector_depth_mismatch() {
        let table = test_table();
        let grid = field(&table, "grid");
        // too shallow
        let err = coerce_field(grid, &json!([1, 2])).unwrap_err();
        assert!(matches!(err, TdbError::TypeMismatch { .. }));
        // too deep
        assert!(coerce_field(grid, &json!([[[1]]])).is_err());
    }

    #[test]
    fn test_coerce_element() {
        let table = test_table();
        assert_eq!(
            coerce_element(field(&table, "grid"), &json!([7])).unwrap(),
            Value::Vector(vec![Value::Int(7)])
        );
        assert!(coerce_element(field(&table, "grid"), &json!(7)).is_err());
        assert_eq!(
            coerce_element(field(&table, "tags"), &json!("x")).unwrap(),
            Value::String("x".into())
        );
    }
}
