use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A validated field value. Produced only by the validator, so its variant
/// always matches the field's declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Date(DateTime<Utc>),
    Vector(Vec<Value>),
}

/// A stored row: field name to value, always holding an `id`
pub type Row = BTreeMap<String, Value>;

/// Hashable form of a value, used as the key of an index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    Int(i64),
    Float(u64),
    String(String),
    Bool(bool),
    Date(i64),
    Vector(Vec<IndexKey>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bool(_) => "bool",
            Value::Date(_) => "date",
            Value::Vector(_) => "vector",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Every scalar inside this value, depth first. A scalar yields itself.
    pub fn leaves(&self) -> Vec<&Value> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }

    /// Ordering between two values of the same scalar kind.
    /// Mixed kinds, booleans and vectors are unordered.
    pub fn compare_to(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn index_key(&self) -> IndexKey {
        match self {
            Value::Int(i) => IndexKey::Int(*i),
            // -0.0 and 0.0 compare equal, so they must share a key
            Value::Float(f) => IndexKey::Float(if *f == 0.0 { 0 } else { f.to_bits() }),
            Value::String(s) => IndexKey::String(s.clone()),
            Value::Bool(b) => IndexKey::Bool(*b),
            Value::Date(d) => IndexKey::Date(d.timestamp_millis()),
            Value::Vector(items) => IndexKey::Vector(items.iter().map(Value::index_key).collect()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Date(d) => serde_json::Value::String(format_date(d)),
            Value::Vector(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

fn collect_leaves<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Vector(items) => {
            for item in items {
                collect_leaves(item, out);
            }
        }
        scalar => out.push(scalar),
    }
}

/// Dates travel as RFC 3339 strings at millisecond precision
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Date(d) => serializer.serialize_str(&format_date(d)),
            Value::Vector(items) => serializer.collect_seq(items),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// The row's key, when it has one
pub fn row_id(row: &Row) -> Option<i64> {
    row.get(crate::schema::ID_FIELD).and_then(Value::as_int)
}

/// Convert a row into a JSON object for responses and snapshots
pub fn row_to_json(row: &Row) -> serde_json::Map<String, serde_json::Value> {
    row.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_leaves_flatten_nested_vectors() {
        let value = Value::Vector(vec![
            Value::Vector(vec![Value::Int(1), Value::Int(2)]),
            Value::Vector(vec![Value::Int(3)]),
        ]);
        let leaves: Vec<_> = value.leaves().into_iter().cloned().collect();
        assert_eq!(leaves, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(Value::Bool(true).leaves(), vec![&Value::Bool(true)]);
    }

    #[test]
    fn test_date_json_uses_millis() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(
            Value::Date(date).to_json(),
            serde_json::json!("2024-03-01T12:30:00.000Z")
        );
    }

    #[test]
    fn test_float_zero_keys_match() {
        assert_eq!(Value::Float(0.0).index_key(), Value::Float(-0.0).index_key());
        assert_ne!(Value::Float(1.5).index_key(), Value::Float(2.5).index_key());
    }

    #[test]
    fn test_compare_to_mixed_kinds_unordered() {
        assert_eq!(Value::Int(1).compare_to(&Value::Int(2)), Some(Ordering::Less));
        assert_eq!(Value::Int(1).compare_to(&Value::Float(2.0)), None);
        assert_eq!(Value::Bool(true).compare_to(&Value::Bool(false)), None);
    }

    #[test]
    fn test_serialize_matches_to_json() {
        let value = Value::Vector(vec![Value::String("a".into()), Value::Float(1.5)]);
        assert_eq!(serde_json::to_value(&value).unwrap(), value.to_json());
        assert_eq!(value.to_string(), r#"["a",1.5]"#);
    }
}
