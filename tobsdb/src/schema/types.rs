use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Top-level schema definition, one entry per table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub tables: BTreeMap<String, TableDefinition>,
}

/// Definition of a single table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableDefinition {
    #[serde(default)]
    pub fields: FieldMap,
    /// Field names that must be unique per row and support direct lookup
    #[serde(default)]
    pub indexes: Vec<String>,
}

/// A table's fields in declaration order
#[derive(Debug, Clone, Default)]
pub struct FieldMap(Vec<(String, FieldDefinition)>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FieldDefinition> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, def)| def)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Add a field at the end, or replace a field of the same name in place
    pub fn insert(&mut self, name: impl Into<String>, definition: FieldDefinition) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = definition,
            None => self.0.push((name, definition)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldDefinition)> {
        self.0.iter().map(|(name, def)| (name.as_str(), def))
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, def) in &self.0 {
            map.serialize_entry(name, def)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldMapVisitor;

        impl<'de> Visitor<'de> for FieldMapVisitor {
            type Value = FieldMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to field definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldMap, A::Error> {
                let mut fields = FieldMap::new();
                while let Some((name, def)) = access.next_entry::<String, FieldDefinition>()? {
                    if fields.contains_key(&name) {
                        return Err(serde::de::Error::custom(format!("duplicate field '{name}'")));
                    }
                    fields.0.push((name, def));
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(FieldMapVisitor)
    }
}

/// Definition of a single field in a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub relation: Option<RelationTarget>,
    #[serde(default)]
    pub vector: Option<VectorDefinition>,
}

impl FieldDefinition {
    pub fn new(field_type: FieldType) -> Self {
        FieldDefinition {
            field_type,
            required: false,
            default: None,
            unique: false,
            relation: None,
            vector: None,
        }
    }
}

/// Field type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[serde(alias = "integer")]
    Int,
    Float,
    String,
    #[serde(alias = "boolean")]
    Bool,
    Date,
    Vector,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::String => "string",
            FieldType::Bool => "bool",
            FieldType::Date => "date",
            FieldType::Vector => "vector",
        };
        f.write_str(name)
    }
}

/// Relation target - either `table.field` or an explicit mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationTarget {
    Dotted(String),
    Explicit { table: String, field: String },
}

impl RelationTarget {
    /// Split into (table, field). `None` when a dotted target has no field part.
    pub fn parts(&self) -> Option<(&str, &str)> {
        match self {
            RelationTarget::Dotted(raw) => {
                let (table, field) = raw.split_once('.')?;
                let (table, field) = (table.trim(), field.trim());
                if table.is_empty() || field.is_empty() {
                    return None;
                }
                Some((table, field))
            }
            RelationTarget::Explicit { table, field } => Some((table, field)),
        }
    }
}

/// Vector element type and nesting depth - `"int, 2"` or an explicit mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VectorDefinition {
    Simple(String),
    Explicit {
        #[serde(rename = "type")]
        item_type: FieldType,
        #[serde(default)]
        depth: Option<usize>,
    },
}

impl VectorDefinition {
    /// Resolve into (element type, depth). Depths below 1 are read as 1.
    pub fn resolve(&self) -> Option<(FieldType, usize)> {
        match self {
            VectorDefinition::Simple(raw) => {
                let mut parts = raw.split(',');
                let item = parts.next()?.trim();
                let item_type: FieldType =
                    serde_json::from_value(serde_json::Value::String(item.to_string())).ok()?;
                let depth = parts
                    .next()
                    .and_then(|d| d.trim().parse::<usize>().ok())
                    .unwrap_or(1);
                Some((item_type, depth.max(1)))
            }
            VectorDefinition::Explicit { item_type, depth } => {
                Some((*item_type, depth.unwrap_or(1).max(1)))
            }
        }
    }
}
