use crate::error::{Result, TdbError};
use crate::validation;
use super::types::{FieldDefinition, FieldType, SchemaDefinition, TableDefinition};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Name of the row key present on every table
pub const ID_FIELD: &str = "id";

/// Target of a relation field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub table: String,
    pub field: String,
}

/// Element type and nesting depth of a vector field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorSpec {
    pub item: FieldType,
    pub depth: usize,
}

/// A checked field definition bound to its table
#[derive(Debug, Clone)]
pub struct Field {
    pub table: String,
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<serde_json::Value>,
    pub unique: bool,
    pub relation: Option<Relation>,
    pub vector: Option<VectorSpec>,
}

impl Field {
    /// The type of the scalar values held by this field (the element type for vectors)
    pub fn effective_type(&self) -> FieldType {
        match &self.vector {
            Some(spec) => spec.item,
            None => self.field_type,
        }
    }

    pub fn is_vector(&self) -> bool {
        self.vector.is_some()
    }

    fn implicit_id(table: &str) -> Self {
        Field {
            table: table.to_string(),
            name: ID_FIELD.to_string(),
            field_type: FieldType::Int,
            required: false,
            default: None,
            unique: true,
            relation: None,
            vector: None,
        }
    }
}

/// A checked table definition: ordered fields plus the index list.
///
/// The index list starts with `id`, followed by the declared `indexes`
/// and then any other `unique` field, each at most once.
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    fields: Vec<Field>,
    indexes: Vec<String>,
}

impl TableSchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn indexes(&self) -> &[String] {
        &self.indexes
    }

    pub fn is_index(&self, name: &str) -> bool {
        self.indexes.iter().any(|i| i == name)
    }

    /// Names of every table referenced by a relation field of this table
    pub fn relation_targets(&self) -> BTreeSet<&str> {
        self.fields
            .iter()
            .filter_map(|f| f.relation.as_ref())
            .map(|r| r.table.as_str())
            .collect()
    }
}

/// Check a schema definition and build the table models it describes.
pub fn compile_schema(definition: &SchemaDefinition) -> Result<BTreeMap<String, Arc<TableSchema>>> {
    let mut tables = BTreeMap::new();
    for (name, table_def) in &definition.tables {
        tables.insert(name.clone(), compile_table(name, table_def)?);
    }

    // Relations can only be checked once every table is known
    for table in tables.values() {
        for field in &table.fields {
            if let Some(relation) = &field.relation {
                check_relation_target(&tables, field, relation)?;
            }
        }
    }

    // Defaults may reference nothing but their own field
    for table in tables.values() {
        for field in &table.fields {
            if let Some(default) = &field.default {
                validation::resolve_default(field, default).map_err(|e| {
                    TdbError::Schema(format!(
                        "Invalid default for field '{}.{}': {e}",
                        table.name, field.name
                    ))
                })?;
            }
        }
    }

    Ok(tables.into_iter().map(|(k, v)| (k, Arc::new(v))).collect())
}

fn compile_table(name: &str, definition: &TableDefinition) -> Result<TableSchema> {
    if name.is_empty() {
        return Err(TdbError::Schema("Table names cannot be empty".into()));
    }

    let mut fields = Vec::with_capacity(definition.fields.len() + 1);
    if !definition.fields.contains_key(ID_FIELD) {
        fields.push(Field::implicit_id(name));
    }

    for (field_name, field_def) in definition.fields.iter() {
        fields.push(compile_field(name, field_name, field_def)?);
    }

    // id first, then declared fields in declaration order
    fields.sort_by_key(|f| f.name != ID_FIELD);

    let mut indexes = vec![ID_FIELD.to_string()];
    for index in &definition.indexes {
        let field = fields
            .iter_mut()
            .find(|f| &f.name == index)
            .ok_or_else(|| {
                TdbError::Schema(format!("Index '{index}' is not a field of table {name}"))
            })?;
        field.unique = true;
        if !indexes.contains(index) {
            indexes.push(index.clone());
        }
    }
    for field in &fields {
        if field.unique && !indexes.contains(&field.name) {
            indexes.push(field.name.clone());
        }
    }

    Ok(TableSchema {
        name: name.to_string(),
        fields,
        indexes,
    })
}

fn compile_field(table: &str, name: &str, definition: &FieldDefinition) -> Result<Field> {
    let vector = match (&definition.field_type, &definition.vector) {
        (FieldType::Vector, Some(vector_def)) => {
            let (item, depth) = vector_def.resolve().ok_or_else(|| {
                TdbError::Schema(format!(
                    "Field '{table}.{name}' has an invalid vector property: {vector_def:?}"
                ))
            })?;
            if item == FieldType::Vector {
                return Err(TdbError::Schema(format!(
                    "Field '{table}.{name}': vector element type cannot be vector, use the depth instead"
                )));
            }
            Some(VectorSpec { item, depth })
        }
        (FieldType::Vector, None) => {
            return Err(TdbError::Schema(format!(
                "Field '{table}.{name}' is a vector but has no vector property"
            )));
        }
        (_, Some(_)) => {
            return Err(TdbError::Schema(format!(
                "Field '{table}.{name}' has a vector property but is of type {}",
                definition.field_type
            )));
        }
        (_, None) => None,
    };

    let relation = match &definition.relation {
        Some(target) => {
            let (rel_table, rel_field) = target.parts().ok_or_else(|| {
                TdbError::Schema(format!(
                    "Field '{table}.{name}' has an invalid relation target, expected table.field"
                ))
            })?;
            Some(Relation {
                table: rel_table.to_string(),
                field: rel_field.to_string(),
            })
        }
        None => None,
    };

    if name == ID_FIELD {
        if definition.field_type != FieldType::Int {
            return Err(TdbError::Schema(format!(
                "Field '{table}.id' must be of type int"
            )));
        }
        if relation.is_some() {
            return Err(TdbError::Schema(format!(
                "Field '{table}.id' cannot be a relation"
            )));
        }
    }

    let is_id = name == ID_FIELD;
    Ok(Field {
        table: table.to_string(),
        name: name.to_string(),
        field_type: definition.field_type,
        // the row key is generated when absent, so it can never be required
        required: definition.required && !is_id,
        default: if is_id { None } else { definition.default.clone() },
        unique: definition.unique || is_id,
        relation,
        vector,
    })
}

fn check_relation_target(
    tables: &BTreeMap<String, TableSchema>,
    field: &Field,
    relation: &Relation,
) -> Result<()> {
    let target_table = tables.get(&relation.table).ok_or_else(|| {
        TdbError::Schema(format!(
            "Relation on '{}.{}' references unknown table {}",
            field.table, field.name, relation.table
        ))
    })?;
    let target_field = target_table.field(&relation.field).ok_or_else(|| {
        TdbError::Schema(format!(
            "Relation on '{}.{}' references unknown field {}.{}",
            field.table, field.name, relation.table, relation.field
        ))
    })?;

    if target_field.effective_type() != field.effective_type() {
        return Err(TdbError::Schema(format!(
            "Relation on '{}.{}' has type {} but {}.{} is of type {}",
            field.table,
            field.name,
            field.effective_type(),
            relation.table,
            relation.field,
            target_field.effective_type()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema_str;

    fn compile(yaml: &str) -> Result<BTreeMap<String, Arc<TableSchema>>> {
        compile_schema(&parse_schema_str(yaml).unwrap())
    }

    #[test]
    fn test_implicit_id_field() {
        let tables = compile(
            r#"
tables:
  example:
    fields:
      name: { type: string }
"#,
        )
        .unwrap();
        let table = &tables["example"];
        assert_eq!(table.fields()[0].name, "id");
        assert_eq!(table.field("id").unwrap().field_type, FieldType::Int);
        assert_eq!(table.indexes(), ["id".to_string()]);
    }

    #[test]
    fn test_index_order() {
        let tables = compile(
            r#"
tables:
  user:
    fields:
      id: { type: int, required: true }
      email: { type: string, unique: true }
      handle: { type: string }
      name: { type: string }
    indexes: [handle]
"#,
        )
        .unwrap();
        let table = &tables["user"];
        assert_eq!(table.indexes(), ["id", "handle", "email"]);
        assert!(table.field("handle").unwrap().unique);
        // a declared id is never required
        assert!(!table.field("id").unwrap().required);
    }

    #[test]
    fn test_fields_keep_declaration_order() {
        let tables = compile(
            r#"
tables:
  user:
    fields:
      zeta: { type: string, unique: true }
      name: { type: string }
      id: { type: int }
      alpha: { type: string, unique: true }
"#,
        )
        .unwrap();
        let table = &tables["user"];
        let names: Vec<_> = table.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["id", "zeta", "name", "alpha"]);
        assert_eq!(table.indexes(), ["id", "zeta", "alpha"]);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let yaml = "tables:\n  t:\n    fields:\n      a: { type: int }\n      a: { type: string }\n";
        assert!(parse_schema_str(yaml).is_err());
    }

    #[test]
    fn test_unknown_index_rejected() {
        let err = compile(
            r#"
tables:
  user:
    fields:
      name: { type: string }
    indexes: [email]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("email"));
    }

    #[test]
    fn test_vector_property_resolved() {
        let tables = compile(
            r#"
tables:
  grid:
    fields:
      cells: { type: vector, vector: "int, 2" }
      tags: { type: vector, vector: { type: string } }
"#,
        )
        .unwrap();
        let grid = &tables["grid"];
        assert_eq!(
            grid.field("cells").unwrap().vector,
            Some(VectorSpec { item: FieldType::Int, depth: 2 })
        );
        assert_eq!(
            grid.field("tags").unwrap().vector,
            Some(VectorSpec { item: FieldType::String, depth: 1 })
        );
        assert_eq!(grid.field("cells").unwrap().effective_type(), FieldType::Int);
    }

    #[test]
    fn test_vector_without_property_rejected() {
        assert!(compile("tables:\n  t:\n    fields:\n      v: { type: vector }\n").is_err());
        assert!(compile("tables:\n  t:\n    fields:\n      v: { type: int, vector: int }\n").is_err());
    }

    #[test]
    fn test_relation_type_must_match() {
        let ok = compile(
            r#"
tables:
  user:
    fields:
      name: { type: string, unique: true }
  post:
    fields:
      author_id: { type: int, relation: user.id }
      author_name: { type: string, relation: { table: user, field: name } }
"#,
        )
        .unwrap();
        assert_eq!(
            ok["post"].field("author_id").unwrap().relation,
            Some(Relation { table: "user".into(), field: "id".into() })
        );
        assert_eq!(
            ok["post"].relation_targets().into_iter().collect::<Vec<_>>(),
            vec!["user"]
        );

        let err = compile(
            r#"
tables:
  user:
    fields:
      name: { type: string }
  post:
    fields:
      author_id: { type: string, relation: user.id }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, TdbError::Schema(_)));
    }

    #[test]
    fn test_relation_unknown_target() {
        assert!(compile("tables:\n  post:\n    fields:\n      a: { type: int, relation: user.id }\n").is_err());
        assert!(compile("tables:\n  post:\n    fields:\n      a: { type: int, relation: post }\n").is_err());
    }

    #[test]
    fn test_invalid_default_rejected() {
        let err = compile(
            r#"
tables:
  user:
    fields:
      age: { type: int, default: "old" }
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("user.age"));
    }

    #[test]
    fn test_id_must_be_int() {
        assert!(compile("tables:\n  t:\n    fields:\n      id: { type: string }\n").is_err());
    }
}
