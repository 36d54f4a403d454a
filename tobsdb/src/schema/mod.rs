mod parser;
mod table;
mod types;

pub use parser::{parse_schema, parse_schema_str};
pub use table::{compile_schema, Field, Relation, TableSchema, VectorSpec, ID_FIELD};
pub use types::{
    FieldDefinition, FieldType, RelationTarget, SchemaDefinition, TableDefinition,
    VectorDefinition,
};
