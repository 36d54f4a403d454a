use thiserror::Error;

#[derive(Error, Debug)]
pub enum TdbError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Missing required field '{field}' in table {table}")]
    MissingRequiredField { table: String, field: String },

    #[error("Invalid type for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("Duplicate value {value} for unique field '{field}' in table {table}")]
    DuplicateUniqueValue {
        table: String,
        field: String,
        value: String,
    },

    #[error("No row found for relation {field} -> {target_table}.{target_field} with value {value}")]
    DanglingRelation {
        field: String,
        target_table: String,
        target_field: String,
        value: String,
    },

    #[error("No ids left to assign in table {table}")]
    IdsExhausted { table: String },

    #[error("Where constraints cannot be empty")]
    EmptyWhereClause,

    #[error("Unique fields not included in findUnique request on table {table}")]
    NoUsableIndex { table: String },

    #[error("Table not found")]
    UnknownTable(String),

    #[error("Field '{field}' does not exist in table {table}")]
    UnknownField { table: String, field: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TdbError {
    /// Errors caused by the request itself rather than by the process.
    pub fn is_request_error(&self) -> bool {
        !matches!(self, TdbError::Io(_) | TdbError::Other(_))
    }
}

pub type Result<T> = std::result::Result<T, TdbError>;
