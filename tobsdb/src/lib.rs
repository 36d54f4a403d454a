pub mod engine;
pub mod error;
pub mod handler;
pub mod query;
pub mod schema;
pub mod store;
pub mod validation;
pub mod value;

pub use engine::{RawDataset, RawRow, RawTable, Schema};
pub use error::{Result, TdbError};
pub use handler::{handle, handle_message, Action, Request, Response};
pub use schema::SchemaDefinition;
pub use store::{Snapshot, Store, StoreConfig};
pub use value::{Row, Value};
