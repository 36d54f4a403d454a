//! Table engine: a session's [`Schema`] and the per-table read/write handles
//! through which every operation reaches the rows.
//!
//! Each table's [`TableData`] sits behind its own `RwLock`. A write handle
//! holds the table's write lock plus read locks on every table its relation
//! fields point at, for as long as the handle lives. Locks are always taken
//! in ascending table-name order, so concurrent handles cannot deadlock.

mod data;
mod find;
mod mutate;
mod relation;

pub use data::TableData;
pub use find::TableView;

use crate::error::{Result, TdbError};
use crate::schema::{compile_schema, SchemaDefinition, TableSchema, ID_FIELD};
use crate::validation::coerce_field;
use crate::value::{row_to_json, Row, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A row as it travels on the wire or sits in a snapshot
pub type RawRow = serde_json::Map<String, serde_json::Value>;
/// Row id to raw row
pub type RawTable = BTreeMap<i64, RawRow>;
/// Table name to raw rows: the flush/load structure of one database
pub type RawDataset = BTreeMap<String, RawTable>;

pub(crate) type SharedTable = Arc<RwLock<TableData>>;

/// One client session: the compiled tables plus handles to the live rows
/// of the database they belong to.
pub struct Schema {
    database: String,
    tables: BTreeMap<String, Arc<TableSchema>>,
    data: BTreeMap<String, SharedTable>,
}

impl Schema {
    /// Build a session over a fresh dataset that no other session sees
    pub fn new(database: &str, definition: &SchemaDefinition) -> Result<Self> {
        let tables = compile_schema(definition)?;
        let data = tables
            .values()
            .map(|table| {
                let mut rows = TableData::new();
                ensure_indexes(table, &mut rows);
                (table.name().to_string(), Arc::new(RwLock::new(rows)))
            })
            .collect();
        Ok(Schema {
            database: database.to_string(),
            tables,
            data,
        })
    }

    pub(crate) fn from_parts(
        database: &str,
        tables: BTreeMap<String, Arc<TableSchema>>,
        data: BTreeMap<String, SharedTable>,
    ) -> Self {
        Schema {
            database: database.to_string(),
            tables,
            data,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn table(&self, name: &str) -> Result<&TableSchema> {
        self.tables
            .get(name)
            .map(|t| t.as_ref())
            .ok_or_else(|| TdbError::UnknownTable(name.to_string()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values().map(|t| t.as_ref())
    }

    fn handle(&self, name: &str) -> Result<(&TableSchema, &RwLock<TableData>)> {
        let schema = self.table(name)?;
        let data = self
            .data
            .get(name)
            .ok_or_else(|| TdbError::UnknownTable(name.to_string()))?;
        Ok((schema, data.as_ref()))
    }

    /// Shared access to one table's rows
    pub fn read(&self, table: &str) -> Result<TableReader<'_>> {
        let (schema, lock) = self.handle(table)?;
        Ok(TableReader {
            schema,
            data: read_lock(lock),
        })
    }

    /// Exclusive access to one table's rows, with its relation targets readable
    pub fn write(&self, table: &str) -> Result<TableWriter<'_>> {
        let schema = self.table(table)?;
        let mut names: BTreeSet<&str> = schema.relation_targets();
        names.insert(schema.name());

        let mut own = None;
        let mut related = BTreeMap::new();
        for name in names {
            let (target, lock) = self.handle(name)?;
            if name == schema.name() {
                own = Some(write_lock(lock));
            } else {
                related.insert(
                    name,
                    Related {
                        schema: target,
                        data: read_lock(lock),
                    },
                );
            }
        }

        let data = own.ok_or_else(|| TdbError::UnknownTable(table.to_string()))?;
        Ok(TableWriter {
            schema,
            data,
            related,
        })
    }

    /// Every table's rows in flush form. All tables are read-locked together,
    /// so the result never contains half of a write.
    pub fn dump(&self) -> RawDataset {
        let guards: Vec<(&String, RwLockReadGuard<'_, TableData>)> = self
            .data
            .iter()
            .map(|(name, lock)| (name, read_lock(lock)))
            .collect();
        guards
            .iter()
            .map(|(name, data)| ((*name).clone(), dump_rows(data)))
            .collect()
    }

    /// Replace the rows of every table present in `dataset`.
    /// Tables this schema does not declare are skipped.
    pub fn load(&self, dataset: RawDataset) -> Result<()> {
        for (name, raw) in dataset {
            let Ok((schema, lock)) = self.handle(&name) else {
                log::warn!("Skipping unknown table {name} while loading {}", self.database);
                continue;
            };
            let rows = rows_from_raw(schema, &raw)?;
            log::debug!("Loaded {} rows into {}.{name}", rows.len(), self.database);
            write_lock(lock).replace_all(rows);
        }
        Ok(())
    }
}

/// Read-only handle on one table
pub struct TableReader<'a> {
    schema: &'a TableSchema,
    data: RwLockReadGuard<'a, TableData>,
}

impl<'a> TableReader<'a> {
    pub fn schema(&self) -> &TableSchema {
        self.schema
    }

    pub fn view(&self) -> TableView<'_> {
        TableView::new(self.schema, &self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Write handle on one table; see [`Schema::write`]
pub struct TableWriter<'a> {
    schema: &'a TableSchema,
    data: RwLockWriteGuard<'a, TableData>,
    related: BTreeMap<&'a str, Related<'a>>,
}

struct Related<'a> {
    schema: &'a TableSchema,
    data: RwLockReadGuard<'a, TableData>,
}

impl<'a> TableWriter<'a> {
    pub fn schema(&self) -> &TableSchema {
        self.schema
    }

    pub fn view(&self) -> TableView<'_> {
        TableView::new(self.schema, &self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub(crate) fn read_lock(lock: &RwLock<TableData>) -> RwLockReadGuard<'_, TableData> {
    // writers stage every change before touching the rows, so a panic
    // cannot leave a half-applied write behind
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock(lock: &RwLock<TableData>) -> RwLockWriteGuard<'_, TableData> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn ensure_indexes(schema: &TableSchema, data: &mut TableData) {
    for index in schema.indexes() {
        data.ensure_index(index);
    }
}

pub(crate) fn dump_rows(data: &TableData) -> RawTable {
    data.raw_rows()
        .iter()
        .map(|(id, row)| (*id, row_to_json(row)))
        .collect()
}

/// Coerce stored rows back into typed rows. Defaults and required-ness are
/// not applied; the map key is authoritative for the row id.
pub(crate) fn rows_from_raw(schema: &TableSchema, raw: &RawTable) -> Result<Vec<Row>> {
    raw.iter()
        .map(|(id, raw_row)| {
            let mut row = Row::new();
            for field in schema.fields() {
                if let Some(value) = raw_row.get(&field.name).filter(|v| !v.is_null()) {
                    row.insert(field.name.clone(), coerce_field(field, value)?);
                }
            }
            row.insert(ID_FIELD.to_string(), Value::Int(*id));
            Ok(row)
        })
        .collect()
}
