use crate::engine::{
    dump_rows, ensure_indexes, read_lock, rows_from_raw, write_lock, RawDataset, Schema,
    SharedTable, TableData,
};
use crate::error::{Result, TdbError};
use crate::schema::{compile_schema, SchemaDefinition};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Every database's rows, as written to and read from the snapshot file
pub type Snapshot = BTreeMap<String, RawDataset>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// Snapshot file; `None` keeps everything in memory
    pub snapshot_path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        StoreConfig { snapshot_path: None }
    }

    pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            snapshot_path: Some(path.into()),
        }
    }
}

/// Rows of one database. Tables loaded from a snapshot stay raw in
/// `pending` until a session declares them.
#[derive(Default)]
struct Database {
    tables: BTreeMap<String, SharedTable>,
    pending: RawDataset,
}

/// The process-wide set of databases, keyed by name.
/// Sessions opened on the same database name share its rows.
pub struct Store {
    config: StoreConfig,
    databases: Mutex<BTreeMap<String, Database>>,
}

impl Store {
    /// Open a store, loading the snapshot file when one is configured and exists.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let snapshot = match &config.snapshot_path {
            Some(path) if path.exists() => read_snapshot(path)?,
            _ => Snapshot::new(),
        };

        let databases = snapshot
            .into_iter()
            .map(|(name, pending)| {
                let database = Database {
                    tables: BTreeMap::new(),
                    pending,
                };
                (name, database)
            })
            .collect();

        Ok(Store {
            config,
            databases: Mutex::new(databases),
        })
    }

    /// Names of every database the store knows about
    pub fn databases(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Open a session on `database` with the tables in `definition`.
    ///
    /// Tables already live in the database are shared with the new session;
    /// tables present only in the snapshot are validated and loaded now.
    /// Every session of one database is expected to declare compatible tables.
    pub fn session(&self, database: &str, definition: &SchemaDefinition) -> Result<Schema> {
        let tables = compile_schema(definition)?;
        let mut databases = self.lock();
        let db = databases.entry(database.to_string()).or_default();

        let mut data = BTreeMap::new();
        for (name, table) in &tables {
            let shared = match db.tables.get(name) {
                Some(shared) => shared.clone(),
                None => {
                    let mut rows = TableData::new();
                    if let Some(raw) = db.pending.get(name) {
                        rows.replace_all(rows_from_raw(table, raw)?);
                        log::info!("Loaded {} rows into {database}.{name}", rows.len());
                    }
                    db.pending.remove(name);
                    let shared: SharedTable = Arc::new(RwLock::new(rows));
                    db.tables.insert(name.clone(), shared.clone());
                    shared
                }
            };
            ensure_indexes(table, &mut write_lock(&shared));
            data.insert(name.clone(), shared);
        }

        log::debug!("Opened session on {database} with {} tables", tables.len());
        Ok(Schema::from_parts(database, tables, data))
    }

    /// Every database's rows in snapshot form, including tables no session
    /// has claimed yet.
    pub fn snapshot(&self) -> Snapshot {
        let databases = self.lock();
        databases
            .iter()
            .map(|(name, db)| {
                let mut dataset = db.pending.clone();
                // all tables of a database are held together so the
                // dataset never shows half of a cross-table write
                let guards: Vec<_> = db
                    .tables
                    .iter()
                    .map(|(table, lock)| (table, read_lock(lock)))
                    .collect();
                for (table, rows) in &guards {
                    dataset.insert((*table).clone(), dump_rows(rows));
                }
                (name.clone(), dataset)
            })
            .collect()
    }

    /// Write the snapshot file. A no-op for in-memory stores.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.config.snapshot_path else {
            return Ok(());
        };
        let snapshot = self.snapshot();
        write_snapshot(path, &snapshot)?;
        log::info!(
            "Wrote {} databases to {}",
            snapshot.len(),
            path.display()
        );
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Database>> {
        self.databases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        log::warn!("read empty db file {}", path.display());
        return Ok(Snapshot::new());
    }
    let snapshot: Snapshot = serde_json::from_str(&content)?;
    log::info!(
        "Loaded {} databases from {}",
        snapshot.len(),
        path.display()
    );
    Ok(snapshot)
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut file, snapshot)?;
    file.flush()?;
    file.persist(path).map_err(|e| TdbError::Io(e.error))?;
    Ok(())
}
