use crate::value::{row_id, IndexKey, Row, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// The rows of one table, keyed by id, plus an equality index per index field.
///
/// Indexes map a value to the ids holding it. They are sets rather than
/// single ids so the structure stays correct even if a session with a
/// looser schema writes duplicates.
#[derive(Debug, Default)]
pub struct TableData {
    rows: BTreeMap<i64, Row>,
    last_id: i64,
    indexes: HashMap<String, HashMap<IndexKey, BTreeSet<i64>>>,
}

impl TableData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&Row> {
        self.rows.get(&id)
    }

    /// Rows in ascending id order
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub(crate) fn raw_rows(&self) -> &BTreeMap<i64, Row> {
        &self.rows
    }

    /// The id the next generated row would receive; `None` once the counter reaches `i64::MAX`
    pub fn next_id(&self) -> Option<i64> {
        self.last_id.checked_add(1)
    }

    /// Start maintaining an index on `field`, building it from the current rows
    pub fn ensure_index(&mut self, field: &str) {
        if self.indexes.contains_key(field) {
            return;
        }
        let mut index: HashMap<IndexKey, BTreeSet<i64>> = HashMap::new();
        for (id, row) in &self.rows {
            if let Some(value) = row.get(field) {
                index.entry(value.index_key()).or_default().insert(*id);
            }
        }
        self.indexes.insert(field.to_string(), index);
    }

    pub fn has_index(&self, field: &str) -> bool {
        self.indexes.contains_key(field)
    }

    /// Ids of the rows whose `field` equals `value`, ascending.
    /// Uses the index when one exists, otherwise scans.
    pub fn ids_matching(&self, field: &str, value: &Value) -> Vec<i64> {
        match self.indexes.get(field) {
            Some(index) => index
                .get(&value.index_key())
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
            None => self
                .rows
                .iter()
                .filter(|(_, row)| row.get(field) == Some(value))
                .map(|(id, _)| *id)
                .collect(),
        }
    }

    /// Insert a row under its id, replacing any row already there.
    /// Rows without an integer id are ignored and returned as-is.
    pub fn insert(&mut self, row: Row) -> Option<Row> {
        let Some(id) = row_id(&row) else {
            return Some(row);
        };
        let previous = self.remove(id);
        self.last_id = self.last_id.max(id);
        for (field, index) in self.indexes.iter_mut() {
            if let Some(value) = row.get(field) {
                index.entry(value.index_key()).or_default().insert(id);
            }
        }
        self.rows.insert(id, row);
        previous
    }

    /// Remove a row by id. Removing an absent id is a no-op.
    pub fn remove(&mut self, id: i64) -> Option<Row> {
        let row = self.rows.remove(&id)?;
        for (field, index) in self.indexes.iter_mut() {
            if let Some(value) = row.get(field) {
                let key = value.index_key();
                if let Some(ids) = index.get_mut(&key) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        index.remove(&key);
                    }
                }
            }
        }
        Some(row)
    }

    /// Replace every row at once, keeping the maintained index set
    pub fn replace_all(&mut self, rows: impl IntoIterator<Item = Row>) {
        let fields: Vec<String> = self.indexes.keys().cloned().collect();
        self.rows.clear();
        self.indexes.clear();
        self.last_id = 0;
        for row in rows {
            if let Some(id) = row_id(&row) {
                self.last_id = self.last_id.max(id);
                self.rows.insert(id, row);
            }
        }
        for field in fields {
            self.ensure_index(&field);
        }
    }
}
