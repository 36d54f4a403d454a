use super::data::TableData;
use crate::error::{Result, TdbError};
use crate::query::{self, WhereClause};
use crate::schema::{Field, TableSchema};
use crate::validation::coerce_field;
use crate::value::Row;

/// Read-only view over one table's rows, shared by read and write handles
pub struct TableView<'a> {
    schema: &'a TableSchema,
    data: &'a TableData,
}

impl<'a> TableView<'a> {
    pub(crate) fn new(schema: &'a TableSchema, data: &'a TableData) -> Self {
        TableView { schema, data }
    }

    /// Find the single row selected by an index predicate.
    ///
    /// The first index (in table index order) that `where_clause` constrains
    /// by equality drives a direct lookup; any other predicates must hold as
    /// well. No match is `Ok(None)`, not an error.
    pub fn find_unique(&self, where_clause: &WhereClause) -> Result<Option<Row>> {
        if where_clause.is_empty() {
            return Err(TdbError::EmptyWhereClause);
        }
        self.check_fields(where_clause)?;

        let (field, query) = self
            .schema
            .indexes()
            .iter()
            .find_map(|name| {
                let query = where_clause.get(name)?;
                let field = self.schema.field(name)?;
                query::is_lookup(field, query).then_some((field, query))
            })
            .ok_or_else(|| TdbError::NoUsableIndex {
                table: self.schema.name().to_string(),
            })?;

        Ok(self
            .lookup(field, query)
            .into_iter()
            .filter_map(|id| self.data.get(id))
            .find(|row| self.matches(row, where_clause))
            .cloned())
    }

    /// Find every row satisfying all predicates, in ascending id order.
    ///
    /// Index equality predicates narrow the candidate set by lookup first;
    /// the remaining predicates filter what is left.
    pub fn find(&self, where_clause: &WhereClause, allow_empty_where: bool) -> Result<Vec<Row>> {
        if where_clause.is_empty() {
            if allow_empty_where {
                return Ok(self.data.rows().cloned().collect());
            }
            return Err(TdbError::EmptyWhereClause);
        }
        self.check_fields(where_clause)?;

        let mut candidates: Option<Vec<i64>> = None;
        for name in self.schema.indexes() {
            let (Some(query), Some(field)) = (where_clause.get(name), self.schema.field(name))
            else {
                continue;
            };
            if !query::is_lookup(field, query) {
                continue;
            }
            let ids = self.lookup(field, query);
            candidates = Some(match candidates {
                None => ids,
                Some(previous) => previous.into_iter().filter(|id| ids.contains(id)).collect(),
            });
        }

        let rows: Vec<&Row> = match candidates {
            Some(ids) => ids.into_iter().filter_map(|id| self.data.get(id)).collect(),
            None => self.data.rows().collect(),
        };

        Ok(rows
            .into_iter()
            .filter(|row| self.matches(row, where_clause))
            .cloned()
            .collect())
    }

    fn lookup(&self, field: &Field, query: &serde_json::Value) -> Vec<i64> {
        match coerce_field(field, query) {
            Ok(value) => self.data.ids_matching(&field.name, &value),
            Err(_) => Vec::new(),
        }
    }

    fn matches(&self, row: &Row, where_clause: &WhereClause) -> bool {
        where_clause.iter().all(|(name, query)| {
            self.schema
                .field(name)
                .is_some_and(|field| query::compare(field, row.get(name), query))
        })
    }

    fn check_fields(&self, where_clause: &WhereClause) -> Result<()> {
        match where_clause.keys().find(|name| self.schema.field(name).is_none()) {
            Some(name) => Err(TdbError::UnknownField {
                table: self.schema.name().to_string(),
                field: name.clone(),
            }),
            None => Ok(()),
        }
    }
}
