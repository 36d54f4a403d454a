use super::relation::check_relation;
use super::{RawRow, TableWriter};
use crate::error::{Result, TdbError};
use crate::query::WhereClause;
use crate::schema::{Field, FieldType, ID_FIELD};
use crate::validation::{coerce_element, coerce_field, mismatch, validate};
use crate::value::{row_id, Row, Value};

impl<'a> TableWriter<'a> {
    pub fn find_unique(&self, where_clause: &WhereClause) -> Result<Option<Row>> {
        self.view().find_unique(where_clause)
    }

    pub fn find(&self, where_clause: &WhereClause, allow_empty_where: bool) -> Result<Vec<Row>> {
        self.view().find(where_clause, allow_empty_where)
    }

    /// Validate `input` against every field and insert the resulting row.
    ///
    /// Nothing is inserted unless every field validates, every relation
    /// resolves and no index value is taken. Rows without an id get the
    /// next value of the table's counter.
    pub fn create(&mut self, input: &RawRow) -> Result<Row> {
        let mut row = Row::new();
        for field in self.schema.fields() {
            let Some(value) = validate(field, input.get(&field.name), true)? else {
                continue;
            };
            self.check_relation(field, &value)?;
            row.insert(field.name.clone(), value);
        }

        if row_id(&row).is_none() {
            let id = self.data.next_id().ok_or_else(|| TdbError::IdsExhausted {
                table: self.schema.name().to_string(),
            })?;
            row.insert(ID_FIELD.to_string(), Value::Int(id));
        }
        self.check_unique(&row, None)?;

        log::debug!("Created row {:?} in table {}", row_id(&row), self.schema.name());
        self.data.insert(row.clone());
        Ok(row)
    }

    /// Create every input or none of them
    pub fn create_many(&mut self, inputs: &[RawRow]) -> Result<Vec<Row>> {
        let mut created = Vec::with_capacity(inputs.len());
        for input in inputs {
            match self.create(input) {
                Ok(row) => created.push(row),
                Err(e) => {
                    for row in &created {
                        if let Some(id) = row_id(row) {
                            self.data.remove(id);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(created)
    }

    /// Apply a patch to the row with `id`. Returns `Ok(None)` when there is no such row.
    ///
    /// Every patch field is validated into a staged copy first; the stored
    /// row only changes when all of them pass. Unknown fields are ignored.
    /// Object values are nested operations: `push` on vectors,
    /// `increment`/`decrement` on numbers.
    pub fn update(&mut self, id: i64, patch: &RawRow) -> Result<Option<Row>> {
        let Some(current) = self.data.get(id).cloned() else {
            return Ok(None);
        };
        let staged = self.stage_update(&current, patch)?;
        let new_id = row_id(&staged).ok_or_else(|| TdbError::MissingRequiredField {
            table: self.schema.name().to_string(),
            field: ID_FIELD.to_string(),
        })?;
        self.check_unique(&staged, Some(id))?;

        if new_id != id {
            self.data.remove(id);
        }
        log::debug!("Updated row {id} in table {}", self.schema.name());
        self.data.insert(staged.clone());
        Ok(Some(staged))
    }

    /// Apply the same patch to every listed row, or to none of them
    pub fn update_many(&mut self, ids: &[i64], patch: &RawRow) -> Result<Vec<Row>> {
        let mut applied: Vec<(Row, i64)> = Vec::new();
        let mut updated = Vec::new();
        for &id in ids {
            let Some(original) = self.data.get(id).cloned() else {
                continue;
            };
            match self.update(id, patch) {
                Ok(Some(row)) => {
                    applied.push((original, row_id(&row).unwrap_or(id)));
                    updated.push(row);
                }
                Ok(None) => {}
                Err(e) => {
                    for (original, new_id) in applied.into_iter().rev() {
                        self.data.remove(new_id);
                        self.data.insert(original);
                    }
                    return Err(e);
                }
            }
        }
        Ok(updated)
    }

    /// Remove a row. Deleting an absent id is a no-op; nothing cascades.
    pub fn delete(&mut self, id: i64) -> Option<Row> {
        let removed = self.data.remove(id);
        if removed.is_some() {
            log::debug!("Deleted row {id} in table {}", self.schema.name());
        }
        removed
    }

    fn stage_update(&self, current: &Row, patch: &RawRow) -> Result<Row> {
        let mut staged = current.clone();
        for (name, raw) in patch {
            let Some(field) = self.schema.field(name) else {
                continue;
            };
            let next = match raw {
                serde_json::Value::Object(ops) => {
                    match self.apply_ops(field, current.get(name), ops)? {
                        Some(value) => Some(value),
                        // no recognised operation: leave the field as it is
                        None => continue,
                    }
                }
                serde_json::Value::Null if field.required || name == ID_FIELD => {
                    return Err(TdbError::MissingRequiredField {
                        table: self.schema.name().to_string(),
                        field: name.clone(),
                    });
                }
                serde_json::Value::Null => None,
                raw => validate(field, Some(raw), false)?,
            };

            match next {
                Some(value) => {
                    self.check_relation(field, &value)?;
                    staged.insert(name.clone(), value);
                }
                None => {
                    staged.remove(name);
                }
            }
        }
        Ok(staged)
    }

    /// Apply nested operations to a stored value. `Ok(None)` when none of
    /// the keys is an operation the field supports.
    fn apply_ops(
        &self,
        field: &Field,
        stored: Option<&Value>,
        ops: &RawRow,
    ) -> Result<Option<Value>> {
        if field.is_vector() {
            let Some(operand) = ops.get("push") else {
                return Ok(None);
            };
            let mut items = match stored {
                Some(Value::Vector(items)) => items.clone(),
                _ => Vec::new(),
            };
            let elements = operand
                .as_array()
                .ok_or_else(|| mismatch(field, "array of elements to push", operand))?;
            for element in elements {
                items.push(coerce_element(field, element)?);
            }
            return Ok(Some(Value::Vector(items)));
        }

        let deltas: Vec<(&str, &serde_json::Value)> = ops
            .iter()
            .filter(|(op, _)| *op == "increment" || *op == "decrement")
            .map(|(op, operand)| (op.as_str(), operand))
            .collect();

        match field.field_type {
            FieldType::Int | FieldType::Float if deltas.is_empty() => Ok(None),
            FieldType::Int => {
                let mut acc = stored.and_then(Value::as_int).unwrap_or(0);
                for (op, operand) in deltas {
                    let Value::Int(delta) = coerce_field(field, operand)? else {
                        continue;
                    };
                    let next = if op == "increment" {
                        acc.checked_add(delta)
                    } else {
                        acc.checked_sub(delta)
                    };
                    acc = next.ok_or_else(|| out_of_range(field))?;
                }
                Ok(Some(Value::Int(acc)))
            }
            FieldType::Float => {
                let mut acc = match stored {
                    Some(Value::Float(f)) => *f,
                    _ => 0.0,
                };
                for (op, operand) in deltas {
                    let Value::Float(delta) = coerce_field(field, operand)? else {
                        continue;
                    };
                    acc = if op == "increment" { acc + delta } else { acc - delta };
                    if !acc.is_finite() {
                        return Err(out_of_range(field));
                    }
                }
                Ok(Some(Value::Float(acc)))
            }
            other => Err(TdbError::TypeMismatch {
                field: field.name.clone(),
                expected: other.to_string(),
                got: "object".to_string(),
            }),
        }
    }

    fn check_relation(&self, field: &Field, value: &Value) -> Result<()> {
        let Some(relation) = &field.relation else {
            return Ok(());
        };
        if relation.table == self.schema.name() {
            return check_relation(field, value, self.schema, &self.data);
        }
        let target = self
            .related
            .get(relation.table.as_str())
            .ok_or_else(|| TdbError::UnknownTable(relation.table.clone()))?;
        check_relation(field, value, target.schema, &target.data)
    }

    fn check_unique(&self, row: &Row, exclude: Option<i64>) -> Result<()> {
        for name in self.schema.indexes() {
            let Some(value) = row.get(name) else {
                continue;
            };
            let taken = self
                .data
                .ids_matching(name, value)
                .into_iter()
                .any(|id| Some(id) != exclude);
            if taken {
                return Err(TdbError::DuplicateUniqueValue {
                    table: self.schema.name().to_string(),
                    field: name.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn out_of_range(field: &Field) -> TdbError {
    TdbError::TypeMismatch {
        field: field.name.clone(),
        expected: format!("{} within range", field.field_type),
        got: "overflow".to_string(),
    }
}
