use super::data::TableData;
use crate::error::{Result, TdbError};
use crate::schema::{Field, TableSchema};
use crate::value::Value;

/// Confirm that a relation field's value exists in its target table.
///
/// Vector relation fields require every nested element to resolve. A
/// target that is itself a vector field matches on membership. Several
/// matching rows are fine: a relation only needs the value to exist.
pub(crate) fn check_relation(
    field: &Field,
    value: &Value,
    target: &TableSchema,
    target_data: &TableData,
) -> Result<()> {
    let Some(relation) = &field.relation else {
        return Ok(());
    };
    let target_field = target.field(&relation.field).ok_or_else(|| TdbError::UnknownField {
        table: relation.table.clone(),
        field: relation.field.clone(),
    })?;

    let candidates = if field.is_vector() {
        value.leaves()
    } else {
        vec![value]
    };

    for candidate in candidates {
        let found = if target_field.is_vector() {
            target_data.rows().any(|row| {
                row.get(&relation.field)
                    .is_some_and(|stored| stored.leaves().contains(&candidate))
            })
        } else {
            !target_data.ids_matching(&relation.field, candidate).is_empty()
        };

        if !found {
            return Err(TdbError::DanglingRelation {
                field: field.name.clone(),
                target_table: relation.table.clone(),
                target_field: relation.field.clone(),
                value: candidate.to_string(),
            });
        }
    }
    Ok(())
}
