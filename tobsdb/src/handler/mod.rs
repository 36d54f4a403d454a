//! Request dispatch: decodes `{action, table, data, where}` messages, runs
//! them against a session's [`Schema`] and shapes the `{status, message, data}`
//! response.

use crate::engine::{RawRow, Schema};
use crate::error::{Result, TdbError};
use crate::query::WhereClause;
use crate::value::{row_id, row_to_json, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Create,
    CreateMany,
    FindUnique,
    FindMany,
    DeleteUnique,
    DeleteMany,
    UpdateUnique,
    UpdateMany,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Create => "create",
            Action::CreateMany => "createMany",
            Action::FindUnique => "findUnique",
            Action::FindMany => "findMany",
            Action::DeleteUnique => "deleteUnique",
            Action::DeleteMany => "deleteMany",
            Action::UpdateUnique => "updateUnique",
            Action::UpdateMany => "updateMany",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub action: Action,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Json>,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<WhereClause>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub message: String,
    pub data: Json,
}

impl Response {
    pub fn new(status: u16, message: impl Into<String>, data: Json) -> Self {
        Response {
            status,
            message: message.into(),
            data,
        }
    }

    fn not_found(table: &str) -> Self {
        Response::new(404, format!("No row found in table {table}"), Json::Null)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl From<TdbError> for Response {
    fn from(e: TdbError) -> Self {
        let status = match &e {
            TdbError::UnknownTable(_) => 404,
            TdbError::DuplicateUniqueValue { .. } => 409,
            e if !e.is_request_error() => {
                log::error!("Internal error: {e}");
                500
            }
            _ => 400,
        };
        Response::new(status, e.to_string(), Json::Null)
    }
}

/// Decode one raw message and run it. Undecodable messages get a 400.
pub fn handle_message(schema: &Schema, message: &str) -> Response {
    match serde_json::from_str::<Request>(message) {
        Ok(request) => handle(schema, &request),
        Err(e) => Response::from(TdbError::InvalidRequest(e.to_string())),
    }
}

/// Run one request against `schema`. Engine errors never escape; they
/// become the response.
pub fn handle(schema: &Schema, request: &Request) -> Response {
    log::debug!(
        "{}: {} on {}",
        schema.database(),
        request.action,
        request.table
    );
    dispatch(schema, request).unwrap_or_else(Response::from)
}

fn dispatch(schema: &Schema, request: &Request) -> Result<Response> {
    let table = request.table.as_str();
    let empty = WhereClause::new();
    let where_clause = request.where_clause.as_ref().unwrap_or(&empty);

    let response = match request.action {
        Action::Create => {
            let input = data_object(request)?;
            let row = schema.write(table)?.create(input)?;
            Response::new(201, format!("Created new row in table {table}"), row_json(&row))
        }
        Action::CreateMany => {
            let inputs = data_objects(request)?;
            let rows = schema.write(table)?.create_many(&inputs)?;
            Response::new(
                201,
                format!("Created {} new rows in table {table}", rows.len()),
                rows_json(&rows),
            )
        }
        Action::FindUnique => match schema.read(table)?.view().find_unique(where_clause)? {
            Some(row) => Response::new(200, format!("Found row in table {table}"), row_json(&row)),
            None => Response::not_found(table),
        },
        Action::FindMany => {
            let rows = schema.read(table)?.view().find(where_clause, true)?;
            Response::new(
                200,
                format!("Found {} rows in table {table}", rows.len()),
                rows_json(&rows),
            )
        }
        Action::UpdateUnique => {
            let patch = data_object(request)?;
            let mut writer = schema.write(table)?;
            let Some(id) = writer.find_unique(where_clause)?.as_ref().and_then(row_id) else {
                return Ok(Response::not_found(table));
            };
            match writer.update(id, patch)? {
                Some(row) => Response::new(
                    200,
                    format!("Updated row with id {id} in table {table}"),
                    row_json(&row),
                ),
                None => Response::not_found(table),
            }
        }
        Action::UpdateMany => {
            let patch = data_object(request)?;
            let mut writer = schema.write(table)?;
            let ids: Vec<i64> = writer
                .find(where_clause, false)?
                .iter()
                .filter_map(row_id)
                .collect();
            let rows = writer.update_many(&ids, patch)?;
            Response::new(
                200,
                format!("Updated {} rows in table {table}", rows.len()),
                rows_json(&rows),
            )
        }
        Action::DeleteUnique => {
            let mut writer = schema.write(table)?;
            let Some(id) = writer.find_unique(where_clause)?.as_ref().and_then(row_id) else {
                return Ok(Response::not_found(table));
            };
            match writer.delete(id) {
                Some(row) => Response::new(
                    200,
                    format!("Deleted row with id {id} in table {table}"),
                    row_json(&row),
                ),
                None => Response::not_found(table),
            }
        }
        Action::DeleteMany => {
            let mut writer = schema.write(table)?;
            let found = writer.find(where_clause, false)?;
            let rows: Vec<Row> = found
                .iter()
                .filter_map(row_id)
                .filter_map(|id| writer.delete(id))
                .collect();
            Response::new(
                200,
                format!("Deleted {} rows in table {table}", rows.len()),
                rows_json(&rows),
            )
        }
    };
    Ok(response)
}

fn data_object(request: &Request) -> Result<&RawRow> {
    match &request.data {
        Some(Json::Object(map)) => Ok(map),
        _ => Err(TdbError::InvalidRequest(format!(
            "{} requires an object in data",
            request.action
        ))),
    }
}

fn data_objects(request: &Request) -> Result<Vec<RawRow>> {
    let Some(Json::Array(items)) = &request.data else {
        return Err(TdbError::InvalidRequest(format!(
            "{} requires an array of objects in data",
            request.action
        )));
    };
    items
        .iter()
        .map(|item| match item {
            Json::Object(map) => Ok(map.clone()),
            other => Err(TdbError::InvalidRequest(format!(
                "expected an object in data, got {other}"
            ))),
        })
        .collect()
}

fn row_json(row: &Row) -> Json {
    Json::Object(row_to_json(row))
}

fn rows_json(rows: &[Row]) -> Json {
    Json::Array(rows.iter().map(row_json).collect())
}
