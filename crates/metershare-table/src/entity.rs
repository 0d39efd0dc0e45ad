//! Table entity wire mapping
//!
//! Converts [`UsageAggregateRow`]s to and from the JSON entity shape the
//! table service speaks. 64-bit counters travel as strings with an
//! `@odata.type` annotation of `Edm.Int64`; timestamps as ISO 8601 with
//! `Edm.DateTime`. Optional fields are simply absent on the wire.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Map, Value};

use metershare_core::domain::aggregate::{UsageAggregateRow, UserKeyType};
use metershare_core::ports::table_store::StoreError;

/// Serializes a row into the entity JSON for an insert-or-merge request
#[must_use]
pub fn entity_from_row(row: &UsageAggregateRow) -> Value {
    let mut entity = json!({
        "PartitionKey": row.partition_key,
        "RowKey": row.row_key,
        "SchemaVersion": i64::from(row.schema_version),
        "DatasetId": row.dataset_id,
        "Day": row.day.format("%Y-%m-%d").to_string(),
        "Model": row.model,
        "WorkspaceId": row.workspace_id,
        "MachineId": row.machine_id,
        "InputTokens": row.input_tokens.to_string(),
        "InputTokens@odata.type": "Edm.Int64",
        "OutputTokens": row.output_tokens.to_string(),
        "OutputTokens@odata.type": "Edm.Int64",
        "Interactions": row.interactions.to_string(),
        "Interactions@odata.type": "Edm.Int64",
        "UpdatedAt": row.updated_at.to_rfc3339(),
        "UpdatedAt@odata.type": "Edm.DateTime",
    });

    let map = entity.as_object_mut().expect("entity is an object");
    if let Some(name) = &row.workspace_name {
        map.insert("WorkspaceName".to_string(), Value::String(name.clone()));
    }
    if let Some(name) = &row.machine_name {
        map.insert("MachineName".to_string(), Value::String(name.clone()));
    }
    if let Some(user_id) = &row.user_id {
        map.insert("UserId".to_string(), Value::String(user_id.clone()));
    }
    if let Some(key_type) = row.user_key_type {
        map.insert(
            "UserKeyType".to_string(),
            Value::String(key_type.as_str().to_string()),
        );
    }
    if let Some(share) = row.share_with_team {
        map.insert("ShareWithTeam".to_string(), Value::Bool(share));
    }
    if let Some(consent) = row.consent_at {
        map.insert("ConsentAt".to_string(), Value::String(consent.to_rfc3339()));
        map.insert(
            "ConsentAt@odata.type".to_string(),
            Value::String("Edm.DateTime".to_string()),
        );
    }

    entity
}

/// Parses a service entity back into a row
pub fn row_from_entity(entity: &Map<String, Value>) -> Result<UsageAggregateRow, StoreError> {
    Ok(UsageAggregateRow {
        partition_key: required_str(entity, "PartitionKey")?,
        row_key: required_str(entity, "RowKey")?,
        schema_version: required_u64(entity, "SchemaVersion")? as u8,
        dataset_id: required_str(entity, "DatasetId")?,
        day: parse_day(&required_str(entity, "Day")?)?,
        model: required_str(entity, "Model")?,
        workspace_id: required_str(entity, "WorkspaceId")?,
        workspace_name: optional_str(entity, "WorkspaceName"),
        machine_id: required_str(entity, "MachineId")?,
        machine_name: optional_str(entity, "MachineName"),
        user_id: optional_str(entity, "UserId"),
        user_key_type: optional_str(entity, "UserKeyType")
            .as_deref()
            .and_then(UserKeyType::parse),
        input_tokens: required_u64(entity, "InputTokens")?,
        output_tokens: required_u64(entity, "OutputTokens")?,
        interactions: required_u64(entity, "Interactions")?,
        share_with_team: entity.get("ShareWithTeam").and_then(Value::as_bool),
        consent_at: optional_datetime(entity, "ConsentAt"),
        updated_at: optional_datetime(entity, "UpdatedAt").unwrap_or_default(),
    })
}

fn required_str(entity: &Map<String, Value>, field: &str) -> Result<String, StoreError> {
    entity
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Malformed(format!("entity missing field {field}")))
}

fn optional_str(entity: &Map<String, Value>, field: &str) -> Option<String> {
    entity.get(field).and_then(Value::as_str).map(str::to_string)
}

/// Int64 properties arrive as annotated strings; Int32 as bare numbers.
fn required_u64(entity: &Map<String, Value>, field: &str) -> Result<u64, StoreError> {
    let value = entity
        .get(field)
        .ok_or_else(|| StoreError::Malformed(format!("entity missing field {field}")))?;
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| StoreError::Malformed(format!("field {field} is not a count"))),
        Value::String(s) => s
            .parse::<u64>()
            .map_err(|_| StoreError::Malformed(format!("field {field} is not a count"))),
        _ => Err(StoreError::Malformed(format!(
            "field {field} has an unexpected type"
        ))),
    }
}

fn optional_datetime(entity: &Map<String, Value>, field: &str) -> Option<DateTime<Utc>> {
    entity
        .get(field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_day(value: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| StoreError::Malformed(format!("invalid Day value {value:?}")))
}
