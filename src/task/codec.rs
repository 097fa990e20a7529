//! Codec
//!
//! A task is stored as a flat hash. Every field value is JSON-encoded, and
//! absent optional values are written as `null` so that a field-merging
//! `HSET` always replaces whatever the previous version of the record held.

use crate::task::Task;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

const ID: &str = "id";
const TYPE: &str = "type";
const PRIORITY: &str = "priority";
const STATUS: &str = "status";
const DEPENDENCIES: &str = "dependencies";
const METADATA: &str = "metadata";
const PAYLOAD: &str = "payload";
const RESULT: &str = "result";
const CREATED_AT: &str = "createdAt";
const UPDATED_AT: &str = "updatedAt";
const STARTED_AT: &str = "startedAt";
const COMPLETED_AT: &str = "completedAt";

/// Encode a task into the string map written to the store
pub fn encode_task(task: &Task) -> crate::Result<HashMap<String, String>> {
    let mut fields = HashMap::with_capacity(12);
    put(&mut fields, ID, &task.id)?;
    put(&mut fields, TYPE, &task.task_type)?;
    put(&mut fields, PRIORITY, &task.priority)?;
    put(&mut fields, STATUS, &task.status)?;
    put(&mut fields, DEPENDENCIES, &task.dependencies)?;
    put(&mut fields, METADATA, &task.metadata)?;
    put(&mut fields, PAYLOAD, &task.payload)?;
    put(&mut fields, RESULT, &task.result)?;
    put(&mut fields, CREATED_AT, &task.created_at)?;
    put(&mut fields, UPDATED_AT, &task.updated_at)?;
    put(&mut fields, STARTED_AT, &task.started_at)?;
    put(&mut fields, COMPLETED_AT, &task.completed_at)?;
    Ok(fields)
}

/// Decode a task from the string map read from the store.
///
/// Callers treat an empty map as "no such task" before calling this.
pub fn decode_task(fields: &HashMap<String, String>) -> crate::Result<Task> {
    Ok(Task {
        id: take(fields, ID)?,
        task_type: take(fields, TYPE)?,
        priority: take(fields, PRIORITY)?,
        status: take(fields, STATUS)?,
        dependencies: take_or_default(fields, DEPENDENCIES)?,
        metadata: take_or_default(fields, METADATA)?,
        payload: take_or_default(fields, PAYLOAD)?,
        result: take_or_default(fields, RESULT)?,
        created_at: take(fields, CREATED_AT)?,
        updated_at: take(fields, UPDATED_AT)?,
        started_at: take_or_default(fields, STARTED_AT)?,
        completed_at: take_or_default(fields, COMPLETED_AT)?,
    })
}

fn put<T: Serialize + ?Sized>(
    fields: &mut HashMap<String, String>,
    name: &str,
    value: &T,
) -> crate::Result<()> {
    fields.insert(name.to_string(), serde_json::to_string(value)?);
    Ok(())
}

fn take<T: DeserializeOwned>(fields: &HashMap<String, String>, name: &str) -> crate::Result<T> {
    let raw = fields
        .get(name)
        .ok_or_else(|| crate::TaskQueueError::CodecError(format!("missing field: {}", name)))?;
    parse(name, raw)
}

fn take_or_default<T: DeserializeOwned + Default>(
    fields: &HashMap<String, String>,
    name: &str,
) -> crate::Result<T> {
    match fields.get(name) {
        Some(raw) => parse(name, raw),
        None => Ok(T::default()),
    }
}

fn parse<T: DeserializeOwned>(name: &str, raw: &str) -> crate::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        crate::TaskQueueError::CodecError(format!("invalid field {}: {}", name, e))
    })
}
