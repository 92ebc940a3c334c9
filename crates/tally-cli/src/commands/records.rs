use serde_json::Value;
use tally_core::{LocalStore, OutboxOperation, Record};

use crate::commands::common::{
    format_record_lines, normalize_record_id, parse_collection, parse_payload, parse_setting_value,
    record_to_list_item, RecordListItem,
};
use crate::error::CliError;

/// Insert or update a record depending on whether it already exists.
pub async fn run_put(store: &LocalStore, collection: &str, raw_json: &str) -> Result<(), CliError> {
    let collection = parse_collection(collection)?;
    let payload = parse_payload(raw_json)?;

    let existing = match payload.get("id").and_then(Value::as_str) {
        Some(id) if !id.trim().is_empty() => store.get(collection, id.trim()).await?,
        _ => None,
    };
    let operation = if existing.is_some() {
        OutboxOperation::Update
    } else {
        OutboxOperation::Insert
    };

    let entry = store.record_change(collection, operation, payload).await?;
    println!("Queued {operation} on {collection} ({entry})");
    Ok(())
}

pub async fn run_delete(store: &LocalStore, collection: &str, id: &str) -> Result<(), CliError> {
    let collection = parse_collection(collection)?;
    let id = normalize_record_id(id)?;
    if store.get(collection, &id).await?.is_none() {
        return Err(CliError::RecordNotFound(format!("{collection}/{id}")));
    }

    let entry = store
        .record_change(
            collection,
            OutboxOperation::Delete,
            serde_json::json!({ "id": id }),
        )
        .await?;
    println!("Deleted {collection}/{id} ({entry})");
    Ok(())
}

pub async fn run_get(store: &LocalStore, collection: &str, id: &str) -> Result<(), CliError> {
    let record = fetch_record(store, collection, id).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub async fn fetch_record(
    store: &LocalStore,
    collection: &str,
    id: &str,
) -> Result<Record, CliError> {
    let collection = parse_collection(collection)?;
    let id = normalize_record_id(id)?;
    store
        .get(collection, &id)
        .await?
        .ok_or_else(|| CliError::RecordNotFound(format!("{collection}/{id}")))
}

pub async fn run_list(store: &LocalStore, collection: &str, as_json: bool) -> Result<(), CliError> {
    let collection = parse_collection(collection)?;
    let records = store.get_all(collection).await?;

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No {collection} records stored locally.");
        return Ok(());
    }
    for line in format_record_lines(&records) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_read(store: &LocalStore, id: &str) -> Result<(), CliError> {
    let id = normalize_record_id(id)?;
    store.mark_notification_read(&id).await?;
    println!("Marked notification {id} as read");
    Ok(())
}

pub async fn run_set(store: &LocalStore, key: &str, raw_value: &str) -> Result<(), CliError> {
    let value = parse_setting_value(raw_value);
    store.update_setting(key, value.clone()).await?;
    println!("Set {} = {value}", key.trim());
    Ok(())
}
