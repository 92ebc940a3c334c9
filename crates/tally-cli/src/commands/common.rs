use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tally_core::sync::{HttpSyncTransport, SyncOrchestrator};
use tally_core::{Collection, LocalStore, OutboxEntry, Record, SyncSettings};

use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub collection: Collection,
    pub synced: bool,
    pub last_modified_locally: i64,
    pub relative_time: String,
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct OutboxListItem {
    pub id: String,
    pub seq: i64,
    pub collection: Collection,
    pub record_id: Option<String>,
    pub operation: String,
    pub retry_count: u32,
    pub enqueued_at: i64,
    pub enqueued_at_iso: String,
}

pub fn parse_collection(value: &str) -> Result<Collection, CliError> {
    Ok(value.parse::<Collection>()?)
}

pub fn parse_payload(raw: &str) -> Result<Value, CliError> {
    let payload: Value = serde_json::from_str(raw.trim())?;
    if payload.is_object() {
        Ok(payload)
    } else {
        Err(CliError::PayloadNotObject)
    }
}

/// Parse a setting value as JSON; bare words become strings.
pub fn parse_setting_value(raw: &str) -> Value {
    serde_json::from_str(raw.trim()).unwrap_or_else(|_| Value::String(raw.trim().to_string()))
}

pub fn normalize_record_id(id: &str) -> Result<String, CliError> {
    let normalized = id.trim();
    if normalized.is_empty() {
        return Err(CliError::EmptyRecordId);
    }
    Ok(normalized.to_string())
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    RecordListItem {
        id: record.id.clone(),
        collection: record.collection,
        synced: record.synced,
        last_modified_locally: record.last_modified_locally,
        relative_time: format_relative_time(
            record.last_modified_locally,
            Utc::now().timestamp_millis(),
        ),
        payload: record.payload.clone(),
    }
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let marker = if record.synced { " " } else { "*" };
            format!(
                "{marker} {:<24}  {:>9}  {}",
                record.id,
                format_relative_time(record.last_modified_locally, now_ms),
                payload_preview(&record.payload, 60)
            )
        })
        .collect()
}

pub fn outbox_to_list_item(entry: &OutboxEntry) -> OutboxListItem {
    OutboxListItem {
        id: entry.id.to_string(),
        seq: entry.seq,
        collection: entry.collection,
        record_id: entry.record_id.clone(),
        operation: entry.operation.to_string(),
        retry_count: entry.retry_count,
        enqueued_at: entry.enqueued_at,
        enqueued_at_iso: format_timestamp(entry.enqueued_at),
    }
}

pub fn format_outbox_lines(entries: &[OutboxEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            format!(
                "{:>5}  {:<6}  {:<14}  {:<24}  retries={}  {}",
                entry.seq,
                entry.operation,
                entry.collection,
                entry.record_id.as_deref().unwrap_or("-"),
                entry.retry_count,
                format_timestamp(entry.enqueued_at)
            )
        })
        .collect()
}

pub fn payload_preview(payload: &Value, max_chars: usize) -> String {
    let rendered = payload.to_string();
    let mut preview: String = rendered.chars().take(max_chars).collect();
    if rendered.chars().count() > max_chars {
        preview.push_str("...");
    }
    preview
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_unix_seconds(timestamp: Option<i64>) -> String {
    timestamp.map_or_else(
        || "never".to_string(),
        |seconds| format_timestamp(seconds.saturating_mul(1_000)),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("TALLY_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("tally").join("tally.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

pub async fn open_store(path: &Path) -> Result<LocalStore, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(LocalStore::open_path(path.to_path_buf()).await?)
}

/// Settings for the selected profile, or defaults when it does not exist.
pub fn profile_settings(profile: Option<&str>) -> Result<SyncSettings, CliError> {
    let config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(profile);
    match config.profile(&profile_name) {
        Some(profile) => profile.sync_settings(),
        None => Ok(SyncSettings::default()),
    }
}

/// Orchestrator talking to the API configured in the selected profile.
pub fn sync_orchestrator(
    store: LocalStore,
    profile: Option<&str>,
) -> Result<SyncOrchestrator, CliError> {
    let config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(profile);
    let profile = config
        .profile(&profile_name)
        .ok_or(CliError::SyncNotConfigured)?;
    let token = profile.access_token().ok_or(CliError::SyncNotConfigured)?;
    let settings = profile.sync_settings()?;
    if settings.api_base_url.is_none() {
        return Err(CliError::SyncNotConfigured);
    }

    let transport = HttpSyncTransport::from_settings(&settings, token)?;
    tracing::info!(
        profile = %profile_name,
        endpoint = transport.endpoint(),
        "Sync configured from profile"
    );
    Ok(SyncOrchestrator::new(store, Arc::new(transport), settings))
}
