use std::collections::BTreeMap;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tally_core::sync::{CycleReport, PullKind, SyncEvent, SyncOutcome, SyncTrigger};
use tally_core::{Collection, LocalStore, OutboxEntryId, OutboxOperation, SyncSettings};
use tracing::Level;

use crate::commands::cleanup::retention_horizon_ms;
use crate::commands::common::{
    format_outbox_lines, format_record_lines, format_relative_time, format_timestamp,
    format_unix_seconds, normalize_record_id, open_store, parse_collection, parse_payload,
    parse_setting_value, payload_preview, record_to_list_item,
};
use crate::commands::config::apply_profile_init;
use crate::commands::records::{fetch_record, run_delete, run_put, run_set};
use crate::commands::sync::{completed_report, format_cycle_report};
use crate::commands::watch::{event_level, wait_for_flush, FlushOutcome};
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

#[test]
fn parse_collection_accepts_dashes_and_rejects_unknown() {
    assert_eq!(
        parse_collection("reward-history").unwrap(),
        Collection::RewardHistory
    );
    assert!(matches!(
        parse_collection("coupons"),
        Err(CliError::Core(_))
    ));
}

#[test]
fn parse_payload_requires_object() {
    assert_eq!(parse_payload(r#" {"id": "t1"} "#).unwrap(), json!({"id": "t1"}));
    assert!(matches!(parse_payload("[1, 2]"), Err(CliError::PayloadNotObject)));
    assert!(matches!(
        parse_payload("{not json"),
        Err(CliError::Serialization(_))
    ));
}

#[test]
fn setting_values_fall_back_to_strings() {
    assert_eq!(parse_setting_value("true"), json!(true));
    assert_eq!(parse_setting_value("42"), json!(42));
    assert_eq!(parse_setting_value(" dark "), json!("dark"));
}

#[test]
fn normalize_record_id_rejects_empty() {
    assert!(matches!(
        normalize_record_id(" \n "),
        Err(CliError::EmptyRecordId)
    ));
    assert_eq!(normalize_record_id("  t1  ").unwrap(), "t1");
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn timestamps_render_in_utc() {
    assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    assert_eq!(format_unix_seconds(Some(60)), "1970-01-01 00:01:00 UTC");
    assert_eq!(format_unix_seconds(None), "never");
}

#[test]
fn payload_preview_truncates_with_ellipsis() {
    let payload = json!({"title": "A very long notification title that keeps going"});
    let preview = payload_preview(&payload, 20);
    assert_eq!(preview.chars().count(), 23);
    assert!(preview.ends_with("..."));
    assert_eq!(payload_preview(&json!({}), 20), "{}");
}

#[test]
fn retention_prefers_explicit_days() {
    let settings = SyncSettings::default();
    assert_eq!(retention_horizon_ms(Some(1), &settings), 86_400_000);
    assert_eq!(
        retention_horizon_ms(None, &settings),
        settings.retention_horizon_ms()
    );
}

#[test]
fn cycle_report_lines_describe_push_and_pull() {
    let report = CycleReport {
        acknowledged: 3,
        abandoned: 1,
        pull: PullKind::Incremental,
        merged: 2,
        ..CycleReport::default()
    };
    let lines = format_cycle_report(&report);
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("3 acknowledged"));
    assert!(lines[1].contains("1 change(s)"));
    assert_eq!(lines[2], "Pull: incremental (2 merged, 0 removed)");
}

#[test]
fn backoff_outcome_is_an_error() {
    let outcome = SyncOutcome::Backoff {
        report: CycleReport::default(),
        error: "connection refused".to_string(),
    };
    assert!(matches!(
        completed_report(outcome),
        Err(CliError::SyncInterrupted(message)) if message == "connection refused"
    ));
    assert!(completed_report(SyncOutcome::Skipped).is_err());
    assert_eq!(
        completed_report(SyncOutcome::Completed(CycleReport::default())).unwrap(),
        CycleReport::default()
    );
}

#[test]
fn profile_init_merges_with_existing_values() {
    let mut config = CliProfilesConfig {
        version: 1,
        active_profile: Some("work".to_string()),
        profiles: BTreeMap::new(),
    };
    config.profiles.insert(
        "home".to_string(),
        CliProfile {
            api_base_url: Some("http://localhost:8080".to_string()),
            access_token: Some("old-token".to_string()),
            settings: None,
        },
    );

    let profile = apply_profile_init(
        &mut config,
        "home",
        None,
        Some(" new-token ".to_string()),
        true,
    )
    .unwrap();
    assert_eq!(profile.api_base_url.as_deref(), Some("http://localhost:8080"));
    assert_eq!(profile.access_token.as_deref(), Some("new-token"));
    assert_eq!(config.active_profile.as_deref(), Some("work"));

    apply_profile_init(&mut config, "home", None, None, false).unwrap();
    assert_eq!(config.active_profile.as_deref(), Some("home"));
}

#[test]
fn profile_init_rejects_non_http_urls() {
    let mut config = CliProfilesConfig::default();
    let result = apply_profile_init(
        &mut config,
        "default",
        Some("ftp://example.com".to_string()),
        None,
        false,
    );
    assert!(matches!(result, Err(CliError::Config(_))));
    assert!(config.profiles.is_empty());
}

#[tokio::test]
async fn open_store_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("tally.db");
    let store = open_store(&path).await.unwrap();
    assert_eq!(store.outbox_len().await.unwrap(), 0);
    assert!(path.exists());
}

#[tokio::test]
async fn put_then_delete_queues_changes() {
    let store = LocalStore::open_in_memory().await.unwrap();

    run_put(&store, "transactions", r#"{"id": "t1", "points": 10}"#)
        .await
        .unwrap();
    run_put(&store, "transactions", r#"{"id": "t1", "points": 12}"#)
        .await
        .unwrap();
    let record = fetch_record(&store, "transactions", "t1").await.unwrap();
    assert_eq!(record.payload["points"], 12);
    assert!(!record.synced);

    let entries = store.outbox_list(10).await.unwrap();
    let operations: Vec<OutboxOperation> = entries.iter().map(|entry| entry.operation).collect();
    assert_eq!(
        operations,
        vec![OutboxOperation::Insert, OutboxOperation::Update]
    );

    run_delete(&store, "transactions", "t1").await.unwrap();
    assert!(matches!(
        fetch_record(&store, "transactions", "t1").await,
        Err(CliError::RecordNotFound(_))
    ));
    assert_eq!(store.outbox_len().await.unwrap(), 3);
    assert!(matches!(
        run_delete(&store, "transactions", "t1").await,
        Err(CliError::RecordNotFound(_))
    ));
}

#[tokio::test]
async fn set_writes_a_config_record() {
    let store = LocalStore::open_in_memory().await.unwrap();
    run_set(&store, "theme", "dark").await.unwrap();

    let record = fetch_record(&store, "config", "theme").await.unwrap();
    assert_eq!(record.payload["value"], "dark");
    let item = record_to_list_item(&record);
    assert_eq!(item.id, "theme");
    assert!(!item.synced);
}

#[tokio::test]
async fn listing_lines_mark_unsynced_records() {
    let store = LocalStore::open_in_memory().await.unwrap();
    run_put(&store, "notifications", r#"{"id": "n1", "title": "Hi"}"#)
        .await
        .unwrap();

    let records = store.get_all(Collection::Notifications).await.unwrap();
    let lines = format_record_lines(&records);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with('*'));
    assert!(lines[0].contains("n1"));

    let entries = store.outbox_list(10).await.unwrap();
    let lines = format_outbox_lines(&entries);
    assert!(lines[0].contains("INSERT"));
    assert!(lines[0].contains("notifications"));
    assert!(lines[0].contains("retries=0"));
}

#[test]
fn discarded_changes_are_reported_as_warnings() {
    let abandoned = SyncEvent::ItemAbandoned {
        entry_id: OutboxEntryId::new(),
        collection: Collection::Transactions,
        record_id: Some("t1".to_string()),
        attempts: 3,
    };
    assert_eq!(event_level(&abandoned), Level::WARN);
    assert_eq!(
        event_level(&SyncEvent::CycleStarted {
            trigger: SyncTrigger::Periodic
        }),
        Level::DEBUG
    );
}

#[tokio::test]
async fn teardown_flush_wait_is_bounded() {
    let stuck = tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(60)).await;
    });
    assert_eq!(
        wait_for_flush(stuck, Duration::from_millis(50)).await,
        FlushOutcome::TimedOut
    );

    let quick = tokio::spawn(async {});
    assert_eq!(
        wait_for_flush(quick, Duration::from_secs(5)).await,
        FlushOutcome::Finished
    );
}
