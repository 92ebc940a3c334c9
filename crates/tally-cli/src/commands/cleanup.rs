use tally_core::{LocalStore, SyncSettings};

use crate::error::CliError;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1_000;

/// Retention horizon in ms; an explicit day count wins over the profile.
pub fn retention_horizon_ms(days: Option<u32>, settings: &SyncSettings) -> i64 {
    days.map_or_else(
        || settings.retention_horizon_ms(),
        |days| i64::from(days) * MILLIS_PER_DAY,
    )
}

pub async fn run_cleanup(
    store: &LocalStore,
    days: Option<u32>,
    settings: &SyncSettings,
) -> Result<(), CliError> {
    let removed = store
        .cleanup_retention(retention_horizon_ms(days, settings))
        .await?;
    println!("Removed {removed} synced record(s)");
    Ok(())
}
