use tally_core::LocalStore;

use crate::commands::common::{format_outbox_lines, outbox_to_list_item, OutboxListItem};
use crate::error::CliError;

pub async fn run_outbox(store: &LocalStore, limit: usize, as_json: bool) -> Result<(), CliError> {
    let entries = store.outbox_list(limit).await?;

    if as_json {
        let json_items = entries
            .iter()
            .map(outbox_to_list_item)
            .collect::<Vec<OutboxListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Outbox is empty.");
        return Ok(());
    }
    for line in format_outbox_lines(&entries) {
        println!("{line}");
    }
    let total = store.outbox_len().await?;
    if total > entries.len() {
        println!("... {} more pending", total - entries.len());
    }
    Ok(())
}
