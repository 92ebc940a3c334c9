//! Small helpers shared by the store, the sync engine and both binaries.

/// Trimmed text, or `None` when absent or blank.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    (!trimmed.is_empty()).then_some(trimmed)
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// First `limit` characters of the trimmed text, for log and error lines.
pub fn excerpt(value: &str, limit: usize) -> String {
    value.trim().chars().take(limit).collect()
}

/// Unix seconds.
pub fn unix_timestamp_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Unix milliseconds; the unit of every local modification time.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Leading component of a dotted version such as `v2.4.1`.
pub fn major_version(version: &str) -> Option<u64> {
    version
        .trim()
        .trim_start_matches(['v', 'V'])
        .split('.')
        .next()?
        .parse()
        .ok()
}

/// A client must restart when its major version is behind the server's.
pub fn requires_restart(client_version: &str, server_version: &str) -> bool {
    matches!(
        (major_version(client_version), major_version(server_version)),
        (Some(client), Some(server)) if client < server
    )
}
