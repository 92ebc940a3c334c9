use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Bearer token to user id
    pub tokens: HashMap<String, String>,
    pub seed_path: Option<PathBuf>,
    pub server_version: String,
    pub rate_limit_window: Duration,
    pub pull_rate_limit_per_window: u32,
    pub push_rate_limit_per_window: u32,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut users: Vec<&str> = self.tokens.values().map(String::as_str).collect();
        users.sort_unstable();
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("tokens", &"[REDACTED]")
            .field("users", &users)
            .field("seed_path", &self.seed_path)
            .field("server_version", &self.server_version)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "pull_rate_limit_per_window",
                &self.pull_rate_limit_per_window,
            )
            .field(
                "push_rate_limit_per_window",
                &self.push_rate_limit_per_window,
            )
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "TALLY_API_BIND_ADDR", "127.0.0.1:8080");
        let tokens = parse_tokens(&required_trimmed(&lookup, "TALLY_API_TOKENS")?)?;
        let seed_path = optional_trimmed(&lookup, "TALLY_API_SEED_PATH").map(PathBuf::from);
        let server_version = value_or_default(
            &lookup,
            "TALLY_API_SERVER_VERSION",
            env!("CARGO_PKG_VERSION"),
        );

        let rate_limit_window_secs = parse_in_range(
            &lookup,
            "RATE_LIMIT_WINDOW_SECS",
            "60",
            10..=3_600,
        )?;
        let pull_rate_limit_per_window = parse_in_range(
            &lookup,
            "SYNC_RATE_LIMIT_PER_WINDOW",
            "60",
            1..=10_000,
        )?;
        let push_rate_limit_per_window = parse_in_range(
            &lookup,
            "SYNC_PUSH_RATE_LIMIT_PER_WINDOW",
            "120",
            1..=10_000,
        )?;

        Ok(Self {
            bind_addr,
            tokens,
            seed_path,
            server_version,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            pull_rate_limit_per_window: u32::try_from(pull_rate_limit_per_window)
                .map_err(|_| ConfigError::Invalid("rate limit out of range".to_string()))?,
            push_rate_limit_per_window: u32::try_from(push_rate_limit_per_window)
                .map_err(|_| ConfigError::Invalid("rate limit out of range".to_string()))?,
        })
    }
}

/// Parse `token=user,token=user` pairs.
fn parse_tokens(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut tokens = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let (token, user) = pair.split_once('=').ok_or_else(|| {
            ConfigError::Invalid("TALLY_API_TOKENS entries must look like `token=user_id`".to_string())
        })?;
        let (token, user) = (token.trim(), user.trim());
        if token.is_empty() || user.is_empty() {
            return Err(ConfigError::Invalid(
                "TALLY_API_TOKENS entries need a token and a user id".to_string(),
            ));
        }
        if tokens.insert(token.to_string(), user.to_string()).is_some() {
            return Err(ConfigError::Invalid(
                "TALLY_API_TOKENS contains a duplicate token".to_string(),
            ));
        }
    }
    if tokens.is_empty() {
        return Err(ConfigError::MissingVar("TALLY_API_TOKENS"));
    }
    Ok(tokens)
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = value_or_default(lookup, name, default)
        .parse::<u64>()
        .map_err(|_| invalid())?;
    if !range.contains(&value) {
        return Err(invalid());
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
