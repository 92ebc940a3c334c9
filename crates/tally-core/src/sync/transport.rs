//! Transport to the reconciliation endpoint.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use super::protocol::{
    decode, ConflictInput, DownloadUpdatesData, Envelope, IncrementalSyncData,
    ResolveConflictsData, SyncRequest, SyncStatusData, UploadItem, UploadResult,
};
use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::util::{excerpt, is_http_url, normalize_text_option};

const MAX_ERROR_EXCERPT: usize = 180;

/// Something that can execute sync actions against a server of record.
///
/// Implementors only provide [`SyncTransport::call`]; the typed helpers
/// decode the response `data` of each action.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Execute one action and return the `data` of a successful envelope.
    async fn call(&self, request: SyncRequest) -> Result<Value>;

    /// Raw full-sync payload, kept untyped so its checksum can be verified.
    async fn full_sync(&self) -> Result<Value> {
        self.call(SyncRequest::FullSync).await
    }

    async fn incremental_sync(&self, last_sync: i64) -> Result<IncrementalSyncData> {
        let data = self
            .call(SyncRequest::IncrementalSync { last_sync })
            .await?;
        decode("incremental_sync", data)
    }

    async fn upload_pending(&self, items: Vec<UploadItem>) -> Result<UploadResult> {
        let data = self
            .call(SyncRequest::UploadPending {
                pending_data: items,
            })
            .await?;
        decode("upload_pending", data)
    }

    async fn download_updates(&self, client_version: &str) -> Result<DownloadUpdatesData> {
        let data = self
            .call(SyncRequest::DownloadUpdates {
                client_version: client_version.to_string(),
            })
            .await?;
        decode("download_updates", data)
    }

    async fn get_sync_status(&self) -> Result<SyncStatusData> {
        let data = self.call(SyncRequest::GetSyncStatus).await?;
        decode("get_sync_status", data)
    }

    async fn resolve_conflicts(&self, conflicts: Vec<ConflictInput>) -> Result<ResolveConflictsData> {
        let data = self
            .call(SyncRequest::ResolveConflicts { conflicts })
            .await?;
        decode("resolve_conflicts", data)
    }
}

/// HTTP transport posting JSON actions with a bearer token.
#[derive(Clone)]
pub struct HttpSyncTransport {
    endpoint: String,
    access_token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSyncTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSyncTransport")
            .field("endpoint", &self.endpoint)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpSyncTransport {
    /// Build a transport for `endpoint` (the full `/v1/sync` URL).
    pub fn new(
        endpoint: impl Into<String>,
        access_token: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let access_token = normalize_text_option(Some(access_token.into()))
            .ok_or_else(|| Error::InvalidInput("access token must not be empty".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::InvalidInput(format!("HTTP client setup failed: {error}")))?;

        Ok(Self {
            endpoint,
            access_token,
            client,
        })
    }

    /// Build a transport from sync settings.
    pub fn from_settings(settings: &SyncSettings, access_token: impl Into<String>) -> Result<Self> {
        let endpoint = settings
            .sync_endpoint()
            .ok_or_else(|| Error::InvalidInput("api_base_url is not configured".to_string()))?;
        Self::new(endpoint, access_token, settings.request_timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn call(&self, request: SyncRequest) -> Result<Value> {
        let action = request.action();
        tracing::debug!(action, endpoint = %self.endpoint, "sending sync request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::Transport(parse_api_error(status, &body)));
        }
        if !status.is_success() {
            return Err(Error::Server(parse_api_error(status, &body)));
        }

        let envelope: Envelope<Value> = serde_json::from_str(&body).map_err(|error| {
            Error::Server(format!("malformed {action} envelope: {error}"))
        })?;
        envelope.into_result()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = excerpt(body, MAX_ERROR_EXCERPT);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("endpoint must not be empty".to_string()))?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}
