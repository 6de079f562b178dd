//! HTTP client for the Git-hosting contents API.
//!
//! Wraps every call with auth headers, rate-limit tracking and bounded
//! retry. Status codes are mapped totally onto [`RemoteError`]; non-2xx
//! responses are never turned into transport errors by reqwest itself.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use aowl_core::clock::{Clock, SystemClock};
use aowl_core::config::RemoteConfig;

use crate::error::{RemoteError, RemoteResult};
use crate::rate_limit::{RateLimitState, RateLimitTracker};
use crate::retry::{is_retryable_status, is_retryable_transport, RetryPolicy};
use crate::store::{RemoteListing, RemoteObject, RemoteStore};

const GITHUB_ACCEPT: &str = "application/vnd.github+json";

#[derive(Debug, Deserialize)]
struct ContentResponse {
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutRequest<'a> {
    message: String,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    sha: String,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    message: String,
    sha: &'a str,
    branch: &'a str,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
    path: String,
    sha: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

pub struct RemoteStorageClient {
    http: reqwest::Client,
    api_url: String,
    owner: String,
    repo: String,
    branch: String,
    retry: RetryPolicy,
    tracker: Arc<RateLimitTracker>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RemoteStorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStorageClient")
            .field("api_url", &self.api_url)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl RemoteStorageClient {
    /// Build a client from config plus a bearer token.
    ///
    /// If `enforce_tls` is true and the API URL uses HTTP, this returns an
    /// error. Otherwise, a warning is logged for non-HTTPS URLs.
    pub fn new(cfg: &RemoteConfig, token: &SecretString) -> Result<Self> {
        if cfg.api_url.starts_with("http://") {
            if cfg.enforce_tls {
                anyhow::bail!(
                    "remote API URL uses plaintext HTTP ({}), but enforce_tls is enabled. \
                     Use an HTTPS URL or set remote.enforce_tls = false for local testing.",
                    cfg.api_url
                );
            }
            warn!(
                api_url = %cfg.api_url,
                "remote API URL uses plaintext HTTP; the access token is sent unencrypted"
            );
        }
        if cfg.owner.is_empty() || cfg.repo.is_empty() {
            anyhow::bail!("remote.owner and remote.repo must both be set");
        }

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .context("access token contains characters not allowed in a header")?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("aowl/", env!("CARGO_PKG_VERSION"))),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            owner: cfg.owner.clone(),
            repo: cfg.repo.clone(),
            branch: cfg.branch.clone(),
            retry: RetryPolicy::from(cfg),
            tracker: Arc::new(RateLimitTracker::new(cfg.near_limit_threshold)),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn tracker(&self) -> &RateLimitTracker {
        &self.tracker
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url,
            self.owner,
            self.repo,
            path.trim_start_matches('/')
        )
    }

    fn blob_url(&self, sha: &str) -> String {
        format!(
            "{}/repos/{}/{}/git/blobs/{sha}",
            self.api_url, self.owner, self.repo
        )
    }

    /// Send with retry. Returns only 2xx responses; everything else is
    /// mapped to a [`RemoteError`].
    async fn execute<F>(&self, what: &str, build: F) -> RemoteResult<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let quota = self.tracker.state();
            if quota.blocks_at(self.clock.now()) {
                debug!(what, "rate limit exhausted, not sending");
                return Err(RemoteError::RateLimitExceeded {
                    reset_at: quota.reset_at,
                });
            }

            let response = match build(&self.http).send().await {
                Ok(response) => response,
                Err(e) if is_retryable_transport(&e) && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(what, attempt, ?delay, error = %e, "transport failure, will retry");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(RemoteError::NetworkError(e.to_string())),
            };

            self.tracker.update(response.headers());
            let status = response.status();
            debug!(what, status = %status, attempt, "remote response received");

            if status.is_success() {
                return Ok(response);
            }

            if is_retryable_status(status.as_u16()) && self.retry.should_retry(attempt) {
                let delay = self.retry.delay_after(attempt);
                warn!(what, attempt, status = %status, ?delay, "server error, will retry");
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(map_error_response(what, response, self.clock.now()).await);
        }
    }

    async fn fetch_blob(&self, sha: &str) -> RemoteResult<Vec<u8>> {
        let url = self.blob_url(sha);
        let response = self.execute("read blob", |http| http.get(&url)).await?;
        let blob: BlobResponse = decode_json(response).await?;
        match blob.encoding.as_deref() {
            Some("base64") | None => decode_base64(&blob.content),
            Some(other) => Err(RemoteError::NetworkError(format!(
                "unsupported blob encoding: {other}"
            ))),
        }
    }
}

#[async_trait]
impl RemoteStore for RemoteStorageClient {
    async fn read(&self, path: &str) -> RemoteResult<RemoteObject> {
        let url = self.contents_url(path);
        let response = self
            .execute(path, |http| {
                http.get(&url).query(&[("ref", self.branch.as_str())])
            })
            .await?;
        let body: ContentResponse = decode_json(response).await?;

        // Large files come back without inline content
        let content = match (body.encoding.as_deref(), body.content.as_deref()) {
            (Some("base64"), Some(inline)) => decode_base64(inline)?,
            _ => self.fetch_blob(&body.sha).await?,
        };

        debug!(path, version = %body.sha, bytes = content.len(), "read remote object");
        Ok(RemoteObject {
            content,
            version: body.sha,
        })
    }

    async fn write(
        &self,
        path: &str,
        content: &[u8],
        expected_version: Option<&str>,
    ) -> RemoteResult<String> {
        let url = self.contents_url(path);
        let body = PutRequest {
            message: format!("aowl: update {path}"),
            content: STANDARD.encode(content),
            branch: &self.branch,
            sha: expected_version,
        };
        let response = self.execute(path, |http| http.put(&url).json(&body)).await?;
        let put: PutResponse = decode_json(response).await?;

        debug!(path, version = %put.content.sha, bytes = content.len(), "wrote remote object");
        Ok(put.content.sha)
    }

    async fn delete(&self, path: &str, version: &str) -> RemoteResult<()> {
        let url = self.contents_url(path);
        let body = DeleteRequest {
            message: format!("aowl: delete {path}"),
            sha: version,
            branch: &self.branch,
        };
        self.execute(path, |http| http.delete(&url).json(&body))
            .await?;
        debug!(path, "deleted remote object");
        Ok(())
    }

    async fn list(&self, dir: &str) -> RemoteResult<Vec<RemoteListing>> {
        let url = self.contents_url(dir);
        let response = match self
            .execute(dir, |http| {
                http.get(&url).query(&[("ref", self.branch.as_str())])
            })
            .await
        {
            Ok(response) => response,
            Err(RemoteError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let items: Vec<ListItem> = decode_json(response).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.kind == "file")
            .map(|item| RemoteListing {
                name: item.name,
                path: item.path,
                version: item.sha,
                size: item.size,
            })
            .collect())
    }

    fn rate_limit(&self) -> RateLimitState {
        self.tracker.state()
    }
}

async fn decode_json<T: serde::de::DeserializeOwned>(response: Response) -> RemoteResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| RemoteError::NetworkError(format!("decoding response body: {e}")))
}

/// The contents API wraps base64 at 60 columns.
fn decode_base64(encoded: &str) -> RemoteResult<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| RemoteError::NetworkError(format!("invalid base64 content: {e}")))
}

async fn map_error_response(what: &str, response: Response, now: DateTime<Utc>) -> RemoteError {
    let status = response.status();
    let quota = RateLimitState::from_headers(response.headers());
    let retry_after = retry_after(response.headers(), now);
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or(body);

    map_status(status, &quota, retry_after, what, message)
}

/// `Retry-After` in delta-seconds form, anchored at `now`.
fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let secs: i64 = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Some(now + chrono::Duration::seconds(secs))
}

pub(crate) fn map_status(
    status: StatusCode,
    quota: &RateLimitState,
    retry_after: Option<DateTime<Utc>>,
    what: &str,
    message: String,
) -> RemoteError {
    match status.as_u16() {
        401 => RemoteError::AuthenticationFailed,
        403 if quota.is_exhausted() => RemoteError::RateLimitExceeded {
            reset_at: quota.reset_at,
        },
        403 => RemoteError::AccessForbidden(message),
        404 => RemoteError::NotFound(what.to_string()),
        409 | 422 => RemoteError::ConflictError(format!("{what}: {message}")),
        429 => RemoteError::RateLimitExceeded {
            reset_at: quota.reset_at.or(retry_after),
        },
        s @ 500..=599 => RemoteError::ServerError { status: s },
        s => RemoteError::UnknownError { status: s, message },
    }
}
