//! Document transports and the fetch-then-cache pipeline.
//!
//! # Purpose
//! Retrieve key sets and trust lists by URI, parse them, and record successful
//! results in a [`DocumentCache`]. Failures fall back to cached copies within
//! the cache's failure grace window.
//!
//! # Key invariants
//! - Every fetch is bounded by the caller's timeout; a timeout is a failure.
//! - Only documents that parse into their expected shape are cached.
//! - A fetched document is returned to the caller even if the cache refuses it.
use crate::cache::{CachePolicy, DocumentCache};
use crate::errors::FetchError;
use async_trait::async_trait;
use certs_jose::JwkSet;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Retrieves the body of a document by URI.
#[async_trait]
pub trait DocumentFetcher: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, uri: &str, timeout: Duration) -> Result<String, FetchError>;
}

/// A document type that can be parsed from a fetched body.
pub trait Document: Clone + Send + Sync + 'static {
    /// Human-readable kind used in errors and logs.
    const KIND: &'static str;

    fn parse(body: &str) -> Option<Self>;
}

impl Document for JwkSet {
    const KIND: &'static str = "key set";

    fn parse(body: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        JwkSet::from_value(&value)
    }
}

/// HTTP transport. Bodies longer than `max_body_bytes` are abandoned
/// mid-read rather than buffered.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::with_client(reqwest::Client::new())
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            max_body_bytes: CachePolicy::default().max_bytes,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, uri: &str, timeout: Duration) -> Result<String, FetchError> {
        let mut response = self.client.get(uri).timeout(timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }
        let too_large = || FetchError::TooLarge {
            uri: uri.to_string(),
            max_bytes: self.max_body_bytes,
        };
        if response
            .content_length()
            .is_some_and(|length| length > self.max_body_bytes as u64)
        {
            return Err(too_large());
        }
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_body_bytes {
                tracing::warn!(uri, max_bytes = self.max_body_bytes, "document body over limit, abandoning read");
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[derive(Debug, Clone)]
enum Route {
    Body(String),
    Status(u16),
    Stall,
}

/// In-memory transport that serves pinned documents by exact URI.
///
/// Unknown URIs answer with status 404. Routes can be set to fail with a
/// status or to never answer, which exercises the caller's timeout.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    routes: DashMap<String, Route>,
    hits: DashMap<String, usize>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, uri: impl Into<String>, body: impl Into<String>) {
        self.routes.insert(uri.into(), Route::Body(body.into()));
    }

    pub fn serve_json(&self, uri: impl Into<String>, value: &serde_json::Value) {
        self.serve(uri, value.to_string());
    }

    pub fn fail(&self, uri: impl Into<String>, status: u16) {
        self.routes.insert(uri.into(), Route::Status(status));
    }

    pub fn stall(&self, uri: impl Into<String>) {
        self.routes.insert(uri.into(), Route::Stall);
    }

    pub fn remove(&self, uri: &str) {
        self.routes.remove(uri);
    }

    /// Number of fetches attempted for `uri`.
    pub fn hits(&self, uri: &str) -> usize {
        self.hits.get(uri).map(|count| *count).unwrap_or(0)
    }
}

#[async_trait]
impl DocumentFetcher for StaticFetcher {
    async fn fetch(&self, uri: &str, _timeout: Duration) -> Result<String, FetchError> {
        *self.hits.entry(uri.to_string()).or_insert(0) += 1;
        let route = self.routes.get(uri).map(|route| route.value().clone());
        match route {
            Some(Route::Body(body)) => Ok(body),
            Some(Route::Status(status)) => Err(FetchError::Status {
                uri: uri.to_string(),
                status,
            }),
            Some(Route::Stall) => std::future::pending().await,
            None => Err(FetchError::Status {
                uri: uri.to_string(),
                status: 404,
            }),
        }
    }
}

/// Fetch `uri`, parse it as `T` and cache it on success.
pub async fn fetch_and_cache<T: Document>(
    fetcher: &dyn DocumentFetcher,
    cache: &DocumentCache<T>,
    uri: &str,
    timeout: Duration,
) -> Result<T, FetchError> {
    tracing::debug!(cache = cache.name(), uri, ?timeout, "fetching document");
    let result = fetch_document::<T>(fetcher, uri, timeout).await;
    match result {
        Ok((document, size_bytes)) => {
            if !cache.put(uri, document.clone(), size_bytes) {
                tracing::info!(cache = cache.name(), uri, "fetched document was not cached");
            }
            Ok(document)
        }
        Err(error) => {
            tracing::warn!(cache = cache.name(), uri, %error, "document fetch failed");
            metrics::counter!("certs_fetch_failures_total", "cache" => cache.name()).increment(1);
            Err(error)
        }
    }
}

async fn fetch_document<T: Document>(
    fetcher: &dyn DocumentFetcher,
    uri: &str,
    timeout: Duration,
) -> Result<(T, usize), FetchError> {
    let body = tokio::time::timeout(timeout, fetcher.fetch(uri, timeout))
        .await
        .map_err(|_| FetchError::Timeout {
            uri: uri.to_string(),
            timeout,
        })??;
    let document = T::parse(&body).ok_or_else(|| FetchError::InvalidDocument {
        uri: uri.to_string(),
        kind: T::KIND,
    })?;
    Ok((document, body.len()))
}

/// Start [`fetch_and_cache`] as a detached task. Dropping the handle does not
/// cancel the fetch; the cache is still updated when it completes.
pub fn spawn_fetch<T: Document>(
    fetcher: Arc<dyn DocumentFetcher>,
    cache: Arc<DocumentCache<T>>,
    uri: String,
    timeout: Duration,
) -> JoinHandle<Result<T, FetchError>> {
    tokio::spawn(async move { fetch_and_cache(fetcher.as_ref(), &cache, &uri, timeout).await })
}

/// After a failed fetch, serve the cached copy if it is still within the
/// failure grace window, otherwise surface `error`.
pub fn fallback_after_failure<T: Document>(
    cache: &DocumentCache<T>,
    uri: &str,
    error: FetchError,
) -> Result<T, FetchError> {
    cache.prune_if_expired_on_failure(uri);
    match cache.get(uri) {
        Some(entry) => {
            tracing::info!(
                cache = cache.name(),
                uri,
                fetched_at = %entry.fetched_at,
                "fetch failed, using cached copy"
            );
            Ok(entry.value)
        }
        None => {
            tracing::warn!(cache = cache.name(), uri, "fetch failed and no cached copy exists");
            Err(error)
        }
    }
}
