//! Validation of signed client certificates against published trust lists.
//!
//! # Purpose
//! Answer two questions about a compact token: is it correctly signed by the
//! key it claims (`valid`), and is that key vouched for by a trust list
//! (`trusted`). The answer always comes back as a [`ValidationResult`] whose
//! `details` explain how it was reached.
//!
//! # Key invariants
//! - `trusted` implies `valid`.
//! - Trust is recomputed from the current lists on every call; nothing about
//!   a previous outcome is remembered except cached documents.
//! - Validation never returns an error and never panics out to the caller;
//!   every failure becomes a detail message and a conservative result.
//!
//! # Concurrency model
//! [`TrustValidator`] is cheap to clone and shares its two caches across
//! clones. Trust lists are fetched concurrently within one call; the remaining
//! steps run in order.
use crate::cache::{CachePolicy, DocumentCache};
use crate::errors::TrustResult;
use crate::fetch::{DocumentFetcher, HttpFetcher};
use crate::key_resolver::{KeyHint, KeyResolver};
use crate::trust_list::{TrustList, TrustMatch, find_list, load_trust_lists};
use certs_jose::{DecodedToken, JoseHeader, Jwk, JwkSet, decode_header, verify};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub const TRUSTED_LIST_URI: &str =
    "https://oada.github.io/oada-trusted-lists/client-registration-v2.json";

const DEFAULT_TIMEOUT_MS: u64 = 1000;
const DEFAULT_TRUSTED_LIST_CACHE_SECS: u64 = 3600;

static SHARED: OnceLock<TrustValidator> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Bound on every network fetch made during the call.
    pub timeout: Duration,
    /// How long a fetched trust list is used before it is fetched again.
    pub trusted_list_cache_time: Duration,
    pub additional_trusted_list_uris: Vec<String>,
    pub disable_default_trusted_list_uri: bool,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            trusted_list_cache_time: Duration::from_secs(DEFAULT_TRUSTED_LIST_CACHE_SECS),
            additional_trusted_list_uris: Vec::new(),
            disable_default_trusted_list_uri: false,
        }
    }
}

impl ValidateOptions {
    /// Trust-list URIs in priority order.
    pub fn trusted_list_uris(&self) -> Vec<String> {
        let default = (!self.disable_default_trusted_list_uri).then(|| TRUSTED_LIST_URI.to_string());
        default
            .into_iter()
            .chain(self.additional_trusted_list_uris.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detail {
    pub message: String,
}

impl Detail {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub trusted: bool,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<JoseHeader>,
    pub details: Vec<Detail>,
}

impl ValidationResult {
    fn failed(details: Vec<Detail>) -> Self {
        Self {
            trusted: false,
            valid: false,
            payload: None,
            header: None,
            details,
        }
    }
}

struct Outcome {
    trusted: bool,
    valid: bool,
    decoded: DecodedToken,
}

#[derive(Debug, Clone)]
pub struct TrustValidator {
    fetcher: Arc<dyn DocumentFetcher>,
    trusted_lists: Arc<DocumentCache<TrustList>>,
    resolver: KeyResolver,
}

impl TrustValidator {
    pub fn new(fetcher: Arc<dyn DocumentFetcher>, policy: CachePolicy) -> Self {
        let trusted_lists = Arc::new(DocumentCache::new("trusted_lists", policy));
        let key_sets = Arc::new(DocumentCache::new("key_sets", policy));
        Self {
            resolver: KeyResolver::new(Arc::clone(&fetcher), key_sets),
            fetcher,
            trusted_lists,
        }
    }

    pub fn with_http(policy: CachePolicy) -> Self {
        let fetcher = HttpFetcher::new().with_max_body_bytes(policy.max_bytes);
        Self::new(Arc::new(fetcher), policy)
    }

    /// Process-wide validator over HTTP with the default cache policy.
    pub fn shared() -> &'static TrustValidator {
        SHARED.get_or_init(|| Self::with_http(CachePolicy::default()))
    }

    pub fn trusted_lists(&self) -> &DocumentCache<TrustList> {
        &self.trusted_lists
    }

    pub fn key_sets(&self) -> &DocumentCache<JwkSet> {
        self.resolver.key_sets()
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    /// Drop every cached trust list and key set.
    pub fn clear_cache(&self) {
        self.trusted_lists.clear();
        self.resolver.key_sets().clear();
    }

    pub async fn resolve_key_for_signature(
        &self,
        token: &str,
        hint: &KeyHint,
        timeout: Duration,
    ) -> TrustResult<Jwk> {
        self.resolver
            .resolve_key_for_signature(token, hint, timeout)
            .await
    }

    pub async fn validate(&self, token: &str, options: &ValidateOptions) -> ValidationResult {
        let mut details = Vec::new();
        let outcome = AssertUnwindSafe(self.evaluate(token, options, &mut details))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(Some(outcome)) => ValidationResult {
                trusted: outcome.trusted,
                valid: outcome.valid,
                payload: Some(outcome.decoded.payload),
                header: Some(outcome.decoded.header),
                details,
            },
            Ok(None) => ValidationResult::failed(details),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|reason| reason.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(%reason, "validation panicked");
                details.push(Detail::new(format!("Error during validation: {reason}")));
                ValidationResult::failed(details)
            }
        };
        metrics::counter!(
            "certs_validations_total",
            "trusted" => bool_label(result.trusted),
            "valid" => bool_label(result.valid)
        )
        .increment(1);
        result
    }

    async fn evaluate(
        &self,
        token: &str,
        options: &ValidateOptions,
        details: &mut Vec<Detail>,
    ) -> Option<Outcome> {
        let uris = options.trusted_list_uris();
        tracing::trace!(?uris, "using trusted lists");
        let lists = load_trust_lists(
            self.fetcher.as_ref(),
            &self.trusted_lists,
            &uris,
            options.trusted_list_cache_time,
            options.timeout,
        )
        .await;

        let decoded = match decode_header(token) {
            Ok(decoded) => decoded,
            Err(error) => {
                details.push(Detail::new(format!("Could not decode signature: {error}")));
                return None;
            }
        };

        let found = find_list(&lists, &decoded.header);
        match &found {
            Some(found) => details.push(Detail::new(format!(
                "Matched decoded header to trusted list: {}",
                describe_match(found)
            ))),
            None => {
                let header = serde_json::to_string(&decoded.header).unwrap_or_else(|error| {
                    tracing::warn!(%error, "could not render decoded header as JSON");
                    format!("{:?}", decoded.header)
                });
                tracing::info!(%header, "signature header does not match any trusted list");
                details.push(Detail::new(format!(
                    "Did not find trusted list corresponding to this decoded signature header: {header}"
                )));
            }
        }

        let hint = KeyHint::from(found.clone());
        let key = match self
            .resolver
            .resolve_for_header(&decoded.header, &hint, options.timeout)
            .await
        {
            Ok(key) => Some(key),
            Err(error) => {
                details.push(Detail::new(format!(
                    "Failed to figure out public key (JWK) for signature: {error}"
                )));
                None
            }
        };

        let valid = match key {
            Some(key) => match verify(&key, token) {
                Ok(_) => true,
                Err(error) => {
                    details.push(Detail::new(format!(
                        "Failed to verify signature with public key: {error}"
                    )));
                    false
                }
            },
            None => false,
        };
        if !valid {
            details.push(Detail::new(
                "Signature does not verify with the given JWK. Setting valid = false, trusted = false.",
            ));
        }

        Some(Outcome {
            trusted: found.is_some() && valid,
            valid,
            decoded,
        })
    }
}

fn describe_match(found: &TrustMatch) -> String {
    match found {
        TrustMatch::Jku(uri) => uri.clone(),
        TrustMatch::KeySet(jwks) => {
            let kids: Vec<&str> = jwks.keys.iter().filter_map(|key| key.kid.as_deref()).collect();
            format!("trusted key set with kids {kids:?}")
        }
    }
}

fn bool_label(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// [`TrustValidator::validate`] on the shared validator.
pub async fn validate(token: &str, options: &ValidateOptions) -> ValidationResult {
    TrustValidator::shared().validate(token, options).await
}

/// [`TrustValidator::resolve_key_for_signature`] on the shared validator.
pub async fn resolve_key_for_signature(
    token: &str,
    hint: &KeyHint,
    timeout: Duration,
) -> TrustResult<Jwk> {
    TrustValidator::shared()
        .resolve_key_for_signature(token, hint, timeout)
        .await
}

/// Clear the shared validator's caches.
pub fn clear_cache() {
    TrustValidator::shared().clear_cache();
}
