//! Decide which public key verifies a signature.
//!
//! # Purpose
//! Given a token and the trust context the caller already has, pick the one
//! key that must verify it, fetching a remote key set when the context names
//! a trusted URI.
//!
//! # Key invariants
//! - An untrusted header `jku` is never dereferenced; only the header's own
//!   `jwk` can be used for an untrusted signature.
//! - Key-set URIs are always fetched over https, whatever scheme was given.
//! - When the header embeds a `jwk`, the resolved key must equal it exactly.
//!
//! # Fetch race
//! For a trusted URI a fetch is always started. If the cache holds a fresh
//! copy of the key set that contains the header's `kid`, that key is returned
//! at once and the fetch finishes in the background, refreshing the cache for
//! later calls. Otherwise the caller waits for the fetch, falling back to a
//! cached copy within the failure grace window.
use crate::cache::DocumentCache;
use crate::errors::{FetchError, ResolveError, TrustResult};
use crate::fetch::{DocumentFetcher, fallback_after_failure, spawn_fetch};
use crate::trust_list::TrustMatch;
use certs_jose::{JoseHeader, Jwk, JwkSet, decode_header, find_key, is_jwk, is_jwk_set};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Trust context for key resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyHint {
    /// Nothing vouches for this signature; ignore `jku`, use the header `jwk`.
    Untrusted,
    /// Fetch the key set at this URI and select the header's `kid`.
    TrustedUri(String),
    /// Select the header's `kid` from this key set.
    TrustedKeySet(JwkSet),
    /// Use this key, provided its `kid` equals the header's.
    TrustedKey(Jwk),
}

impl KeyHint {
    /// Interpret a dynamically typed hint: `false`, a URI string, a key set
    /// object or a key object. Anything else (including `true`) is invalid.
    pub fn from_json(value: &Value) -> TrustResult<Self> {
        match value {
            Value::Bool(false) => Ok(Self::Untrusted),
            Value::String(uri) => Ok(Self::TrustedUri(uri.clone())),
            Value::Object(_) if is_jwk_set(value) => JwkSet::from_value(value)
                .map(Self::TrustedKeySet)
                .ok_or(ResolveError::InvalidHint),
            Value::Object(_) if is_jwk(value) => serde_json::from_value(value.clone())
                .map(Self::TrustedKey)
                .map_err(|_| ResolveError::InvalidHint),
            _ => Err(ResolveError::InvalidHint),
        }
    }
}

impl From<TrustMatch> for KeyHint {
    fn from(found: TrustMatch) -> Self {
        match found {
            TrustMatch::Jku(uri) => Self::TrustedUri(uri),
            TrustMatch::KeySet(jwks) => Self::TrustedKeySet(jwks),
        }
    }
}

impl From<Option<TrustMatch>> for KeyHint {
    fn from(found: Option<TrustMatch>) -> Self {
        found.map_or(Self::Untrusted, Self::from)
    }
}

#[derive(Debug, Clone)]
pub struct KeyResolver {
    fetcher: Arc<dyn DocumentFetcher>,
    key_sets: Arc<DocumentCache<JwkSet>>,
}

impl KeyResolver {
    pub fn new(fetcher: Arc<dyn DocumentFetcher>, key_sets: Arc<DocumentCache<JwkSet>>) -> Self {
        Self { fetcher, key_sets }
    }

    pub fn key_sets(&self) -> &DocumentCache<JwkSet> {
        &self.key_sets
    }

    pub async fn resolve_key_for_signature(
        &self,
        token: &str,
        hint: &KeyHint,
        timeout: Duration,
    ) -> TrustResult<Jwk> {
        let decoded = decode_header(token)?;
        self.resolve_for_header(&decoded.header, hint, timeout).await
    }

    pub async fn resolve_for_header(
        &self,
        header: &JoseHeader,
        hint: &KeyHint,
        timeout: Duration,
    ) -> TrustResult<Jwk> {
        let key = match hint {
            KeyHint::Untrusted => {
                if header.jku.is_some() {
                    tracing::warn!(
                        jku = ?header.jku,
                        "signature has a jku but is untrusted, ignoring it"
                    );
                }
                let Some(jwk) = &header.jwk else {
                    tracing::warn!("signature is untrusted and has no jwk to check");
                    return Err(ResolveError::NoKeyAvailable);
                };
                jwk.clone()
            }
            KeyHint::TrustedUri(uri) => return self.key_from_uri(header, uri, timeout).await,
            KeyHint::TrustedKeySet(jwks) => find_key(header.kid.as_deref(), jwks)
                .cloned()
                .ok_or_else(|| ResolveError::KeyNotFound {
                    kid: header.kid.clone(),
                })?,
            KeyHint::TrustedKey(jwk) if jwk.kid == header.kid => jwk.clone(),
            KeyHint::TrustedKey(jwk) => {
                tracing::warn!(hint_kid = ?jwk.kid, kid = ?header.kid, "key hint does not match header kid");
                return Err(ResolveError::InvalidHint);
            }
        };
        check_matches_header(header, key)
    }

    async fn key_from_uri(
        &self,
        header: &JoseHeader,
        uri: &str,
        timeout: Duration,
    ) -> TrustResult<Jwk> {
        let uri = force_https(uri)?;
        let kid = header.kid.as_deref();
        let fetch = spawn_fetch(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.key_sets),
            uri.clone(),
            timeout,
        );

        if let Some(jwks) = self.key_sets.get_fresh(&uri)
            && let Some(jwk) = find_key(kid, &jwks)
        {
            tracing::trace!(uri = %uri, ?kid, "fresh cached key set has kid, not waiting on fetch");
            return check_matches_header(header, jwk.clone());
        }

        tracing::trace!(uri = %uri, ?kid, "no fresh cached key for kid, waiting on fetch");
        let fetched = match fetch.await {
            Ok(result) => result,
            Err(join) => Err(FetchError::Task(join.to_string())),
        };
        let jwks = fetched
            .or_else(|error| fallback_after_failure(self.key_sets.as_ref(), &uri, error))
            .map_err(|source| ResolveError::Fetch {
                uri: uri.clone(),
                source,
            })?;
        let jwk = find_key(kid, &jwks)
            .cloned()
            .ok_or_else(|| ResolveError::KeyNotFound {
                kid: header.kid.clone(),
            })?;
        check_matches_header(header, jwk)
    }
}

fn check_matches_header(header: &JoseHeader, key: Jwk) -> TrustResult<Jwk> {
    if let Some(embedded) = &header.jwk
        && !embedded.same_key(&key)
    {
        tracing::warn!(kid = ?key.kid, "header jwk does not match the resolved key");
        return Err(ResolveError::HeaderMismatch);
    }
    Ok(key)
}

/// Rewrite `uri` to use the https scheme.
pub fn force_https(uri: &str) -> TrustResult<String> {
    let invalid = |reason: String| ResolveError::InvalidUri {
        uri: uri.to_string(),
        reason,
    };
    let mut url = reqwest::Url::parse(uri).map_err(|err| invalid(err.to_string()))?;
    if url.scheme() != "https" {
        url.set_scheme("https")
            .map_err(|()| invalid(format!("scheme {} cannot be replaced by https", url.scheme())))?;
    }
    Ok(url.to_string())
}
