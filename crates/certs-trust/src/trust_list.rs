//! Trust list schemas, loading and matching.
//!
//! # Purpose
//! A trust list is a published document naming the key-set URIs (`jku`s) and,
//! in the second schema, the keys that a verifier should trust.
//!
//! # Schemas
//! - v1: a JSON array of `jku` strings.
//! - v2: `{"version": "2", "jkus": [...], "jwks": {"keys": [...]}}`. Both
//!   members are optional; a `jwks` that is not a usable key set is ignored.
//!
//! # Key invariants
//! - Lists are searched in the order given and the first match wins; within
//!   a v2 list the `jkus` are checked before the inline key set.
//! - No match is not an error. It only means the signature is untrusted.
//! - A list that cannot be fetched (and has no usable cached copy) is skipped.
use crate::cache::DocumentCache;
use crate::fetch::{Document, DocumentFetcher, fallback_after_failure, fetch_and_cache};
use certs_jose::{JoseHeader, JwkSet, find_key, is_jwk_set};
use futures::future::join_all;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustList {
    V1 { jkus: Vec<String> },
    V2 { jkus: Vec<String>, jwks: Option<JwkSet> },
}

/// What a trust list matched for a given header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustMatch {
    /// A trusted key-set URI equal to the header's `jku`.
    Jku(String),
    /// A trusted key set containing the header's embedded key id.
    KeySet(JwkSet),
}

impl TrustList {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(entries) => Some(Self::V1 {
                jkus: string_entries(entries),
            }),
            Value::Object(object) if object.get("version").and_then(Value::as_str) == Some("2") => {
                let jkus = object
                    .get("jkus")
                    .and_then(Value::as_array)
                    .map(|entries| string_entries(entries))
                    .unwrap_or_default();
                let jwks = object
                    .get("jwks")
                    .filter(|jwks| is_jwk_set(jwks))
                    .and_then(JwkSet::from_value);
                Some(Self::V2 { jkus, jwks })
            }
            _ => None,
        }
    }

    pub fn jkus(&self) -> &[String] {
        match self {
            Self::V1 { jkus } | Self::V2 { jkus, .. } => jkus,
        }
    }

    /// First entry of this list matching `header`, if any.
    pub fn find_match(&self, header: &JoseHeader) -> Option<TrustMatch> {
        let jku = header.jku.as_deref();
        let found_jku = self
            .jkus()
            .iter()
            .find(|trusted| Some(trusted.as_str()) == jku)
            .map(|trusted| TrustMatch::Jku(trusted.clone()));
        match self {
            Self::V1 { .. } => found_jku,
            Self::V2 { jwks, .. } => found_jku.or_else(|| {
                let embedded_kid = header.jwk.as_ref().and_then(|jwk| jwk.kid.as_deref());
                let jwks = jwks.as_ref()?;
                find_key(embedded_kid, jwks).map(|_| TrustMatch::KeySet(jwks.clone()))
            }),
        }
    }
}

fn string_entries(entries: &[Value]) -> Vec<String> {
    entries
        .iter()
        .filter_map(Value::as_str)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

impl Document for TrustList {
    const KIND: &'static str = "trusted list";

    fn parse(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        TrustList::from_value(&value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTrustList {
    pub uri: String,
    pub list: TrustList,
}

/// Search `lists` in order for the first entry matching `header`.
pub fn find_list(lists: &[LoadedTrustList], header: &JoseHeader) -> Option<TrustMatch> {
    lists.iter().find_map(|loaded| {
        let found = loaded.list.find_match(header);
        tracing::trace!(
            list = %loaded.uri,
            jku = ?header.jku,
            found = found.is_some(),
            "searched trusted list"
        );
        found
    })
}

/// Load every list in `uris` concurrently, returning the usable ones in the
/// order given.
///
/// A cached list younger than `max_age` is used without a network round trip.
pub async fn load_trust_lists(
    fetcher: &dyn DocumentFetcher,
    cache: &DocumentCache<TrustList>,
    uris: &[String],
    max_age: Duration,
    timeout: Duration,
) -> Vec<LoadedTrustList> {
    let loads = uris.iter().map(|uri| async move {
        let list = load_one(fetcher, cache, uri, max_age, timeout).await?;
        Some(LoadedTrustList {
            uri: uri.clone(),
            list,
        })
    });

    join_all(loads).await.into_iter().flatten().collect()
}

async fn load_one(
    fetcher: &dyn DocumentFetcher,
    cache: &DocumentCache<TrustList>,
    uri: &str,
    max_age: Duration,
    timeout: Duration,
) -> Option<TrustList> {
    if let Some(list) = cache.get_fresh_within(uri, max_age) {
        tracing::trace!(list = %uri, "trusted list is cached and fresh");
        return Some(list);
    }
    tracing::trace!(list = %uri, "trusted list is not cached or is stale, fetching");
    let fetched = match fetch_and_cache(fetcher, cache, uri, timeout).await {
        Ok(list) => Ok(list),
        Err(error) => fallback_after_failure(cache, uri, error),
    };
    match fetched {
        Ok(list) => Some(list),
        Err(error) => {
            tracing::warn!(list = %uri, %error, "unable to fetch trusted list");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use crate::fetch::StaticFetcher;
    use certs_jose::Jwk;
    use serde_json::json;

    fn header(jku: Option<&str>, jwk_kid: Option<&str>) -> JoseHeader {
        JoseHeader {
            alg: "RS256".to_string(),
            jku: jku.map(str::to_string),
            jwk: jwk_kid.map(|kid| Jwk::rsa("n", "AQAB").with_kid(kid)),
            ..JoseHeader::default()
        }
    }

    fn loaded(uri: &str, value: Value) -> LoadedTrustList {
        LoadedTrustList {
            uri: uri.to_string(),
            list: TrustList::from_value(&value).expect("list"),
        }
    }

    #[test]
    fn parses_both_schemas_and_rejects_others() {
        assert_eq!(
            TrustList::from_value(&json!(["https://a/", 7, "", "https://b/"])),
            Some(TrustList::V1 {
                jkus: vec!["https://a/".to_string(), "https://b/".to_string()]
            })
        );

        let v2 = TrustList::from_value(&json!({
            "version": "2",
            "jkus": ["https://a/"],
            "jwks": {"keys": [{"kty": "RSA", "kid": "k1", "n": "n", "e": "AQAB"}]}
        }))
        .expect("v2");
        assert!(matches!(&v2, TrustList::V2 { jwks: Some(_), .. }));

        let no_keys = TrustList::from_value(&json!({"version": "2", "jwks": {"keys": []}}))
            .expect("v2 without keys");
        assert_eq!(
            no_keys,
            TrustList::V2 {
                jkus: vec![],
                jwks: None
            }
        );

        assert!(TrustList::from_value(&json!({"version": "1"})).is_none());
        assert!(TrustList::from_value(&json!("https://a/")).is_none());
    }

    #[test]
    fn v1_matches_jku_only() {
        let lists = vec![loaded("list", json!(["https://example.org/"]))];
        assert_eq!(
            find_list(&lists, &header(Some("https://example.org/"), None)),
            Some(TrustMatch::Jku("https://example.org/".to_string()))
        );
        assert_eq!(find_list(&lists, &header(Some("https://evil.org/"), None)), None);
        assert_eq!(find_list(&lists, &header(None, Some("k1"))), None);
    }

    #[test]
    fn v2_checks_jkus_before_inline_key_set() {
        let list = loaded(
            "list",
            json!({
                "version": "2",
                "jkus": ["https://example.org/"],
                "jwks": {"keys": [{"kty": "RSA", "kid": "k1", "n": "n", "e": "AQAB"}]}
            }),
        );
        let lists = vec![list];

        assert_eq!(
            find_list(&lists, &header(Some("https://example.org/"), Some("k1"))),
            Some(TrustMatch::Jku("https://example.org/".to_string()))
        );
        assert!(matches!(
            find_list(&lists, &header(Some("https://other.org/"), Some("k1"))),
            Some(TrustMatch::KeySet(jwks)) if jwks.find("k1").is_some()
        ));
        assert_eq!(find_list(&lists, &header(None, Some("k2"))), None);
        assert_eq!(find_list(&lists, &header(None, None)), None);
    }

    #[test]
    fn earlier_lists_take_priority() {
        let lists = vec![
            loaded("first", json!({"version": "2", "jkus": ["https://first.org/"]})),
            loaded("second", json!(["https://first.org/", "https://second.org/"])),
        ];
        assert_eq!(
            find_list(&lists, &header(Some("https://first.org/"), None)),
            Some(TrustMatch::Jku("https://first.org/".to_string()))
        );
        assert_eq!(
            find_list(&lists, &header(Some("https://second.org/"), None)),
            Some(TrustMatch::Jku("https://second.org/".to_string()))
        );
    }

    #[tokio::test]
    async fn load_keeps_order_skips_failures_and_reuses_fresh_cache() {
        let fetcher = StaticFetcher::new();
        fetcher.serve_json("https://lists/one", &json!(["https://a/"]));
        fetcher.fail("https://lists/two", 500);
        fetcher.serve_json("https://lists/three", &json!({"version": "2", "jkus": ["https://c/"]}));
        let cache = DocumentCache::new("trusted_lists", CachePolicy::default());
        let uris: Vec<String> = ["https://lists/one", "https://lists/two", "https://lists/three"]
            .iter()
            .map(|uri| uri.to_string())
            .collect();

        let lists = load_trust_lists(
            &fetcher,
            &cache,
            &uris,
            Duration::from_secs(3600),
            Duration::from_millis(100),
        )
        .await;
        let loaded_uris: Vec<&str> = lists.iter().map(|list| list.uri.as_str()).collect();
        assert_eq!(loaded_uris, vec!["https://lists/one", "https://lists/three"]);

        load_trust_lists(
            &fetcher,
            &cache,
            &uris,
            Duration::from_secs(3600),
            Duration::from_millis(100),
        )
        .await;
        assert_eq!(fetcher.hits("https://lists/one"), 1);
        assert_eq!(fetcher.hits("https://lists/two"), 2);
    }

    #[tokio::test]
    async fn stale_list_falls_back_to_cache_when_refetch_fails() {
        let fetcher = StaticFetcher::new();
        fetcher.fail("https://lists/one", 503);
        let cache = DocumentCache::new("trusted_lists", CachePolicy::default());
        cache.put_at(
            "https://lists/one",
            TrustList::V1 {
                jkus: vec!["https://a/".to_string()],
            },
            10,
            chrono::Utc::now() - chrono::TimeDelta::hours(2),
        );

        let lists = load_trust_lists(
            &fetcher,
            &cache,
            &["https://lists/one".to_string()],
            Duration::from_secs(3600),
            Duration::from_millis(100),
        )
        .await;
        assert_eq!(lists.len(), 1);
        assert_eq!(fetcher.hits("https://lists/one"), 1);
    }
}
