//! Key resolution against every kind of trust hint.
//!
//! # Purpose
//! Exercise the resolver's decision tree and its fetch/cache race with an
//! in-memory transport, so no test touches the network.
//!
//! # Key invariants
//! - An untrusted `jku` is never fetched.
//! - A key that disagrees with the header's embedded `jwk` is rejected.
//! - Cached key sets cover fetch failures only within the grace window.
mod common;

use certs_jose::JwkSet;
use certs_trust::{
    CachePolicy, DocumentCache, FetchError, KeyHint, KeyResolver, ResolveError, StaticFetcher,
};
use chrono::{TimeDelta, Utc};
use common::{KID, jwks_json, signer, unsigned_token};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const JWKS_URI: &str = "https://keys.example.org/jwks";
const TIMEOUT: Duration = Duration::from_millis(200);

fn resolver() -> (Arc<StaticFetcher>, KeyResolver) {
    let fetcher = Arc::new(StaticFetcher::new());
    let cache = Arc::new(DocumentCache::new("key_sets", CachePolicy::default()));
    (fetcher.clone(), KeyResolver::new(fetcher, cache))
}

fn payload() -> Value {
    json!("FOO BAR")
}

#[tokio::test]
async fn untrusted_hint_uses_header_jwk() {
    let (_, resolver) = resolver();
    let key = signer(1, KID);
    let token = unsigned_token(&json!({"alg": "EdDSA", "jwk": key.public_jwk()}), &payload());

    let jwk = resolver
        .resolve_key_for_signature(&token, &KeyHint::Untrusted, TIMEOUT)
        .await
        .expect("jwk");
    assert_eq!(&jwk, key.public_jwk());
}

#[tokio::test]
async fn untrusted_hint_never_fetches_header_jku() {
    let (fetcher, resolver) = resolver();
    let key = signer(1, KID);
    fetcher.serve_json(JWKS_URI, &jwks_json(&[key.public_jwk()]));
    let token = unsigned_token(
        &json!({"alg": "EdDSA", "jku": JWKS_URI, "kid": KID}),
        &payload(),
    );

    let err = resolver
        .resolve_key_for_signature(&token, &KeyHint::Untrusted, TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::NoKeyAvailable));
    assert_eq!(fetcher.hits(JWKS_URI), 0);
}

#[tokio::test]
async fn uri_hint_fetches_key_set_and_selects_kid() {
    let (fetcher, resolver) = resolver();
    let key = signer(1, KID);
    let other = signer(2, "other");
    fetcher.serve_json(JWKS_URI, &jwks_json(&[other.public_jwk(), key.public_jwk()]));
    let token = unsigned_token(
        &json!({"alg": "EdDSA", "jku": JWKS_URI, "kid": KID}),
        &payload(),
    );

    let jwk = resolver
        .resolve_key_for_signature(&token, &KeyHint::TrustedUri(JWKS_URI.to_string()), TIMEOUT)
        .await
        .expect("jwk");
    assert_eq!(&jwk, key.public_jwk());
    assert!(resolver.key_sets().get(JWKS_URI).is_some());
}

#[tokio::test]
async fn uri_hint_wins_over_header_jku() {
    let (fetcher, resolver) = resolver();
    let key = signer(1, KID);
    fetcher.serve_json(JWKS_URI, &jwks_json(&[key.public_jwk()]));
    let token = unsigned_token(
        &json!({"alg": "EdDSA", "jku": "https://keys.example.org/does_not_exist", "kid": KID}),
        &payload(),
    );

    let jwk = resolver
        .resolve_key_for_signature(&token, &KeyHint::TrustedUri(JWKS_URI.to_string()), TIMEOUT)
        .await
        .expect("jwk");
    assert_eq!(&jwk, key.public_jwk());
    assert_eq!(fetcher.hits("https://keys.example.org/does_not_exist"), 0);
}

#[tokio::test]
async fn uri_hint_is_upgraded_to_https() {
    let (fetcher, resolver) = resolver();
    let key = signer(1, KID);
    fetcher.serve_json(JWKS_URI, &jwks_json(&[key.public_jwk()]));
    let token = unsigned_token(&json!({"alg": "EdDSA", "kid": KID}), &payload());

    let jwk = resolver
        .resolve_key_for_signature(
            &token,
            &KeyHint::TrustedUri("http://keys.example.org/jwks".to_string()),
            TIMEOUT,
        )
        .await
        .expect("jwk");
    assert_eq!(&jwk, key.public_jwk());
    assert_eq!(fetcher.hits("http://keys.example.org/jwks"), 0);
    assert_eq!(fetcher.hits(JWKS_URI), 1);
}

#[tokio::test]
async fn key_and_key_set_hints_need_no_network() {
    let (fetcher, resolver) = resolver();
    let key = signer(1, KID);
    let token = unsigned_token(&json!({"alg": "EdDSA", "kid": KID}), &payload());

    let from_key = resolver
        .resolve_key_for_signature(&token, &KeyHint::TrustedKey(key.public_jwk().clone()), TIMEOUT)
        .await
        .expect("key hint");
    assert_eq!(&from_key, key.public_jwk());

    let set = JwkSet::new(vec![signer(2, "other").public_jwk().clone(), key.public_jwk().clone()]);
    let from_set = resolver
        .resolve_key_for_signature(&token, &KeyHint::TrustedKeySet(set), TIMEOUT)
        .await
        .expect("set hint");
    assert_eq!(&from_set, key.public_jwk());
    assert_eq!(fetcher.hits(JWKS_URI), 0);
}

#[tokio::test]
async fn key_hint_with_other_kid_is_invalid() {
    let (_, resolver) = resolver();
    let token = unsigned_token(&json!({"alg": "EdDSA", "kid": KID}), &payload());
    let err = resolver
        .resolve_key_for_signature(
            &token,
            &KeyHint::TrustedKey(signer(2, "other").public_jwk().clone()),
            TIMEOUT,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::InvalidHint));
}

#[tokio::test]
async fn key_set_hint_without_kid_is_not_found() {
    let (_, resolver) = resolver();
    let token = unsigned_token(&json!({"alg": "EdDSA", "kid": "missing"}), &payload());
    let set = JwkSet::new(vec![signer(1, KID).public_jwk().clone()]);
    let err = resolver
        .resolve_key_for_signature(&token, &KeyHint::TrustedKeySet(set), TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::KeyNotFound { kid: Some(kid) } if kid == "missing"));
}

#[test]
fn json_hints_true_and_empty_object_are_invalid() {
    assert!(matches!(
        KeyHint::from_json(&json!(true)),
        Err(ResolveError::InvalidHint)
    ));
    assert!(matches!(
        KeyHint::from_json(&json!({})),
        Err(ResolveError::InvalidHint)
    ));
}

#[tokio::test]
async fn broken_and_invalid_key_sets_are_fetch_errors() {
    let (fetcher, resolver) = resolver();
    fetcher.serve("https://keys.example.org/broken", "{ not json");
    fetcher.serve_json("https://keys.example.org/invalid", &json!({"keys": [{"foo": "bar"}]}));
    let token = unsigned_token(&json!({"alg": "EdDSA", "kid": KID}), &payload());

    for uri in ["https://keys.example.org/broken", "https://keys.example.org/invalid"] {
        let err = resolver
            .resolve_key_for_signature(&token, &KeyHint::TrustedUri(uri.to_string()), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Fetch {
                source: FetchError::InvalidDocument { .. },
                ..
            }
        ));
    }
}

#[tokio::test]
async fn slow_key_set_times_out() {
    let (fetcher, resolver) = resolver();
    fetcher.stall(JWKS_URI);
    let token = unsigned_token(&json!({"alg": "EdDSA", "kid": KID}), &payload());

    let err = resolver
        .resolve_key_for_signature(
            &token,
            &KeyHint::TrustedUri(JWKS_URI.to_string()),
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Fetch {
            source: FetchError::Timeout { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn header_jku_and_jwk_must_agree() {
    let (fetcher, resolver) = resolver();
    let key = signer(1, KID);
    let imposter = signer(9, KID);
    fetcher.serve_json(JWKS_URI, &jwks_json(&[key.public_jwk()]));
    let hint = KeyHint::TrustedUri(JWKS_URI.to_string());

    let agree = unsigned_token(
        &json!({"alg": "EdDSA", "jku": JWKS_URI, "kid": KID, "jwk": key.public_jwk()}),
        &payload(),
    );
    assert_eq!(
        &resolver
            .resolve_key_for_signature(&agree, &hint, TIMEOUT)
            .await
            .expect("agree"),
        key.public_jwk()
    );

    let disagree = unsigned_token(
        &json!({"alg": "EdDSA", "jku": JWKS_URI, "kid": KID, "jwk": imposter.public_jwk()}),
        &payload(),
    );
    let err = resolver
        .resolve_key_for_signature(&disagree, &hint, TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::HeaderMismatch));
}

#[tokio::test]
async fn failed_fetch_uses_stale_cache_within_grace() {
    let (fetcher, resolver) = resolver();
    let key = signer(1, KID);
    let jwks = JwkSet::new(vec![key.public_jwk().clone()]);
    resolver
        .key_sets()
        .put_at(JWKS_URI, jwks, 100, Utc::now() - TimeDelta::hours(2));
    fetcher.fail(JWKS_URI, 503);
    let token = unsigned_token(&json!({"alg": "EdDSA", "kid": KID}), &payload());

    let jwk = resolver
        .resolve_key_for_signature(&token, &KeyHint::TrustedUri(JWKS_URI.to_string()), TIMEOUT)
        .await
        .expect("cached key");
    assert_eq!(&jwk, key.public_jwk());
    assert_eq!(fetcher.hits(JWKS_URI), 1);
}

#[tokio::test]
async fn failed_fetch_past_grace_evicts_and_errors() {
    let (fetcher, resolver) = resolver();
    let key = signer(1, KID);
    let jwks = JwkSet::new(vec![key.public_jwk().clone()]);
    resolver
        .key_sets()
        .put_at(JWKS_URI, jwks, 100, Utc::now() - TimeDelta::hours(25));
    fetcher.fail(JWKS_URI, 503);
    let token = unsigned_token(&json!({"alg": "EdDSA", "kid": KID}), &payload());

    let err = resolver
        .resolve_key_for_signature(&token, &KeyHint::TrustedUri(JWKS_URI.to_string()), TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Fetch {
            source: FetchError::Status { status: 503, .. },
            ..
        }
    ));
    assert!(resolver.key_sets().get(JWKS_URI).is_none());
}

#[tokio::test]
async fn works_from_cache_when_key_set_dies_after_first_fetch() {
    let (fetcher, resolver) = resolver();
    let key = signer(1, KID);
    fetcher.serve_json(JWKS_URI, &jwks_json(&[key.public_jwk()]));
    let token = unsigned_token(&json!({"alg": "EdDSA", "kid": KID}), &payload());
    let hint = KeyHint::TrustedUri(JWKS_URI.to_string());

    let first = resolver
        .resolve_key_for_signature(&token, &hint, TIMEOUT)
        .await
        .expect("first");
    fetcher.fail(JWKS_URI, 500);
    let second = resolver
        .resolve_key_for_signature(&token, &hint, TIMEOUT)
        .await
        .expect("second");
    assert_eq!(first, second);
}

#[tokio::test]
async fn fresh_cache_hit_returns_without_waiting_and_refreshes_in_background() {
    let (fetcher, resolver) = resolver();
    let key = signer(1, KID);
    let rotated = signer(2, "rotated");
    resolver
        .key_sets()
        .put(JWKS_URI, JwkSet::new(vec![key.public_jwk().clone()]), 100);
    fetcher.serve_json(JWKS_URI, &jwks_json(&[key.public_jwk(), rotated.public_jwk()]));
    let token = unsigned_token(&json!({"alg": "EdDSA", "kid": KID}), &payload());

    let jwk = resolver
        .resolve_key_for_signature(&token, &KeyHint::TrustedUri(JWKS_URI.to_string()), TIMEOUT)
        .await
        .expect("cached");
    assert_eq!(&jwk, key.public_jwk());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fetcher.hits(JWKS_URI), 1);
    let refreshed = resolver.key_sets().get(JWKS_URI).expect("entry");
    assert!(refreshed.value.find("rotated").is_some());
}

#[tokio::test]
async fn fresh_cache_hit_survives_a_stalled_fetch() {
    let (fetcher, resolver) = resolver();
    let key = signer(1, KID);
    resolver
        .key_sets()
        .put(JWKS_URI, JwkSet::new(vec![key.public_jwk().clone()]), 100);
    fetcher.stall(JWKS_URI);
    let token = unsigned_token(&json!({"alg": "EdDSA", "kid": KID}), &payload());

    let jwk = tokio::time::timeout(
        Duration::from_millis(100),
        resolver.resolve_key_for_signature(
            &token,
            &KeyHint::TrustedUri(JWKS_URI.to_string()),
            Duration::from_secs(30),
        ),
    )
    .await
    .expect("returned before fetch finished")
    .expect("cached");
    assert_eq!(&jwk, key.public_jwk());
}

#[tokio::test]
async fn fresh_cache_without_kid_waits_for_fetch() {
    let (fetcher, resolver) = resolver();
    let old = signer(1, "old");
    let new = signer(2, "new");
    resolver
        .key_sets()
        .put(JWKS_URI, JwkSet::new(vec![old.public_jwk().clone()]), 100);
    fetcher.serve_json(JWKS_URI, &jwks_json(&[old.public_jwk(), new.public_jwk()]));
    let token = unsigned_token(&json!({"alg": "EdDSA", "kid": "new"}), &payload());

    let jwk = resolver
        .resolve_key_for_signature(&token, &KeyHint::TrustedUri(JWKS_URI.to_string()), TIMEOUT)
        .await
        .expect("fetched");
    assert_eq!(&jwk, new.public_jwk());
}
