#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use certs_jose::{Jwk, SignOptions, SigningKey, sign};
use certs_trust::{CachePolicy, StaticFetcher, TrustValidator};
use serde_json::{Value, json};
use std::sync::Arc;

pub const KID: &str = "123abc";
pub const JKU: &str = "https://example.org/";
pub const LIST_URI: &str = "https://lists.example.org/trusted.json";

pub fn signer(seed: u8, kid: &str) -> SigningKey {
    SigningKey::from_ed25519_seed(&[seed; 32], Some(kid.to_string())).expect("signing key")
}

pub fn jwks_json(keys: &[&Jwk]) -> Value {
    json!({ "keys": keys })
}

/// Token with `kid` + `jku` and the embedded public key.
pub fn signed_with_jku(key: &SigningKey, payload: &Value, jku: &str) -> String {
    let options = SignOptions {
        jku: Some(jku.to_string()),
        ..SignOptions::default()
    };
    sign(payload, key, &options).expect("sign")
}

/// Token whose header is exactly `header`; the signature segment is junk.
pub fn unsigned_token(header: &Value, payload: &Value) -> String {
    let encode = |value: &Value| URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).expect("json"));
    format!("{}.{}.c2ln", encode(header), encode(payload))
}

pub fn replace_signature(token: &str, signature: &str) -> String {
    let (message, _) = token.rsplit_once('.').expect("segments");
    format!("{message}.{signature}")
}

pub fn validator() -> (Arc<StaticFetcher>, TrustValidator) {
    let fetcher = Arc::new(StaticFetcher::new());
    let validator = TrustValidator::new(fetcher.clone(), CachePolicy::default());
    (fetcher, validator)
}
