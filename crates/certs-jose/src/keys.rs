//! Key generation helpers for client certificate signers.
//!
//! # Purpose
//! Produce Ed25519 key pairs that a client can publish (public half, in a
//! JWKS served at its `jku`) and use to sign client certificates.
//!
//! # Key invariants
//! - The private key is a raw 32-byte Ed25519 seed and the public key is always
//!   derived from it, never stored separately.
//! - The `kid` is 16 random bytes, hex encoded. It is an identifier, not a secret.
//! - Private key material is never logged; [`GeneratedKey`]'s `Debug` output
//!   redacts the seed.
//!
//! # How to use
//! Call [`create`] once, persist [`GeneratedKey::private_jwk`] somewhere safe,
//! publish [`GeneratedKey::public_jwk`], and sign with
//! [`GeneratedKey::signing_key`].
use crate::{JoseResult, Jwk, SigningKey};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde_json::Value;

#[derive(Clone)]
pub struct GeneratedKey {
    pub kid: String,
    pub private_key: [u8; 32],
    pub public_jwk: Jwk,
}

impl std::fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("kid", &self.kid)
            .field("private_key", &"<redacted>")
            .field("public_jwk", &self.public_jwk)
            .finish()
    }
}

impl GeneratedKey {
    pub fn signing_key(&self) -> JoseResult<SigningKey> {
        SigningKey::from_ed25519_seed(&self.private_key, Some(self.kid.clone()))
    }

    /// Private JWK (`OKP` with `d`) suitable for [`SigningKey::from_jwk`].
    pub fn private_jwk(&self) -> Jwk {
        let mut jwk = self.public_jwk.clone();
        jwk.other.insert(
            "d".to_string(),
            Value::String(URL_SAFE_NO_PAD.encode(self.private_key)),
        );
        jwk
    }
}

/// Generate a fresh Ed25519 key pair with a random `kid`.
pub fn create() -> JoseResult<GeneratedKey> {
    let mut private_key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut private_key);

    let mut kid_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut kid_bytes);
    let kid = hex::encode(kid_bytes);

    let key = public_from_private(&private_key, kid)?;
    tracing::debug!(kid = %key.kid, "generated ed25519 signing key");
    Ok(key)
}

/// Rebuild a [`GeneratedKey`] from a stored seed.
pub fn public_from_private(private_key: &[u8; 32], kid: impl Into<String>) -> JoseResult<GeneratedKey> {
    let kid = kid.into();
    let signing_key = SigningKey::from_ed25519_seed(private_key, Some(kid.clone()))?;
    Ok(GeneratedKey {
        kid,
        private_key: *private_key,
        public_jwk: signing_key.public_jwk().clone(),
    })
}
