//! Compact JWS signing for client certificates and software statements.
//!
//! # Purpose
//! Produce the tokens the trust engine consumes: a header carrying `typ`, `alg`,
//! and either `kid` + `jku`, an embedded public `jwk`, or both.
//!
//! # Key invariants
//! - The embedded `jwk` is always the public half of the signing key, carrying
//!   the same `kid` as the header.
//! - `options.kid` overrides the key's own `kid` everywhere it appears.
//! - Payloads are JSON-encoded, so a bare string is signed as a JSON string.
//!
//! # Security
//! Verifiers should prefer the key published at `jku` over the embedded one;
//! the embedded key exists so the signature can be checked when no trust list
//! is reachable, and verifiers reject tokens whose two keys disagree.
use crate::{JoseError, JoseHeader, JoseResult, Jwk, algorithm_name};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::SigningKey as Ed25519SigningKey;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use jsonwebtoken::{Algorithm, EncodingKey};
use serde::Serialize;
use std::collections::BTreeMap;

const ED25519_SEED_LEN: usize = 32;

/// Private key material ready to sign, plus the public key to advertise.
#[derive(Clone)]
pub struct SigningKey {
    alg: Algorithm,
    encoding_key: EncodingKey,
    public_jwk: Jwk,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print private material.
        f.debug_struct("SigningKey")
            .field("alg", &self.alg)
            .field("public_jwk", &self.public_jwk)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// RS256 key from a PKCS#1 or PKCS#8 PEM and its public JWK.
    pub fn from_rsa_pem(pem: &[u8], public_jwk: Jwk) -> JoseResult<Self> {
        if public_jwk.kty != "RSA" {
            return Err(JoseError::UnsupportedKey(format!(
                "expected an RSA public key, got kty {}",
                public_jwk.kty
            )));
        }
        Ok(Self {
            alg: Algorithm::RS256,
            encoding_key: EncodingKey::from_rsa_pem(pem)?,
            public_jwk: public_jwk.to_public(),
        })
    }

    /// EdDSA key from a raw 32-byte Ed25519 seed.
    pub fn from_ed25519_seed(seed: &[u8; ED25519_SEED_LEN], kid: Option<String>) -> JoseResult<Self> {
        let signing_key = Ed25519SigningKey::from_bytes(seed);
        let der = signing_key
            .to_pkcs8_der()
            .map_err(|err| JoseError::UnsupportedKey(format!("ed25519 pkcs8: {err}")))?;
        let mut public_jwk =
            Jwk::ed25519(URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes()));
        public_jwk.kid = kid;
        Ok(Self {
            alg: Algorithm::EdDSA,
            encoding_key: EncodingKey::from_ed_der(der.as_bytes()),
            public_jwk,
        })
    }

    /// Signing key from a private JWK. Only Ed25519 (`OKP` with `d`) is supported.
    pub fn from_jwk(jwk: &Jwk) -> JoseResult<Self> {
        if jwk.kty != "OKP" || jwk.crv.as_deref() != Some("Ed25519") {
            return Err(JoseError::UnsupportedKey(format!(
                "cannot sign with private kty {}",
                jwk.kty
            )));
        }
        let d = jwk
            .other
            .get("d")
            .and_then(|value| value.as_str())
            .ok_or_else(|| JoseError::UnsupportedKey("private key is missing `d`".to_string()))?;
        let seed: [u8; ED25519_SEED_LEN] = URL_SAFE_NO_PAD
            .decode(d)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| JoseError::UnsupportedKey("`d` is not a 32-byte seed".to_string()))?;
        let key = Self::from_ed25519_seed(&seed, jwk.kid.clone())?;
        if jwk.x.is_some() && jwk.x != key.public_jwk.x {
            return Err(JoseError::UnsupportedKey(
                "`x` does not match the private seed".to_string(),
            ));
        }
        Ok(key)
    }

    pub fn algorithm(&self) -> Algorithm {
        self.alg
    }

    pub fn kid(&self) -> Option<&str> {
        self.public_jwk.kid.as_deref()
    }

    pub fn public_jwk(&self) -> &Jwk {
        &self.public_jwk
    }
}

#[derive(Debug, Clone)]
pub struct SignOptions {
    /// Defaults to `JWT`.
    pub typ: Option<String>,
    /// Overrides the signing key's `kid`.
    pub kid: Option<String>,
    pub jku: Option<String>,
    pub embed_jwk: bool,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            typ: None,
            kid: None,
            jku: None,
            embed_jwk: true,
        }
    }
}

/// Sign `payload` into a compact JWS.
pub fn sign<T: Serialize + ?Sized>(
    payload: &T,
    key: &SigningKey,
    options: &SignOptions,
) -> JoseResult<String> {
    let kid = options.kid.clone().or_else(|| key.public_jwk.kid.clone());
    let jwk = options.embed_jwk.then(|| {
        let mut public = key.public_jwk.to_public();
        public.kid = kid.clone();
        public
    });
    let header = JoseHeader {
        alg: algorithm_name(key.alg).to_string(),
        typ: Some(options.typ.clone().unwrap_or_else(|| "JWT".to_string())),
        kid,
        jku: options.jku.clone(),
        jwk,
        extra: BTreeMap::new(),
    };
    tracing::trace!(kid = ?header.kid, jku = ?header.jku, embed_jwk = options.embed_jwk, "signing payload");

    let header_segment = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let payload_segment = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload)?);
    let message = format!("{header_segment}.{payload_segment}");
    let signature = jsonwebtoken::crypto::sign(message.as_bytes(), &key.encoding_key, key.alg)?;
    Ok(format!("{message}.{signature}"))
}
