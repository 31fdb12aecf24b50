//! JSON Web Key and key set model.
//!
//! # Purpose
//! Represent public (and, for signing, private) keys exchanged in JOSE headers,
//! remote key sets and trust lists, and turn them into verification keys.
//!
//! # Key invariants
//! - A value is a key only if it carries `kty`.
//! - A key set is usable only if at least one entry is a key.
//! - Key equality is equality of canonical JSON: typed members plus every
//!   unknown member, compared after sorting object keys.
//! - The algorithm named by a header must belong to the key's family before any
//!   verification is attempted (no HS/RSA confusion).
use crate::{JoseError, JoseResult};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const PRIVATE_MEMBERS: &[&str] = &["d", "p", "q", "dp", "dq", "qi", "oth", "k"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_field: Option<String>,
    /// RSA modulus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// Every other member, including private key material.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl Jwk {
    pub fn rsa(n: impl Into<String>, e: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            n: Some(n.into()),
            e: Some(e.into()),
            ..Self::empty("RSA")
        }
    }

    pub fn ed25519(x: impl Into<String>) -> Self {
        Self {
            crv: Some("Ed25519".to_string()),
            x: Some(x.into()),
            ..Self::empty("OKP")
        }
    }

    fn empty(kty: &str) -> Self {
        Self {
            kty: kty.to_string(),
            kid: None,
            alg: None,
            use_field: None,
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
            other: BTreeMap::new(),
        }
    }

    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    /// Public half of this key: key type, public components and `kid` only.
    pub fn to_public(&self) -> Self {
        Self {
            kty: self.kty.clone(),
            kid: self.kid.clone(),
            n: self.n.clone(),
            e: self.e.clone(),
            crv: self.crv.clone(),
            x: self.x.clone(),
            y: self.y.clone(),
            ..Self::empty(&self.kty)
        }
    }

    pub fn is_private(&self) -> bool {
        PRIVATE_MEMBERS
            .iter()
            .any(|member| self.other.contains_key(*member))
    }

    /// Canonical JSON form used for key equality checks.
    pub fn canonical_json(&self) -> JoseResult<String> {
        // serde_json maps are ordered, so re-serializing a Value sorts members.
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string(&value)?)
    }

    /// Strict equality of two keys on their canonical JSON.
    pub fn same_key(&self, other: &Jwk) -> bool {
        match (self.canonical_json(), other.canonical_json()) {
            (Ok(left), Ok(right)) => left == right,
            _ => false,
        }
    }

    /// Reject algorithms that do not belong to this key's family.
    pub fn ensure_supports(&self, alg: Algorithm) -> JoseResult<()> {
        let compatible = match (self.kty.as_str(), alg) {
            (
                "RSA",
                Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512,
            ) => true,
            ("EC", Algorithm::ES256) => self.crv.as_deref().is_none_or(|crv| crv == "P-256"),
            ("EC", Algorithm::ES384) => self.crv.as_deref().is_none_or(|crv| crv == "P-384"),
            ("OKP", Algorithm::EdDSA) => self.crv.as_deref() == Some("Ed25519"),
            _ => false,
        };
        if compatible {
            Ok(())
        } else {
            Err(JoseError::AlgorithmMismatch {
                kty: self.kty.clone(),
                alg: algorithm_name(alg).to_string(),
            })
        }
    }

    pub fn decoding_key(&self) -> JoseResult<DecodingKey> {
        let key = match self.kty.as_str() {
            "RSA" => {
                let n = self.required("n", self.n.as_deref())?;
                let e = self.required("e", self.e.as_deref())?;
                DecodingKey::from_rsa_components(n, e)?
            }
            "EC" => {
                let x = self.required("x", self.x.as_deref())?;
                let y = self.required("y", self.y.as_deref())?;
                DecodingKey::from_ec_components(x, y)?
            }
            "OKP" if self.crv.as_deref() == Some("Ed25519") => {
                let x = self.required("x", self.x.as_deref())?;
                DecodingKey::from_ed_components(x)?
            }
            other => return Err(JoseError::UnsupportedKey(format!("kty {other}"))),
        };
        Ok(key)
    }

    fn required<'a>(&self, member: &str, value: Option<&'a str>) -> JoseResult<&'a str> {
        value.ok_or_else(|| {
            JoseError::UnsupportedKey(format!("{} key is missing `{member}`", self.kty))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    pub fn new(keys: Vec<Jwk>) -> Self {
        Self { keys }
    }

    /// Lenient parse: entries that are not keys are skipped, and a set with no
    /// usable key at all is rejected.
    pub fn from_value(value: &Value) -> Option<Self> {
        let entries = value.get("keys")?.as_array()?;
        let keys: Vec<Jwk> = entries
            .iter()
            .filter(|entry| is_jwk(entry))
            .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
            .collect();
        if keys.is_empty() {
            return None;
        }
        Some(Self { keys })
    }

    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|key| key.kid.as_deref() == Some(kid))
    }
}

/// Pick a key out of a set by key id. A missing or empty `kid` never matches.
pub fn find_key<'a>(kid: Option<&str>, jwks: &'a JwkSet) -> Option<&'a Jwk> {
    let found = jwks.find(kid.filter(|kid| !kid.is_empty())?);
    tracing::trace!(kid = ?kid, found = found.is_some(), "find_key");
    found
}

pub fn is_jwk(value: &Value) -> bool {
    value.as_object().is_some_and(|object| object.contains_key("kty"))
}

pub fn is_jwk_set(value: &Value) -> bool {
    value
        .get("keys")
        .and_then(Value::as_array)
        .is_some_and(|keys| keys.iter().any(is_jwk))
}

pub fn algorithm_name(alg: Algorithm) -> &'static str {
    match alg {
        Algorithm::HS256 => "HS256",
        Algorithm::HS384 => "HS384",
        Algorithm::HS512 => "HS512",
        Algorithm::ES256 => "ES256",
        Algorithm::ES384 => "ES384",
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        Algorithm::PS256 => "PS256",
        Algorithm::PS384 => "PS384",
        Algorithm::PS512 => "PS512",
        Algorithm::EdDSA => "EdDSA",
    }
}
