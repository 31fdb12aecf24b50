//! Unverified decoding of compact JWS tokens.
//!
//! The header returned here is an assertion made by whoever produced the token.
//! Nothing in it may be trusted until the signature has been checked with a key
//! obtained from a trusted source.
use crate::{DecodeError, Jwk};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// JOSE header of a compact token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoseHeader {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// URI where the signer claims its key set is published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jku: Option<String>,
    /// Public key embedded directly by the signer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl JoseHeader {
    /// Build a header from any JSON object.
    ///
    /// Known members with an unexpected type are left unset and kept verbatim
    /// in `extra`, so a header is only rejected when it is not an object.
    pub fn from_object(mut object: Map<String, Value>) -> Self {
        let alg = take_typed::<String>(&mut object, "alg").unwrap_or_default();
        let typ = take_typed(&mut object, "typ");
        let kid = take_typed(&mut object, "kid");
        let jku = take_typed(&mut object, "jku");
        let jwk = take_typed::<Jwk>(&mut object, "jwk");
        Self {
            alg,
            typ,
            kid,
            jku,
            jwk,
            extra: object.into_iter().collect(),
        }
    }
}

fn take_typed<T: DeserializeOwned>(object: &mut Map<String, Value>, name: &str) -> Option<T> {
    let value = object.get(name)?;
    match serde_json::from_value(value.clone()) {
        Ok(typed) => {
            object.remove(name);
            Some(typed)
        }
        Err(error) => {
            tracing::debug!(member = name, %error, "header member has an unexpected shape, keeping it untyped");
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToken {
    pub header: JoseHeader,
    /// Parsed JSON payload, or the raw segment when it is not JSON.
    pub payload: Value,
    pub signature: String,
}

/// Split a compact token and decode its header and payload without verifying.
pub fn decode_header(token: &str) -> Result<DecodedToken, DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    let [header_segment, payload_segment, signature] = segments.as_slice() else {
        return Err(DecodeError::SegmentCount(segments.len()));
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_segment)?;
    let header = match serde_json::from_slice::<Value>(&header_bytes)
        .map_err(DecodeError::HeaderJson)?
    {
        Value::Object(object) => JoseHeader::from_object(object),
        other => return Err(DecodeError::HeaderNotObject(json_kind(&other))),
    };
    let payload = decode_payload(payload_segment);

    tracing::trace!(
        alg = %header.alg,
        kid = ?header.kid,
        jku = ?header.jku,
        has_jwk = header.jwk.is_some(),
        "decoded token header"
    );
    Ok(DecodedToken {
        header,
        payload,
        signature: (*signature).to_string(),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn decode_payload(segment: &str) -> Value {
    let parsed = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|err| err.to_string())
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|err| err.to_string()));
    match parsed {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(%error, "payload is not JSON, keeping the raw segment as a string");
            Value::String(segment.to_string())
        }
    }
}
