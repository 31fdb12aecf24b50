use thiserror::Error;

/// Failure to decode the unverified parts of a compact token.
///
/// Only the header is load-bearing: a payload that does not parse is kept as
/// an opaque string instead of producing an error.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("compact token must have 3 segments, found {0}")]
    SegmentCount(usize),
    #[error("header segment is not base64url: {0}")]
    HeaderEncoding(#[from] base64::DecodeError),
    #[error("header segment is not JSON: {0}")]
    HeaderJson(#[source] serde_json::Error),
    #[error("header segment is {0}, not a JSON object")]
    HeaderNotObject(&'static str),
}

#[derive(Debug, Error)]
pub enum JoseError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),
    #[error("key type {kty} cannot be used with {alg}")]
    AlgorithmMismatch { kty: String, alg: String },
    #[error("signature does not verify with the given key")]
    InvalidSignature,
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

pub type JoseResult<T> = Result<T, JoseError>;
