use certs_jose::DecodeError;
use std::time::Duration;
use thiserror::Error;

/// Failure to obtain a remote document (key set or trust list).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{uri} responded with status {status}")]
    Status { uri: String, status: u16 },
    #[error("fetching {uri} timed out after {timeout:?}")]
    Timeout { uri: String, timeout: Duration },
    #[error("{uri} parsed as JSON but is not a valid {kind}")]
    InvalidDocument { uri: String, kind: &'static str },
    #[error("{uri} sent a document larger than {max_bytes} bytes")]
    TooLarge { uri: String, max_bytes: usize },
    #[error("background fetch task failed: {0}")]
    Task(String),
}

/// Failure to decide which key verifies a signature.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("invalid hint")]
    InvalidHint,
    #[error("no key available: signature is untrusted and has no jwk in its header")]
    NoKeyAvailable,
    #[error("no key with kid {kid:?} in the trusted key set")]
    KeyNotFound { kid: Option<String> },
    #[error("JWK did not match JOSE header")]
    HeaderMismatch,
    #[error("failed to get key set from {uri}, and it was not in the cache: {source}")]
    Fetch {
        uri: String,
        #[source]
        source: FetchError,
    },
    #[error("invalid key set uri {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },
}

pub type TrustResult<T> = Result<T, ResolveError>;
