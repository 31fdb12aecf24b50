//! Key resolution and trust-list validation for signed client certificates.
//!
//! # Purpose
//! Decide whether a compact JWS is correctly signed by the key it names and
//! whether that key is vouched for by one or more published trust lists.
//!
//! # How it fits
//! [`TrustValidator::validate`] loads the configured trust lists, matches the
//! token header against them, resolves the verification key with
//! [`KeyResolver`] and verifies the signature with `certs-jose`. Remote key
//! sets and trust lists are memoized in [`DocumentCache`]s owned by the
//! validator.
//!
//! # Key invariants
//! - Fail closed: missing data, fetch failures and inconsistencies make a
//!   token untrusted, never trusted by default.
//! - Untrusted `jku` URIs are never fetched.
//! - `validate` never returns an error; `details` explain every outcome.
//!
//! # Examples
//! ```rust,no_run
//! use certs_trust::{ValidateOptions, validate};
//!
//! async fn check(token: &str) -> bool {
//!     validate(token, &ValidateOptions::default()).await.trusted
//! }
//! ```
//!
//! # Common pitfalls
//! - Key-set URIs are rewritten to https before fetching, so a mocked
//!   transport must serve the https form of the URI.
//! - A URI without a path is normalized with a trailing slash.

mod cache;
mod config;
mod errors;
mod fetch;
mod key_resolver;
mod trust_list;
mod validate;

pub use cache::{CacheEntry, CachePolicy, DocumentCache};
pub use config::TrustConfig;
pub use errors::{FetchError, ResolveError, TrustResult};
pub use fetch::{
    Document, DocumentFetcher, HttpFetcher, StaticFetcher, fallback_after_failure,
    fetch_and_cache, spawn_fetch,
};
pub use key_resolver::{KeyHint, KeyResolver, force_https};
pub use trust_list::{LoadedTrustList, TrustList, TrustMatch, find_list, load_trust_lists};
pub use validate::{
    Detail, TRUSTED_LIST_URI, TrustValidator, ValidateOptions, ValidationResult, clear_cache,
    resolve_key_for_signature, validate,
};
