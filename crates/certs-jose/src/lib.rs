//! JOSE primitives for signed client certificates.
//!
//! # Purpose
//! Typed JSON Web Keys and key sets, unverified header decoding, compact JWS
//! signing and signature verification. Everything here is synchronous and
//! performs no I/O; key discovery and trust decisions live in `certs-trust`.
//!
//! # Key invariants
//! - Decoding never trusts the header; it only reports what the signer claims.
//! - Verification rejects any algorithm outside the key's family before the
//!   signature is checked.
//! - Signing always advertises the public half of the key only.
//!
//! # Examples
//! ```rust
//! use certs_jose::{SignOptions, decode_header, keys, sign, verify};
//!
//! let key = keys::create().expect("key");
//! let token = sign(&"hello", &key.signing_key().expect("signer"), &SignOptions::default())
//!     .expect("sign");
//! assert_eq!(decode_header(&token).expect("decode").header.alg, "EdDSA");
//! verify(&key.public_jwk, &token).expect("verify");
//! ```
//!
//! # Common pitfalls
//! - A header `kid` of `None` never matches a key set entry, even one without a `kid`.
//! - Payloads that are not JSON decode to a raw string rather than failing.

mod errors;
mod header;
mod jwk;
pub mod keys;
mod sign;
mod verify;

pub use errors::{DecodeError, JoseError, JoseResult};
pub use header::{DecodedToken, JoseHeader, decode_header};
pub use jsonwebtoken::Algorithm;
pub use jwk::{Jwk, JwkSet, algorithm_name, find_key, is_jwk, is_jwk_set};
pub use sign::{SignOptions, SigningKey, sign};
pub use verify::verify;
