use crate::{DecodedToken, JoseError, JoseResult, Jwk, decode_header};
use jsonwebtoken::Algorithm;
use std::str::FromStr;

/// Verify a compact token with `key` and return its decoded parts.
///
/// Only the signature is checked. Expiry, audience and other claim semantics
/// are left to the caller because payloads are not required to be JWT claims.
pub fn verify(key: &Jwk, token: &str) -> JoseResult<DecodedToken> {
    let decoded = decode_header(token)?;
    let alg = Algorithm::from_str(&decoded.header.alg)
        .map_err(|_| JoseError::UnsupportedAlgorithm(decoded.header.alg.clone()))?;
    // Family check first: jsonwebtoken's raw verify trusts the caller here.
    key.ensure_supports(alg)?;
    let decoding_key = key.decoding_key()?;

    let Some((message, signature)) = token.rsplit_once('.') else {
        return Err(JoseError::InvalidSignature);
    };
    if jsonwebtoken::crypto::verify(signature, message.as_bytes(), &decoding_key, alg)? {
        Ok(decoded)
    } else {
        Err(JoseError::InvalidSignature)
    }
}
