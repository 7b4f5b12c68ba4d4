//! JWKS document parsing into verification keys.

use super::KeyError;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Algorithms accepted for issuer-published keys.
pub(crate) const SUPPORTED_ALGORITHMS: &[Algorithm] =
    &[Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// Map a JOSE `alg` name onto a supported algorithm.
#[must_use]
pub fn supported_algorithm(name: &str) -> Option<Algorithm> {
    match name {
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        _ => None,
    }
}

/// One public key from a JWKS document.
pub struct VerificationKey {
    kid: Option<String>,
    /// `None` when the JWK carried no `alg`; any RS* algorithm is then accepted
    algorithm: Option<Algorithm>,
    key: DecodingKey,
}

impl VerificationKey {
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Whether a token declaring `alg` may be verified with this key.
    #[must_use]
    pub fn accepts(&self, alg: Algorithm) -> bool {
        match self.algorithm {
            Some(own) => own == alg,
            None => SUPPORTED_ALGORITHMS.contains(&alg),
        }
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Parse a JWKS document (`{"keys": [...]}`) into RSA verification keys.
///
/// Entries that are not RSA signing keys for RS256/RS384/RS512 are skipped.
/// A document without a single usable key is an error so a broken publication
/// never replaces a working key set.
pub fn parse_jwks(text: &str) -> Result<Vec<VerificationKey>, KeyError> {
    let doc: Value =
        serde_json::from_str(text).map_err(|e| KeyError::Parse(format!("invalid JSON: {e}")))?;
    let entries = doc
        .get("keys")
        .and_then(Value::as_array)
        .ok_or_else(|| KeyError::Parse("missing 'keys' array".to_string()))?;

    let mut keys = Vec::with_capacity(entries.len());
    for entry in entries {
        let kty = entry.get("kty").and_then(Value::as_str).unwrap_or("");
        let kid = entry.get("kid").and_then(Value::as_str).map(str::to_string);

        if !kty.eq_ignore_ascii_case("RSA") {
            debug!(kid = ?kid, kty = %kty, "Skipping non-RSA JWK");
            continue;
        }
        if entry.get("use").and_then(Value::as_str) == Some("enc") {
            debug!(kid = ?kid, "Skipping encryption JWK");
            continue;
        }
        let algorithm = match entry.get("alg").and_then(Value::as_str) {
            None => None,
            Some(name) => match supported_algorithm(name) {
                Some(alg) => Some(alg),
                None => {
                    debug!(kid = ?kid, alg = %name, "Skipping JWK with unsupported algorithm");
                    continue;
                }
            },
        };
        let (Some(n), Some(e)) = (
            entry.get("n").and_then(Value::as_str),
            entry.get("e").and_then(Value::as_str),
        ) else {
            debug!(kid = ?kid, "Skipping RSA JWK without modulus/exponent");
            continue;
        };
        // jsonwebtoken expects the base64url-encoded components as published
        match DecodingKey::from_rsa_components(n, e) {
            Ok(key) => keys.push(VerificationKey {
                kid,
                algorithm,
                key,
            }),
            Err(err) => debug!(kid = ?kid, error = %err, "Skipping unparseable RSA JWK"),
        }
    }

    if keys.is_empty() {
        return Err(KeyError::NoUsableKeys);
    }
    Ok(keys)
}
