//! Multi-issuer token validation.
//!
//! Checks run in a fixed order: structure, issuer, key, signature, temporal
//! claims, audience, then scopes/roles. The first failure wins, except that an
//! expired (or not yet valid) token is reported as EXPIRED even when key lookup
//! or signature verification failed first. Structural and unknown-issuer
//! failures are never overridden.

use super::jwks::{supported_algorithm, JwksKeyCache, KeyError};
use super::result::{roles_of, scopes_of, ErrorCategory, TokenError, ValidationResult};
use crate::config::{IssuerConfig, IssuerRegistry};
use crate::metrics::{SecurityEventCounter, UNATTRIBUTED_ISSUER};
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::{alphabet, Engine as _};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

// base64url, tolerating producers that pad their segments
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Scopes and roles a caller context demands on top of the issuer's own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub required_scopes: Vec<String>,
    pub required_roles: Vec<String>,
}

impl AccessPolicy {
    pub fn new(required_scopes: Vec<String>, required_roles: Vec<String>) -> Self {
        Self {
            required_scopes,
            required_roles,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.required_scopes.is_empty() && self.required_roles.is_empty()
    }
}

/// Internal rejection reasons; each maps onto one [`ErrorCategory`].
#[derive(Debug)]
enum Rejection {
    Malformed { reason: String },
    IssuerUnknown { iss: Option<String> },
    KeyUnavailable { issuer: String, error: KeyError },
    UnsupportedAlgorithm { alg: String },
    AlgorithmMismatch { alg: String, kid: Option<String> },
    InvalidSignature { detail: String },
    Expired { exp: i64, now: i64 },
    NotYetValid { nbf: i64, now: i64 },
    AudienceMismatch { expected: String, got: Vec<String> },
    ClientMismatch { expected: String, got: String },
    InsufficientScopes { missing: Vec<String> },
    MissingRoles { missing: Vec<String> },
}

impl Rejection {
    fn category(&self) -> ErrorCategory {
        match self {
            Rejection::Malformed { .. } => ErrorCategory::Malformed,
            Rejection::IssuerUnknown { .. } => ErrorCategory::IssuerUnknown,
            Rejection::KeyUnavailable { .. } => ErrorCategory::KeyUnavailable,
            Rejection::UnsupportedAlgorithm { .. }
            | Rejection::AlgorithmMismatch { .. }
            | Rejection::InvalidSignature { .. } => ErrorCategory::SignatureInvalid,
            Rejection::Expired { .. } | Rejection::NotYetValid { .. } => ErrorCategory::Expired,
            Rejection::AudienceMismatch { .. } | Rejection::ClientMismatch { .. } => {
                ErrorCategory::AudienceMismatch
            }
            Rejection::InsufficientScopes { .. } | Rejection::MissingRoles { .. } => {
                ErrorCategory::ScopeDenied
            }
        }
    }

    /// Operator-facing message. Kept free of timestamps so repeats group together.
    fn message(&self) -> String {
        match self {
            Rejection::Malformed { reason } => format!("malformed token: {reason}"),
            Rejection::IssuerUnknown { iss: Some(iss) } => format!("unknown issuer '{iss}'"),
            Rejection::IssuerUnknown { iss: None } => "token has no iss claim".to_string(),
            Rejection::KeyUnavailable { error, .. } => format!("signing key unavailable: {error}"),
            Rejection::UnsupportedAlgorithm { alg } => format!("unsupported algorithm '{alg}'"),
            Rejection::AlgorithmMismatch { alg, .. } => {
                format!("algorithm '{alg}' does not match the signing key")
            }
            Rejection::InvalidSignature { .. } => "invalid signature".to_string(),
            Rejection::Expired { .. } => "token expired".to_string(),
            Rejection::NotYetValid { .. } => "token not yet valid".to_string(),
            Rejection::AudienceMismatch { expected, .. } => {
                format!("audience '{expected}' not present")
            }
            Rejection::ClientMismatch { expected, got } => {
                format!("authorized party '{got}' is not client '{expected}'")
            }
            Rejection::InsufficientScopes { missing } => {
                format!("missing scopes: {}", missing.join(" "))
            }
            Rejection::MissingRoles { missing } => format!("missing roles: {}", missing.join(" ")),
        }
    }

    fn log(&self, issuer: &str) {
        match self {
            Rejection::Malformed { reason } => {
                debug!(issuer, reason = %reason, "JWT validation failed: malformed token");
            }
            Rejection::IssuerUnknown { iss } => {
                warn!(iss = ?iss, "JWT validation failed: unknown issuer");
            }
            Rejection::KeyUnavailable { issuer, error } => {
                warn!(issuer = %issuer, error = %error, "JWT validation failed: signing key unavailable");
            }
            Rejection::UnsupportedAlgorithm { alg } => {
                warn!(issuer, alg = %alg, "JWT validation failed: unsupported algorithm");
            }
            Rejection::AlgorithmMismatch { alg, kid } => {
                warn!(issuer, alg = %alg, kid = ?kid, "JWT validation failed: algorithm does not match key");
            }
            Rejection::InvalidSignature { detail } => {
                warn!(issuer, detail = %detail, "JWT validation failed: invalid signature");
            }
            Rejection::Expired { exp, now } => {
                debug!(issuer, exp, now, "JWT validation failed: token expired");
            }
            Rejection::NotYetValid { nbf, now } => {
                debug!(issuer, nbf, now, "JWT validation failed: token not yet valid");
            }
            Rejection::AudienceMismatch { expected, got } => {
                warn!(issuer, expected = %expected, got = ?got, "JWT validation failed: audience mismatch");
            }
            Rejection::ClientMismatch { expected, got } => {
                warn!(issuer, expected = %expected, got = %got, "JWT validation failed: azp mismatch");
            }
            Rejection::InsufficientScopes { missing } => {
                debug!(issuer, missing = ?missing, "JWT validation failed: insufficient scopes");
            }
            Rejection::MissingRoles { missing } => {
                debug!(issuer, missing = ?missing, "JWT validation failed: missing roles");
            }
        }
    }
}

/// Result of inspecting `exp` / `nbf` before any key work is done.
enum Temporal {
    Current,
    Stale(Rejection),
}

struct Decoded {
    header: Value,
    claims: Value,
}

/// Validates bearer tokens against every configured issuer.
pub struct TokenValidator {
    registry: Arc<IssuerRegistry>,
    keys: Arc<JwksKeyCache>,
    events: Arc<SecurityEventCounter>,
    leeway_secs: i64,
}

impl TokenValidator {
    /// Leeway for temporal claims is taken from the key cache settings.
    pub fn new(
        registry: Arc<IssuerRegistry>,
        keys: Arc<JwksKeyCache>,
        events: Arc<SecurityEventCounter>,
    ) -> Self {
        let leeway_secs = i64::try_from(keys.settings().leeway.as_secs()).unwrap_or(i64::MAX);
        Self {
            registry,
            keys,
            events,
            leeway_secs,
        }
    }

    #[must_use]
    pub fn events(&self) -> &Arc<SecurityEventCounter> {
        &self.events
    }

    #[must_use]
    pub fn keys(&self) -> &Arc<JwksKeyCache> {
        &self.keys
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<IssuerRegistry> {
        &self.registry
    }

    /// Validate with the issuer's own requirements only.
    pub fn validate(&self, raw_token: &str) -> ValidationResult {
        self.validate_with_policy(raw_token, &AccessPolicy::default())
    }

    /// Validate and additionally demand `policy`'s scopes and roles.
    pub fn validate_with_policy(&self, raw_token: &str, policy: &AccessPolicy) -> ValidationResult {
        let started = Instant::now();
        let (bucket, result) = self.evaluate(raw_token.trim(), policy);
        self.events.record(&bucket, &result, started.elapsed());
        result
    }

    fn evaluate(&self, token: &str, policy: &AccessPolicy) -> (String, ValidationResult) {
        let unattributed = || UNATTRIBUTED_ISSUER.to_string();

        let Decoded { header, claims } = match decode_segments(token) {
            Ok(d) => d,
            Err(reason) => {
                return (
                    unattributed(),
                    reject(Rejection::Malformed { reason }, None, None, None, UNATTRIBUTED_ISSUER),
                )
            }
        };

        let iss = claims.get("iss").and_then(Value::as_str).map(str::to_string);
        let table = self.registry.snapshot();
        let Some(issuer) = iss.as_deref().and_then(|i| table.by_issuer_uri(i)).cloned() else {
            return (
                unattributed(),
                reject(
                    Rejection::IssuerUnknown { iss },
                    Some(header),
                    Some(claims),
                    None,
                    UNATTRIBUTED_ISSUER,
                ),
            );
        };
        let name = issuer.name.clone();

        let temporal = match self.temporal(&claims, unix_now()) {
            Ok(t) => t,
            Err(reason) => {
                let result = reject(
                    Rejection::Malformed { reason },
                    Some(header),
                    Some(claims),
                    Some(name.clone()),
                    &name,
                );
                return (name, result);
            }
        };

        let outcome = self.check_signed(token, &header, &claims, &issuer, temporal, policy);
        let result = match outcome {
            Ok(()) => {
                debug!(issuer = %name, "JWT validation succeeded");
                ValidationResult::success(header, claims, name.clone())
            }
            Err(rejection) => reject(rejection, Some(header), Some(claims), Some(name.clone()), &name),
        };
        (name, result)
    }

    /// Everything after the issuer is known: key, signature, time, audience, authorization.
    fn check_signed(
        &self,
        token: &str,
        header: &Value,
        claims: &Value,
        issuer: &IssuerConfig,
        temporal: Temporal,
        policy: &AccessPolicy,
    ) -> Result<(), Rejection> {
        // EXPIRED takes precedence over key and signature problems
        let expired_or = |temporal: Temporal, other: Rejection| match temporal {
            Temporal::Stale(expired) => expired,
            Temporal::Current => other,
        };

        let kid = match header.get("kid") {
            None | Some(Value::Null) => None,
            Some(Value::String(kid)) => Some(kid.as_str()),
            Some(_) => {
                return Err(Rejection::Malformed {
                    reason: "kid is not a string".to_string(),
                })
            }
        };
        let Some(alg_name) = header.get("alg").and_then(Value::as_str) else {
            return Err(Rejection::Malformed {
                reason: "header has no alg".to_string(),
            });
        };

        let key = match self.keys.get_key(issuer, kid) {
            Ok(key) => key,
            Err(error) => {
                return Err(expired_or(
                    temporal,
                    Rejection::KeyUnavailable {
                        issuer: issuer.name.clone(),
                        error,
                    },
                ))
            }
        };

        let Some(alg) = supported_algorithm(alg_name) else {
            return Err(expired_or(
                temporal,
                Rejection::UnsupportedAlgorithm {
                    alg: alg_name.to_string(),
                },
            ));
        };
        if !key.accepts(alg) {
            return Err(expired_or(
                temporal,
                Rejection::AlgorithmMismatch {
                    alg: alg_name.to_string(),
                    kid: kid.map(str::to_string),
                },
            ));
        }

        // Signature only; temporal and audience claims are checked below with our own rules
        let mut validation = jsonwebtoken::Validation::new(alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        if let Err(e) = jsonwebtoken::decode::<Value>(token, key.decoding_key(), &validation) {
            return Err(expired_or(
                temporal,
                Rejection::InvalidSignature {
                    detail: format!("{:?}", e.kind()),
                },
            ));
        }

        if let Temporal::Stale(rejection) = temporal {
            return Err(rejection);
        }

        if let Some(expected) = &issuer.audience {
            let got = audiences(claims);
            if !got.iter().any(|a| a == expected) {
                return Err(Rejection::AudienceMismatch {
                    expected: expected.clone(),
                    got,
                });
            }
        }
        if let (Some(expected), Some(azp)) = (
            &issuer.client_id,
            claims.get("azp").and_then(Value::as_str),
        ) {
            if azp != expected {
                return Err(Rejection::ClientMismatch {
                    expected: expected.clone(),
                    got: azp.to_string(),
                });
            }
        }

        let granted = scopes_of(claims);
        let missing = missing_from(&granted, &issuer.required_scopes, &policy.required_scopes);
        if !missing.is_empty() {
            return Err(Rejection::InsufficientScopes { missing });
        }
        let granted = roles_of(claims);
        let missing = missing_from(&granted, &issuer.required_roles, &policy.required_roles);
        if !missing.is_empty() {
            return Err(Rejection::MissingRoles { missing });
        }

        Ok(())
    }

    /// `exp` is required and must lie in the future (equality is expired);
    /// `nbf`, when present, must not lie in the future. Leeway widens both.
    fn temporal(&self, claims: &Value, now: i64) -> Result<Temporal, String> {
        let exp = match claims.get("exp") {
            None => return Err("missing exp claim".to_string()),
            Some(v) => numeric_date(v).ok_or_else(|| "exp is not a number".to_string())?,
        };
        let nbf = match claims.get("nbf") {
            None | Some(Value::Null) => None,
            Some(v) => Some(numeric_date(v).ok_or_else(|| "nbf is not a number".to_string())?),
        };

        if now >= exp.saturating_add(self.leeway_secs) {
            return Ok(Temporal::Stale(Rejection::Expired { exp, now }));
        }
        if let Some(nbf) = nbf {
            if nbf > now.saturating_add(self.leeway_secs) {
                return Ok(Temporal::Stale(Rejection::NotYetValid { nbf, now }));
            }
        }
        Ok(Temporal::Current)
    }
}

fn reject(
    rejection: Rejection,
    header: Option<Value>,
    claims: Option<Value>,
    issuer: Option<String>,
    bucket: &str,
) -> ValidationResult {
    rejection.log(bucket);
    let error = TokenError::new(rejection.category(), rejection.message());
    ValidationResult::failure(error, header, claims, issuer)
}

/// Split and decode the three segments; header and payload must be JSON objects.
fn decode_segments(token: &str) -> Result<Decoded, String> {
    let mut parts = token.split('.');
    let (Some(h), Some(p), Some(s), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err("expected three dot-separated segments".to_string());
    };
    if h.is_empty() || p.is_empty() {
        return Err("empty header or payload segment".to_string());
    }

    let json_segment = |segment: &str, what: &str| -> Result<Value, String> {
        let bytes = SEGMENT_ENGINE
            .decode(segment)
            .map_err(|e| format!("{what} is not base64url: {e}"))?;
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| format!("{what} is not JSON: {e}"))?;
        if value.is_object() {
            Ok(value)
        } else {
            Err(format!("{what} is not a JSON object"))
        }
    };

    let header = json_segment(h, "header")?;
    let claims = json_segment(p, "payload")?;
    SEGMENT_ENGINE
        .decode(s)
        .map_err(|e| format!("signature is not base64url: {e}"))?;
    Ok(Decoded { header, claims })
}

/// NumericDate: integer seconds, fractional seconds truncated.
fn numeric_date(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}

fn audiences(claims: &Value) -> Vec<String> {
    match claims.get("aud") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn missing_from(granted: &[String], a: &[String], b: &[String]) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for required in a.iter().chain(b) {
        if !granted.contains(required) && !missing.contains(required) {
            missing.push(required.clone());
        }
    }
    missing
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
