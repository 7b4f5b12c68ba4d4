//! Outcome of a single token validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Closed set of reasons a token is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Not three base64url segments of JSON, or required claims unreadable
    Malformed,
    /// Signature does not verify, or the algorithm is not the key's
    SignatureInvalid,
    /// `exp` reached, or `nbf` still in the future
    Expired,
    /// `iss` matches no configured issuer
    IssuerUnknown,
    /// `aud` (or `azp`) does not match the issuer's configuration
    AudienceMismatch,
    /// No usable signing key for the issuer right now
    KeyUnavailable,
    /// Required scope or role absent
    ScopeDenied,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 7] = [
        ErrorCategory::Malformed,
        ErrorCategory::SignatureInvalid,
        ErrorCategory::Expired,
        ErrorCategory::IssuerUnknown,
        ErrorCategory::AudienceMismatch,
        ErrorCategory::KeyUnavailable,
        ErrorCategory::ScopeDenied,
    ];

    /// Wire name, e.g. `SIGNATURE_INVALID`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Malformed => "MALFORMED",
            ErrorCategory::SignatureInvalid => "SIGNATURE_INVALID",
            ErrorCategory::Expired => "EXPIRED",
            ErrorCategory::IssuerUnknown => "ISSUER_UNKNOWN",
            ErrorCategory::AudienceMismatch => "AUDIENCE_MISMATCH",
            ErrorCategory::KeyUnavailable => "KEY_UNAVAILABLE",
            ErrorCategory::ScopeDenied => "SCOPE_DENIED",
        }
    }

    /// Client-facing sentence. Carries no issuer, key or cache detail.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            ErrorCategory::Malformed => "token is malformed",
            ErrorCategory::SignatureInvalid => "token signature is invalid",
            ErrorCategory::Expired => "token is expired or not yet valid",
            ErrorCategory::IssuerUnknown => "token issuer is not trusted",
            ErrorCategory::AudienceMismatch => "token audience is not accepted",
            ErrorCategory::KeyUnavailable => "signing key is not available",
            ErrorCategory::ScopeDenied => "token lacks a required scope or role",
        }
    }

    /// Position in [`ErrorCategory::ALL`]; used to index counter arrays.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a token was rejected: a category plus an operator-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenError {
    pub category: ErrorCategory,
    pub message: String,
}

impl TokenError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

impl std::error::Error for TokenError {}

/// Immutable result of one validation call.
///
/// Header and claims are attached whenever the token could be decoded, even
/// when it was rejected, so verification tooling can show what was inspected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<TokenError>,
}

impl ValidationResult {
    pub(crate) fn success(header: Value, claims: Value, issuer: String) -> Self {
        Self {
            valid: true,
            header: Some(header),
            claims: Some(claims),
            issuer: Some(issuer),
            error: None,
        }
    }

    pub(crate) fn failure(
        error: TokenError,
        header: Option<Value>,
        claims: Option<Value>,
        issuer: Option<String>,
    ) -> Self {
        Self {
            valid: false,
            header,
            claims,
            issuer,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Decoded JOSE header.
    #[must_use]
    pub fn header(&self) -> Option<&Value> {
        self.header.as_ref()
    }

    /// Decoded payload.
    #[must_use]
    pub fn claims(&self) -> Option<&Value> {
        self.claims.as_ref()
    }

    /// Name of the matched issuer group (not the `iss` URI).
    #[must_use]
    pub fn issuer_name(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    #[must_use]
    pub fn error(&self) -> Option<&TokenError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn category(&self) -> Option<ErrorCategory> {
        self.error.as_ref().map(|e| e.category)
    }

    /// `sub` claim, when present as a string.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.claims.as_ref()?.get("sub")?.as_str()
    }

    /// Scopes granted by the token (`scope` / `scp`).
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.claims.as_ref().map(scopes_of).unwrap_or_default()
    }

    /// Roles granted by the token (`roles` / `realm_access.roles`).
    #[must_use]
    pub fn roles(&self) -> Vec<String> {
        self.claims.as_ref().map(roles_of).unwrap_or_default()
    }
}

/// Space-separated string or array of strings.
fn string_or_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Scopes from the OAuth2 `scope` claim or the `scp` claim used by some IdPs.
pub(crate) fn scopes_of(claims: &Value) -> Vec<String> {
    let mut scopes = claims.get("scope").map(string_or_list).unwrap_or_default();
    if let Some(scp) = claims.get("scp") {
        for s in string_or_list(scp) {
            if !scopes.contains(&s) {
                scopes.push(s);
            }
        }
    }
    scopes
}

/// Roles from a top-level `roles` claim and Keycloak's `realm_access.roles`.
pub(crate) fn roles_of(claims: &Value) -> Vec<String> {
    let mut roles = claims.get("roles").map(string_or_list).unwrap_or_default();
    if let Some(realm) = claims.pointer("/realm_access/roles") {
        for r in string_or_list(realm) {
            if !roles.contains(&r) {
                roles.push(r);
            }
        }
    }
    roles
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_category_serializes_screaming_snake() {
        let v = serde_json::to_value(ErrorCategory::SignatureInvalid).unwrap();
        assert_eq!(v, json!("SIGNATURE_INVALID"));
        for (i, c) in ErrorCategory::ALL.iter().enumerate() {
            assert_eq!(c.index(), i);
            assert_eq!(serde_json::to_value(c).unwrap(), json!(c.as_str()));
        }
    }

    #[test]
    fn test_scopes_and_roles_from_all_claim_shapes() {
        let claims = json!({
            "scope": "read write",
            "scp": ["write", "admin"],
            "roles": "ops",
            "realm_access": { "roles": ["ops", "auditor"] }
        });
        assert_eq!(scopes_of(&claims), vec!["read", "write", "admin"]);
        assert_eq!(roles_of(&claims), vec!["ops", "auditor"]);
        assert!(scopes_of(&json!({"scope": 3})).is_empty());
    }

    #[test]
    fn test_failure_result_serializes_error() {
        let r = ValidationResult::failure(
            TokenError::new(ErrorCategory::Expired, "token expired"),
            None,
            Some(json!({"sub": "alice"})),
            Some("keycloak".to_string()),
        );
        assert!(!r.is_valid());
        assert_eq!(r.subject(), Some("alice"));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["error"]["category"], json!("EXPIRED"));
        assert_eq!(v["issuer"], json!("keycloak"));
        assert!(v.get("header").is_none());
    }
}
