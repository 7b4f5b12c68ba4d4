//! Token validation for flow units that did not come through the gateway, or
//! that need a stricter policy than their route applied.

use super::trigger::{
    FlowUnit, ATTR_JWT_CLAIMS, ATTR_JWT_ISSUER, ATTR_JWT_ROLES, ATTR_JWT_SCOPES,
    ATTR_JWT_SUBJECT, ATTR_JWT_VALID,
};
use crate::config::properties::{parse_bool, parse_list, GroupProperties};
use crate::config::ConfigError;
use crate::gateway::extract_bearer;
use crate::security::{AccessPolicy, ErrorCategory, TokenValidator};
use std::sync::Arc;
use tracing::debug;

pub const ATTR_JWT_HEADER: &str = "jwt.header";
pub const ATTR_JWT_ERROR_CATEGORY: &str = "jwt.error.category";
pub const ATTR_JWT_ERROR_MESSAGE: &str = "jwt.error.message";

/// Where the authenticator looks for the token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TokenLocation {
    /// `http.header.authorization`, `Bearer` scheme
    #[default]
    AuthorizationHeader,
    /// Any header attribute; a `Bearer ` prefix is stripped if present
    Header(String),
    /// The unit content, trimmed
    Content,
}

impl TokenLocation {
    /// `authorization`, `content` or `header:<name>`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("authorization") {
            return Some(Self::AuthorizationHeader);
        }
        if value.eq_ignore_ascii_case("content") {
            return Some(Self::Content);
        }
        match value.split_once(':') {
            Some((kind, name)) if kind.eq_ignore_ascii_case("header") && !name.trim().is_empty() => {
                Some(Self::Header(name.trim().to_ascii_lowercase()))
            }
            _ => None,
        }
    }
}

/// Outbound relationship of a processed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRoute {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorConfig {
    pub location: TokenLocation,
    pub policy: AccessPolicy,
    /// When false, units with a missing or invalid token still route to
    /// success (annotated with the failure).
    pub require_valid_token: bool,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            location: TokenLocation::AuthorizationHeader,
            policy: AccessPolicy::default(),
            require_valid_token: true,
        }
    }
}

impl AuthenticatorConfig {
    /// Fields: `token-location`, `required-scopes`, `required-roles`,
    /// `require-valid-token`.
    pub fn from_group(group: &GroupProperties) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = group.get("token-location") {
            config.location = TokenLocation::parse(v).ok_or_else(|| ConfigError::InvalidValue {
                key: "token-location".to_string(),
                value: v.clone(),
                expected: "'authorization', 'content' or 'header:<name>'",
            })?;
        }
        config.policy = AccessPolicy::new(
            group
                .get("required-scopes")
                .map(|v| parse_list(v))
                .unwrap_or_default(),
            group
                .get("required-roles")
                .map(|v| parse_list(v))
                .unwrap_or_default(),
        );
        if let Some(v) = group.get("require-valid-token") {
            config.require_valid_token = parse_bool("require-valid-token", v)?;
        }
        Ok(config)
    }
}

/// Validates the token carried by a flow unit and annotates the unit.
pub struct FlowAuthenticator {
    validator: Arc<TokenValidator>,
    config: AuthenticatorConfig,
}

impl FlowAuthenticator {
    #[must_use]
    pub fn new(validator: Arc<TokenValidator>, config: AuthenticatorConfig) -> Self {
        Self { validator, config }
    }

    #[must_use]
    pub fn config(&self) -> &AuthenticatorConfig {
        &self.config
    }

    fn token_of(&self, unit: &FlowUnit) -> Option<String> {
        match &self.config.location {
            TokenLocation::AuthorizationHeader => unit
                .header("authorization")
                .and_then(extract_bearer)
                .map(str::to_string),
            TokenLocation::Header(name) => unit.header(name).map(|v| {
                extract_bearer(v).unwrap_or(v.trim()).to_string()
            }),
            TokenLocation::Content => std::str::from_utf8(&unit.content)
                .ok()
                .map(str::trim)
                .map(|t| extract_bearer(t).unwrap_or(t).to_string()),
        }
        .filter(|t| !t.is_empty())
    }

    /// Validate and annotate `unit`, returning where it should go next.
    pub fn process(&self, unit: &mut FlowUnit) -> AuthRoute {
        let Some(token) = self.token_of(unit) else {
            unit.set_attribute(ATTR_JWT_VALID, "false");
            unit.set_attribute(ATTR_JWT_ERROR_CATEGORY, ErrorCategory::Malformed.as_str());
            unit.set_attribute(ATTR_JWT_ERROR_MESSAGE, "no token found");
            debug!(location = ?self.config.location, "No token on flow unit");
            return self.on_failure();
        };

        let result = self.validator.validate_with_policy(&token, &self.config.policy);
        unit.set_attribute(ATTR_JWT_VALID, result.is_valid().to_string());
        if let Some(issuer) = result.issuer_name() {
            unit.set_attribute(ATTR_JWT_ISSUER, issuer);
        }
        if let Some(header) = result.header() {
            unit.set_attribute(ATTR_JWT_HEADER, header.to_string());
        }
        if let Some(claims) = result.claims() {
            unit.set_attribute(ATTR_JWT_CLAIMS, claims.to_string());
        }
        if let Some(sub) = result.subject() {
            unit.set_attribute(ATTR_JWT_SUBJECT, sub);
        }

        match result.error() {
            None => {
                unit.set_attribute(ATTR_JWT_SCOPES, result.scopes().join(" "));
                unit.set_attribute(ATTR_JWT_ROLES, result.roles().join(" "));
                unit.attributes.remove(ATTR_JWT_ERROR_CATEGORY);
                unit.attributes.remove(ATTR_JWT_ERROR_MESSAGE);
                AuthRoute::Success
            }
            Some(error) => {
                unit.set_attribute(ATTR_JWT_ERROR_CATEGORY, error.category.as_str());
                unit.set_attribute(ATTR_JWT_ERROR_MESSAGE, error.message.as_str());
                self.on_failure()
            }
        }
    }

    fn on_failure(&self) -> AuthRoute {
        if self.config.require_valid_token {
            AuthRoute::Failure
        } else {
            AuthRoute::Success
        }
    }
}
