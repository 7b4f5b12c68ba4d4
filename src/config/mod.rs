//! Configuration input: flat property maps parsed into issuer, route and
//! runtime settings.
//!
//! Configuration is applied wholesale. A parse that fails anywhere returns a
//! [`ConfigError`] and leaves whatever table was previously installed in place.

pub mod issuer;
pub mod properties;
pub mod settings;

pub use issuer::{IssuerConfig, IssuerRegistry, IssuerTable, JwksSource};
pub use properties::{group_by_prefix, load_properties, parse_properties_yaml, Properties};
pub use settings::{GatewayMode, GatewaySettings, JwksCacheSettings, TlsSettings};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default property prefix for issuer groups (`issuer.<name>.<field>`).
pub const ISSUER_PREFIX: &str = "issuer";
/// Default property prefix for gateway route groups (`restapi.<route>.<field>`).
pub const ROUTE_PREFIX: &str = "restapi";

/// Errors raised while parsing configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A group lacks a field it cannot work without
    #[error("{group}: missing required property '{field}'")]
    MissingField { group: String, field: &'static str },

    /// More than one JWKS source configured for an issuer
    #[error("issuer {issuer}: exactly one of jwks-url, jwks-file, jwks-content may be set")]
    ConflictingJwksSources { issuer: String },

    /// JWKS URL failed validation
    #[error("issuer {issuer}: invalid jwks-url '{url}': {reason}")]
    InvalidUrl {
        issuer: String,
        url: String,
        reason: String,
    },

    /// Two issuer groups claim the same `iss` value
    #[error("issuer URI '{uri}' is configured by both '{first}' and '{second}'")]
    DuplicateIssuer {
        uri: String,
        first: String,
        second: String,
    },

    /// Route schema is not valid JSON or not a valid JSON Schema
    #[error("route {route}: invalid schema: {reason}")]
    InvalidSchema { route: String, reason: String },

    /// Route lists an HTTP method that does not parse
    #[error("route {route}: invalid HTTP method '{method}'")]
    InvalidMethod { route: String, method: String },

    /// Route path is empty or does not start with '/'
    #[error("route {route}: invalid path '{path}'")]
    InvalidPath { route: String, path: String },

    /// Value present but not of the expected shape
    #[error("property {key}: invalid value '{value}', expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    /// Reading a referenced file failed
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Property file is not valid YAML
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// SHA-256 over the given `(key, value)` pairs in iteration order, hex encoded.
///
/// Used to fingerprint installed tables so operators can tell from the logs
/// whether two applies carried the same content.
pub(crate) fn fingerprint<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut hasher = Sha256::new();
    for (k, v) in entries {
        hasher.update(k.as_bytes());
        hasher.update([0u8]);
        hasher.update(v.as_bytes());
        hasher.update([b'\n']);
    }
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
