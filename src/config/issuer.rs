//! Issuer registry: grouped `issuer.<name>.<field>` properties parsed into
//! immutable [`IssuerConfig`] records, installed by atomic swap.

use super::properties::{group_by_prefix, parse_bool, parse_list, GroupProperties, Properties};
use super::{fingerprint, ConfigError};
use arc_swap::ArcSwap;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

const FIELD_ISSUER: &str = "issuer";
const FIELD_JWKS_URL: &str = "jwks-url";
const FIELD_JWKS_FILE: &str = "jwks-file";
const FIELD_JWKS_CONTENT: &str = "jwks-content";
const FIELD_AUDIENCE: &str = "audience";
const FIELD_CLIENT_ID: &str = "client-id";
const FIELD_REQUIRED_SCOPES: &str = "required-scopes";
const FIELD_REQUIRED_ROLES: &str = "required-roles";
const FIELD_ENABLED: &str = "enabled";

const KNOWN_FIELDS: &[&str] = &[
    FIELD_ISSUER,
    FIELD_JWKS_URL,
    FIELD_JWKS_FILE,
    FIELD_JWKS_CONTENT,
    FIELD_AUDIENCE,
    FIELD_CLIENT_ID,
    FIELD_REQUIRED_SCOPES,
    FIELD_REQUIRED_ROLES,
    FIELD_ENABLED,
];

/// Where an issuer publishes its signing keys.
#[derive(Clone, PartialEq, Eq)]
pub enum JwksSource {
    /// Fetched with an HTTP GET
    Url(String),
    /// Read from the local filesystem
    File(PathBuf),
    /// JWKS document given directly in configuration
    Inline(String),
}

impl JwksSource {
    /// Short description safe for logs (inline content is not echoed).
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            JwksSource::Url(url) => url.clone(),
            JwksSource::File(path) => format!("file:{}", path.display()),
            JwksSource::Inline(content) => format!("inline ({} bytes)", content.len()),
        }
    }
}

impl fmt::Debug for JwksSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// One configured identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerConfig {
    /// Group name, unique within the registry
    pub name: String,
    /// Must equal the token's `iss` claim exactly
    pub issuer: String,
    pub jwks: JwksSource,
    pub audience: Option<String>,
    /// Compared against `azp` when the token carries one
    pub client_id: Option<String>,
    pub required_scopes: Vec<String>,
    pub required_roles: Vec<String>,
    /// Unrecognised properties, kept verbatim
    pub extra: BTreeMap<String, String>,
}

impl IssuerConfig {
    /// Build one issuer from its grouped properties.
    ///
    /// Returns `Ok(None)` for a group with `enabled=false`.
    pub fn from_group(name: &str, group: &GroupProperties) -> Result<Option<Self>, ConfigError> {
        let field = |key: &str| {
            group
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        if let Some(enabled) = group.get(FIELD_ENABLED) {
            if !parse_bool(&format!("issuer.{name}.{FIELD_ENABLED}"), enabled)? {
                debug!(issuer = %name, "Issuer disabled, skipping");
                return Ok(None);
            }
        }

        let issuer = field(FIELD_ISSUER).ok_or_else(|| ConfigError::MissingField {
            group: format!("issuer {name}"),
            field: FIELD_ISSUER,
        })?;

        let sources = [
            field(FIELD_JWKS_URL).map(JwksSource::Url),
            field(FIELD_JWKS_FILE).map(|p| JwksSource::File(PathBuf::from(p))),
            // inline content keeps its whitespace; only emptiness is checked
            group
                .get(FIELD_JWKS_CONTENT)
                .filter(|v| !v.trim().is_empty())
                .map(|v| JwksSource::Inline(v.clone())),
        ];
        let mut configured = sources.into_iter().flatten();
        let jwks = configured.next().ok_or_else(|| ConfigError::MissingField {
            group: format!("issuer {name}"),
            field: "jwks-url | jwks-file | jwks-content",
        })?;
        if configured.next().is_some() {
            return Err(ConfigError::ConflictingJwksSources {
                issuer: name.to_string(),
            });
        }
        if let JwksSource::Url(url) = &jwks {
            validate_jwks_url(name, url)?;
        }

        let extra = group
            .iter()
            .filter(|(k, _)| !KNOWN_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Some(Self {
            name: name.to_string(),
            issuer,
            jwks,
            audience: field(FIELD_AUDIENCE),
            client_id: field(FIELD_CLIENT_ID),
            required_scopes: group
                .get(FIELD_REQUIRED_SCOPES)
                .map(|v| parse_list(v))
                .unwrap_or_default(),
            required_roles: group
                .get(FIELD_REQUIRED_ROLES)
                .map(|v| parse_list(v))
                .unwrap_or_default(),
            extra,
        }))
    }
}

/// JWKS URLs must use HTTPS; plain HTTP is accepted only for the exact hosts
/// `localhost` and `127.0.0.1` (a host like `localhost.attacker.com` is rejected).
fn validate_jwks_url(issuer: &str, url: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidUrl {
        issuer: issuer.to_string(),
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            let host = parsed.host_str().ok_or_else(|| invalid("missing host"))?;
            if host == "localhost" || host == "127.0.0.1" {
                Ok(())
            } else {
                Err(invalid(
                    "HTTPS required (HTTP only allowed for localhost/127.0.0.1)",
                ))
            }
        }
        other => Err(invalid(&format!("unsupported scheme '{other}'"))),
    }
}

/// An installed set of issuers. Never mutated after construction.
#[derive(Debug, Default)]
pub struct IssuerTable {
    issuers: BTreeMap<String, Arc<IssuerConfig>>,
    // issuer URI -> group name
    by_uri: HashMap<String, String>,
    version: u64,
    fingerprint: String,
}

impl IssuerTable {
    /// Parse every `prefix.<name>.<field>` group into an issuer table.
    pub fn parse(prefix: &str, properties: &Properties) -> Result<Self, ConfigError> {
        let groups = group_by_prefix(prefix, properties);
        let mut issuers = BTreeMap::new();
        let mut by_uri: HashMap<String, String> = HashMap::new();

        for (name, group) in &groups {
            let Some(config) = IssuerConfig::from_group(name, group)? else {
                continue;
            };
            if let Some(first) = by_uri.get(&config.issuer) {
                return Err(ConfigError::DuplicateIssuer {
                    uri: config.issuer.clone(),
                    first: first.clone(),
                    second: name.clone(),
                });
            }
            by_uri.insert(config.issuer.clone(), name.clone());
            issuers.insert(name.clone(), Arc::new(config));
        }

        let flat: Vec<(String, &str)> = groups
            .iter()
            .flat_map(|(name, group)| {
                group
                    .iter()
                    .map(move |(k, v)| (format!("{name}.{k}"), v.as_str()))
            })
            .collect();
        let fingerprint = fingerprint(flat.iter().map(|(k, v)| (k.as_str(), *v)));

        Ok(Self {
            issuers,
            by_uri,
            version: 0,
            fingerprint,
        })
    }

    /// Issuer by group name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<IssuerConfig>> {
        self.issuers.get(name)
    }

    /// Issuer whose configured URI equals `iss` exactly.
    #[must_use]
    pub fn by_issuer_uri(&self, iss: &str) -> Option<&Arc<IssuerConfig>> {
        self.by_uri.get(iss).and_then(|name| self.issuers.get(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<IssuerConfig>> {
        self.issuers.values()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.issuers.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.issuers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty()
    }

    /// Monotonic apply counter (0 for a table that was never installed).
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// SHA-256 over the grouped properties this table was parsed from.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Copy-on-write holder of the current [`IssuerTable`].
///
/// Readers take a snapshot with a single atomic load; `apply` builds a complete
/// new table off to the side and swaps it in only when parsing succeeded.
pub struct IssuerRegistry {
    prefix: String,
    current: ArcSwap<IssuerTable>,
    versions: AtomicU64,
}

impl IssuerRegistry {
    /// Empty registry reading groups under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            current: ArcSwap::from_pointee(IssuerTable::default()),
            versions: AtomicU64::new(0),
        }
    }

    /// Parse `properties` and install the result.
    ///
    /// Returns the table that was replaced so callers can diff it against the
    /// new one. On error nothing changes.
    pub fn apply(&self, properties: &Properties) -> Result<Arc<IssuerTable>, ConfigError> {
        let mut table = IssuerTable::parse(&self.prefix, properties)?;
        table.version = self.versions.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            version = table.version,
            issuers = table.len(),
            fingerprint = %table.fingerprint,
            "Issuer registry applied"
        );
        Ok(self.current.swap(Arc::new(table)))
    }

    /// Current table. Cheap; hold it for the duration of one validation.
    #[must_use]
    pub fn snapshot(&self) -> Arc<IssuerTable> {
        self.current.load_full()
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for IssuerRegistry {
    fn default() -> Self {
        Self::new(super::ISSUER_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_full_issuer_with_extras() {
        let table = IssuerTable::parse(
            "issuer",
            &props(&[
                ("issuer.keycloak.issuer", "https://idp"),
                ("issuer.keycloak.jwks-url", "https://idp/jwks"),
                ("issuer.keycloak.audience", "api"),
                ("issuer.keycloak.client-id", "gateway"),
                ("issuer.keycloak.required-scopes", "read write"),
                ("issuer.keycloak.claims.mapping", "sub"),
            ]),
        )
        .unwrap();

        let kc = table.get("keycloak").unwrap();
        assert_eq!(kc.issuer, "https://idp");
        assert_eq!(kc.jwks, JwksSource::Url("https://idp/jwks".to_string()));
        assert_eq!(kc.audience.as_deref(), Some("api"));
        assert_eq!(kc.client_id.as_deref(), Some("gateway"));
        assert_eq!(kc.required_scopes, vec!["read", "write"]);
        assert_eq!(kc.extra.get("claims.mapping").map(String::as_str), Some("sub"));
        assert_eq!(table.by_issuer_uri("https://idp").unwrap().name, "keycloak");
        assert!(table.by_issuer_uri("https://idp/").is_none());
    }

    #[test]
    fn test_missing_issuer_field_is_an_error() {
        let err = IssuerTable::parse(
            "issuer",
            &props(&[("issuer.a.jwks-url", "https://idp/jwks")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "issuer", .. }));
    }

    #[test]
    fn test_conflicting_sources_rejected() {
        let err = IssuerTable::parse(
            "issuer",
            &props(&[
                ("issuer.a.issuer", "https://a"),
                ("issuer.a.jwks-url", "https://a/jwks"),
                ("issuer.a.jwks-file", "/tmp/jwks.json"),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingJwksSources { .. }));
    }

    #[test]
    fn test_http_url_only_for_exact_localhost() {
        let ok = IssuerTable::parse(
            "issuer",
            &props(&[
                ("issuer.a.issuer", "http://localhost"),
                ("issuer.a.jwks-url", "http://127.0.0.1:8080/jwks"),
            ]),
        );
        assert!(ok.is_ok());

        let err = IssuerTable::parse(
            "issuer",
            &props(&[
                ("issuer.a.issuer", "http://evil"),
                ("issuer.a.jwks-url", "http://localhost.attacker.com/jwks"),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn test_duplicate_issuer_uri_rejected() {
        let err = IssuerTable::parse(
            "issuer",
            &props(&[
                ("issuer.a.issuer", "https://same"),
                ("issuer.a.jwks-content", "{\"keys\":[]}"),
                ("issuer.b.issuer", "https://same"),
                ("issuer.b.jwks-content", "{\"keys\":[]}"),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateIssuer { .. }));
    }

    #[test]
    fn test_disabled_issuer_is_not_loaded() {
        let table = IssuerTable::parse(
            "issuer",
            &props(&[
                ("issuer.a.issuer", "https://a"),
                ("issuer.a.jwks-content", "{\"keys\":[]}"),
                ("issuer.a.enabled", "false"),
            ]),
        )
        .unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_failed_apply_keeps_previous_table() {
        let registry = IssuerRegistry::default();
        registry
            .apply(&props(&[
                ("issuer.a.issuer", "https://a"),
                ("issuer.a.jwks-content", "{\"keys\":[]}"),
            ]))
            .unwrap();
        let before = registry.snapshot();
        assert_eq!(before.version(), 1);

        let result = registry.apply(&props(&[("issuer.b.jwks-url", "https://b/jwks")]));
        assert!(result.is_err());
        let after = registry.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.get("a").is_some());
    }

    #[test]
    fn test_apply_returns_previous_and_bumps_version() {
        let registry = IssuerRegistry::default();
        let p = props(&[
            ("issuer.a.issuer", "https://a"),
            ("issuer.a.jwks-content", "{\"keys\":[]}"),
        ]);
        let first = registry.apply(&p).unwrap();
        assert_eq!(first.version(), 0);
        let second = registry.apply(&p).unwrap();
        assert_eq!(second.version(), 1);
        assert_eq!(registry.snapshot().version(), 2);
        assert_eq!(second.fingerprint(), registry.snapshot().fingerprint());
    }
}
