//! Gateway route table: `restapi.<route>.<field>` groups compiled into
//! matchers with optional JSON Schema body validation.
//!
//! Paths are either exact (`/orders`) or patterns whose segments may be
//! `{param}` (one segment, captured) or `*` (the rest of the path). Lookup tries
//! exact paths first, then patterns in route-name order.

use crate::config::properties::{group_by_prefix, parse_bool, parse_list, GroupProperties};
use crate::config::{fingerprint, ConfigError, Properties};
use crate::security::AccessPolicy;
use arc_swap::ArcSwap;
use http::Method;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const FIELD_PATH: &str = "path";
const FIELD_METHODS: &str = "methods";
const FIELD_SCHEMA: &str = "schema";
const FIELD_SCHEMA_FILE: &str = "schema-file";
const FIELD_ENABLED: &str = "enabled";
const FIELD_REQUIRED_SCOPES: &str = "required-scopes";
const FIELD_REQUIRED_ROLES: &str = "required-roles";

const KNOWN_FIELDS: &[&str] = &[
    FIELD_PATH,
    FIELD_METHODS,
    FIELD_SCHEMA,
    FIELD_SCHEMA_FILE,
    FIELD_ENABLED,
    FIELD_REQUIRED_SCOPES,
    FIELD_REQUIRED_ROLES,
];

/// One configured gateway route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteConfig {
    pub name: String,
    pub path: String,
    /// Allowed methods; defaults to GET
    pub methods: Vec<Method>,
    pub schema: Option<Value>,
    pub enabled: bool,
    pub policy: AccessPolicy,
    pub extra: BTreeMap<String, String>,
}

impl RouteConfig {
    /// Build one route from its grouped properties.
    pub fn from_group(name: &str, group: &GroupProperties) -> Result<Self, ConfigError> {
        let path = group
            .get(FIELD_PATH)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::MissingField {
                group: format!("route {name}"),
                field: FIELD_PATH,
            })?;
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidPath {
                route: name.to_string(),
                path,
            });
        }

        let methods = match group.get(FIELD_METHODS) {
            Some(list) if !list.trim().is_empty() => parse_methods(name, list)?,
            _ => vec![Method::GET],
        };

        let inline = group.get(FIELD_SCHEMA).filter(|s| !s.trim().is_empty());
        let file = group.get(FIELD_SCHEMA_FILE).filter(|s| !s.trim().is_empty());
        let schema = match (inline, file) {
            (Some(text), None) => Some(parse_schema(name, text)?),
            (None, Some(file)) => {
                let text = std::fs::read_to_string(Path::new(file.trim())).map_err(|source| {
                    ConfigError::Io {
                        path: file.clone(),
                        source,
                    }
                })?;
                Some(parse_schema(name, &text)?)
            }
            (None, None) => None,
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidSchema {
                    route: name.to_string(),
                    reason: "both schema and schema-file are set".to_string(),
                })
            }
        };

        let enabled = match group.get(FIELD_ENABLED) {
            Some(v) => parse_bool(&format!("restapi.{name}.{FIELD_ENABLED}"), v)?,
            None => true,
        };

        let policy = AccessPolicy::new(
            group
                .get(FIELD_REQUIRED_SCOPES)
                .map(|v| parse_list(v))
                .unwrap_or_default(),
            group
                .get(FIELD_REQUIRED_ROLES)
                .map(|v| parse_list(v))
                .unwrap_or_default(),
        );

        let extra = group
            .iter()
            .filter(|(k, _)| !KNOWN_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            name: name.to_string(),
            path,
            methods,
            schema,
            enabled,
            policy,
            extra,
        })
    }

    #[must_use]
    pub fn allows(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    #[must_use]
    pub fn is_pattern(&self) -> bool {
        self.path.split('/').any(is_dynamic_segment)
    }
}

fn parse_methods(route: &str, list: &str) -> Result<Vec<Method>, ConfigError> {
    let mut methods = Vec::new();
    for raw in parse_list(list) {
        let method = Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).map_err(|_| {
            ConfigError::InvalidMethod {
                route: route.to_string(),
                method: raw.clone(),
            }
        })?;
        if !methods.contains(&method) {
            methods.push(method);
        }
    }
    Ok(methods)
}

fn parse_schema(route: &str, text: &str) -> Result<Value, ConfigError> {
    serde_json::from_str(text).map_err(|e| ConfigError::InvalidSchema {
        route: route.to_string(),
        reason: format!("not JSON: {e}"),
    })
}

fn is_dynamic_segment(segment: &str) -> bool {
    segment == "*" || (segment.starts_with('{') && segment.ends_with('}') && segment.len() > 2)
}

/// Compile a route path into an anchored regex plus its parameter names.
///
/// `{name}` matches one non-empty segment; `*` matches the remainder of the path.
pub(crate) fn path_to_regex(path: &str) -> Result<(Regex, Vec<String>), regex::Error> {
    if path == "/" {
        return Ok((Regex::new(r"^/$")?, Vec::new()));
    }

    let mut pattern = String::with_capacity(path.len() + 8);
    pattern.push('^');
    let mut params = Vec::new();

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == "*" {
            pattern.push_str("(?:/(.*))?");
            params.push("*".to_string());
        } else if is_dynamic_segment(segment) {
            pattern.push_str("/([^/]+)");
            params.push(segment[1..segment.len() - 1].to_string());
        } else {
            pattern.push('/');
            pattern.push_str(&regex::escape(segment));
        }
    }

    pattern.push_str("/?$");
    Ok((Regex::new(&pattern)?, params))
}

/// A route ready for matching: config plus compiled matcher and schema.
pub struct CompiledRoute {
    config: RouteConfig,
    matcher: Option<(Regex, Vec<String>)>,
    validator: Option<jsonschema::Validator>,
}

impl std::fmt::Debug for CompiledRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRoute")
            .field("config", &self.config)
            .field("pattern", &self.matcher.as_ref().map(|(re, _)| re.as_str()))
            .finish_non_exhaustive()
    }
}

impl CompiledRoute {
    fn compile(config: RouteConfig) -> Result<Self, ConfigError> {
        let matcher = if config.is_pattern() {
            let compiled = path_to_regex(&config.path).map_err(|_| ConfigError::InvalidPath {
                route: config.name.clone(),
                path: config.path.clone(),
            })?;
            Some(compiled)
        } else {
            None
        };

        let validator = match &config.schema {
            Some(schema) => Some(jsonschema::validator_for(schema).map_err(|e| {
                ConfigError::InvalidSchema {
                    route: config.name.clone(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };

        Ok(Self {
            config,
            matcher,
            validator,
        })
    }

    #[must_use]
    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Validate a request body against the route schema.
    ///
    /// Routes without a schema and empty bodies always pass. Returns the list
    /// of validation messages on failure.
    pub fn validate_body(&self, body: &[u8]) -> Result<(), Vec<String>> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let instance: Value = serde_json::from_slice(body)
            .map_err(|e| vec![format!("request body is not valid JSON: {e}")])?;
        let errors: Vec<String> = validator
            .iter_errors(&instance)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn capture(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let (re, names) = self.matcher.as_ref()?;
        let caps = re.captures(path)?;
        let params = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value = caps.get(i + 1).map(|m| m.as_str()).unwrap_or_default();
                (name.clone(), value.to_string())
            })
            .collect();
        Some(params)
    }
}

/// Successful lookup: the route and any captured path parameters.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<CompiledRoute>,
    pub path_params: BTreeMap<String, String>,
}

/// Installed set of routes. Never mutated after construction.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: BTreeMap<String, Arc<CompiledRoute>>,
    // normalised exact path -> enabled routes on that path
    exact: HashMap<String, Vec<Arc<CompiledRoute>>>,
    patterns: Vec<Arc<CompiledRoute>>,
    version: u64,
    fingerprint: String,
}

fn normalise(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

impl RouteTable {
    /// Parse every `prefix.<route>.<field>` group. Disabled routes are kept in
    /// the table (for listing) but never match.
    pub fn parse(prefix: &str, properties: &Properties) -> Result<Self, ConfigError> {
        let groups = group_by_prefix(prefix, properties);
        let mut table = RouteTable::default();

        for (name, group) in &groups {
            let route = Arc::new(CompiledRoute::compile(RouteConfig::from_group(name, group)?)?);
            if route.config.enabled {
                if route.matcher.is_some() {
                    table.patterns.push(Arc::clone(&route));
                } else {
                    table
                        .exact
                        .entry(normalise(&route.config.path).to_string())
                        .or_default()
                        .push(Arc::clone(&route));
                }
            } else {
                debug!(route = %name, "Route disabled");
            }
            table.routes.insert(name.clone(), route);
        }

        let flat: Vec<(String, &str)> = groups
            .iter()
            .flat_map(|(name, group)| {
                group
                    .iter()
                    .map(move |(k, v)| (format!("{name}.{k}"), v.as_str()))
            })
            .collect();
        table.fingerprint = fingerprint(flat.iter().map(|(k, v)| (k.as_str(), *v)));
        Ok(table)
    }

    /// Find the route for `path` and `method`.
    ///
    /// A path that exists only under other methods does not match.
    #[must_use]
    pub fn find(&self, path: &str, method: &Method) -> Option<RouteMatch> {
        let path = path.split('?').next().unwrap_or(path);
        if let Some(candidates) = self.exact.get(normalise(path)) {
            if let Some(route) = candidates.iter().find(|r| r.config.allows(method)) {
                return Some(RouteMatch {
                    route: Arc::clone(route),
                    path_params: BTreeMap::new(),
                });
            }
        }
        self.patterns
            .iter()
            .filter(|r| r.config.allows(method))
            .find_map(|r| {
                r.capture(path).map(|path_params| RouteMatch {
                    route: Arc::clone(r),
                    path_params,
                })
            })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<CompiledRoute>> {
        self.routes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CompiledRoute>> {
        self.routes.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Copy-on-write holder of the current [`RouteTable`].
pub struct GatewayRouteTable {
    prefix: String,
    current: ArcSwap<RouteTable>,
    versions: AtomicU64,
}

impl GatewayRouteTable {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            current: ArcSwap::from_pointee(RouteTable::default()),
            versions: AtomicU64::new(0),
        }
    }

    /// Parse and install. On error the previous table stays in place.
    pub fn apply(&self, properties: &Properties) -> Result<Arc<RouteTable>, ConfigError> {
        let mut table = RouteTable::parse(&self.prefix, properties)?;
        table.version = self.versions.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            version = table.version,
            routes = table.len(),
            fingerprint = %table.fingerprint,
            "Route table applied"
        );
        Ok(self.current.swap(Arc::new(table)))
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.current.load_full()
    }

    /// Match against the current table.
    #[must_use]
    pub fn find(&self, path: &str, method: &Method) -> Option<RouteMatch> {
        self.current.load().find(path, method)
    }
}

impl Default for GatewayRouteTable {
    fn default() -> Self {
        Self::new(crate::config::ROUTE_PREFIX)
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
    fn test_path_to_regex_params_and_wildcard() {
        let (re, names) = path_to_regex("/orders/{id}/items/{item}").unwrap();
        assert_eq!(names, vec!["id", "item"]);
        assert!(re.is_match("/orders/42/items/7"));
        assert!(re.is_match("/orders/42/items/7/"));
        assert!(!re.is_match("/orders/42/items"));

        let (re, names) = path_to_regex("/files/*").unwrap();
        assert_eq!(names, vec!["*"]);
        let caps = re.captures("/files/a/b/c.txt").unwrap();
        assert_eq!(&caps[1], "a/b/c.txt");

        let (re, _) = path_to_regex("/v1.0/ping").unwrap();
        assert!(!re.is_match("/v1x0/ping"));
    }

    #[test]
    fn test_defaults_and_extras() {
        let table = RouteTable::parse(
            "restapi",
            &props(&[
                ("restapi.orders.path", "/orders"),
                ("restapi.orders.timeout.ms", "100"),
            ]),
        )
        .unwrap();
        let route = table.get("orders").unwrap().config();
        assert_eq!(route.methods, vec![Method::GET]);
        assert!(route.enabled);
        assert_eq!(route.extra.get("timeout.ms").map(String::as_str), Some("100"));
    }

    #[test]
    fn test_exact_before_pattern_and_method_filter() {
        let table = RouteTable::parse(
            "restapi",
            &props(&[
                ("restapi.any.path", "/orders/{id}"),
                ("restapi.any.methods", "GET"),
                ("restapi.special.path", "/orders/latest"),
                ("restapi.special.methods", "get, post"),
            ]),
        )
        .unwrap();

        let m = table.find("/orders/latest", &Method::GET).unwrap();
        assert_eq!(m.route.name(), "special");
        let m = table.find("/orders/17?x=1", &Method::GET).unwrap();
        assert_eq!(m.route.name(), "any");
        assert_eq!(m.path_params.get("id").map(String::as_str), Some("17"));
        assert!(table.find("/orders/17", &Method::DELETE).is_none());
        assert!(table.find("/unknown", &Method::GET).is_none());
    }

    #[test]
    fn test_disabled_route_never_matches() {
        let table = RouteTable::parse(
            "restapi",
            &props(&[
                ("restapi.a.path", "/a"),
                ("restapi.a.enabled", "false"),
            ]),
        )
        .unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.find("/a", &Method::GET).is_none());
    }

    #[test]
    fn test_schema_validation() {
        let table = RouteTable::parse(
            "restapi",
            &props(&[
                ("restapi.create.path", "/orders"),
                ("restapi.create.methods", "POST"),
                (
                    "restapi.create.schema",
                    r#"{"type":"object","required":["sku"],"properties":{"sku":{"type":"string"}}}"#,
                ),
            ]),
        )
        .unwrap();
        let route = table.find("/orders", &Method::POST).unwrap().route;
        assert!(route.validate_body(br#"{"sku":"A1"}"#).is_ok());
        assert!(route.validate_body(b"").is_ok());
        assert!(route.validate_body(br#"{"sku":1}"#).is_err());
        assert!(route.validate_body(b"{not json").is_err());
    }

    #[test]
    fn test_invalid_route_config() {
        assert!(matches!(
            RouteTable::parse("restapi", &props(&[("restapi.a.methods", "GET")])),
            Err(ConfigError::MissingField { .. })
        ));
        assert!(matches!(
            RouteTable::parse("restapi", &props(&[("restapi.a.path", "nope")])),
            Err(ConfigError::InvalidPath { .. })
        ));
        assert!(matches!(
            RouteTable::parse(
                "restapi",
                &props(&[("restapi.a.path", "/a"), ("restapi.a.methods", "G(ET")])
            ),
            Err(ConfigError::InvalidMethod { .. })
        ));
        assert!(matches!(
            RouteTable::parse(
                "restapi",
                &props(&[("restapi.a.path", "/a"), ("restapi.a.schema", "{")])
            ),
            Err(ConfigError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_failed_apply_keeps_previous_table() {
        let routes = GatewayRouteTable::default();
        routes.apply(&props(&[("restapi.a.path", "/a")])).unwrap();
        assert!(routes.apply(&props(&[("restapi.b.path", "b")])).is_err());
        assert!(routes.find("/a", &Method::GET).is_some());
        assert_eq!(routes.snapshot().version(), 1);
    }
}
