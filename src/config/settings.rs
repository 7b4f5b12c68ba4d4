//! Global gateway and JWKS cache settings.
//!
//! ## Properties
//!
//! | key | default |
//! |-----|---------|
//! | `gateway.port` | 8080 |
//! | `gateway.bind-address` | `0.0.0.0` |
//! | `gateway.worker-threads` | 4 |
//! | `gateway.queue-capacity` | 50 |
//! | `gateway.max-body-bytes` | 1 MiB |
//! | `gateway.mode` | `accept` |
//! | `gateway.proxy-timeout-ms` | 30000 |
//! | `gateway.tls.certificate` / `gateway.tls.private-key` | unset |
//! | `jwks.refresh-interval-secs` | 300 |
//! | `jwks.grace-period-secs` | refresh interval |
//! | `jwks.fetch-timeout-ms` | 5000 |
//! | `jwks.retry-interval-secs` | 10 |
//! | `jwks.leeway-secs` | 0 |
//!
//! ## Environment overrides
//!
//! Deployments that template the property file once can still tune the
//! listener per host:
//!
//! - `JWTBRIDGE_GATEWAY_PORT`
//! - `JWTBRIDGE_GATEWAY_WORKERS`
//! - `JWTBRIDGE_QUEUE_CAPACITY`
//!
//! Unparseable environment values are ignored and the property value is kept.

use super::properties::{parse_u64, Properties};
use super::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

/// What the gateway does once a request is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayMode {
    /// Answer `200 accepted` as soon as the bridge queue takes the request
    #[default]
    Accept,
    /// Hold the connection until the consumer replies (bounded by the proxy timeout)
    Proxy,
}

impl GatewayMode {
    /// Parse a mode name, case-insensitive.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" => Some(Self::Accept),
            "proxy" => Some(Self::Proxy),
            _ => None,
        }
    }
}

/// PEM files for an HTTPS listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

/// Listener, worker pool and bridge queue settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub port: u16,
    pub bind_address: String,
    pub worker_threads: usize,
    pub queue_capacity: usize,
    pub max_body_bytes: usize,
    pub mode: GatewayMode,
    pub proxy_timeout: Duration,
    pub tls: Option<TlsSettings>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            worker_threads: 4,
            queue_capacity: 50,
            max_body_bytes: 1024 * 1024,
            mode: GatewayMode::Accept,
            proxy_timeout: Duration::from_millis(30_000),
            tls: None,
        }
    }
}

impl GatewaySettings {
    /// Read `gateway.*` keys; absent keys keep their defaults.
    pub fn from_properties(properties: &Properties) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(v) = properties.get("gateway.port") {
            let port = parse_u64("gateway.port", v)?;
            settings.port = u16::try_from(port).map_err(|_| ConfigError::InvalidValue {
                key: "gateway.port".to_string(),
                value: v.clone(),
                expected: "a TCP port (0-65535)",
            })?;
        }
        if let Some(v) = properties.get("gateway.bind-address") {
            if !v.trim().is_empty() {
                settings.bind_address = v.trim().to_string();
            }
        }
        if let Some(v) = properties.get("gateway.worker-threads") {
            settings.worker_threads = positive("gateway.worker-threads", v)?;
        }
        if let Some(v) = properties.get("gateway.queue-capacity") {
            settings.queue_capacity = positive("gateway.queue-capacity", v)?;
        }
        if let Some(v) = properties.get("gateway.max-body-bytes") {
            settings.max_body_bytes = as_usize("gateway.max-body-bytes", v)?;
        }
        if let Some(v) = properties.get("gateway.mode") {
            settings.mode = GatewayMode::parse(v).ok_or_else(|| ConfigError::InvalidValue {
                key: "gateway.mode".to_string(),
                value: v.clone(),
                expected: "'accept' or 'proxy'",
            })?;
        }
        if let Some(v) = properties.get("gateway.proxy-timeout-ms") {
            settings.proxy_timeout = Duration::from_millis(parse_u64("gateway.proxy-timeout-ms", v)?);
        }

        let cert = non_empty(properties, "gateway.tls.certificate");
        let key = non_empty(properties, "gateway.tls.private-key");
        settings.tls = match (cert, key) {
            (Some(certificate), Some(private_key)) => Some(TlsSettings {
                certificate: PathBuf::from(certificate),
                private_key: PathBuf::from(private_key),
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::MissingField {
                    group: "gateway.tls".to_string(),
                    field: "private-key",
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingField {
                    group: "gateway.tls".to_string(),
                    field: "certificate",
                })
            }
        };

        Ok(settings)
    }

    /// Apply `JWTBRIDGE_*` environment overrides on top of parsed properties.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.port = std::env::var("JWTBRIDGE_GATEWAY_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.port);
        self.worker_threads = std::env::var("JWTBRIDGE_GATEWAY_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(self.worker_threads);
        self.queue_capacity = std::env::var("JWTBRIDGE_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(self.queue_capacity);
        self
    }

    /// `bind-address:port` for the listener.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Freshness and failure handling for cached JWKS key sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JwksCacheSettings {
    /// How long a fetched key set counts as fresh
    pub refresh_interval: Duration,
    /// How long past freshness the last good set is still served
    pub grace_period: Duration,
    /// Upper bound for one JWKS fetch
    pub fetch_timeout: Duration,
    /// Minimum spacing between refresh attempts after a failure
    pub retry_interval: Duration,
    /// Clock skew tolerated for `exp` / `nbf`
    pub leeway: Duration,
}

impl Default for JwksCacheSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            grace_period: Duration::from_secs(300),
            fetch_timeout: Duration::from_millis(5000),
            retry_interval: Duration::from_secs(10),
            leeway: Duration::ZERO,
        }
    }
}

impl JwksCacheSettings {
    /// Read `jwks.*` keys. Grace defaults to one refresh interval.
    pub fn from_properties(properties: &Properties) -> Result<Self, ConfigError> {
        let secs = |key: &str| -> Result<Option<Duration>, ConfigError> {
            properties
                .get(key)
                .map(|v| parse_u64(key, v).map(Duration::from_secs))
                .transpose()
        };

        let mut settings = Self::default();
        if let Some(interval) = secs("jwks.refresh-interval-secs")? {
            settings.refresh_interval = interval;
        }
        settings.grace_period = secs("jwks.grace-period-secs")?.unwrap_or(settings.refresh_interval);
        if let Some(v) = properties.get("jwks.fetch-timeout-ms") {
            settings.fetch_timeout = Duration::from_millis(parse_u64("jwks.fetch-timeout-ms", v)?);
        }
        if let Some(retry) = secs("jwks.retry-interval-secs")? {
            settings.retry_interval = retry;
        }
        if let Some(leeway) = secs("jwks.leeway-secs")? {
            settings.leeway = leeway;
        }
        Ok(settings)
    }
}

fn non_empty(properties: &Properties, key: &str) -> Option<String> {
    properties
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn as_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    usize::try_from(parse_u64(key, value)?).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        expected: "a size that fits this platform",
    })
}

fn positive(key: &str, value: &str) -> Result<usize, ConfigError> {
    match as_usize(key, value)? {
        0 => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: "a positive integer",
        }),
        n => Ok(n),
    }
}
