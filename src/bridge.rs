//! Host-facing facade that owns every shared component and wires them
//! together: issuer registry, key cache, validator, event counter, route
//! table, bridge queue and trigger.

use crate::config::{
    ConfigError, GatewaySettings, IssuerRegistry, IssuerTable, JwksCacheSettings, Properties,
};
use crate::flow::{AuthenticatorConfig, FlowAuthenticator, GatewayTrigger};
use crate::gateway::{
    self, GatewayRequestHandler, GatewayRouteTable, QueueSnapshot, RequestBridgeQueue, RouteTable,
    ServerHandle,
};
use crate::metrics::{SecurityEventCounter, SecuritySnapshot, DEFAULT_RECENT_ERRORS};
use crate::security::{
    JwksCacheStats, JwksFetcher, JwksKeyCache, TokenValidator, ValidationResult,
};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

pub struct JwtBridge {
    registry: Arc<IssuerRegistry>,
    routes: Arc<GatewayRouteTable>,
    keys: Arc<JwksKeyCache>,
    events: Arc<SecurityEventCounter>,
    validator: Arc<TokenValidator>,
    queue: Arc<RequestBridgeQueue>,
    settings: GatewaySettings,
}

impl JwtBridge {
    /// Empty bridge; issuers and routes are installed with the `apply_*` calls.
    pub fn new(
        fetcher: Arc<dyn JwksFetcher>,
        jwks: JwksCacheSettings,
        settings: GatewaySettings,
    ) -> Self {
        Self::with_cache(JwksKeyCache::new(fetcher, jwks), settings)
    }

    /// Build a bridge from one flat property map: global settings, issuers
    /// and routes. JWKS documents are fetched over HTTP(S) on first use.
    pub fn from_properties(properties: &Properties) -> anyhow::Result<Self> {
        let jwks = JwksCacheSettings::from_properties(properties)
            .context("invalid jwks cache settings")?;
        let settings = GatewaySettings::from_properties(properties)
            .context("invalid gateway settings")?
            .with_env_overrides();
        let keys = JwksKeyCache::with_http(jwks).context("failed to build JWKS HTTP client")?;
        let bridge = Self::with_cache(keys, settings);
        bridge
            .apply_issuer_config(properties)
            .context("invalid issuer configuration")?;
        bridge
            .apply_route_config(properties)
            .context("invalid route configuration")?;
        Ok(bridge)
    }

    fn with_cache(keys: JwksKeyCache, settings: GatewaySettings) -> Self {
        let registry = Arc::new(IssuerRegistry::default());
        let keys = Arc::new(keys);
        let events = Arc::new(SecurityEventCounter::new(DEFAULT_RECENT_ERRORS));
        let validator = Arc::new(TokenValidator::new(
            Arc::clone(&registry),
            Arc::clone(&keys),
            Arc::clone(&events),
        ));
        Self {
            registry,
            routes: Arc::new(GatewayRouteTable::default()),
            keys,
            events,
            validator,
            queue: Arc::new(RequestBridgeQueue::new(settings.queue_capacity)),
            settings,
        }
    }

    /// Replace the issuer table, then drop cached keys that no longer match it.
    /// On error nothing changes.
    pub fn apply_issuer_config(&self, properties: &Properties) -> Result<Arc<IssuerTable>, ConfigError> {
        self.registry.apply(properties)?;
        let table = self.registry.snapshot();
        self.keys.retain_configured(&table);
        Ok(table)
    }

    /// Replace the route table. On error the previous routes stay installed.
    pub fn apply_route_config(&self, properties: &Properties) -> Result<Arc<RouteTable>, ConfigError> {
        self.routes.apply(properties)?;
        Ok(self.routes.snapshot())
    }

    /// Validate a raw bearer token against the configured issuers.
    pub fn validate(&self, raw_token: &str) -> ValidationResult {
        self.validator.validate(raw_token)
    }

    #[must_use]
    pub fn metrics_snapshot(&self) -> SecuritySnapshot {
        self.events.snapshot()
    }

    #[must_use]
    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    #[must_use]
    pub fn jwks_stats(&self) -> JwksCacheStats {
        self.keys.stats()
    }

    #[must_use]
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    #[must_use]
    pub fn issuers(&self) -> Arc<IssuerTable> {
        self.registry.snapshot()
    }

    #[must_use]
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.snapshot()
    }

    #[must_use]
    pub fn validator(&self) -> &Arc<TokenValidator> {
        &self.validator
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<RequestBridgeQueue> {
        &self.queue
    }

    /// Request handler bound to this bridge's tables and queue.
    #[must_use]
    pub fn handler(&self) -> GatewayRequestHandler {
        GatewayRequestHandler::new(
            Arc::clone(&self.routes),
            Arc::clone(&self.validator),
            Arc::clone(&self.queue),
            &self.settings,
        )
    }

    #[must_use]
    pub fn trigger(&self, batch_size: usize) -> GatewayTrigger {
        GatewayTrigger::new(Arc::clone(&self.queue), batch_size)
    }

    #[must_use]
    pub fn authenticator(&self, config: AuthenticatorConfig) -> FlowAuthenticator {
        FlowAuthenticator::new(Arc::clone(&self.validator), config)
    }

    /// Start the HTTP listener on the configured address.
    pub fn serve(&self) -> std::io::Result<ServerHandle> {
        info!(
            issuers = self.registry.snapshot().len(),
            routes = self.routes.snapshot().len(),
            "Starting gateway"
        );
        gateway::start(Arc::new(self.handler()), &self.settings)
    }
}
