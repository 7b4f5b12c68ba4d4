//! # jwtbridge
//!
//! **jwtbridge** validates JSON Web Tokens from any number of identity
//! providers and bridges authenticated HTTP requests into a polling consumer.
//!
//! ## Overview
//!
//! Each configured issuer publishes its signing keys as a JWKS document. The
//! crate caches those keys per issuer, verifies RS256/384/512 signatures and
//! the standard claims, and reports every outcome as a [`ValidationResult`]
//! with one of seven error categories. An embedded HTTP gateway runs the same
//! validation on every request before handing it to a bounded queue that a
//! scheduled trigger drains into flow units.
//!
//! ## Architecture
//!
//! - **[`config`]** - flat property maps, issuer registry, gateway and cache settings
//! - **[`security`]** - JWKS key cache and the multi-issuer [`TokenValidator`]
//! - **[`metrics`]** - per-issuer validation counters and recent errors
//! - **[`gateway`]** - route table, request pipeline, bridge queue, HTTP listener
//! - **[`flow`]** - queue trigger and processor-level authenticator
//! - **[`bridge`]** - [`JwtBridge`], the facade wiring everything together
//! - **[`hot_reload`]** - re-apply configuration when the properties file changes
//! - **[`logging`]** - subscriber setup used by the binary
//!
//! ### Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Worker as gateway worker
//!     participant Routes as GatewayRouteTable
//!     participant Validator as TokenValidator
//!     participant Keys as JwksKeyCache
//!     participant Queue as RequestBridgeQueue
//!     participant Trigger as GatewayTrigger
//!
//!     Client->>Worker: POST /orders (Bearer token)
//!     Worker->>Routes: find(path, method)
//!     Routes-->>Worker: RouteMatch or 404
//!     Worker->>Validator: validate_with_policy(token, route policy)
//!     Validator->>Keys: get_key(issuer, kid)
//!     Keys-->>Validator: cached key (refresh at most once in flight)
//!     Validator-->>Worker: ValidationResult or 401
//!     Worker->>Worker: schema check (400)
//!     Worker->>Queue: offer(container)
//!     Queue-->>Worker: accepted or full (503)
//!     Worker-->>Client: 200 accepted
//!     Trigger->>Queue: drain(batch)
//!     Queue-->>Trigger: containers in FIFO order
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jwtbridge::config::load_properties;
//! use jwtbridge::JwtBridge;
//!
//! let properties = load_properties("jwtbridge.yaml".as_ref())?;
//! let bridge = JwtBridge::from_properties(&properties)?;
//!
//! let result = bridge.validate("eyJhbGciOiJSUzI1NiIsImtpZCI6ImsxIn0...");
//! if !result.is_valid() {
//!     eprintln!("rejected: {:?}", result.category());
//! }
//!
//! let server = bridge.serve()?;
//! let trigger = bridge.trigger(100);
//! for unit in trigger.on_trigger() {
//!     println!("{:?}", unit.attribute("http.path"));
//! }
//! server.stop();
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod bridge;
pub mod cli;
pub mod config;
pub mod flow;
pub mod gateway;
pub mod hot_reload;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod security;

#[cfg(test)]
mod testing;

pub use bridge::JwtBridge;
pub use config::{ConfigError, IssuerConfig, IssuerRegistry, JwksSource, Properties};
pub use flow::{FlowAuthenticator, FlowUnit, GatewayTrigger};
pub use gateway::{GatewayRequestHandler, HttpRequestContainer, RequestBridgeQueue};
pub use ids::RequestId;
pub use metrics::{SecurityEventCounter, SecuritySnapshot};
pub use security::{ErrorCategory, JwksKeyCache, TokenValidator, ValidationResult};
