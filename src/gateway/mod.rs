//! # Gateway Module
//!
//! Authenticated HTTP ingress. Requests are matched against the configured
//! route table, their bearer token is validated, bodies are checked against
//! the route schema, and accepted requests are handed to the flow side
//! through a bounded [`RequestBridgeQueue`].
//!
//! ## Status Codes
//!
//! | Outcome             | Status |
//! |---------------------|--------|
//! | unknown route       | 404    |
//! | body over limit     | 413    |
//! | missing token       | 401    |
//! | rejected token      | 401    |
//! | schema violation    | 400    |
//! | queue full          | 503    |
//! | proxy reply timeout | 503    |
//! | accepted            | 200    |
//!
//! Route lookup happens before any token is inspected, so an unknown path is
//! always a 404.

pub mod container;
pub mod handler;
pub mod queue;
pub mod request;
pub mod response;
pub mod routes;
pub mod server;

pub use container::{HttpRequestContainer, ProxyReply, ReplyHandle, ReplyWaiter};
pub use handler::{GatewayOutcome, GatewayReply, GatewayRequestHandler};
pub use queue::{QueueSnapshot, RequestBridgeQueue};
pub use request::{extract_bearer, GatewayRequest, RequestBody};
pub use response::GatewayResponse;
pub use routes::{CompiledRoute, GatewayRouteTable, RouteConfig, RouteMatch, RouteTable};
pub use server::{start, ServerHandle};
