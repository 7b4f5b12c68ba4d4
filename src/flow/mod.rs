//! Flow side of the bridge: the scheduled trigger that turns queued gateway
//! requests into [`FlowUnit`]s, and a processor-level authenticator for units
//! that need their token (re)checked downstream.

pub mod authenticator;
pub mod trigger;

pub use authenticator::{AuthRoute, AuthenticatorConfig, FlowAuthenticator, TokenLocation};
pub use trigger::{materialize, FlowUnit, GatewayTrigger, DEFAULT_BATCH_SIZE};
