//! # CLI Module
//!
//! Command-line front end of the `jwtbridge` binary.
//!
//! ## Commands
//!
//! ### `serve`
//!
//! Run the gateway and a logging consumer that drains the bridge queue:
//!
//! ```bash
//! jwtbridge serve --config jwtbridge.yaml --watch
//! ```
//!
//! In proxy mode the consumer answers every request with `200 processed`.
//! SIGINT / SIGTERM stop the listener and print the final validation counters.
//!
//! ### `verify`
//!
//! Validate one token against the configured issuers and print the
//! `ValidationResult` as JSON:
//!
//! ```bash
//! jwtbridge verify --config jwtbridge.yaml --token eyJhbGciOi...
//! echo "$TOKEN" | jwtbridge verify --config jwtbridge.yaml --token -
//! ```
//!
//! ### `routes`
//!
//! Print the parsed route table.

mod commands;

pub use commands::{describe_routes, run, verify_token, Cli, Commands};
