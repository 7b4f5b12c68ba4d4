//! # Security Module
//!
//! Token validation for every configured identity provider.
//!
//! ## Overview
//!
//! - [`jwks`] - per-issuer signing key cache ([`JwksKeyCache`]) with bounded
//!   refresh, grace-period serving and rotation retention
//! - [`validator`] - [`TokenValidator`], which turns a raw bearer token into a
//!   [`ValidationResult`]
//! - [`result`] - the immutable result type and the closed [`ErrorCategory`] set
//!
//! ## Validation Flow
//!
//! 1. Split and base64url-decode the token; anything structurally off is `MALFORMED`
//! 2. Look up the issuer by exact `iss` match; no match is `ISSUER_UNKNOWN`
//! 3. Fetch the signing key by `kid` from the issuer's cached JWKS (`KEY_UNAVAILABLE`)
//! 4. Verify the signature with the key's own algorithm (`SIGNATURE_INVALID`)
//! 5. Check `exp` / `nbf` (`EXPIRED`; wins over steps 3 and 4)
//! 6. Check `aud` and `azp` (`AUDIENCE_MISMATCH`)
//! 7. Check scopes and roles required by the issuer and the caller (`SCOPE_DENIED`)
//!
//! Every outcome is recorded in the [`SecurityEventCounter`](crate::metrics::SecurityEventCounter).
//!
//! ## Supported Algorithms
//!
//! RS256, RS384 and RS512 with RSA keys published through JWKS. Symmetric
//! algorithms and `none` are always rejected.

pub mod jwks;
pub mod result;
pub mod validator;

pub use jwks::{
    CachedKeySet, HttpJwksFetcher, JwksCacheStats, JwksFetcher, JwksKeyCache, KeyError,
    VerificationKey,
};
pub use result::{ErrorCategory, TokenError, ValidationResult};
pub use validator::{AccessPolicy, TokenValidator};
