#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{jwks_json, mint, now_secs, props, KEY1_N, KEY1_PEM};
use jwtbridge::config::group_by_prefix;
use jwtbridge::flow::authenticator::{ATTR_JWT_ERROR_CATEGORY, ATTR_JWT_ERROR_MESSAGE};
use jwtbridge::flow::{AuthRoute, AuthenticatorConfig, TokenLocation};
use jwtbridge::security::AccessPolicy;
use jwtbridge::{FlowUnit, JwtBridge};
use serde_json::json;

const ISS: &str = "https://login.example";

fn bridge() -> JwtBridge {
    let jwks = jwks_json(&[("k1", KEY1_N)]);
    JwtBridge::from_properties(&props(&[
        ("issuer.login.issuer", ISS),
        ("issuer.login.jwks-content", &jwks),
    ]))
    .unwrap()
}

fn token(scope: &str) -> String {
    mint(
        KEY1_PEM,
        "k1",
        &json!({ "iss": ISS, "sub": "bob", "exp": now_secs() + 300, "scope": scope, "roles": ["ops"] }),
    )
}

fn unit_with_auth(value: &str) -> FlowUnit {
    let mut unit = FlowUnit::new(b"payload".to_vec());
    unit.set_attribute("http.header.authorization", value);
    unit
}

#[test]
fn test_valid_header_token_routes_to_success_and_annotates() {
    let auth = bridge().authenticator(AuthenticatorConfig::default());
    let mut unit = unit_with_auth(&format!("Bearer {}", token("read write")));

    assert_eq!(auth.process(&mut unit), AuthRoute::Success);
    assert_eq!(unit.attribute("jwt.valid"), Some("true"));
    assert_eq!(unit.attribute("jwt.issuer"), Some("login"));
    assert_eq!(unit.attribute("jwt.subject"), Some("bob"));
    assert_eq!(unit.attribute("jwt.scopes"), Some("read write"));
    assert_eq!(unit.attribute("jwt.roles"), Some("ops"));
    assert!(unit.attribute("jwt.header").unwrap().contains("RS256"));
    assert_eq!(unit.attribute(ATTR_JWT_ERROR_CATEGORY), None);
}

#[test]
fn test_missing_token_routes_to_failure() {
    let auth = bridge().authenticator(AuthenticatorConfig::default());
    let mut unit = FlowUnit::new(Vec::new());

    assert_eq!(auth.process(&mut unit), AuthRoute::Failure);
    assert_eq!(unit.attribute("jwt.valid"), Some("false"));
    assert_eq!(unit.attribute(ATTR_JWT_ERROR_CATEGORY), Some("MALFORMED"));
    assert_eq!(unit.attribute(ATTR_JWT_ERROR_MESSAGE), Some("no token found"));
}

#[test]
fn test_policy_failure_is_annotated() {
    let config = AuthenticatorConfig {
        policy: AccessPolicy::new(vec!["admin".to_string()], vec![]),
        ..AuthenticatorConfig::default()
    };
    let auth = bridge().authenticator(config);
    let mut unit = unit_with_auth(&format!("Bearer {}", token("read")));

    assert_eq!(auth.process(&mut unit), AuthRoute::Failure);
    assert_eq!(unit.attribute(ATTR_JWT_ERROR_CATEGORY), Some("SCOPE_DENIED"));
    // still identified even though rejected
    assert_eq!(unit.attribute("jwt.subject"), Some("bob"));
}

#[test]
fn test_optional_mode_passes_failures_through() {
    let config = AuthenticatorConfig {
        require_valid_token: false,
        ..AuthenticatorConfig::default()
    };
    let auth = bridge().authenticator(config);
    let mut unit = unit_with_auth("Bearer garbage");

    assert_eq!(auth.process(&mut unit), AuthRoute::Success);
    assert_eq!(unit.attribute("jwt.valid"), Some("false"));
    assert_eq!(unit.attribute(ATTR_JWT_ERROR_CATEGORY), Some("MALFORMED"));
}

#[test]
fn test_token_from_content_and_custom_header() {
    let bridge = bridge();

    let from_content = bridge.authenticator(AuthenticatorConfig {
        location: TokenLocation::Content,
        ..AuthenticatorConfig::default()
    });
    let mut unit = FlowUnit::new(format!("  {}\n", token("read")).into_bytes());
    assert_eq!(from_content.process(&mut unit), AuthRoute::Success);

    let from_header = bridge.authenticator(AuthenticatorConfig {
        location: TokenLocation::Header("x-access-token".to_string()),
        ..AuthenticatorConfig::default()
    });
    let mut unit = FlowUnit::new(Vec::new());
    unit.set_attribute("http.header.x-access-token", token("read"));
    assert_eq!(from_header.process(&mut unit), AuthRoute::Success);
}

#[test]
fn test_config_from_properties_group() {
    let properties = props(&[
        ("processor.auth.token-location", "header:X-Api-Token"),
        ("processor.auth.required-scopes", "read, write"),
        ("processor.auth.require-valid-token", "no"),
    ]);
    let groups = group_by_prefix("processor", &properties);
    let config = AuthenticatorConfig::from_group(&groups["auth"]).unwrap();

    assert_eq!(config.location, TokenLocation::Header("x-api-token".to_string()));
    assert_eq!(config.policy.required_scopes, vec!["read", "write"]);
    assert!(!config.require_valid_token);

    let bad = props(&[("processor.auth.token-location", "cookie")]);
    let groups = group_by_prefix("processor", &bad);
    assert!(AuthenticatorConfig::from_group(&groups["auth"]).is_err());
}
