#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{jwks_json, mint, mint_with, now_secs, props, KEY1_N, KEY1_PEM, KEY2_N, KEY2_PEM};
use jsonwebtoken::Algorithm;
use jwtbridge::security::AccessPolicy;
use jwtbridge::{ErrorCategory, JwtBridge};
use serde_json::json;

const KEYCLOAK: &str = "https://keycloak.example/realms/main";
const AUTH0: &str = "https://tenant.auth0.example/";

fn bridge() -> JwtBridge {
    let keycloak_jwks = jwks_json(&[("kc-1", KEY1_N)]);
    let auth0_jwks = jwks_json(&[("a0-1", KEY2_N)]);
    JwtBridge::from_properties(&props(&[
        ("issuer.keycloak.issuer", KEYCLOAK),
        ("issuer.keycloak.jwks-content", &keycloak_jwks),
        ("issuer.keycloak.audience", "api"),
        ("issuer.auth0.issuer", AUTH0),
        ("issuer.auth0.jwks-content", &auth0_jwks),
        ("issuer.auth0.client-id", "spa"),
        ("issuer.auth0.required-scopes", "read:orders"),
    ]))
    .unwrap()
}

fn keycloak_token(aud: serde_json::Value) -> String {
    mint(
        KEY1_PEM,
        "kc-1",
        &json!({
            "iss": KEYCLOAK,
            "sub": "user-1",
            "aud": aud,
            "exp": now_secs() + 300,
            "realm_access": { "roles": ["clerk"] },
            "scope": "openid profile"
        }),
    )
}

#[test]
fn test_keycloak_token_with_matching_audience_is_valid() {
    let bridge = bridge();
    let result = bridge.validate(&keycloak_token(json!(["api", "account"])));

    assert!(result.is_valid(), "{:?}", result.error());
    assert_eq!(result.issuer_name(), Some("keycloak"));
    assert_eq!(result.subject(), Some("user-1"));
    assert_eq!(result.scopes(), vec!["openid", "profile"]);
    assert!(result.roles().contains(&"clerk".to_string()));
}

#[test]
fn test_keycloak_token_with_other_audience_is_rejected() {
    let bridge = bridge();
    let result = bridge.validate(&keycloak_token(json!(["other"])));

    assert!(!result.is_valid());
    assert_eq!(result.category(), Some(ErrorCategory::AudienceMismatch));
    // claims are still exposed for diagnostics
    assert_eq!(result.subject(), Some("user-1"));
}

#[test]
fn test_auth0_scope_and_azp_rules() {
    let bridge = bridge();
    let claims = |scope: &str, azp: &str| {
        json!({ "iss": AUTH0, "sub": "auth0|42", "exp": now_secs() + 300, "scope": scope, "azp": azp })
    };

    let ok = bridge.validate(&mint(KEY2_PEM, "a0-1", &claims("read:orders write:orders", "spa")));
    assert!(ok.is_valid(), "{:?}", ok.error());

    let no_scope = bridge.validate(&mint(KEY2_PEM, "a0-1", &claims("write:orders", "spa")));
    assert_eq!(no_scope.category(), Some(ErrorCategory::ScopeDenied));

    let wrong_client = bridge.validate(&mint(KEY2_PEM, "a0-1", &claims("read:orders", "cli")));
    assert_eq!(wrong_client.category(), Some(ErrorCategory::AudienceMismatch));
}

#[test]
fn test_tampered_payload_fails_signature() {
    let bridge = bridge();
    let token = keycloak_token(json!("api"));
    let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();

    use base64::Engine as _;
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let mut claims: serde_json::Value =
        serde_json::from_slice(&engine.decode(&parts[1]).unwrap()).unwrap();
    claims["sub"] = json!("admin");
    parts[1] = engine.encode(claims.to_string());

    let result = bridge.validate(&parts.join("."));
    assert_eq!(result.category(), Some(ErrorCategory::SignatureInvalid));
}

#[test]
fn test_token_signed_by_other_issuers_key_fails_signature() {
    let bridge = bridge();
    let token = mint(
        KEY2_PEM,
        "kc-1",
        &json!({ "iss": KEYCLOAK, "sub": "x", "aud": "api", "exp": now_secs() + 300 }),
    );
    assert_eq!(
        bridge.validate(&token).category(),
        Some(ErrorCategory::SignatureInvalid)
    );
}

#[test]
fn test_expired_token_is_expired_even_with_unknown_kid() {
    let bridge = bridge();
    let token = mint(
        KEY1_PEM,
        "not-published",
        &json!({ "iss": KEYCLOAK, "sub": "x", "aud": "api", "exp": now_secs() - 10 }),
    );
    assert_eq!(bridge.validate(&token).category(), Some(ErrorCategory::Expired));
}

#[test]
fn test_unknown_kid_is_key_unavailable() {
    let bridge = bridge();
    let token = mint(
        KEY1_PEM,
        "not-published",
        &json!({ "iss": KEYCLOAK, "sub": "x", "aud": "api", "exp": now_secs() + 300 }),
    );
    assert_eq!(
        bridge.validate(&token).category(),
        Some(ErrorCategory::KeyUnavailable)
    );
}

#[test]
fn test_unknown_issuer_does_not_touch_key_cache() {
    let bridge = bridge();
    let token = mint(
        KEY1_PEM,
        "kc-1",
        &json!({ "iss": "https://evil.example", "sub": "x", "exp": now_secs() + 300 }),
    );

    let result = bridge.validate(&token);
    assert_eq!(result.category(), Some(ErrorCategory::IssuerUnknown));
    assert_eq!(result.issuer_name(), None);
    assert_eq!(bridge.jwks_stats().refreshes, 0);
}

#[test]
fn test_hs256_and_none_are_rejected() {
    let bridge = bridge();
    let claims = json!({ "iss": KEYCLOAK, "sub": "x", "aud": "api", "exp": now_secs() + 300 });

    let mut header = jsonwebtoken::Header::new(Algorithm::HS256);
    header.kid = Some("kc-1".to_string());
    let hs = jsonwebtoken::encode(
        &header,
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(KEY1_N.as_bytes()),
    )
    .unwrap();
    assert_eq!(
        bridge.validate(&hs).category(),
        Some(ErrorCategory::SignatureInvalid)
    );

    use base64::Engine as _;
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let none = format!(
        "{}.{}.",
        engine.encode(r#"{"alg":"none","kid":"kc-1"}"#),
        engine.encode(claims.to_string())
    );
    assert_eq!(
        bridge.validate(&none).category(),
        Some(ErrorCategory::SignatureInvalid)
    );
}

#[test]
fn test_rs384_token_against_rs256_key_is_rejected() {
    let bridge = bridge();
    let token = mint_with(
        KEY1_PEM,
        Some("kc-1"),
        Algorithm::RS384,
        &json!({ "iss": KEYCLOAK, "sub": "x", "aud": "api", "exp": now_secs() + 300 }),
    );
    assert_eq!(
        bridge.validate(&token).category(),
        Some(ErrorCategory::SignatureInvalid)
    );
}

#[test]
fn test_malformed_inputs() {
    let bridge = bridge();
    for raw in ["", "abc", "a.b", "a.b.c.d", "!!!.###.$$$"] {
        assert_eq!(
            bridge.validate(raw).category(),
            Some(ErrorCategory::Malformed),
            "input {raw:?}"
        );
    }
}

#[test]
fn test_caller_policy_adds_role_requirement() {
    let bridge = bridge();
    let token = keycloak_token(json!("api"));

    let clerk = AccessPolicy::new(vec![], vec!["clerk".to_string()]);
    assert!(bridge.validator().validate_with_policy(&token, &clerk).is_valid());

    let admin = AccessPolicy::new(vec![], vec!["admin".to_string()]);
    assert_eq!(
        bridge.validator().validate_with_policy(&token, &admin).category(),
        Some(ErrorCategory::ScopeDenied)
    );
}

#[test]
fn test_every_validation_is_counted() {
    let bridge = bridge();
    let _ = bridge.validate(&keycloak_token(json!("api")));
    let _ = bridge.validate(&keycloak_token(json!("other")));
    let _ = bridge.validate("garbage");

    let snapshot = bridge.metrics_snapshot();
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.valid, 1);
    assert_eq!(snapshot.invalid, 2);
    assert_eq!(snapshot.issuers["keycloak"].total, 2);
    assert_eq!(
        snapshot.issuers["keycloak"].by_category[&ErrorCategory::AudienceMismatch],
        1
    );
}
