#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{jwks_json, mint, now_secs, props, KEY1_N, KEY1_PEM};
use jwtbridge::metrics::UNATTRIBUTED_ISSUER;
use jwtbridge::{ErrorCategory, JwtBridge};
use serde_json::json;
use std::sync::Arc;
use std::thread;

const ISSUERS: [&str; 3] = ["https://a.example", "https://b.example", "https://c.example"];

fn bridge() -> JwtBridge {
    let jwks = jwks_json(&[("k1", KEY1_N)]);
    JwtBridge::from_properties(&props(&[
        ("issuer.a.issuer", ISSUERS[0]),
        ("issuer.a.jwks-content", &jwks),
        ("issuer.b.issuer", ISSUERS[1]),
        ("issuer.b.jwks-content", &jwks),
        ("issuer.c.issuer", ISSUERS[2]),
        ("issuer.c.jwks-content", &jwks),
        ("issuer.c.audience", "billing"),
    ]))
    .unwrap()
}

#[test]
fn test_concurrent_validations_across_issuers_are_all_counted() {
    let bridge = Arc::new(bridge());
    let tokens: Vec<String> = (0..100)
        .map(|i| {
            mint(
                KEY1_PEM,
                "k1",
                &json!({ "iss": ISSUERS[i % 3], "sub": format!("u{i}"), "exp": now_secs() + 300 }),
            )
        })
        .collect();
    let tokens = Arc::new(tokens);

    let handles: Vec<_> = (0..10)
        .map(|t| {
            let bridge = Arc::clone(&bridge);
            let tokens = Arc::clone(&tokens);
            thread::spawn(move || {
                for token in tokens.iter().skip(t).step_by(10) {
                    let _ = bridge.validate(token);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let snapshot = bridge.metrics_snapshot();
    assert_eq!(snapshot.total, 100);
    assert_eq!(snapshot.valid + snapshot.invalid, 100);

    let per_issuer: u64 = snapshot.issuers.values().map(|s| s.total).sum();
    assert_eq!(per_issuer, 100);
    assert_eq!(snapshot.issuers["a"].total, 34);
    assert_eq!(snapshot.issuers["b"].total, 33);
    assert_eq!(snapshot.issuers["c"].total, 33);

    // c demands an audience none of the tokens carry
    assert_eq!(snapshot.issuers["c"].invalid, 33);
    assert_eq!(
        snapshot.issuers["c"].by_category[&ErrorCategory::AudienceMismatch],
        33
    );
    assert_eq!(snapshot.valid, 67);
    assert!(snapshot.average_response_time_us > 0.0);
}

#[test]
fn test_repeated_errors_are_grouped() {
    let bridge = bridge();
    for _ in 0..5 {
        let _ = bridge.validate("not-a-token");
    }
    let token = mint(
        KEY1_PEM,
        "k1",
        &json!({ "iss": ISSUERS[2], "sub": "x", "exp": now_secs() + 300 }),
    );
    let _ = bridge.validate(&token);

    let snapshot = bridge.metrics_snapshot();
    assert_eq!(snapshot.issuers[UNATTRIBUTED_ISSUER].invalid, 5);

    let malformed: Vec<_> = snapshot
        .recent_errors
        .iter()
        .filter(|e| e.category == ErrorCategory::Malformed)
        .collect();
    assert_eq!(malformed.len(), 1);
    assert_eq!(malformed[0].count, 5);
    assert_eq!(malformed[0].issuer, UNATTRIBUTED_ISSUER);

    // newest first
    assert_eq!(snapshot.recent_errors[0].category, ErrorCategory::AudienceMismatch);
}
