use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use http::Method;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use jwtbridge::config::Properties;
use jwtbridge::gateway::GatewayRequest;
use jwtbridge::JwtBridge;
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

const KEY_PEM: &str = include_str!("../tests/fixtures/rsa_key_1.pem");
const KEY_N: &str = include_str!("../tests/fixtures/rsa_key_1.n");

fn issuer_uri(i: usize) -> String {
    format!("https://issuer-{i}.example")
}

/// Bridge with `issuers` issuers sharing one inline key, plus one POST route.
fn bridge(issuers: usize) -> JwtBridge {
    let jwks = json!({
        "keys": [{ "kty": "RSA", "alg": "RS256", "use": "sig", "kid": "k1", "n": KEY_N.trim(), "e": "AQAB" }]
    })
    .to_string();
    let mut props = Properties::new();
    for i in 0..issuers {
        props.insert(format!("issuer.i{i}.issuer"), issuer_uri(i));
        props.insert(format!("issuer.i{i}.jwks-content"), jwks.clone());
    }
    props.insert("restapi.orders.path".into(), "/orders".into());
    props.insert("restapi.orders.methods".into(), "POST".into());
    props.insert(
        "restapi.orders.schema".into(),
        r#"{"type":"object","required":["sku"]}"#.into(),
    );
    props.insert("gateway.queue-capacity".into(), "1024".into());
    JwtBridge::from_properties(&props).unwrap()
}

fn make_token(issuer: usize) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("k1".to_string());
    let claims = json!({ "iss": issuer_uri(issuer), "sub": "bench", "exp": now + 3600, "scope": "read" });
    jsonwebtoken::encode(
        &header,
        &claims,
        &EncodingKey::from_rsa_pem(KEY_PEM.as_bytes()).unwrap(),
    )
    .unwrap()
}

fn bench_validate_warm(c: &mut Criterion) {
    let bridge = bridge(1);
    let token = make_token(0);
    assert!(bridge.validate(&token).is_valid());

    c.bench_function("validate_warm_cache", |b| {
        b.iter(|| black_box(bridge.validate(black_box(&token))));
    });
}

fn bench_reject_early(c: &mut Criterion) {
    let bridge = bridge(1);
    let unknown = {
        let mut parts: Vec<String> = make_token(0).split('.').map(str::to_string).collect();
        use base64::Engine as _;
        parts[1] = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(json!({ "iss": "https://nobody.example", "exp": 4_102_444_800i64 }).to_string());
        parts.join(".")
    };

    let mut group = c.benchmark_group("reject");
    group.bench_function("malformed", |b| {
        b.iter(|| black_box(bridge.validate(black_box("not.a.token"))));
    });
    group.bench_function("unknown_issuer", |b| {
        b.iter(|| black_box(bridge.validate(black_box(&unknown))));
    });
    group.finish();
}

fn bench_concurrent_issuers(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_validate");
    for threads in [1usize, 4, 8] {
        let bridge = Arc::new(bridge(3));
        let tokens: Arc<Vec<String>> = Arc::new((0..3).map(make_token).collect());
        for t in tokens.iter() {
            assert!(bridge.validate(t).is_valid());
        }

        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|i| {
                        let bridge = Arc::clone(&bridge);
                        let tokens = Arc::clone(&tokens);
                        thread::spawn(move || {
                            for _ in 0..50 {
                                black_box(bridge.validate(&tokens[i % tokens.len()]));
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_gateway_pipeline(c: &mut Criterion) {
    let bridge = bridge(1);
    let handler = bridge.handler();
    let auth = format!("Bearer {}", make_token(0));

    c.bench_function("gateway_handle_accept", |b| {
        b.iter(|| {
            let request = GatewayRequest::new(Method::POST, "/orders")
                .with_header("Authorization", auth.as_str())
                .with_body(&br#"{"sku":"widget"}"#[..]);
            let reply = handler.handle(request);
            // keep the queue from filling up across iterations
            drop(bridge.queue().drain(usize::MAX));
            black_box(reply)
        });
    });
}

criterion_group!(
    benches,
    bench_validate_warm,
    bench_reject_early,
    bench_concurrent_issuers,
    bench_gateway_pipeline
);
criterion_main!(benches);
