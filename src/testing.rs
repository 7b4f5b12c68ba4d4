//! Shared fixtures for unit tests: RSA keys, JWKS documents, token minting.

use crate::config::{IssuerConfig, JwksSource};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub const KEY1_PEM: &str = include_str!("../tests/fixtures/rsa_key_1.pem");
pub const KEY2_PEM: &str = include_str!("../tests/fixtures/rsa_key_2.pem");
pub const KEY1_N: &str = include_str!("../tests/fixtures/rsa_key_1.n");
pub const KEY2_N: &str = include_str!("../tests/fixtures/rsa_key_2.n");

pub fn jwk(kid: &str, n: &str, alg: Option<&str>) -> Value {
    let mut jwk = json!({ "kty": "RSA", "kid": kid, "use": "sig", "n": n.trim(), "e": "AQAB" });
    if let Some(alg) = alg {
        jwk["alg"] = json!(alg);
    }
    jwk
}

/// JWKS document with one RS256 key per `(kid, modulus)` pair.
pub fn jwks_json(keys: &[(&str, &str)]) -> String {
    let keys: Vec<Value> = keys
        .iter()
        .map(|(kid, n)| jwk(kid, n, Some("RS256")))
        .collect();
    json!({ "keys": keys }).to_string()
}

pub fn issuer_config(name: &str, iss: &str, jwks_url: &str) -> IssuerConfig {
    IssuerConfig {
        name: name.to_string(),
        issuer: iss.to_string(),
        jwks: JwksSource::Url(jwks_url.to_string()),
        audience: None,
        client_id: None,
        required_scopes: Vec::new(),
        required_roles: Vec::new(),
        extra: BTreeMap::new(),
    }
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Sign `claims` with a PEM private key.
pub fn mint(pem: &str, kid: Option<&str>, alg: Algorithm, claims: &Value) -> String {
    let mut header = Header::new(alg);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
    encode(&header, claims, &key).unwrap()
}
