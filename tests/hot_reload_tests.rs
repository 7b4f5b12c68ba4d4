#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{jwks_json, KEY1_N};
use jwtbridge::config::load_properties;
use jwtbridge::hot_reload::{watch_bridge, watch_properties};
use jwtbridge::JwtBridge;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn config_yaml(routes: &[(&str, &str)]) -> String {
    let mut yaml = format!(
        "issuer:\n  idp:\n    issuer: https://idp.example\n    jwks-content: '{}'\ngateway:\n  port: 0\n",
        jwks_json(&[("k1", KEY1_N)])
    );
    if !routes.is_empty() {
        yaml.push_str("restapi:\n");
        for (name, path) in routes {
            yaml.push_str(&format!("  {name}:\n    path: \"{path}\"\n"));
        }
    }
    yaml
}

fn write(path: &Path, text: &str) {
    std::fs::write(path, text).unwrap();
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    false
}

#[test]
fn test_route_changes_are_applied_live() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jwtbridge.yaml");
    write(&path, &config_yaml(&[("orders", "/orders")]));

    let bridge = Arc::new(JwtBridge::from_properties(&load_properties(&path).unwrap()).unwrap());
    let initial = bridge.routes().version();
    let _watcher = watch_bridge(&path, Arc::clone(&bridge)).unwrap();

    // give the watcher a moment to register before editing
    thread::sleep(Duration::from_millis(100));
    write(&path, &config_yaml(&[("orders", "/orders"), ("health", "/health")]));

    assert!(
        wait_for(|| bridge.routes().version() > initial && bridge.routes().len() == 2),
        "route table was not reloaded"
    );
    assert!(bridge.routes().get("health").is_some());
}

#[test]
fn test_broken_file_keeps_previous_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jwtbridge.yaml");
    write(&path, &config_yaml(&[("orders", "/orders")]));

    let bridge = Arc::new(JwtBridge::from_properties(&load_properties(&path).unwrap()).unwrap());
    let _watcher = watch_bridge(&path, Arc::clone(&bridge)).unwrap();
    thread::sleep(Duration::from_millis(100));

    // route without a leading slash fails to parse
    write(&path, &config_yaml(&[("orders", "orders")]));
    thread::sleep(Duration::from_millis(500));

    let routes = bridge.routes();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes.get("orders").unwrap().config().path, "/orders");
    assert_eq!(bridge.issuers().len(), 1);
}

#[test]
fn test_other_files_in_directory_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jwtbridge.yaml");
    write(&path, &config_yaml(&[]));

    let reloads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reloads);
    let _watcher = watch_properties(&path, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    thread::sleep(Duration::from_millis(100));

    write(&dir.path().join("unrelated.yaml"), "a: 1\n");
    thread::sleep(Duration::from_millis(300));
    assert_eq!(reloads.load(Ordering::SeqCst), 0);

    write(&path, &config_yaml(&[("orders", "/orders")]));
    assert!(wait_for(|| reloads.load(Ordering::SeqCst) >= 1));
}
