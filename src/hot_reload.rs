//! # Hot Reload Module
//!
//! Watches the YAML properties file and re-applies issuer and route
//! configuration when it changes.
//!
//! The parent directory is watched rather than the file itself so editors
//! that save by rename are picked up. Events for other files are ignored, and
//! a reload whose parsed properties equal the last applied ones is skipped
//! (editors often emit several events per save).
//!
//! A file that fails to load or apply is logged and the previously installed
//! tables stay in place; the gateway keeps serving.
//!
//! ```rust,ignore
//! let bridge = Arc::new(JwtBridge::from_properties(&props)?);
//! let _watcher = hot_reload::watch_bridge("jwtbridge.yaml", Arc::clone(&bridge))?;
//! ```

use crate::bridge::JwtBridge;
use crate::config::{load_properties, Properties};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Watch `path` and call `on_reload` with the freshly parsed properties.
///
/// The returned watcher must be kept alive for as long as reloads are wanted.
pub fn watch_properties<P, F>(path: P, mut on_reload: F) -> notify::Result<RecommendedWatcher>
where
    P: AsRef<Path>,
    F: FnMut(&Properties) + Send + 'static,
{
    let path: PathBuf = path.as_ref().to_path_buf();
    let file_name = path.file_name().map(|n| n.to_os_string());
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let watch_path = path.clone();
    let mut last_applied: Option<Properties> = load_properties(&path).ok();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                let ours = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if !ours {
                    return;
                }
                match load_properties(&watch_path) {
                    Ok(properties) => {
                        if last_applied.as_ref() == Some(&properties) {
                            debug!(path = %watch_path.display(), "Properties unchanged, skipping reload");
                            return;
                        }
                        info!(path = %watch_path.display(), keys = properties.len(), "hot-reload: properties changed");
                        on_reload(&properties);
                        last_applied = Some(properties);
                    }
                    Err(err) => {
                        warn!(path = %watch_path.display(), error = %err, "hot-reload: failed to load properties");
                    }
                }
            }
            Err(err) => error!(error = %err, "hot-reload: watch error"),
        },
        Config::default(),
    )?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Re-apply issuer and route configuration on `bridge` whenever `path` changes.
///
/// Each table is applied independently; a bad route section does not block a
/// good issuer section from taking effect.
pub fn watch_bridge<P: AsRef<Path>>(
    path: P,
    bridge: Arc<JwtBridge>,
) -> notify::Result<RecommendedWatcher> {
    watch_properties(path, move |properties| {
        match bridge.apply_issuer_config(properties) {
            Ok(table) => info!(
                version = table.version(),
                issuers = table.len(),
                "hot-reload: issuers applied"
            ),
            Err(err) => error!(error = %err, "hot-reload: issuer configuration rejected, keeping previous"),
        }
        match bridge.apply_route_config(properties) {
            Ok(table) => info!(
                version = table.version(),
                routes = table.len(),
                "hot-reload: routes applied"
            ),
            Err(err) => error!(error = %err, "hot-reload: route configuration rejected, keeping previous"),
        }
    })
}
