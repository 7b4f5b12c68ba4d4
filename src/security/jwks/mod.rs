//! Per-issuer JWKS key cache.
//!
//! Key sets are fetched lazily on the first lookup for an issuer and kept
//! until their freshness deadline passes. After that, exactly one caller per
//! issuer (whoever wins the slot's refresh try-lock) refetches synchronously
//! while every other caller keeps using the last good set. The last good set
//! is served for at most the grace period past freshness; beyond that lookups
//! fail instead of trusting arbitrarily old keys.
//!
//! Keys that disappear from a refreshed document stay usable until the grace
//! deadline of the set they came from, so tokens signed just before a
//! rotation do not start failing the moment the new document is published.
//!
//! Failed refreshes are not retried for `retry_interval`. During that window a
//! cold issuer fails fast and a warm issuer keeps serving its (graced) set.

mod keys;

pub use keys::{parse_jwks, supported_algorithm, VerificationKey};

use crate::config::{IssuerConfig, IssuerTable, JwksCacheSettings, JwksSource};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a key could not be produced for a token.
#[derive(Error, Debug)]
pub enum KeyError {
    /// Network fetch failed (connect, timeout, body read)
    #[error("JWKS fetch from {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    /// Endpoint answered with a non-success status
    #[error("JWKS endpoint {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// Reading a `jwks-file` failed
    #[error("cannot read JWKS file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Document is not a usable JWKS
    #[error("invalid JWKS document: {0}")]
    Parse(String),

    /// Document parsed but held no RSA signing key
    #[error("JWKS document contains no usable signing keys")]
    NoUsableKeys,

    /// No key with this `kid` in the current set
    #[error("no signing key with kid '{kid}'")]
    UnknownKid { kid: String },

    /// Token has no `kid` and the set holds more than one key
    #[error("token has no kid and the issuer publishes {count} keys")]
    AmbiguousKey { count: usize },

    /// Last good set is past its grace deadline and no refresh succeeded
    #[error("cached keys for issuer {issuer} expired and could not be refreshed")]
    GraceExpired { issuer: String },

    /// Previous refresh failed recently; not retrying yet
    #[error("JWKS for issuer {issuer} unavailable, retry pending: {last_error}")]
    BackingOff { issuer: String, last_error: String },
}

/// Source of raw JWKS documents. Swapped out in tests.
pub trait JwksFetcher: Send + Sync {
    fn fetch(&self, source: &JwksSource) -> Result<String, KeyError>;
}

/// Fetches over HTTP(S) with a bounded timeout, or reads files / inline content.
pub struct HttpJwksFetcher {
    client: reqwest::blocking::Client,
}

impl HttpJwksFetcher {
    /// Build a fetcher whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, KeyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| KeyError::Fetch {
                url: "<client>".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl JwksFetcher for HttpJwksFetcher {
    fn fetch(&self, source: &JwksSource) -> Result<String, KeyError> {
        match source {
            JwksSource::Url(url) => {
                let fetch_err = |e: reqwest::Error| KeyError::Fetch {
                    url: url.clone(),
                    reason: e.to_string(),
                };
                let response = self
                    .client
                    .get(url)
                    .header("accept", "application/json")
                    .send()
                    .map_err(fetch_err)?;
                let status = response.status();
                if !status.is_success() {
                    return Err(KeyError::HttpStatus {
                        url: url.clone(),
                        status: status.as_u16(),
                    });
                }
                response.text().map_err(fetch_err)
            }
            JwksSource::File(path) => std::fs::read_to_string(path).map_err(|source| KeyError::Io {
                path: path.display().to_string(),
                source,
            }),
            JwksSource::Inline(content) => Ok(content.clone()),
        }
    }
}

/// One fetched key set with its time bounds.
#[derive(Debug)]
pub struct CachedKeySet {
    keys: HashMap<String, Arc<VerificationKey>>,
    // kid -> (key, deadline); keys dropped from the document by a rotation
    retired: HashMap<String, (Arc<VerificationKey>, Instant)>,
    fetched_at: Instant,
    fetched_at_utc: DateTime<Utc>,
    fresh_until: Instant,
    usable_until: Instant,
}

// Keys published without a kid are stored under this name
const NO_KID: &str = "";

impl CachedKeySet {
    fn build(
        fetched: Vec<VerificationKey>,
        previous: Option<&CachedKeySet>,
        now: Instant,
        settings: &JwksCacheSettings,
    ) -> Self {
        let mut keys = HashMap::with_capacity(fetched.len());
        for key in fetched {
            let kid = key.kid().unwrap_or(NO_KID).to_string();
            keys.insert(kid, Arc::new(key));
        }

        let mut retired = HashMap::new();
        if let Some(prev) = previous {
            for (kid, key) in &prev.keys {
                if !keys.contains_key(kid) && prev.usable_until > now {
                    retired.insert(kid.clone(), (Arc::clone(key), prev.usable_until));
                }
            }
            for (kid, (key, deadline)) in &prev.retired {
                if !keys.contains_key(kid) && !retired.contains_key(kid) && *deadline > now {
                    retired.insert(kid.clone(), (Arc::clone(key), *deadline));
                }
            }
        }

        let fresh_until = now + settings.refresh_interval;
        Self {
            keys,
            retired,
            fetched_at: now,
            fetched_at_utc: Utc::now(),
            fresh_until,
            usable_until: fresh_until + settings.grace_period,
        }
    }

    fn lookup(&self, kid: Option<&str>, now: Instant) -> Result<Arc<VerificationKey>, KeyError> {
        match kid {
            Some(kid) => {
                if let Some(key) = self.keys.get(kid) {
                    return Ok(Arc::clone(key));
                }
                match self.retired.get(kid) {
                    Some((key, deadline)) if *deadline > now => Ok(Arc::clone(key)),
                    _ => Err(KeyError::UnknownKid {
                        kid: kid.to_string(),
                    }),
                }
            }
            None => {
                let mut all = self.keys.values();
                match (all.next(), all.next()) {
                    (Some(only), None) => Ok(Arc::clone(only)),
                    _ => Err(KeyError::AmbiguousKey {
                        count: self.keys.len(),
                    }),
                }
            }
        }
    }

    /// Published key ids, sorted.
    #[must_use]
    pub fn kids(&self) -> Vec<String> {
        let mut kids: Vec<String> = self.keys.keys().cloned().collect();
        kids.sort();
        kids
    }

    /// Number of retired keys still inside their grace deadline at `now`.
    #[must_use]
    pub fn retired_count(&self, now: Instant) -> usize {
        self.retired.values().filter(|(_, d)| *d > now).count()
    }

    #[must_use]
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.fresh_until
    }

    #[must_use]
    pub fn is_usable(&self, now: Instant) -> bool {
        now < self.usable_until
    }

    #[must_use]
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at_utc
    }

    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }
}

struct IssuerKeySlot {
    issuer: String,
    source: JwksSource,
    current: RwLock<Option<Arc<CachedKeySet>>>,
    // held for the duration of a fetch; at most one refresh per issuer
    refresh_lock: Mutex<()>,
    last_attempt: Mutex<Option<Instant>>,
    last_failure: Mutex<Option<(Instant, String)>>,
}

impl IssuerKeySlot {
    fn new(issuer: &IssuerConfig) -> Self {
        Self {
            issuer: issuer.name.clone(),
            source: issuer.jwks.clone(),
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            last_attempt: Mutex::new(None),
            last_failure: Mutex::new(None),
        }
    }

    fn current(&self) -> Option<Arc<CachedKeySet>> {
        self.current.read().clone()
    }

    /// Error text of a failure that happened less than `retry` ago.
    fn backing_off(&self, now: Instant, retry: Duration) -> Option<String> {
        self.last_failure
            .lock()
            .as_ref()
            .filter(|(at, _)| now.saturating_duration_since(*at) < retry)
            .map(|(_, msg)| msg.clone())
    }

    fn attempted_within(&self, now: Instant, window: Duration) -> bool {
        self.last_attempt
            .lock()
            .is_some_and(|at| now.saturating_duration_since(at) < window)
    }
}

/// Aggregate view of the cache for metrics endpoints.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JwksCacheStats {
    pub issuers: usize,
    pub keys: usize,
    pub refreshes: u64,
    pub refresh_failures: u64,
}

/// Per-issuer cache of signing keys.
pub struct JwksKeyCache {
    fetcher: Arc<dyn JwksFetcher>,
    settings: JwksCacheSettings,
    slots: DashMap<String, Arc<IssuerKeySlot>>,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

impl JwksKeyCache {
    pub fn new(fetcher: Arc<dyn JwksFetcher>, settings: JwksCacheSettings) -> Self {
        Self {
            fetcher,
            settings,
            slots: DashMap::new(),
            refreshes: AtomicU64::new(0),
            refresh_failures: AtomicU64::new(0),
        }
    }

    /// Cache backed by [`HttpJwksFetcher`] with the configured fetch timeout.
    pub fn with_http(settings: JwksCacheSettings) -> Result<Self, KeyError> {
        let fetcher = HttpJwksFetcher::new(settings.fetch_timeout)?;
        Ok(Self::new(Arc::new(fetcher), settings))
    }

    #[must_use]
    pub fn settings(&self) -> &JwksCacheSettings {
        &self.settings
    }

    /// Key for `kid` from `issuer`'s published set.
    pub fn get_key(
        &self,
        issuer: &IssuerConfig,
        kid: Option<&str>,
    ) -> Result<Arc<VerificationKey>, KeyError> {
        self.get_key_at(issuer, kid, Instant::now())
    }

    /// [`get_key`](Self::get_key) evaluated at an explicit instant.
    pub fn get_key_at(
        &self,
        issuer: &IssuerConfig,
        kid: Option<&str>,
        now: Instant,
    ) -> Result<Arc<VerificationKey>, KeyError> {
        let slot = self.slot_for(issuer);

        let Some(set) = slot.current() else {
            return self.load_cold(&slot, kid, now);
        };

        if set.is_fresh(now) {
            return match set.lookup(kid, now) {
                Err(KeyError::UnknownKid { .. }) => self.refresh_on_kid_miss(&slot, &set, kid, now),
                other => other,
            };
        }

        // Stale: one caller refreshes, the rest serve the last good set
        if let Some(_guard) = slot.refresh_lock.try_lock() {
            let still_stale = slot.current().is_none_or(|s| !s.is_fresh(now));
            if still_stale && slot.backing_off(now, self.settings.retry_interval).is_none() {
                if let Err(err) = self.refresh(&slot, now) {
                    debug!(issuer = %slot.issuer, error = %err, "Serving last good key set");
                }
            }
        }

        match slot.current() {
            Some(set) if set.is_usable(now) => set.lookup(kid, now),
            _ => {
                debug!(issuer = %slot.issuer, "JWKS key set past grace period");
                Err(KeyError::GraceExpired {
                    issuer: slot.issuer.clone(),
                })
            }
        }
    }

    fn load_cold(
        &self,
        slot: &IssuerKeySlot,
        kid: Option<&str>,
        now: Instant,
    ) -> Result<Arc<VerificationKey>, KeyError> {
        if let Some(last_error) = slot.backing_off(now, self.settings.retry_interval) {
            return Err(KeyError::BackingOff {
                issuer: slot.issuer.clone(),
                last_error,
            });
        }

        // Cold callers queue on the lock; the first fetches, the rest reuse its result
        let _guard = slot.refresh_lock.lock();
        if let Some(set) = slot.current() {
            return set.lookup(kid, now);
        }
        if let Some(last_error) = slot.backing_off(now, self.settings.retry_interval) {
            return Err(KeyError::BackingOff {
                issuer: slot.issuer.clone(),
                last_error,
            });
        }
        self.refresh(slot, now)?.lookup(kid, now)
    }

    fn refresh_on_kid_miss(
        &self,
        slot: &IssuerKeySlot,
        set: &Arc<CachedKeySet>,
        kid: Option<&str>,
        now: Instant,
    ) -> Result<Arc<VerificationKey>, KeyError> {
        let miss = || set.lookup(kid, now);
        if slot.attempted_within(now, self.settings.retry_interval) {
            return miss();
        }
        let Some(_guard) = slot.refresh_lock.try_lock() else {
            return miss();
        };
        // re-check under the lock: another caller may just have refreshed
        if slot.attempted_within(now, self.settings.retry_interval) {
            return slot.current().map_or_else(miss, |s| s.lookup(kid, now));
        }
        debug!(issuer = %slot.issuer, kid = ?kid, "Unknown kid, refreshing JWKS early");
        match self.refresh(slot, now) {
            Ok(fresh) => fresh.lookup(kid, now),
            Err(_) => miss(),
        }
    }

    /// Fetch, parse and install a new set. Caller holds the slot's refresh lock.
    fn refresh(&self, slot: &IssuerKeySlot, now: Instant) -> Result<Arc<CachedKeySet>, KeyError> {
        *slot.last_attempt.lock() = Some(now);
        let started = Instant::now();

        let fetched = self
            .fetcher
            .fetch(&slot.source)
            .and_then(|text| parse_jwks(&text));

        match fetched {
            Ok(keys) => {
                let previous = slot.current();
                let set = Arc::new(CachedKeySet::build(
                    keys,
                    previous.as_deref(),
                    now,
                    &self.settings,
                ));
                *slot.current.write() = Some(Arc::clone(&set));
                *slot.last_failure.lock() = None;
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                info!(
                    issuer = %slot.issuer,
                    source = %slot.source.describe(),
                    keys = set.keys.len(),
                    retired = set.retired_count(now),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "JWKS refreshed"
                );
                Ok(set)
            }
            Err(err) => {
                self.refresh_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    issuer = %slot.issuer,
                    source = %slot.source.describe(),
                    error = %err,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "JWKS refresh failed"
                );
                *slot.last_failure.lock() = Some((now, err.to_string()));
                Err(err)
            }
        }
    }

    /// Slot for `issuer`, replacing one whose JWKS source no longer matches.
    fn slot_for(&self, issuer: &IssuerConfig) -> Arc<IssuerKeySlot> {
        if let Some(slot) = self.slots.get(&issuer.name) {
            if slot.source == issuer.jwks {
                return Arc::clone(slot.value());
            }
        }
        let mut entry = self
            .slots
            .entry(issuer.name.clone())
            .or_insert_with(|| Arc::new(IssuerKeySlot::new(issuer)));
        if entry.source != issuer.jwks {
            debug!(issuer = %issuer.name, "JWKS source changed, discarding cached keys");
            *entry = Arc::new(IssuerKeySlot::new(issuer));
        }
        Arc::clone(entry.value())
    }

    /// Drop cached keys for issuers no longer in `table` or whose source changed.
    pub fn retain_configured(&self, table: &IssuerTable) {
        self.slots.retain(|name, slot| {
            let keep = table.get(name).is_some_and(|cfg| cfg.jwks == slot.source);
            if !keep {
                info!(issuer = %name, "Dropping cached JWKS for reconfigured issuer");
            }
            keep
        });
    }

    /// Forget everything cached for one issuer.
    pub fn invalidate(&self, issuer_name: &str) {
        self.slots.remove(issuer_name);
    }

    /// Current key set of an issuer, if one was ever loaded.
    #[must_use]
    pub fn cached(&self, issuer_name: &str) -> Option<Arc<CachedKeySet>> {
        self.slots.get(issuer_name).and_then(|slot| slot.current())
    }

    #[must_use]
    pub fn stats(&self) -> JwksCacheStats {
        let mut stats = JwksCacheStats {
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            ..JwksCacheStats::default()
        };
        for slot in self.slots.iter() {
            if let Some(set) = slot.current() {
                stats.issuers += 1;
                stats.keys += set.keys.len();
            }
        }
        stats
    }
}
