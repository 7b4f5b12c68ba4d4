//! Security event counters fed by every token validation.
//!
//! Counters are atomics. Each issuer owns its own counter block (looked up
//! through a sharded map), so validations for different issuers never touch
//! the same lock. The only lock on the hot path guards one issuer's
//! recent-errors list and is taken on failures only.

use crate::security::{ErrorCategory, ValidationResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default bound of the recent-errors list.
pub const DEFAULT_RECENT_ERRORS: usize = 50;

/// Bucket for outcomes that could not be attributed to a configured issuer.
pub const UNATTRIBUTED_ISSUER: &str = "(unknown)";

#[derive(Default)]
struct IssuerCounters {
    total: AtomicU64,
    valid: AtomicU64,
    invalid: AtomicU64,
    by_category: [AtomicU64; ErrorCategory::ALL.len()],
    recent: Mutex<VecDeque<RecentError>>,
}

/// One distinct `(issuer, message)` failure and how often it occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentError {
    pub issuer: String,
    pub category: ErrorCategory,
    pub message: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: u64,
}

/// Counts for one issuer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssuerSnapshot {
    pub total: u64,
    pub valid: u64,
    pub invalid: u64,
    pub by_category: BTreeMap<ErrorCategory, u64>,
}

/// Immutable copy of all counters at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct SecuritySnapshot {
    pub taken_at: DateTime<Utc>,
    pub total: u64,
    pub valid: u64,
    pub invalid: u64,
    /// Mean validation time in microseconds
    pub average_response_time_us: f64,
    pub issuers: BTreeMap<String, IssuerSnapshot>,
    /// Newest first
    pub recent_errors: Vec<RecentError>,
}

/// Aggregates validation outcomes per issuer.
pub struct SecurityEventCounter {
    issuers: DashMap<String, Arc<IssuerCounters>>,
    total: AtomicU64,
    valid: AtomicU64,
    invalid: AtomicU64,
    total_latency_ns: AtomicU64,
    max_recent_errors: usize,
}

impl Default for SecurityEventCounter {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_ERRORS)
    }
}

impl SecurityEventCounter {
    /// Counter keeping at most `max_recent_errors` entries per issuer and in snapshots.
    #[must_use]
    pub fn new(max_recent_errors: usize) -> Self {
        Self {
            issuers: DashMap::new(),
            total: AtomicU64::new(0),
            valid: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
            total_latency_ns: AtomicU64::new(0),
            max_recent_errors: max_recent_errors.max(1),
        }
    }

    fn counters(&self, issuer: &str) -> Arc<IssuerCounters> {
        if let Some(c) = self.issuers.get(issuer) {
            return Arc::clone(c.value());
        }
        Arc::clone(
            self.issuers
                .entry(issuer.to_string())
                .or_default()
                .value(),
        )
    }

    /// Record one validation outcome against `issuer`.
    pub fn record(&self, issuer: &str, result: &ValidationResult, elapsed: Duration) {
        let counters = self.counters(issuer);
        counters.total.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns.fetch_add(
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );

        let Some(error) = result.error() else {
            counters.valid.fetch_add(1, Ordering::Relaxed);
            self.valid.fetch_add(1, Ordering::Relaxed);
            return;
        };
        counters.invalid.fetch_add(1, Ordering::Relaxed);
        self.invalid.fetch_add(1, Ordering::Relaxed);
        counters.by_category[error.category.index()].fetch_add(1, Ordering::Relaxed);

        let now = Utc::now();
        let mut recent = counters.recent.lock();
        if let Some(pos) = recent.iter().position(|e| e.message == error.message) {
            // repeat: bump and move to the back (most recent)
            if let Some(mut entry) = recent.remove(pos) {
                entry.count += 1;
                entry.last_seen = now;
                entry.category = error.category;
                recent.push_back(entry);
            }
            return;
        }
        if recent.len() >= self.max_recent_errors {
            recent.pop_front();
        }
        recent.push_back(RecentError {
            issuer: issuer.to_string(),
            category: error.category,
            message: error.message.clone(),
            first_seen: now,
            last_seen: now,
            count: 1,
        });
    }

    /// Copy of all counters. Per-issuer lists are merged, newest first, and cut
    /// to the configured bound.
    #[must_use]
    pub fn snapshot(&self) -> SecuritySnapshot {
        let mut issuers = BTreeMap::new();
        let mut recent_errors = Vec::new();

        for entry in self.issuers.iter() {
            let c = entry.value();
            let by_category = ErrorCategory::ALL
                .iter()
                .filter_map(|cat| {
                    let n = c.by_category[cat.index()].load(Ordering::Relaxed);
                    (n > 0).then_some((*cat, n))
                })
                .collect();
            issuers.insert(
                entry.key().clone(),
                IssuerSnapshot {
                    total: c.total.load(Ordering::Relaxed),
                    valid: c.valid.load(Ordering::Relaxed),
                    invalid: c.invalid.load(Ordering::Relaxed),
                    by_category,
                },
            );
            recent_errors.extend(c.recent.lock().iter().cloned());
        }

        recent_errors.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        recent_errors.truncate(self.max_recent_errors);

        let total = self.total.load(Ordering::Relaxed);
        let average_response_time_us = if total == 0 {
            0.0
        } else {
            self.total_latency_ns.load(Ordering::Relaxed) as f64 / total as f64 / 1000.0
        };

        SecuritySnapshot {
            taken_at: Utc::now(),
            total,
            valid: self.valid.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            average_response_time_us,
            issuers,
            recent_errors,
        }
    }

    /// Average validation latency across all recorded outcomes.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        let count = self.total.load(Ordering::Relaxed);
        if count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    /// Zero every counter and forget recent errors.
    pub fn reset(&self) {
        self.issuers.clear();
        self.total.store(0, Ordering::Relaxed);
        self.valid.store(0, Ordering::Relaxed);
        self.invalid.store(0, Ordering::Relaxed);
        self.total_latency_ns.store(0, Ordering::Relaxed);
    }
}
