//! Market Price Cache
//!
//! Holds the most recent price of every instrument the feed reports.
//! Writers race freely; an update older than the stored sample is dropped,
//! so the cache always converges on the newest observation.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::clock::SharedClock;
use crate::domain::{normalize_instrument, PriceSample};

/// Default retention stamped on each entry
pub const DEFAULT_RETENTION_MINUTES: i64 = 31;

pub type SharedPriceCache = Arc<MarketPriceCache>;

// =============================================================================
// CachedPrice
// =============================================================================

/// A sample plus local bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPrice {
    pub sample: PriceSample,

    /// When this process stored the sample (injected clock)
    pub received_at: DateTime<Utc>,

    /// Only honoured by [`MarketPriceCache::prune_expired`]
    pub expires_at: DateTime<Utc>,
}

impl CachedPrice {
    /// Time since we stored it
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.received_at
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }
}

/// What happened to an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Stored,
    /// Older than the sample already held
    Stale,
    /// Price was NaN, infinite, zero or negative
    Rejected,
}

// =============================================================================
// CacheStats
// =============================================================================

#[derive(Debug, Default)]
pub struct CacheStats {
    stored: AtomicU64,
    stale: AtomicU64,
    rejected: AtomicU64,
}

impl CacheStats {
    fn record(&self, outcome: UpdateOutcome) {
        let counter = match outcome {
            UpdateOutcome::Stored => &self.stored,
            UpdateOutcome::Stale => &self.stale,
            UpdateOutcome::Rejected => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    pub fn stale(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

// =============================================================================
// MarketPriceCache
// =============================================================================

pub struct MarketPriceCache {
    prices: DashMap<String, CachedPrice>,
    clock: SharedClock,
    retention: Duration,
    stats: CacheStats,
}

impl MarketPriceCache {
    pub fn new(clock: SharedClock) -> Self {
        Self::with_retention(clock, Duration::minutes(DEFAULT_RETENTION_MINUTES))
    }

    pub fn with_retention(clock: SharedClock, retention: Duration) -> Self {
        Self {
            prices: DashMap::new(),
            clock,
            retention,
            stats: CacheStats::default(),
        }
    }

    /// Store a sample unless a newer one is already held
    ///
    /// An update with the same observation time as the stored sample wins.
    pub fn update(&self, instrument: &str, price: f64, observed_at: DateTime<Utc>) -> UpdateOutcome {
        let key = normalize_instrument(instrument);

        if !price.is_finite() || price <= 0.0 {
            warn!(instrument = %key, price, "Rejected invalid price");
            self.stats.record(UpdateOutcome::Rejected);
            return UpdateOutcome::Rejected;
        }

        let now = self.clock.now();
        let fresh = CachedPrice {
            sample: PriceSample {
                instrument: key.clone(),
                price,
                observed_at,
            },
            received_at: now,
            expires_at: now + self.retention,
        };

        let outcome = match self.prices.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if slot.get().sample.observed_at > observed_at {
                    debug!(
                        instrument = %slot.key(),
                        held = %slot.get().sample.observed_at,
                        incoming = %observed_at,
                        "Dropped out-of-order price"
                    );
                    UpdateOutcome::Stale
                } else {
                    slot.insert(fresh);
                    UpdateOutcome::Stored
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(fresh);
                UpdateOutcome::Stored
            }
        };

        self.stats.record(outcome);
        outcome
    }

    /// Feed callback taking the exchange's millisecond timestamp
    pub fn on_price_update(&self, instrument: &str, price: f64, observed_at_millis: i64) -> UpdateOutcome {
        match DateTime::from_timestamp_millis(observed_at_millis) {
            Some(observed_at) => self.update(instrument, price, observed_at),
            None => {
                warn!(instrument, observed_at_millis, "Rejected price with invalid timestamp");
                self.stats.record(UpdateOutcome::Rejected);
                UpdateOutcome::Rejected
            }
        }
    }

    pub fn latest(&self, instrument: &str) -> Option<CachedPrice> {
        self.prices
            .get(&normalize_instrument(instrument))
            .map(|entry| entry.value().clone())
    }

    /// Latest sample, or `None` when it is older than `max_age`
    pub fn latest_fresh(&self, instrument: &str, max_age: Option<Duration>) -> Option<CachedPrice> {
        let cached = self.latest(instrument)?;
        match max_age {
            Some(limit) if cached.is_stale(self.clock.now(), limit) => None,
            _ => Some(cached),
        }
    }

    pub fn snapshot(&self) -> Vec<PriceSample> {
        let mut samples: Vec<PriceSample> = self
            .prices
            .iter()
            .map(|entry| entry.value().sample.clone())
            .collect();
        samples.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        samples
    }

    /// Drop entries past their `expires_at`; returns how many were removed
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.prices.len();
        self.prices.retain(|_, cached| cached.expires_at > now);
        before - self.prices.len()
    }

    pub fn instrument_count(&self) -> usize {
        self.prices.len()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl std::fmt::Debug for MarketPriceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketPriceCache")
            .field("instruments", &self.prices.len())
            .field("retention", &self.retention)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
