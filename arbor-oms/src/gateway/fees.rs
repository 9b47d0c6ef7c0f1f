use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::debug;

use arbor_data::model::fees::TradingFees;
use arbor_data::shared::subscription_models::{Instrument, VenueId};

pub const FEE_WILDCARD: &str = "*";

/*----- */
// Per venue schedule
/*----- */
#[derive(Debug, Clone)]
struct VenueFees {
    wildcard: Option<TradingFees>,
    per_instrument: HashMap<String, TradingFees>,
    last_refreshed: DateTime<Utc>,
}

/*----- */
// Fee cache
/*----- */
// Schedules are refreshed once after init and every 24h after that.
// Lookups that miss the cache, or hit an expired entry, fall back to the
// conservative per-venue default so profit math never flatters itself.
#[derive(Debug)]
pub struct FeeCache {
    ttl: Duration,
    default_fees: TradingFees,
    inner: Mutex<HashMap<VenueId, VenueFees>>,
}

impl FeeCache {
    pub fn new(ttl: Duration, default_fees: TradingFees) -> Self {
        Self {
            ttl,
            default_fees,
            inner: Mutex::new(HashMap::new()),
        }
    }

    // Store a venue's full schedule, keyed by "BASE/QUOTE" with "*" as the
    // venue-wide wildcard.
    pub fn store(&self, venue: &VenueId, schedule: HashMap<String, TradingFees>) {
        let mut per_instrument = HashMap::new();
        let mut wildcard = None;
        for (key, fees) in schedule.into_iter() {
            if key == FEE_WILDCARD {
                wildcard = Some(fees);
            } else {
                per_instrument.insert(key, fees);
            }
        }

        debug!(
            venue = %venue,
            instruments = per_instrument.len(),
            has_wildcard = wildcard.is_some(),
            message = "stored trading fee schedule"
        );

        self.inner.lock().insert(
            venue.clone(),
            VenueFees {
                wildcard,
                per_instrument,
                last_refreshed: Utc::now(),
            },
        );
    }

    // Per-instrument entry overrides the wildcard; anything stale or missing
    // resolves to the conservative default.
    pub fn lookup(&self, venue: &VenueId, instrument: &Instrument) -> TradingFees {
        let inner = self.inner.lock();
        let Some(venue_fees) = inner.get(venue) else {
            return self.default_fees;
        };

        if Utc::now() - venue_fees.last_refreshed > self.ttl {
            return self.default_fees;
        }

        venue_fees
            .per_instrument
            .get(&instrument.to_string())
            .or(venue_fees.wildcard.as_ref())
            .copied()
            .unwrap_or(self.default_fees)
    }

    pub fn needs_refresh(&self, venue: &VenueId) -> bool {
        let inner = self.inner.lock();
        match inner.get(venue) {
            Some(venue_fees) => Utc::now() - venue_fees.last_refreshed > self.ttl,
            None => true,
        }
    }
}

impl Default for FeeCache {
    fn default() -> Self {
        Self::new(Duration::hours(24), TradingFees::conservative())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn venue() -> VenueId {
        VenueId::new("venue_a")
    }

    #[test]
    fn test_instrument_overrides_wildcard() {
        let cache = FeeCache::default();
        let mut schedule = HashMap::new();
        schedule.insert(FEE_WILDCARD.to_owned(), TradingFees::new(0.002, 0.002));
        schedule.insert("OP/USDT".to_owned(), TradingFees::new(0.001, 0.001));
        cache.store(&venue(), schedule);

        let specific = cache.lookup(&venue(), &Instrument::new("OP", "USDT"));
        assert_eq!(specific.taker_rate, 0.001);

        let wildcard = cache.lookup(&venue(), &Instrument::new("BTC", "USDT"));
        assert_eq!(wildcard.taker_rate, 0.002);
    }

    #[test]
    fn test_miss_returns_conservative_default() {
        let cache = FeeCache::default();
        let fees = cache.lookup(&venue(), &Instrument::new("OP", "USDT"));
        assert_eq!(fees, TradingFees::conservative());
    }

    #[test]
    fn test_expired_schedule_falls_back() {
        let cache = FeeCache::new(Duration::zero(), TradingFees::conservative());
        let mut schedule = HashMap::new();
        schedule.insert(FEE_WILDCARD.to_owned(), TradingFees::new(0.0001, 0.0001));
        cache.store(&venue(), schedule);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let fees = cache.lookup(&venue(), &Instrument::new("OP", "USDT"));
        assert_eq!(fees, TradingFees::conservative());
        assert!(cache.needs_refresh(&venue()));
    }
}
