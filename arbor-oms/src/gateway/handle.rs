use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use tracing::warn;

use arbor_data::model::order_book::OrderBookSnapshot;
use arbor_data::shared::subscription_models::{Instrument, VenueId};

use crate::exchange::{InstrumentSpec, VenueDriver};

/*----- */
// Venue state machine
/*----- */
// connecting -> connected -> (error -> reconnecting -> connecting)*
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueState {
    Connecting,
    Connected,
    Reconnecting,
}

/*----- */
// Venue handle
/*----- */
// One per configured venue, wrapping the opaque driver plus the mutable
// bookkeeping the gateway needs: connection state, error counting, listed
// instruments and the latest book per instrument.
pub struct VenueHandle {
    pub venue: VenueId,
    pub driver: Arc<dyn VenueDriver>,
    state: Mutex<VenueState>,
    error_count: AtomicU32,
    reconnect_attempt: AtomicU32,
    last_update: Mutex<DateTime<Utc>>,
    instruments: Mutex<HashMap<Instrument, InstrumentSpec>>,
    books: Mutex<HashMap<Instrument, OrderBookSnapshot>>,
}

impl VenueHandle {
    pub fn new(driver: Arc<dyn VenueDriver>) -> Self {
        Self {
            venue: driver.venue(),
            driver,
            state: Mutex::new(VenueState::Connecting),
            error_count: AtomicU32::new(0),
            reconnect_attempt: AtomicU32::new(0),
            last_update: Mutex::new(Utc::now()),
            instruments: Mutex::new(HashMap::new()),
            books: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> VenueState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: VenueState) {
        *self.state.lock() = state;
    }

    pub fn record_error(&self) -> u32 {
        self.error_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn reset_errors(&self) {
        self.error_count.store(0, Ordering::Release);
        self.reconnect_attempt.store(0, Ordering::Release);
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Acquire)
    }

    pub fn next_reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        *self.last_update.lock()
    }

    /*----- Instruments ----- */
    pub fn set_instruments(&self, specs: Vec<InstrumentSpec>) {
        let mut instruments = self.instruments.lock();
        instruments.clear();
        for spec in specs.into_iter() {
            instruments.insert(spec.instrument.clone(), spec);
        }
    }

    pub fn has_instrument(&self, instrument: &Instrument) -> bool {
        self.instruments.lock().contains_key(instrument)
    }

    pub fn min_trade_amount(&self, instrument: &Instrument) -> Option<f64> {
        self.instruments
            .lock()
            .get(instrument)
            .map(|spec| spec.min_trade_amount)
    }

    pub fn amount_precision(&self, instrument: &Instrument) -> Option<f64> {
        self.instruments
            .lock()
            .get(instrument)
            .map(|spec| spec.amount_precision)
    }

    /*----- Books ----- */
    pub fn update_book(&self, book: OrderBookSnapshot) {
        {
            let mut last_update = self.last_update.lock();
            if book.venue_time > *last_update {
                *last_update = book.venue_time;
            }
        }
        self.books.lock().insert(book.instrument.clone(), book);
    }

    pub fn latest_book(&self, instrument: &Instrument) -> Option<OrderBookSnapshot> {
        self.books.lock().get(instrument).cloned()
    }

    /*----- Depth normalization ----- */
    // Round a requested depth up to the smallest value the venue accepts.
    // Requests beyond the venue maximum are capped with a warning.
    pub fn compatible_depth(&self, requested: usize) -> usize {
        let accepted = self.driver.accepted_depths();
        if accepted.is_empty() {
            return requested;
        }

        match accepted.iter().find(|depth| **depth >= requested) {
            Some(depth) => *depth,
            None => {
                let max = *accepted.last().expect("accepted depths non-empty");
                warn!(
                    venue = %self.venue,
                    requested = requested,
                    capped_to = max,
                    message = "requested order book depth exceeds venue maximum"
                );
                max
            }
        }
    }
}

impl std::fmt::Debug for VenueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueHandle")
            .field("venue", &self.venue)
            .field("state", &self.state())
            .field("error_count", &self.error_count())
            .finish()
    }
}

/*----- */
// Reconnect backoff
/*----- */
// initial * 2^(attempt - 1), capped, with a little jitter so a fleet of
// handles does not reconnect in lockstep.
pub fn reconnect_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let scaled = initial.as_millis() as u64 * (1u64 << exponent);
    let capped = Duration::from_millis(scaled).min(max);

    let jitter_ms = rand::thread_rng().gen_range(0..=(capped.as_millis() as u64 / 10).max(1));
    (capped + Duration::from_millis(jitter_ms)).min(max)
}

#[cfg(test)]
mod test {
    use arbor_data::shared::subscription_models::VenueId;

    use crate::exchange::simulated::SimulatedVenue;

    use super::*;

    fn handle_with_depths(depths: Vec<usize>) -> VenueHandle {
        let sim = SimulatedVenue::new(VenueId::new("venue_a")).with_accepted_depths(depths);
        VenueHandle::new(Arc::new(sim))
    }

    #[test]
    fn test_compatible_depth_rounds_up() {
        let handle = handle_with_depths(vec![5, 20, 50, 100]);

        assert_eq!(handle.compatible_depth(0), 5);
        assert_eq!(handle.compatible_depth(1), 5);
        assert_eq!(handle.compatible_depth(5), 5);
        assert_eq!(handle.compatible_depth(6), 20);
        assert_eq!(handle.compatible_depth(20), 20);
        assert_eq!(handle.compatible_depth(21), 50);
        assert_eq!(handle.compatible_depth(100), 100);
    }

    #[test]
    fn test_compatible_depth_caps_at_maximum() {
        let handle = handle_with_depths(vec![1, 50, 200, 1000]);
        assert_eq!(handle.compatible_depth(1001), 1000);
        assert_eq!(handle.compatible_depth(usize::MAX), 1000);
    }

    #[test]
    fn test_reconnect_delay_doubles_and_caps() {
        let initial = Duration::from_secs(5);
        let max = Duration::from_secs(300);

        let first = reconnect_delay(1, initial, max);
        assert!(first >= Duration::from_secs(5) && first <= Duration::from_millis(5500));

        let third = reconnect_delay(3, initial, max);
        assert!(third >= Duration::from_secs(20) && third <= Duration::from_secs(22));

        let huge = reconnect_delay(12, initial, max);
        assert_eq!(huge, max);
    }

    #[test]
    fn test_error_and_state_tracking() {
        let handle = handle_with_depths(vec![5]);
        assert_eq!(handle.state(), VenueState::Connecting);

        assert_eq!(handle.record_error(), 1);
        assert_eq!(handle.record_error(), 2);
        handle.set_state(VenueState::Reconnecting);
        assert_eq!(handle.state(), VenueState::Reconnecting);

        handle.reset_errors();
        assert_eq!(handle.error_count(), 0);
    }
}
