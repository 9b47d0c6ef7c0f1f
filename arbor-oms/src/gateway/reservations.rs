use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::debug;

use arbor_data::shared::subscription_models::VenueId;

/*----- */
// Balance reservation
/*----- */
// Earmarks a slice of a venue balance for an in-flight trade so concurrent
// attempts cannot spend the same funds twice. Stale reservations are swept
// before every read.
#[derive(Debug, Clone)]
pub struct BalanceReservation {
    pub trade_key: String,
    pub venue: VenueId,
    pub currency: String,
    pub amount: f64,
    pub created_at: DateTime<Utc>,
}

/*----- */
// Reservation book
/*----- */
#[derive(Debug)]
pub struct ReservationBook {
    ttl: Duration,
    inner: Mutex<Vec<BalanceReservation>>,
}

impl ReservationBook {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(Vec::new()),
        }
    }

    pub fn reserve(&self, trade_key: &str, venue: &VenueId, currency: &str, amount: f64) {
        let mut inner = self.inner.lock();
        inner.push(BalanceReservation {
            trade_key: trade_key.to_owned(),
            venue: venue.clone(),
            currency: currency.to_lowercase(),
            amount,
            created_at: Utc::now(),
        });
    }

    // Removes every reservation keyed by this trade
    pub fn release(&self, trade_key: &str) {
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|reservation| reservation.trade_key != trade_key);
        if inner.len() != before {
            debug!(
                trade_key = %trade_key,
                released = before - inner.len(),
                message = "released balance reservations"
            );
        }
    }

    // Sum of live reservations on (venue, currency), optionally ignoring the
    // caller's own trade key.
    pub fn reserved_amount(
        &self,
        venue: &VenueId,
        currency: &str,
        exclude_trade_key: Option<&str>,
    ) -> f64 {
        let now = Utc::now();
        let currency = currency.to_lowercase();
        let mut inner = self.inner.lock();
        inner.retain(|reservation| now - reservation.created_at <= self.ttl);

        inner
            .iter()
            .filter(|reservation| {
                &reservation.venue == venue
                    && reservation.currency == currency
                    && exclude_trade_key != Some(reservation.trade_key.as_str())
            })
            .map(|reservation| reservation.amount)
            .sum()
    }

    pub fn snapshot(&self) -> Vec<BalanceReservation> {
        self.inner.lock().clone()
    }
}

impl Default for ReservationBook {
    fn default() -> Self {
        Self::new(Duration::seconds(60))
    }
}
