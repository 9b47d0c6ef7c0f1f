use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::assets::level::Level;
use crate::model::Side;
use crate::shared::subscription_models::{Instrument, VenueId};

/*----- */
// Order book snapshot
/*----- */
// Asks ascending by price, bids descending. The venue timestamp is
// authoritative for age reasoning; received_time is kept for skew monitoring.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderBookSnapshot {
    pub venue: VenueId,
    pub instrument: Instrument,
    pub asks: Vec<Level>,
    pub bids: Vec<Level>,
    pub venue_time: DateTime<Utc>,
    pub received_time: DateTime<Utc>,
    #[serde(default)]
    pub stale: bool,
}

impl OrderBookSnapshot {
    pub fn new(
        venue: VenueId,
        instrument: Instrument,
        asks: Vec<Level>,
        bids: Vec<Level>,
        venue_time: DateTime<Utc>,
    ) -> Self {
        Self {
            venue,
            instrument,
            asks,
            bids,
            venue_time,
            received_time: Utc::now(),
            stale: false,
        }
    }

    #[inline]
    pub fn best_ask(&self) -> Option<&Level> {
        self.asks.first()
    }

    #[inline]
    pub fn best_bid(&self) -> Option<&Level> {
        self.bids.first()
    }

    #[inline]
    pub fn mid_price(&self) -> Option<f64> {
        if let (Some(best_bid), Some(best_ask)) = (self.bids.first(), self.asks.first()) {
            return Some((best_bid.price + best_ask.price) / 2.0);
        }

        None
    }

    #[inline]
    pub fn weighted_mid_price(&self) -> Option<f64> {
        if let (Some(best_bid), Some(best_ask)) = (self.bids.first(), self.asks.first()) {
            let num = best_bid.amount * best_ask.price + best_bid.price * best_ask.amount;
            let den = best_bid.amount + best_ask.amount;
            return Some(num / den);
        }

        None
    }

    // A well formed single-venue book never crosses. A cross between two
    // venues' books is exactly the dislocation the strategy is hunting for.
    pub fn is_well_formed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask.price > bid.price,
            _ => true,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.venue_time
    }

    // Average price achieved by walking the book for `amount`. Returns None
    // when the visible depth cannot absorb the full amount.
    pub fn average_fill_price(&self, side: Side, amount: f64) -> Option<f64> {
        if amount <= 0.0 {
            return None;
        }

        let levels = match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        };

        let mut remaining = amount;
        let mut notional = 0.0;
        for level in levels.iter() {
            let take = remaining.min(level.amount);
            notional += take * level.price;
            remaining -= take;
            if remaining <= 0.0 {
                return Some(notional / amount);
            }
        }

        None
    }

    // Deviation of the walked average price from the best quote, in percent.
    pub fn slippage_percent(&self, side: Side, amount: f64) -> Option<f64> {
        let average = self.average_fill_price(side, amount)?;
        let best = match side {
            Side::Buy => self.best_ask()?.price,
            Side::Sell => self.best_bid()?.price,
        };

        if best <= 0.0 {
            return None;
        }

        Some(((average - best) / best).abs() * 100.0)
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use super::*;

    fn book() -> OrderBookSnapshot {
        OrderBookSnapshot::new(
            VenueId::new("venue_a"),
            Instrument::new("OP", "USDT"),
            vec![
                Level::new(100.0, 5.0),
                Level::new(101.0, 5.0),
                Level::new(103.0, 10.0),
            ],
            vec![
                Level::new(99.0, 5.0),
                Level::new(98.0, 5.0),
                Level::new(95.0, 10.0),
            ],
            Utc::now(),
        )
    }

    #[test]
    fn test_best_levels_and_mid() {
        let book = book();
        assert_eq!(book.best_ask().unwrap().price, 100.0);
        assert_eq!(book.best_bid().unwrap().price, 99.0);
        assert_eq!(book.mid_price().unwrap(), 99.5);
        assert!(book.is_well_formed());
    }

    #[test]
    fn test_average_fill_price_walks_levels() {
        let book = book();

        // Fits in the first level
        let avg_1 = book.average_fill_price(Side::Buy, 5.0).unwrap();
        assert_eq!(avg_1, 100.0);

        // Walks two levels: (5 * 100 + 5 * 101) / 10
        let avg_2 = book.average_fill_price(Side::Buy, 10.0).unwrap();
        assert_eq!(avg_2, 100.5);

        // Exceeds visible depth
        assert!(book.average_fill_price(Side::Buy, 100.0).is_none());
    }

    #[test]
    fn test_slippage_percent() {
        let book = book();

        let none = book.slippage_percent(Side::Buy, 5.0).unwrap();
        assert_eq!(none, 0.0);

        let walked = book.slippage_percent(Side::Buy, 10.0).unwrap();
        assert!((walked - 0.5).abs() < 1e-9);

        let sell_walked = book.slippage_percent(Side::Sell, 10.0).unwrap();
        assert!(sell_walked > 0.0);
    }
}
