use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use arbor_data::model::fees::TradingFees;
use arbor_data::model::order_book::OrderBookSnapshot;
use arbor_data::shared::subscription_models::{Instrument, VenueId};

/*----- */
// Fee breakdown
/*----- */
// All amounts are in quote currency for the full opportunity amount.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    pub buy_fee: f64,
    pub sell_fee: f64,
    pub total: f64,
}

/*----- */
// Opportunity
/*----- */
// Derived and immutable. `timestamp` is the older of the two participating
// book timestamps, so age checks are pessimistic.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub instrument: Instrument,
    pub buy_venue: VenueId,
    pub sell_venue: VenueId,
    pub buy_price: f64,
    pub sell_price: f64,
    pub amount: f64,
    pub profit_percent: f64,
    pub profit_amount: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub fees: FeeBreakdown,
}

impl Opportunity {
    // Unique key of an in-flight arbitrage attempt on this pair of venues.
    pub fn trade_key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.instrument, self.buy_venue, self.sell_venue
        )
    }

    pub fn required_quote(&self) -> f64 {
        self.buy_price * self.amount
    }
}

impl std::fmt::Display for Opportunity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} buy {}@{} sell {}@{} amount {} profit {:.4}%",
            self.instrument,
            self.buy_venue,
            self.buy_price,
            self.sell_venue,
            self.sell_price,
            self.amount,
            self.profit_percent
        )
    }
}

/*----- */
// Profit arithmetic
/*----- */
// Net profit of buying one unit at `buy_price` and selling it at
// `sell_price`, after taker fees on both legs, expressed as a percent of the
// buy notional. Returns 0 for any non-positive input price.
pub fn calculate_profit_percent(
    buy_price: f64,
    sell_price: f64,
    buy_fee_rate: f64,
    sell_fee_rate: f64,
) -> f64 {
    if buy_price <= 0.0 || sell_price <= 0.0 {
        return 0.0;
    }

    let gross = sell_price - buy_price;
    let fees = buy_price * buy_fee_rate + sell_price * sell_fee_rate;
    (gross - fees) / buy_price * 100.0
}

// Build a candidate opportunity out of the top of two venues' books. Returns
// None when either book is empty, the dislocation is absent (sell <= buy), or
// no amount is executable.
pub fn build_opportunity(
    buy_book: &OrderBookSnapshot,
    sell_book: &OrderBookSnapshot,
    buy_fees: &TradingFees,
    sell_fees: &TradingFees,
    max_amount: f64,
) -> Option<Opportunity> {
    let best_ask = buy_book.best_ask()?;
    let best_bid = sell_book.best_bid()?;

    let buy_price = best_ask.price;
    let sell_price = best_bid.price;
    if sell_price <= buy_price {
        return None;
    }

    let amount = best_ask.amount.min(best_bid.amount).min(max_amount);
    if amount <= 0.0 {
        return None;
    }

    let profit_percent =
        calculate_profit_percent(buy_price, sell_price, buy_fees.taker_rate, sell_fees.taker_rate);

    let buy_fee = buy_fees.taker_cost(buy_price * amount);
    let sell_fee = sell_fees.taker_cost(sell_price * amount);
    let profit_amount = (sell_price - buy_price) * amount - buy_fee - sell_fee;

    Some(Opportunity {
        instrument: buy_book.instrument.clone(),
        buy_venue: buy_book.venue.clone(),
        sell_venue: sell_book.venue.clone(),
        buy_price,
        sell_price,
        amount,
        profit_percent,
        profit_amount,
        timestamp: buy_book.venue_time.min(sell_book.venue_time),
        fees: FeeBreakdown {
            buy_fee,
            sell_fee,
            total: buy_fee + sell_fee,
        },
    })
}
