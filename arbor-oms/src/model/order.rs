use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use arbor_data::model::Side;
use arbor_data::shared::subscription_models::{Instrument, VenueId};

use super::{ClientOrderId, OrderKind};

/*----- */
// Order request
/*----- */
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub venue: VenueId,
    pub instrument: Instrument,
    pub side: Side,
    pub amount: f64,
    pub kind: OrderKind,
    // Only present for limit orders
    pub price: Option<f64>,
    pub cid: ClientOrderId,
}

impl OrderRequest {
    pub fn market(
        venue: VenueId,
        instrument: Instrument,
        side: Side,
        amount: f64,
        cid: ClientOrderId,
    ) -> Self {
        Self {
            venue,
            instrument,
            side,
            amount,
            kind: OrderKind::Market,
            price: None,
            cid,
        }
    }
}

/*----- */
// Order result
/*----- */
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResult {
    pub venue: VenueId,
    pub venue_order_id: String,
    pub cid: ClientOrderId,
    pub instrument: Instrument,
    pub side: Side,
    pub requested_amount: f64,
    pub filled_amount: f64,
    pub avg_price: f64,
    // Notional in quote currency
    pub cost: f64,
    pub fee_paid: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub venue_time: DateTime<Utc>,
    pub outcome: OrderOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OrderResult {
    pub fn is_success(&self) -> bool {
        self.outcome == OrderOutcome::Success
    }

    pub fn fill_percent(&self) -> f64 {
        if self.requested_amount <= 0.0 {
            return 0.0;
        }
        self.filled_amount / self.requested_amount * 100.0
    }

    // Synthesised failure for requests that never reached or never cleared
    // the venue.
    pub fn failure(request: &OrderRequest, detail: String) -> Self {
        Self {
            venue: request.venue.clone(),
            venue_order_id: String::new(),
            cid: request.cid,
            instrument: request.instrument.clone(),
            side: request.side,
            requested_amount: request.amount,
            filled_amount: 0.0,
            avg_price: 0.0,
            cost: 0.0,
            fee_paid: 0.0,
            venue_time: Utc::now(),
            outcome: OrderOutcome::Failure,
            error: Some(detail),
        }
    }
}
