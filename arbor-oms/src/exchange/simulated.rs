use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use arbor_data::model::fees::TradingFees;
use arbor_data::model::order_book::OrderBookSnapshot;
use arbor_data::model::Side;
use arbor_data::shared::subscription_models::{Instrument, VenueId};

use crate::error::DriverError;
use crate::model::balance::{AssetBalance, Balance};
use crate::model::order::{OrderOutcome, OrderRequest, OrderResult};

use super::{BookStream, Capabilities, InstrumentSpec, VenueDriver};

/*----- */
// Simulated venue
/*----- */
// In-process driver used by integration tests and TEST_MODE runs. Books,
// balances and fees are scripted; orders fill instantly against the seeded
// book and land in a journal the tests can assert on.
pub struct SimulatedVenue {
    venue: VenueId,
    accepted_depths: Vec<usize>,
    state: Arc<Mutex<SimState>>,
}

#[derive(Default)]
struct SimState {
    instruments: Vec<InstrumentSpec>,
    books: HashMap<Instrument, OrderBookSnapshot>,
    balances: HashMap<String, Balance>,
    fees: HashMap<String, TradingFees>,
    journal: Vec<OrderResult>,
    create_calls: u64,
    next_order_seq: u64,
    // Upcoming create_order calls fail with these messages, in order
    create_failures: VecDeque<String>,
    // When a scripted failure fires, the order still lands at the venue.
    // Models a response lost in transit, which is what the timeout
    // recovery path exists for.
    record_on_failure: bool,
    fill_ratio: f64,
    fees_unavailable: bool,
    book_subscribers: Vec<mpsc::UnboundedSender<Result<OrderBookSnapshot, DriverError>>>,
}

impl SimulatedVenue {
    pub fn new(venue: VenueId) -> Self {
        Self {
            venue,
            accepted_depths: vec![5, 20, 50, 100],
            state: Arc::new(Mutex::new(SimState {
                fill_ratio: 1.0,
                ..SimState::default()
            })),
        }
    }

    pub fn with_accepted_depths(mut self, depths: Vec<usize>) -> Self {
        self.accepted_depths = depths;
        self
    }

    /*----- Seeding ----- */
    pub fn seed_instrument(&self, spec: InstrumentSpec) {
        self.state.lock().instruments.push(spec);
    }

    pub fn seed_book(&self, book: OrderBookSnapshot) {
        let mut state = self.state.lock();
        state.books.insert(book.instrument.clone(), book.clone());
        state
            .book_subscribers
            .retain(|subscriber| subscriber.send(Ok(book.clone())).is_ok());
    }

    pub fn seed_balance(&self, currency: &str, total: f64, free: f64) {
        self.state
            .lock()
            .balances
            .insert(currency.to_owned(), Balance::new(total, free));
    }

    pub fn seed_fees(&self, key: &str, fees: TradingFees) {
        self.state.lock().fees.insert(key.to_owned(), fees);
    }

    /*----- Scripting ----- */
    pub fn script_create_failure(&self, detail: &str) {
        self.state
            .lock()
            .create_failures
            .push_back(detail.to_owned());
    }

    pub fn set_record_on_failure(&self, record: bool) {
        self.state.lock().record_on_failure = record;
    }

    pub fn set_fill_ratio(&self, ratio: f64) {
        self.state.lock().fill_ratio = ratio;
    }

    pub fn set_fees_unavailable(&self, unavailable: bool) {
        self.state.lock().fees_unavailable = unavailable;
    }

    /*----- Inspection ----- */
    pub fn create_order_calls(&self) -> u64 {
        self.state.lock().create_calls
    }

    pub fn journal(&self) -> Vec<OrderResult> {
        self.state.lock().journal.clone()
    }

    fn fill_order(state: &mut SimState, venue: &VenueId, request: &OrderRequest) -> OrderResult {
        let book = state.books.get(&request.instrument);
        let price = match request.side {
            Side::Buy => book
                .and_then(|book| book.best_ask())
                .map(|level| level.price),
            Side::Sell => book
                .and_then(|book| book.best_bid())
                .map(|level| level.price),
        }
        .or(request.price)
        .unwrap_or(0.0);

        let taker_rate = state
            .fees
            .get(&request.instrument.to_string())
            .or_else(|| state.fees.get("*"))
            .copied()
            .unwrap_or_default()
            .taker_rate;

        let filled = request.amount * state.fill_ratio;
        let cost = filled * price;
        state.next_order_seq += 1;

        OrderResult {
            venue: venue.clone(),
            venue_order_id: format!("{}-{}", venue, state.next_order_seq),
            cid: request.cid,
            instrument: request.instrument.clone(),
            side: request.side,
            requested_amount: request.amount,
            filled_amount: filled,
            avg_price: price,
            cost,
            fee_paid: cost * taker_rate,
            venue_time: Utc::now(),
            outcome: OrderOutcome::Success,
            error: None,
        }
    }
}

#[async_trait]
impl VenueDriver for SimulatedVenue {
    fn venue(&self) -> VenueId {
        self.venue.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn accepted_depths(&self) -> &[usize] {
        &self.accepted_depths
    }

    async fn load_instruments(&self) -> Result<Vec<InstrumentSpec>, DriverError> {
        Ok(self.state.lock().instruments.clone())
    }

    async fn fetch_order_book(
        &self,
        instrument: &Instrument,
        _depth: usize,
    ) -> Result<OrderBookSnapshot, DriverError> {
        self.state
            .lock()
            .books
            .get(instrument)
            .cloned()
            .ok_or_else(|| DriverError::new(format!("no book for {}", instrument)))
    }

    async fn stream_order_book(
        &self,
        instrument: &Instrument,
        _depth: usize,
    ) -> Result<BookStream, DriverError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock();
            if let Some(book) = state.books.get(instrument) {
                let _ = tx.send(Ok(book.clone()));
            }
            state.book_subscribers.push(tx);
        }
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn fetch_balances(&self) -> Result<Vec<AssetBalance>, DriverError> {
        let state = self.state.lock();
        Ok(state
            .balances
            .iter()
            .map(|(currency, balance)| {
                AssetBalance::new(currency.clone(), self.venue.clone(), *balance)
            })
            .collect())
    }

    async fn fetch_trading_fees(&self) -> Result<HashMap<String, TradingFees>, DriverError> {
        let state = self.state.lock();
        if state.fees_unavailable {
            return Err(DriverError::new("fee endpoint unavailable"));
        }
        Ok(state.fees.clone())
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderResult, DriverError> {
        let mut state = self.state.lock();
        state.create_calls += 1;

        if let Some(detail) = state.create_failures.pop_front() {
            if state.record_on_failure {
                let venue = self.venue.clone();
                let result = Self::fill_order(&mut state, &venue, request);
                state.journal.push(result);
            }
            return Err(DriverError(detail));
        }

        let venue = self.venue.clone();
        let result = Self::fill_order(&mut state, &venue, request);
        state.journal.push(result.clone());
        Ok(result)
    }

    async fn fetch_order(
        &self,
        venue_order_id: &str,
        _instrument: &Instrument,
    ) -> Result<OrderResult, DriverError> {
        self.state
            .lock()
            .journal
            .iter()
            .find(|order| order.venue_order_id == venue_order_id)
            .cloned()
            .ok_or_else(|| DriverError::new(format!("unknown order {}", venue_order_id)))
    }

    async fn fetch_recent_orders(
        &self,
        instrument: &Instrument,
        limit: usize,
    ) -> Result<Vec<OrderResult>, DriverError> {
        let state = self.state.lock();
        Ok(state
            .journal
            .iter()
            .rev()
            .filter(|order| &order.instrument == instrument)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn cancel_order(
        &self,
        _venue_order_id: &str,
        _instrument: &Instrument,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn cancel_all_orders(&self) -> Result<usize, DriverError> {
        // Fills are instant, nothing rests
        Ok(0)
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.state.lock().book_subscribers.clear();
        Ok(())
    }
}
