mod execution;
mod gating;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use arbor_data::shared::subscription_models::Instrument;
use arbor_oms::event::{EngineEvent, EventTx, MessageTransmitter};
use arbor_oms::gateway::VenueGateway;
use arbor_oms::ledger::TradeLedger;
use arbor_strategy::{build_opportunity, Opportunity, VarianceHistory, VarianceStats};

/*----- */
// Trader config
/*----- */
#[derive(Debug, Clone)]
pub struct TraderConfig {
    pub min_profit_percent: f64,
    pub max_trade_amount: f64,
    pub check_interval: Duration,
    pub max_slippage_percent: f64,
    // Percent of the requested buy amount that must fill before the sell
    // leg is allowed
    pub partial_fill_threshold: f64,
    pub price_tolerance_percent: f64,
    pub max_profit_erosion_percent: f64,
    pub dynamic_tolerance: bool,
    pub max_concurrent_trades: usize,
    pub order_book_depth: usize,
    pub staleness_threshold: chrono::Duration,
    pub max_opportunity_age: chrono::Duration,
    pub order_timeout: Duration,
    // Quote-side headroom demanded on top of the required notional
    pub reserve_percent: f64,
    // Floor when neither venue reports a listing minimum
    pub min_trade_amount: f64,
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            min_profit_percent: 0.5,
            max_trade_amount: 100.0,
            check_interval: Duration::from_secs(5),
            max_slippage_percent: 0.5,
            partial_fill_threshold: 95.0,
            price_tolerance_percent: 0.1,
            max_profit_erosion_percent: 20.0,
            dynamic_tolerance: true,
            max_concurrent_trades: 3,
            order_book_depth: 10,
            staleness_threshold: chrono::Duration::milliseconds(500),
            max_opportunity_age: chrono::Duration::seconds(5),
            order_timeout: Duration::from_secs(30),
            reserve_percent: 5.0,
            min_trade_amount: 0.0,
        }
    }
}

/*----- */
// Active trades
/*----- */
// The race-condition fence between competing ticks: check-and-insert runs
// inside a single non-yielding critical section, so two concurrent attempts
// on the same trade key can never both pass.
#[derive(Debug, Default)]
pub struct ActiveTrades(Mutex<HashSet<String>>);

impl ActiveTrades {
    pub fn try_acquire(&self, trade_key: &str) -> bool {
        let mut active = self.0.lock();
        if active.contains(trade_key) {
            return false;
        }
        active.insert(trade_key.to_owned());
        true
    }

    pub fn release(&self, trade_key: &str) {
        self.0.lock().remove(trade_key);
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/*----- */
// Arbitrage trader
/*----- */
// Scans the latest books across venues on a fixed tick, gates candidates
// through should_execute, and runs the two-leg execution sequence for the
// survivors.
pub struct ArbTrader {
    pub(super) gateway: Arc<VenueGateway>,
    pub(super) ledger: Arc<TradeLedger>,
    pub(super) config: TraderConfig,
    pub(super) instruments: Vec<Instrument>,
    pub(super) active_trades: Arc<ActiveTrades>,
    pub(super) variance: Mutex<VarianceHistory>,
    pub(super) event_tx: EventTx,
}

impl ArbTrader {
    pub fn new(
        gateway: Arc<VenueGateway>,
        ledger: Arc<TradeLedger>,
        config: TraderConfig,
        instruments: Vec<Instrument>,
        event_tx: EventTx,
    ) -> Self {
        Self {
            gateway,
            ledger,
            config,
            instruments,
            active_trades: Arc::new(ActiveTrades::default()),
            variance: Mutex::new(VarianceHistory::default()),
            event_tx,
        }
    }

    pub fn active_trades(&self) -> Arc<ActiveTrades> {
        Arc::clone(&self.active_trades)
    }

    pub fn variance_stats(&self) -> VarianceStats {
        self.variance.lock().stats()
    }

    /*----- Monitoring tick ----- */
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            instruments = self.instruments.len(),
            check_interval_ms = self.config.check_interval.as_millis() as u64,
            message = "arbitrage trader started"
        );

        let mut tick = tokio::time::interval(self.config.check_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for instrument in self.instruments.clone().into_iter() {
                        Arc::clone(&self).scan_instrument(&instrument).await;
                    }
                    self.event_tx.send(EngineEvent::StatusUpdate {
                        active_trades: self.active_trades.len(),
                        variance: self.variance_stats(),
                    });
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!(message = "arbitrage trader stopped");
    }

    /*----- Per-tick scan ----- */
    // Candidate construction is pure; execution is spawned so one slow trade
    // never blocks the remaining candidates.
    pub async fn scan_instrument(self: Arc<Self>, instrument: &Instrument) -> Vec<JoinHandle<()>> {
        let candidates = self.detect_opportunities(instrument);
        let mut spawned = Vec::new();

        for candidate in candidates.into_iter() {
            if self.should_execute(&candidate).await {
                info!(
                    opportunity = %candidate,
                    message = "executing opportunity"
                );
                self.event_tx
                    .send(EngineEvent::OpportunityFound(candidate.clone()));

                let trader = Arc::clone(&self);
                spawned.push(tokio::spawn(async move {
                    trader.execute(candidate).await;
                }));
            }
        }

        spawned
    }

    // Pairwise over every venue listing the instrument, both directions,
    // survivors sorted by descending profit.
    pub fn detect_opportunities(&self, instrument: &Instrument) -> Vec<Opportunity> {
        let now = chrono::Utc::now();
        let venues = self.gateway.venues_with_instrument(instrument);

        let books: Vec<_> = venues
            .iter()
            .filter_map(|venue| self.gateway.latest_book(venue, instrument))
            .filter(|book| {
                let fresh = !book.stale && book.age(now) <= self.config.staleness_threshold;
                if !fresh {
                    debug!(
                        venue = %book.venue,
                        instrument = %instrument,
                        age_ms = book.age(now).num_milliseconds(),
                        message = "skipping stale order book"
                    );
                }
                fresh
            })
            .collect();

        if books.len() < 2 {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for buy_book in books.iter() {
            for sell_book in books.iter() {
                if buy_book.venue == sell_book.venue {
                    continue;
                }

                let buy_fees = self.gateway.fees_for(&buy_book.venue, instrument);
                let sell_fees = self.gateway.fees_for(&sell_book.venue, instrument);
                if let Some(candidate) = build_opportunity(
                    buy_book,
                    sell_book,
                    &buy_fees,
                    &sell_fees,
                    self.config.max_trade_amount,
                ) {
                    if candidate.profit_percent >= self.config.min_profit_percent {
                        candidates.push(candidate);
                    }
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.profit_percent
                .partial_cmp(&a.profit_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }

    pub(super) fn release_trade(&self, trade_key: &str) {
        self.gateway.release(trade_key);
        self.active_trades.release(trade_key);
    }

    pub(super) fn warn_if_drain_incomplete(&self) {
        if !self.active_trades.is_empty() {
            warn!(
                remaining = self.active_trades.len(),
                message = "in-flight trades still active after drain window"
            );
        }
    }
}
