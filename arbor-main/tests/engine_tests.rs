use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use arbor_data::assets::level::Level;
use arbor_data::model::fees::TradingFees;
use arbor_data::model::order_book::OrderBookSnapshot;
use arbor_data::model::Side;
use arbor_data::shared::subscription_models::{Instrument, Subscription, VenueId};
use arbor_main::trader::{ArbTrader, TraderConfig};
use arbor_oms::event::EngineEvent;
use arbor_oms::exchange::simulated::SimulatedVenue;
use arbor_oms::exchange::{InstrumentSpec, VenueDriver};
use arbor_oms::gateway::{GatewayConfig, VenueGateway};
use arbor_oms::ledger::{LedgerConfig, TradeLedger, TradeStatus};
use arbor_oms::model::order::OrderRequest;
use arbor_oms::model::ClientOrderId;
use arbor_oms::rate_limit::{RateLimitConfig, RateLimiter};
use arbor_strategy::Opportunity;

/*----- */
// Harness
/*----- */
// Two simulated venues with a crossed market on OP/USDT: venue_a asks 100,
// venue_b bids 101. With 0.1% taker fees both sides that is a 0.799% edge.
struct Harness {
    gateway: Arc<VenueGateway>,
    ledger: Arc<TradeLedger>,
    trader: Arc<ArbTrader>,
    rate_limiter: Arc<RateLimiter>,
    venue_a: Arc<SimulatedVenue>,
    venue_b: Arc<SimulatedVenue>,
    event_rx: mpsc::UnboundedReceiver<EngineEvent>,
    ledger_path: PathBuf,
}

fn instrument() -> Instrument {
    Instrument::new("OP", "USDT")
}

fn book(venue: &str, asks: Vec<Level>, bids: Vec<Level>) -> OrderBookSnapshot {
    OrderBookSnapshot::new(VenueId::new(venue), instrument(), asks, bids, Utc::now())
}

fn ledger_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("arbor-test-{}-{}.json", tag, unique_suffix()))
}

fn unique_suffix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

async fn harness(tag: &str) -> Harness {
    let venue_a = Arc::new(SimulatedVenue::new(VenueId::new("venue_a")));
    let venue_b = Arc::new(SimulatedVenue::new(VenueId::new("venue_b")));

    for venue in [&venue_a, &venue_b] {
        venue.seed_instrument(
            InstrumentSpec::new(instrument(), 0.1).with_amount_precision(0.01),
        );
        venue.seed_fees("*", TradingFees::new(0.001, 0.001));
    }
    venue_a.seed_book(book(
        "venue_a",
        vec![Level::new(100.0, 10.0)],
        vec![Level::new(99.5, 10.0)],
    ));
    venue_b.seed_book(book(
        "venue_b",
        vec![Level::new(102.0, 10.0)],
        vec![Level::new(101.0, 10.0)],
    ));
    venue_a.seed_balance("USDT", 10_000.0, 10_000.0);
    venue_a.seed_balance("OP", 0.0, 0.0);
    venue_b.seed_balance("OP", 10.0, 10.0);
    venue_b.seed_balance("USDT", 0.0, 0.0);

    let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        capacity: 1000,
        ..RateLimitConfig::default()
    }));
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let event_tx = arbor_oms::event::EventTx::new(event_tx);

    // Generous staleness margin keeps slow CI runs honest
    let gateway_config = GatewayConfig {
        recovery_pause: Duration::from_millis(10),
        staleness_threshold: chrono::Duration::seconds(5),
        ..GatewayConfig::default()
    };
    let gateway = Arc::new(VenueGateway::new(
        gateway_config,
        Arc::clone(&rate_limiter),
        event_tx.clone(),
    ));
    gateway
        .add_venue(Arc::clone(&venue_a) as Arc<dyn VenueDriver>)
        .await
        .unwrap();
    gateway
        .add_venue(Arc::clone(&venue_b) as Arc<dyn VenueDriver>)
        .await
        .unwrap();
    // Pull the seeded schedules so profit math uses 0.1% instead of the
    // conservative fallback
    gateway.refresh_all_fees().await;

    let path = ledger_path(tag);
    let ledger = Arc::new(TradeLedger::open(LedgerConfig::new(path.clone())).unwrap());

    let trader_config = TraderConfig {
        min_profit_percent: 0.5,
        max_trade_amount: 50.0,
        order_timeout: Duration::from_secs(5),
        reserve_percent: 5.0,
        staleness_threshold: chrono::Duration::seconds(5),
        ..TraderConfig::default()
    };
    let trader = Arc::new(ArbTrader::new(
        Arc::clone(&gateway),
        Arc::clone(&ledger),
        trader_config,
        vec![instrument()],
        event_tx,
    ));

    let harness = Harness {
        gateway,
        ledger,
        trader,
        rate_limiter,
        venue_a,
        venue_b,
        event_rx,
        ledger_path: path,
    };

    // Start streaming and give the consume loops a beat to publish books
    harness
        .gateway
        .subscribe(&Subscription::new(VenueId::new("venue_a"), instrument(), 10))
        .unwrap();
    harness
        .gateway
        .subscribe(&Subscription::new(VenueId::new("venue_b"), instrument(), 10))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    harness
}

impl Harness {
    fn detect_one(&self) -> Opportunity {
        let candidates = self.trader.detect_opportunities(&instrument());
        assert!(!candidates.is_empty(), "expected at least one opportunity");
        candidates[0].clone()
    }

    fn last_execution_event(&mut self) -> (String, bool, Option<f64>) {
        let mut last = None;
        while let Ok(event) = self.event_rx.try_recv() {
            if let EngineEvent::ExecutionCompleted {
                trade_key,
                success,
                profit,
            } = event
            {
                last = Some((trade_key, success, profit));
            }
        }
        last.expect("expected an ExecutionCompleted event")
    }

    fn cleanup(&self) {
        let _ = std::fs::remove_file(&self.ledger_path);
    }
}

/*----- */
// S1 - happy path
/*----- */
#[tokio::test]
async fn test_happy_path_two_leg_execution() {
    let mut harness = harness("s1").await;

    let opportunity = harness.detect_one();
    assert_eq!(opportunity.buy_venue, VenueId::new("venue_a"));
    assert_eq!(opportunity.sell_venue, VenueId::new("venue_b"));
    assert_eq!(opportunity.amount, 10.0);
    assert!((opportunity.profit_percent - 0.799).abs() < 1e-9);

    assert!(harness.trader.should_execute(&opportunity).await);
    Arc::clone(&harness.trader).execute(opportunity.clone()).await;

    // Both legs hit their venues, buy first
    let journal_a = harness.venue_a.journal();
    let journal_b = harness.venue_b.journal();
    assert_eq!(journal_a.len(), 1);
    assert_eq!(journal_b.len(), 1);
    assert_eq!(journal_a[0].side, Side::Buy);
    assert_eq!(journal_b[0].side, Side::Sell);
    assert!(journal_a[0].venue_time <= journal_b[0].venue_time);

    // Ledger settled, nothing left in flight, reservations released
    assert_eq!(harness.ledger.active_count(), 0);
    assert!(harness.trader.active_trades().is_empty());

    let (trade_key, success, profit) = harness.last_execution_event();
    assert_eq!(trade_key, opportunity.trade_key());
    assert!(success);
    // (1010 - 1.01) - (1000 + 1.0)
    assert!((profit.unwrap() - 7.99).abs() < 1e-6);

    harness.cleanup();
}

/*----- */
// S2 - concurrent gating, single winner
/*----- */
#[tokio::test]
async fn test_concurrent_should_execute_single_winner() {
    let harness = harness("s2").await;
    let opportunity = harness.detect_one();

    let (first, second) = tokio::join!(
        harness.trader.should_execute(&opportunity),
        harness.trader.should_execute(&opportunity)
    );

    assert!(first ^ second, "exactly one attempt must win the lock");
    assert_eq!(harness.trader.active_trades().len(), 1);

    harness.trader.active_trades().release(&opportunity.trade_key());
    harness.gateway.release(&opportunity.trade_key());
    harness.cleanup();
}

/*----- */
// S3 - buy fails, no sell issued
/*----- */
#[tokio::test]
async fn test_buy_failure_never_sells() {
    let mut harness = harness("s3").await;
    let opportunity = harness.detect_one();

    harness.venue_a.script_create_failure("insufficient funds");

    assert!(harness.trader.should_execute(&opportunity).await);
    Arc::clone(&harness.trader).execute(opportunity.clone()).await;

    assert!(harness.venue_b.journal().is_empty(), "sell must not be issued");
    assert_eq!(harness.ledger.active_count(), 0);
    assert!(harness.trader.active_trades().is_empty());

    // Reservations released: full quote balance visible again
    let available = harness
        .gateway
        .available_balance(&VenueId::new("venue_a"), "USDT", None)
        .await
        .unwrap();
    assert_eq!(available, 10_000.0);

    let (_, success, profit) = harness.last_execution_event();
    assert!(!success);
    assert!(profit.is_none());

    harness.cleanup();
}

/*----- */
// S4 - partial fill below threshold strands the buy
/*----- */
#[tokio::test]
async fn test_partial_fill_below_threshold_aborts() {
    let mut harness = harness("s4").await;
    let opportunity = harness.detect_one();

    harness.venue_a.set_fill_ratio(0.8);

    assert!(harness.trader.should_execute(&opportunity).await);
    Arc::clone(&harness.trader).execute(opportunity.clone()).await;

    // 80% < 95%: no sell, trade failed
    assert!(harness.venue_b.journal().is_empty());
    assert_eq!(harness.ledger.active_count(), 0);

    let (_, success, _) = harness.last_execution_event();
    assert!(!success);

    harness.cleanup();
}

/*----- */
// S5 - partial fill above threshold adjusts the sell amount
/*----- */
#[tokio::test]
async fn test_partial_fill_above_threshold_adjusts_sell() {
    let mut harness = harness("s5").await;
    let opportunity = harness.detect_one();

    harness.venue_a.set_fill_ratio(0.97);

    assert!(harness.trader.should_execute(&opportunity).await);
    Arc::clone(&harness.trader).execute(opportunity.clone()).await;

    let journal_b = harness.venue_b.journal();
    assert_eq!(journal_b.len(), 1);
    assert_eq!(journal_b[0].side, Side::Sell);
    assert!((journal_b[0].requested_amount - 9.7).abs() < 1e-9);

    // Profit computed on the 9.7 actually traded:
    // (9.7 * 101) * (1 - 0.001) - (9.7 * 100) * (1 + 0.001)
    let expected = (979.7 - 0.9797) - (970.0 + 0.97);
    let (_, success, profit) = harness.last_execution_event();
    assert!(success);
    assert!((profit.unwrap() - expected).abs() < 1e-6);

    harness.cleanup();
}

/*----- */
// S6 - timeout recovery and idempotent replay
/*----- */
#[tokio::test]
async fn test_timeout_recovery_is_at_most_once() {
    let harness = harness("s6").await;

    // The venue accepts the order but the response is lost
    harness.venue_a.set_record_on_failure(true);
    harness.venue_a.script_create_failure("connect ETIMEDOUT");

    let cid = ClientOrderId::random();
    let request = OrderRequest::market(
        VenueId::new("venue_a"),
        instrument(),
        Side::Buy,
        10.0,
        cid,
    );

    let recovered = harness
        .gateway
        .execute_trade(request.clone())
        .await
        .unwrap();
    assert!(recovered.is_success(), "lost response must be recovered");
    assert_eq!(harness.venue_a.create_order_calls(), 1);

    // A retry with the same client order id hydrates the existing order
    // instead of creating a second one
    let replayed = harness.gateway.execute_trade(request).await.unwrap();
    assert!(replayed.is_success());
    assert_eq!(replayed.venue_order_id, recovered.venue_order_id);
    assert_eq!(harness.venue_a.create_order_calls(), 1);
    assert_eq!(harness.venue_a.journal().len(), 1);

    harness.cleanup();
}

/*----- */
// S7 - restart recovery
/*----- */
#[tokio::test]
async fn test_restart_reports_resumable_trade() {
    let mut harness = harness("s7").await;
    let opportunity = harness.detect_one();

    // Crash between the buy and the sell: simulate by recording through
    // buyExecuted and reopening the ledger from disk
    let trade_key = harness.ledger.record_start(&opportunity).unwrap();
    let buy = harness
        .gateway
        .execute_trade(OrderRequest::market(
            VenueId::new("venue_a"),
            instrument(),
            Side::Buy,
            10.0,
            ClientOrderId::random(),
        ))
        .await
        .unwrap();
    harness
        .ledger
        .record_buy_executed(&trade_key, buy)
        .unwrap();

    let reopened = TradeLedger::open(LedgerConfig::new(harness.ledger_path.clone())).unwrap();
    let report = reopened.recover();
    assert_eq!(report.resumable.len(), 1);
    assert_eq!(report.orphaned.len(), 0);
    assert_eq!(report.resumable[0].trade_key, trade_key);
    assert_eq!(report.resumable[0].status, TradeStatus::BuyExecuted);
    assert!(report.resumable[0].buy_result.is_some());
    assert!(report.resumable[0].sell_result.is_none());

    // Drain pending events so the harness drop stays quiet
    while harness.event_rx.try_recv().is_ok() {}
    harness.cleanup();
}

/*----- */
// Throttle classification feeds the rate limiter
/*----- */
#[tokio::test]
async fn test_throttle_error_triggers_backoff() {
    let harness = harness("throttle").await;

    harness
        .venue_a
        .script_create_failure("429 Too Many Requests");

    let request = OrderRequest::market(
        VenueId::new("venue_a"),
        instrument(),
        Side::Buy,
        10.0,
        ClientOrderId::random(),
    );
    let result = harness.gateway.execute_trade(request).await.unwrap();
    assert!(!result.is_success());

    let stats = harness.rate_limiter.stats(&VenueId::new("venue_a"));
    assert_eq!(stats.throttle_error_count, 1);
    assert!(stats.throttled);

    harness.cleanup();
}

/*----- */
// Stale books are rejected at scan time
/*----- */
#[tokio::test]
async fn test_stale_book_suppresses_detection() {
    let harness = harness("stale").await;

    // Re-seed venue_a with an old venue timestamp
    let mut old_book = book(
        "venue_a",
        vec![Level::new(100.0, 10.0)],
        vec![Level::new(99.5, 10.0)],
    );
    old_book.venue_time = Utc::now() - chrono::Duration::seconds(10);
    harness.venue_a.seed_book(old_book);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let candidates = harness.trader.detect_opportunities(&instrument());
    assert!(
        candidates.is_empty(),
        "stale venue_a book must suppress the pair"
    );

    harness.cleanup();
}

/*----- */
// Opportunities older than the age limit are rejected
/*----- */
#[tokio::test]
async fn test_validate_opportunity_age_limits() {
    let harness = harness("age").await;

    let mut opportunity = harness.detect_one();
    assert!(harness.trader.validate_opportunity(&opportunity));

    opportunity.timestamp = Utc::now() - chrono::Duration::seconds(30);
    assert!(!harness.trader.validate_opportunity(&opportunity));

    // Future timestamp means severe clock skew
    opportunity.timestamp = Utc::now() + chrono::Duration::seconds(30);
    assert!(!harness.trader.validate_opportunity(&opportunity));

    harness.cleanup();
}

/*----- */
// Balance gate counts other trades' reservations
/*----- */
#[tokio::test]
async fn test_reservations_gate_concurrent_balance_use() {
    let harness = harness("reserve").await;
    let opportunity = harness.detect_one();

    // Another in-flight trade reserved most of the quote balance
    harness
        .gateway
        .reserve("other-trade", &VenueId::new("venue_a"), "USDT", 9_500.0);

    let passes = harness
        .trader
        .check_required_balances(&opportunity, &opportunity.trade_key())
        .await
        .unwrap();
    assert!(!passes, "required 1050 > available 500");

    harness.gateway.release("other-trade");
    let passes_after = harness
        .trader
        .check_required_balances(&opportunity, &opportunity.trade_key())
        .await
        .unwrap();
    assert!(passes_after);

    harness.cleanup();
}

/*----- */
// Timeout without a matching recent order stays a failure
/*----- */
#[tokio::test]
async fn test_timeout_without_match_returns_failure() {
    let harness = harness("timeout-miss").await;

    // Response lost AND the venue genuinely never booked the order
    harness.venue_a.script_create_failure("request timeout");

    let request = OrderRequest::market(
        VenueId::new("venue_a"),
        instrument(),
        Side::Buy,
        10.0,
        ClientOrderId::random(),
    );
    let result = harness.gateway.execute_trade(request).await.unwrap();

    assert!(!result.is_success());
    assert!(result.error.as_deref().unwrap_or("").contains("timeout"));
    assert_eq!(harness.venue_a.journal().len(), 0);

    harness.cleanup();
}

/*----- */
// Concurrency cap gates before anything else
/*----- */
#[tokio::test]
async fn test_concurrent_trade_cap() {
    let harness = harness("cap").await;
    let opportunity = harness.detect_one();

    // Default cap is 3
    let active = harness.trader.active_trades();
    assert!(active.try_acquire("other-1"));
    assert!(active.try_acquire("other-2"));
    assert!(active.try_acquire("other-3"));

    assert!(!harness.trader.should_execute(&opportunity).await);

    active.release("other-1");
    assert!(harness.trader.should_execute(&opportunity).await);
    harness.trader.active_trades().release(&opportunity.trade_key());
    harness.gateway.release(&opportunity.trade_key());

    harness.cleanup();
}

/*----- */
// Price moved beyond tolerance between detection and execution
/*----- */
#[tokio::test]
async fn test_price_variance_beyond_tolerance_rejects() {
    let harness = harness("variance").await;
    let opportunity = harness.detect_one();

    // Buy side price jumps 0.5% before the revalidation fetch
    harness.venue_a.seed_book(book(
        "venue_a",
        vec![Level::new(100.5, 10.0)],
        vec![Level::new(99.5, 10.0)],
    ));

    assert!(!harness.trader.should_execute(&opportunity).await);
    // The failed gate released the trade key on its way out
    assert!(harness.trader.active_trades().is_empty());

    // The rejected attempt still lands in the variance history
    let stats = harness.trader.variance_stats();
    assert_eq!(stats.recent_count, 1);
    assert!(stats.max_variance > 0.4);

    harness.cleanup();
}

/*----- */
// Small drifts within tolerance can still erode too much of the edge
/*----- */
#[tokio::test]
async fn test_profit_erosion_gate() {
    let harness = harness("erosion").await;
    let opportunity = harness.detect_one();

    // Each leg drifts ~0.09% (inside the 0.1% tolerance) but together they
    // eat ~22% of the detected 0.799% edge, beyond the 20% erosion cap
    harness.venue_a.seed_book(book(
        "venue_a",
        vec![Level::new(100.09, 10.0)],
        vec![Level::new(99.5, 10.0)],
    ));
    harness.venue_b.seed_book(book(
        "venue_b",
        vec![Level::new(102.0, 10.0)],
        vec![Level::new(100.909, 10.0)],
    ));

    assert!(!harness.trader.should_execute(&opportunity).await);
    assert!(harness.trader.active_trades().is_empty());

    harness.cleanup();
}
