// Runs one full detect -> gate -> two-leg execute cycle against two
// simulated venues with a crossed market. No credentials, no network.
//
// cargo run --example sim_arbitrage

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use arbor_data::assets::level::Level;
use arbor_data::model::fees::TradingFees;
use arbor_data::model::order_book::OrderBookSnapshot;
use arbor_data::shared::subscription_models::{Instrument, Subscription, VenueId};
use arbor_main::trader::{ArbTrader, TraderConfig};
use arbor_oms::event::EventTx;
use arbor_oms::exchange::simulated::SimulatedVenue;
use arbor_oms::exchange::{InstrumentSpec, VenueDriver};
use arbor_oms::gateway::{GatewayConfig, VenueGateway};
use arbor_oms::ledger::{LedgerConfig, TradeLedger};
use arbor_oms::rate_limit::{RateLimitConfig, RateLimiter};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let instrument = Instrument::new("OP", "USDT");

    // venue_a asks 100, venue_b bids 101: a 0.799% edge after 0.1% fees
    let venue_a = Arc::new(SimulatedVenue::new(VenueId::new("venue_a")));
    let venue_b = Arc::new(SimulatedVenue::new(VenueId::new("venue_b")));
    for venue in [&venue_a, &venue_b] {
        venue.seed_instrument(InstrumentSpec::new(instrument.clone(), 0.1));
        venue.seed_fees("*", TradingFees::new(0.001, 0.001));
    }
    venue_a.seed_book(OrderBookSnapshot::new(
        VenueId::new("venue_a"),
        instrument.clone(),
        vec![Level::new(100.0, 10.0)],
        vec![Level::new(99.5, 10.0)],
        Utc::now(),
    ));
    venue_b.seed_book(OrderBookSnapshot::new(
        VenueId::new("venue_b"),
        instrument.clone(),
        vec![Level::new(102.0, 10.0)],
        vec![Level::new(101.0, 10.0)],
        Utc::now(),
    ));
    venue_a.seed_balance("USDT", 10_000.0, 10_000.0);
    venue_b.seed_balance("OP", 10.0, 10.0);

    let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let event_tx = EventTx::new(event_tx);

    let gateway = Arc::new(VenueGateway::new(
        GatewayConfig::default(),
        rate_limiter,
        event_tx.clone(),
    ));
    gateway
        .add_venue(Arc::clone(&venue_a) as Arc<dyn VenueDriver>)
        .await
        .expect("venue_a init");
    gateway
        .add_venue(Arc::clone(&venue_b) as Arc<dyn VenueDriver>)
        .await
        .expect("venue_b init");
    gateway.refresh_all_fees().await;

    let ledger_path = std::env::temp_dir().join("arbor-sim-arbitrage.json");
    let ledger = Arc::new(
        TradeLedger::open(LedgerConfig::new(ledger_path.clone())).expect("ledger open"),
    );

    let trader = Arc::new(ArbTrader::new(
        Arc::clone(&gateway),
        Arc::clone(&ledger),
        TraderConfig {
            max_trade_amount: 50.0,
            ..TraderConfig::default()
        },
        vec![instrument.clone()],
        event_tx,
    ));

    gateway
        .subscribe(&Subscription::new(
            VenueId::new("venue_a"),
            instrument.clone(),
            10,
        ))
        .expect("subscribe venue_a");
    gateway
        .subscribe(&Subscription::new(
            VenueId::new("venue_b"),
            instrument.clone(),
            10,
        ))
        .expect("subscribe venue_b");
    tokio::time::sleep(Duration::from_millis(100)).await;

    for handle in Arc::clone(&trader).scan_instrument(&instrument).await {
        let _ = handle.await;
    }

    while let Ok(event) = event_rx.try_recv() {
        println!("event: {:?}", event);
    }
    println!("buy venue journal:  {:#?}", venue_a.journal());
    println!("sell venue journal: {:#?}", venue_b.journal());

    let _ = std::fs::remove_file(ledger_path);
}
