pub mod error;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use error::EngineError;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use arbor_data::shared::subscription_models::Subscription;
use arbor_oms::event::EngineEvent;
use arbor_oms::gateway::VenueGateway;
use arbor_oms::ledger::TradeLedger;

use crate::config::{Config, ShutdownBehavior};
use crate::trader::ArbTrader;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);
const DRAIN_POLL: Duration = Duration::from_millis(500);
const FEE_REFRESH_POLL: Duration = Duration::from_secs(3600);

/*----- */
// Commands
/*----- */
#[derive(Debug)]
pub enum Command {
    Terminate(String),
}

/*----- */
// Engine
/*----- */
// The supervisor: recovers the ledger, starts market data and the trader,
// then waits for a termination trigger and drains per the configured policy.
pub struct Engine {
    engine_id: Uuid,
    config: Config,
    gateway: Arc<VenueGateway>,
    ledger: Arc<TradeLedger>,
    trader: Arc<ArbTrader>,
    event_rx: mpsc::UnboundedReceiver<EngineEvent>,
    command_rx: mpsc::Receiver<Command>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub async fn run(self) -> Result<(), EngineError> {
        info!(
            engine_id = %self.engine_id,
            venues = ?self.gateway.venues(),
            symbols = ?self.config.symbols,
            test_mode = self.config.test_mode,
            message = "engine starting"
        );

        /*----- 1. Ledger recovery ----- */
        let recovery = self.ledger.recover();
        info!(
            resumable = recovery.resumable.len(),
            orphaned = recovery.orphaned.len(),
            message = "trade ledger recovered"
        );
        for entry in recovery.orphaned.iter() {
            warn!(
                trade_key = %entry.trade_key,
                status = ?entry.status,
                age_hours = (Utc::now() - entry.started_at).num_hours(),
                message = "orphaned trade requires operator acknowledgement"
            );
        }
        for entry in recovery.resumable.iter() {
            warn!(
                trade_key = %entry.trade_key,
                status = ?entry.status,
                message = "resumable in-flight trade found on startup"
            );
        }

        /*----- 2. Fees: once now, then refreshed as the cache expires ----- */
        self.gateway.refresh_all_fees().await;
        let fee_gateway = Arc::clone(&self.gateway);
        let fee_task = tokio::spawn(async move {
            loop {
                sleep(FEE_REFRESH_POLL).await;
                fee_gateway.refresh_all_fees().await;
            }
        });

        /*----- 3. Market data subscriptions ----- */
        for instrument in self.config.symbols.iter() {
            let venues = self.gateway.venues_with_instrument(instrument);
            if venues.len() < 2 {
                warn!(
                    instrument = %instrument,
                    venues = venues.len(),
                    message = "instrument listed on fewer than two venues"
                );
            }
            for venue in venues.into_iter() {
                let subscription =
                    Subscription::new(venue, instrument.clone(), self.config.order_book_depth);
                if let Err(error) = self.gateway.subscribe(&subscription) {
                    warn!(
                        venue = %subscription.venue,
                        instrument = %instrument,
                        error = %error,
                        message = "subscription failed, venue excluded from streaming"
                    );
                }
            }
        }

        /*----- 4. Event listener + trader ----- */
        let event_task = tokio::spawn(listen_to_engine_events(self.event_rx));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let trader_task = tokio::spawn(Arc::clone(&self.trader).run(shutdown_rx));

        /*----- 5. Wait for a termination trigger ----- */
        let mut command_rx = self.command_rx;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(message = "termination signal received");
            }
            command = command_rx.recv() => {
                match command {
                    Some(Command::Terminate(reason)) => {
                        info!(reason = %reason, message = "terminate command received");
                    }
                    None => {
                        info!(message = "command channel closed, shutting down");
                    }
                }
            }
        }

        /*----- 6. Graceful shutdown ----- */
        let _ = shutdown_tx.send(true);
        let _ = trader_task.await;
        fee_task.abort();

        match self.config.shutdown_behavior {
            ShutdownBehavior::Cancel => {
                info!(message = "shutdown: cancelling open orders on every venue");
                self.gateway.cancel_all_open_orders().await;
            }
            ShutdownBehavior::Wait => {
                info!(
                    timeout_s = DRAIN_TIMEOUT.as_secs(),
                    message = "shutdown: waiting for in-flight trades"
                );
                let active = self.trader.active_trades();
                let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
                while !active.is_empty() && tokio::time::Instant::now() < deadline {
                    sleep(DRAIN_POLL).await;
                }
                self.trader.warn_if_drain_incomplete();
            }
            ShutdownBehavior::Force => {
                info!(message = "shutdown: forced, skipping drain");
            }
        }

        self.gateway.close_all().await;
        event_task.abort();

        info!(engine_id = %self.engine_id, message = "engine stopped");
        Ok(())
    }
}

/*----- */
// Event listener
/*----- */
// Logs engine events; a dashboard or event store would attach here instead.
async fn listen_to_engine_events(mut event_rx: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            EngineEvent::OrderBookUpdate { market, stale } => {
                debug!(market = %market, stale = stale, "order book update");
            }
            EngineEvent::VenueConnected(market) => {
                info!(market = %market, "venue stream connected");
            }
            EngineEvent::VenueDisconnected(market) => {
                warn!(market = %market, "venue stream disconnected");
            }
            EngineEvent::VenueError { venue, detail } => {
                warn!(venue = %venue, detail = %detail, "venue error");
            }
            EngineEvent::OpportunityFound(opportunity) => {
                info!(opportunity = %opportunity, "opportunity found");
            }
            EngineEvent::ExecutionCompleted { trade_key, success, profit } => {
                if success {
                    info!(trade_key = %trade_key, profit = ?profit, "execution completed");
                } else {
                    warn!(trade_key = %trade_key, "execution failed");
                }
            }
            EngineEvent::StatusUpdate { active_trades, variance } => {
                debug!(
                    active_trades = active_trades,
                    avg_variance = variance.avg_variance,
                    max_variance = variance.max_variance,
                    variance_observations = variance.recent_count,
                    "status update"
                );
            }
        }
    }
}

/*----- */
// Engine builder
/*----- */
#[derive(Default)]
pub struct EngineBuilder {
    pub engine_id: Option<Uuid>,
    pub config: Option<Config>,
    pub gateway: Option<Arc<VenueGateway>>,
    pub ledger: Option<Arc<TradeLedger>>,
    pub trader: Option<Arc<ArbTrader>>,
    pub event_rx: Option<mpsc::UnboundedReceiver<EngineEvent>>,
    pub command_rx: Option<mpsc::Receiver<Command>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine_id(self, value: Uuid) -> Self {
        Self {
            engine_id: Some(value),
            ..self
        }
    }

    pub fn config(self, value: Config) -> Self {
        Self {
            config: Some(value),
            ..self
        }
    }

    pub fn gateway(self, value: Arc<VenueGateway>) -> Self {
        Self {
            gateway: Some(value),
            ..self
        }
    }

    pub fn ledger(self, value: Arc<TradeLedger>) -> Self {
        Self {
            ledger: Some(value),
            ..self
        }
    }

    pub fn trader(self, value: Arc<ArbTrader>) -> Self {
        Self {
            trader: Some(value),
            ..self
        }
    }

    pub fn event_rx(self, value: mpsc::UnboundedReceiver<EngineEvent>) -> Self {
        Self {
            event_rx: Some(value),
            ..self
        }
    }

    pub fn command_rx(self, value: mpsc::Receiver<Command>) -> Self {
        Self {
            command_rx: Some(value),
            ..self
        }
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        Ok(Engine {
            engine_id: self
                .engine_id
                .ok_or(EngineError::BuilderIncomplete("engine_id"))?,
            config: self.config.ok_or(EngineError::BuilderIncomplete("config"))?,
            gateway: self
                .gateway
                .ok_or(EngineError::BuilderIncomplete("gateway"))?,
            ledger: self.ledger.ok_or(EngineError::BuilderIncomplete("ledger"))?,
            trader: self.trader.ok_or(EngineError::BuilderIncomplete("trader"))?,
            event_rx: self
                .event_rx
                .ok_or(EngineError::BuilderIncomplete("event_rx"))?,
            command_rx: self
                .command_rx
                .ok_or(EngineError::BuilderIncomplete("command_rx"))?,
        })
    }
}
