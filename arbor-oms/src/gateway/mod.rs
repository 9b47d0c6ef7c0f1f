pub mod fees;
pub mod handle;
pub mod recent_orders;
pub mod reservations;
mod subscription;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use arbor_data::model::fees::TradingFees;
use arbor_data::model::order_book::OrderBookSnapshot;
use arbor_data::shared::subscription_models::{Instrument, Subscription, VenueId};

use crate::error::{DriverError, ExecutionError};
use crate::event::EventTx;
use crate::exchange::patterns::{ErrorClass, ErrorPatterns};
use crate::exchange::{Capabilities, VenueDriver};
use crate::model::balance::AssetBalance;
use crate::model::order::{OrderRequest, OrderResult};
use crate::rate_limit::RateLimiter;

use fees::FeeCache;
use handle::VenueHandle;
use recent_orders::RecentOrders;
use reservations::ReservationBook;
use subscription::SubscriptionSettings;

/*----- */
// Gateway config
/*----- */
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub staleness_threshold: chrono::Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub stream_restart_delay: Duration,
    // Per-operation timeout handed to the driver layer, overridable per venue
    pub driver_timeout: Duration,
    pub venue_timeouts: HashMap<VenueId, Duration>,
    pub fee_cache_ttl: chrono::Duration,
    pub default_fees: TradingFees,
    pub reservation_ttl: chrono::Duration,
    pub recent_order_ttl: chrono::Duration,
    // Timeout recovery: how long to pause before scanning, how far back an
    // order may have been created, and the amount match tolerance.
    pub recovery_pause: Duration,
    pub recovery_lookback: chrono::Duration,
    pub recovery_amount_tolerance_pct: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: chrono::Duration::milliseconds(500),
            max_reconnect_attempts: 5,
            reconnect_initial_delay: Duration::from_secs(5),
            reconnect_max_delay: Duration::from_secs(300),
            stream_restart_delay: Duration::from_secs(1),
            driver_timeout: Duration::from_secs(15),
            venue_timeouts: HashMap::new(),
            fee_cache_ttl: chrono::Duration::hours(24),
            default_fees: TradingFees::conservative(),
            reservation_ttl: chrono::Duration::seconds(60),
            recent_order_ttl: chrono::Duration::seconds(60),
            recovery_pause: Duration::from_secs(2),
            recovery_lookback: chrono::Duration::seconds(30),
            recovery_amount_tolerance_pct: 1.0,
        }
    }
}

/*----- */
// Venue gateway
/*----- */
// One handle per configured venue. Owns the order submission critical path
// (idempotent, at-most-once), the fee cache, balance reservations and the
// per-venue market data subscriptions. Every outbound driver call first
// acquires a rate limit token, additive to whatever limiter the driver
// carries internally.
pub struct VenueGateway {
    config: GatewayConfig,
    handles: Mutex<HashMap<VenueId, Arc<VenueHandle>>>,
    rate_limiter: Arc<RateLimiter>,
    fees: FeeCache,
    reservations: ReservationBook,
    recent_orders: RecentOrders,
    patterns: ErrorPatterns,
    event_tx: EventTx,
    subscription_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl VenueGateway {
    pub fn new(config: GatewayConfig, rate_limiter: Arc<RateLimiter>, event_tx: EventTx) -> Self {
        Self {
            fees: FeeCache::new(config.fee_cache_ttl, config.default_fees),
            reservations: ReservationBook::new(config.reservation_ttl),
            recent_orders: RecentOrders::new(config.recent_order_ttl),
            patterns: ErrorPatterns::default(),
            rate_limiter,
            event_tx,
            handles: Mutex::new(HashMap::new()),
            subscription_tasks: Mutex::new(Vec::new()),
            config,
        }
    }

    /*----- Venue management ----- */
    // Registers the venue and loads its listed instruments. A failure here
    // is reported to the caller, who decides whether to continue without
    // the venue.
    pub async fn add_venue(&self, driver: Arc<dyn VenueDriver>) -> Result<(), ExecutionError> {
        let handle = Arc::new(VenueHandle::new(driver));
        let venue = handle.venue.clone();

        self.rate_limiter.acquire(&venue).await;
        let instruments = with_driver_timeout(
            self.timeout_for(&venue),
            handle.driver.load_instruments(),
        )
        .await
        .map_err(|source| ExecutionError::Driver {
            venue: venue.clone(),
            source,
        })?;

        info!(
            venue = %venue,
            instruments = instruments.len(),
            message = "venue initialised"
        );
        handle.set_instruments(instruments);
        self.handles.lock().insert(venue, handle);
        Ok(())
    }

    pub fn venues(&self) -> Vec<VenueId> {
        self.handles.lock().keys().cloned().collect()
    }

    pub fn venues_with_instrument(&self, instrument: &Instrument) -> Vec<VenueId> {
        self.handles
            .lock()
            .values()
            .filter(|handle| handle.has_instrument(instrument))
            .map(|handle| handle.venue.clone())
            .collect()
    }

    fn handle_for(&self, venue: &VenueId) -> Result<Arc<VenueHandle>, ExecutionError> {
        self.handles
            .lock()
            .get(venue)
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownVenue(venue.clone()))
    }

    fn timeout_for(&self, venue: &VenueId) -> Duration {
        self.config
            .venue_timeouts
            .get(venue)
            .copied()
            .unwrap_or(self.config.driver_timeout)
    }

    // Freshest venue timestamp observed on this handle's market data
    pub fn last_update(&self, venue: &VenueId) -> Option<chrono::DateTime<Utc>> {
        self.handle_for(venue)
            .ok()
            .map(|handle| handle.last_update())
    }

    pub fn min_trade_amount(&self, venue: &VenueId, instrument: &Instrument) -> Option<f64> {
        self.handle_for(venue)
            .ok()
            .and_then(|handle| handle.min_trade_amount(instrument))
    }

    pub fn amount_precision(&self, venue: &VenueId, instrument: &Instrument) -> Option<f64> {
        self.handle_for(venue)
            .ok()
            .and_then(|handle| handle.amount_precision(instrument))
    }

    /*----- Market data ----- */
    // Starts the perpetual consume loop for the subscription's market.
    pub fn subscribe(&self, subscription: &Subscription) -> Result<(), ExecutionError> {
        let handle = self.handle_for(&subscription.venue)?;
        if !handle
            .driver
            .capabilities()
            .supports(Capabilities::STREAM_ORDER_BOOK)
        {
            return Err(ExecutionError::Unsupported {
                venue: subscription.venue.clone(),
                operation: "stream_order_book",
            });
        }

        let settings = SubscriptionSettings {
            depth: handle.compatible_depth(subscription.depth),
            staleness_threshold: self.config.staleness_threshold,
            stream_restart_delay: self.config.stream_restart_delay,
            max_reconnect_attempts: self.config.max_reconnect_attempts,
            reconnect_initial_delay: self.config.reconnect_initial_delay,
            reconnect_max_delay: self.config.reconnect_max_delay,
        };

        let task = tokio::spawn(subscription::consume_book_stream(
            handle,
            subscription.instrument.clone(),
            settings,
            self.event_tx.clone(),
        ));
        self.subscription_tasks.lock().push(task);
        Ok(())
    }

    pub fn latest_book(
        &self,
        venue: &VenueId,
        instrument: &Instrument,
    ) -> Option<OrderBookSnapshot> {
        self.handle_for(venue)
            .ok()
            .and_then(|handle| handle.latest_book(instrument))
    }

    pub async fn fetch_order_book(
        &self,
        venue: &VenueId,
        instrument: &Instrument,
        depth: usize,
    ) -> Result<OrderBookSnapshot, ExecutionError> {
        let handle = self.handle_for(venue)?;
        let depth = handle.compatible_depth(depth);

        self.rate_limiter.acquire(venue).await;
        with_driver_timeout(
            self.timeout_for(venue),
            handle.driver.fetch_order_book(instrument, depth),
        )
        .await
        .map_err(|source| ExecutionError::Driver {
            venue: venue.clone(),
            source,
        })
    }

    /*----- Fees ----- */
    pub fn fees_for(&self, venue: &VenueId, instrument: &Instrument) -> TradingFees {
        self.fees.lookup(venue, instrument)
    }

    // Called once after init and every 24h after that. Failures leave the
    // cache alone, so lookups degrade to the conservative default.
    pub async fn refresh_all_fees(&self) {
        let handles: Vec<Arc<VenueHandle>> = self.handles.lock().values().cloned().collect();
        for handle in handles {
            if !handle
                .driver
                .capabilities()
                .supports(Capabilities::FETCH_TRADING_FEES)
            {
                continue;
            }
            if !self.fees.needs_refresh(&handle.venue) {
                continue;
            }

            self.rate_limiter.acquire(&handle.venue).await;
            match with_driver_timeout(
                self.timeout_for(&handle.venue),
                handle.driver.fetch_trading_fees(),
            )
            .await
            {
                Ok(schedule) => self.fees.store(&handle.venue, schedule),
                Err(error) => warn!(
                    venue = %handle.venue,
                    error = %error,
                    message = "fee refresh failed, keeping conservative default"
                ),
            }
        }
    }

    /*----- Balances & reservations ----- */
    pub async fn fetch_balances(
        &self,
        venue: &VenueId,
    ) -> Result<Vec<AssetBalance>, ExecutionError> {
        let handle = self.handle_for(venue)?;
        self.rate_limiter.acquire(venue).await;
        with_driver_timeout(self.timeout_for(venue), handle.driver.fetch_balances())
            .await
            .map_err(|source| ExecutionError::Driver {
                venue: venue.clone(),
                source,
            })
    }

    // max(0, free - live reservations), optionally ignoring the caller's own
    // trade key.
    pub async fn available_balance(
        &self,
        venue: &VenueId,
        currency: &str,
        exclude_trade_key: Option<&str>,
    ) -> Result<f64, ExecutionError> {
        let balances = self.fetch_balances(venue).await?;
        let free = balances
            .iter()
            .find(|balance| balance.currency.eq_ignore_ascii_case(currency))
            .map(|balance| balance.balance.free)
            .unwrap_or(0.0);

        let reserved = self
            .reservations
            .reserved_amount(venue, currency, exclude_trade_key);
        Ok((free - reserved).max(0.0))
    }

    pub fn reserve(&self, trade_key: &str, venue: &VenueId, currency: &str, amount: f64) {
        self.reservations.reserve(trade_key, venue, currency, amount);
    }

    pub fn release(&self, trade_key: &str) {
        self.reservations.release(trade_key);
    }

    /*----- Order submission (the critical path) ----- */
    // At-most-once: the underlying create call runs exactly once per client
    // order id. Retries by the caller are short-circuited through the
    // recent-orders map; lost responses are recovered by scanning the
    // venue's recent orders.
    pub async fn execute_trade(
        &self,
        request: OrderRequest,
    ) -> Result<OrderResult, ExecutionError> {
        let handle = self.handle_for(&request.venue)?;
        if !handle
            .driver
            .capabilities()
            .supports(Capabilities::CREATE_ORDER)
        {
            return Err(ExecutionError::Unsupported {
                venue: request.venue.clone(),
                operation: "create_order",
            });
        }

        // Retry short-circuit: this client order id already produced a venue
        // order inside the TTL.
        if let Some(entry) = self.recent_orders.lookup(&request.cid) {
            debug!(
                venue = %request.venue,
                cid = %request.cid,
                venue_order_id = %entry.venue_order_id,
                message = "idempotency hit, hydrating existing order"
            );
            self.rate_limiter.acquire(&request.venue).await;
            return match with_driver_timeout(
                self.timeout_for(&request.venue),
                handle
                    .driver
                    .fetch_order(&entry.venue_order_id, &request.instrument),
            )
            .await
            {
                Ok(result) => Ok(result),
                Err(error) => {
                    warn!(
                        venue = %request.venue,
                        cid = %request.cid,
                        error = %error,
                        message = "failed to hydrate idempotent replay, refusing to resubmit"
                    );
                    Ok(OrderResult::failure(
                        &request,
                        format!("idempotent replay hydration failed: {}", error),
                    ))
                }
            };
        }

        self.rate_limiter.acquire(&request.venue).await;
        let attempt = with_driver_timeout(
            self.timeout_for(&request.venue),
            handle.driver.create_order(&request),
        )
        .await;

        match attempt {
            Ok(result) => {
                self.recent_orders.record(
                    request.cid,
                    request.venue.clone(),
                    result.venue_order_id.clone(),
                );
                self.rate_limiter.on_success(&request.venue);
                Ok(result)
            }
            Err(error) => match self.patterns.classify(&error) {
                ErrorClass::Timeout => {
                    warn!(
                        venue = %request.venue,
                        cid = %request.cid,
                        error = %error,
                        action = "scanning recent orders",
                        message = "order submission timed out, response may be lost"
                    );
                    self.recover_timed_out_order(&handle, &request, &error).await
                }
                ErrorClass::Throttle => {
                    self.rate_limiter.on_throttled(&request.venue);
                    Ok(OrderResult::failure(&request, error.to_string()))
                }
                ErrorClass::Other => Ok(OrderResult::failure(&request, error.to_string())),
            },
        }
    }

    // The venue may have accepted the order even though the response never
    // arrived. Wait out settlement, then look for a recent order matching
    // this request's side and amount.
    async fn recover_timed_out_order(
        &self,
        handle: &Arc<VenueHandle>,
        request: &OrderRequest,
        original_error: &DriverError,
    ) -> Result<OrderResult, ExecutionError> {
        sleep(self.config.recovery_pause).await;

        self.rate_limiter.acquire(&request.venue).await;
        let recent = match with_driver_timeout(
            self.timeout_for(&request.venue),
            handle.driver.fetch_recent_orders(&request.instrument, 10),
        )
        .await
        {
            Ok(orders) => orders,
            Err(error) => {
                warn!(
                    venue = %request.venue,
                    cid = %request.cid,
                    error = %error,
                    message = "recent order scan failed during timeout recovery"
                );
                return Ok(OrderResult::failure(request, original_error.to_string()));
            }
        };

        let now = Utc::now();
        let tolerance = request.amount * self.config.recovery_amount_tolerance_pct / 100.0;
        let matched = recent.into_iter().find(|order| {
            order.side == request.side
                && (order.requested_amount - request.amount).abs() <= tolerance
                && now - order.venue_time <= self.config.recovery_lookback
        });

        match matched {
            Some(order) => {
                info!(
                    venue = %request.venue,
                    cid = %request.cid,
                    venue_order_id = %order.venue_order_id,
                    message = "timed out order recovered from venue recent orders"
                );
                self.recent_orders.record(
                    request.cid,
                    request.venue.clone(),
                    order.venue_order_id.clone(),
                );
                Ok(order)
            }
            None => Ok(OrderResult::failure(request, original_error.to_string())),
        }
    }

    /*----- Shutdown ----- */
    pub async fn cancel_all_open_orders(&self) {
        let handles: Vec<Arc<VenueHandle>> = self.handles.lock().values().cloned().collect();
        for handle in handles {
            if !handle
                .driver
                .capabilities()
                .supports(Capabilities::CANCEL_ORDER)
            {
                continue;
            }

            self.rate_limiter.acquire(&handle.venue).await;
            match with_driver_timeout(
                self.timeout_for(&handle.venue),
                handle.driver.cancel_all_orders(),
            )
            .await
            {
                Ok(cancelled) => info!(
                    venue = %handle.venue,
                    cancelled = cancelled,
                    message = "cancelled open orders"
                ),
                Err(error) => warn!(
                    venue = %handle.venue,
                    error = %error,
                    message = "failed to cancel open orders during shutdown"
                ),
            }
        }
    }

    pub async fn close_all(&self) {
        for task in self.subscription_tasks.lock().drain(..) {
            task.abort();
        }

        let handles: Vec<Arc<VenueHandle>> = self.handles.lock().values().cloned().collect();
        for handle in handles {
            if let Err(error) = handle.driver.close().await {
                warn!(
                    venue = %handle.venue,
                    error = %error,
                    message = "driver close reported an error"
                );
            }
        }
    }
}

impl std::fmt::Debug for VenueGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueGateway")
            .field("venues", &self.venues())
            .field("recent_orders", &self.recent_orders.len())
            .finish()
    }
}

/*----- */
// Driver timeout wrapper
/*----- */
// Elapsed timers surface as opaque driver errors whose text matches the
// timeout marker set, so downstream classification stays uniform.
async fn with_driver_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, DriverError>
where
    F: Future<Output = Result<T, DriverError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::new(format!(
            "request timeout after {}ms",
            timeout.as_millis()
        ))),
    }
}
