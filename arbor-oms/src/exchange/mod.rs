pub mod patterns;
pub mod simulated;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use arbor_data::model::fees::TradingFees;
use arbor_data::model::order_book::OrderBookSnapshot;
use arbor_data::shared::subscription_models::{Instrument, VenueId};

use crate::error::{DriverError, ExecutionError};
use crate::model::balance::AssetBalance;
use crate::model::order::{OrderRequest, OrderResult};

/*----- */
// Capabilities
/*----- */
// Advertised as a bitmap so an unsupported operation is a capability miss,
// never a runtime type error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(pub u32);

impl Capabilities {
    pub const STREAM_ORDER_BOOK: u32 = 1 << 0;
    pub const STREAM_TICKER: u32 = 1 << 1;
    pub const STREAM_BALANCE: u32 = 1 << 2;
    pub const FETCH_BALANCE: u32 = 1 << 3;
    pub const CREATE_ORDER: u32 = 1 << 4;
    pub const CANCEL_ORDER: u32 = 1 << 5;
    pub const FETCH_TRADING_FEES: u32 = 1 << 6;

    pub fn supports(&self, capability: u32) -> bool {
        self.0 & capability != 0
    }

    pub fn all() -> Self {
        Self(
            Self::STREAM_ORDER_BOOK
                | Self::STREAM_TICKER
                | Self::STREAM_BALANCE
                | Self::FETCH_BALANCE
                | Self::CREATE_ORDER
                | Self::CANCEL_ORDER
                | Self::FETCH_TRADING_FEES,
        )
    }
}

/*----- */
// Instrument spec
/*----- */
// Listing metadata a venue reports for a tradable pair.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentSpec {
    pub instrument: Instrument,
    pub min_trade_amount: f64,
    // Amount step size, 0.0 when the venue reports none
    pub amount_precision: f64,
}

impl InstrumentSpec {
    pub fn new(instrument: Instrument, min_trade_amount: f64) -> Self {
        Self {
            instrument,
            min_trade_amount,
            amount_precision: 0.0,
        }
    }

    pub fn with_amount_precision(mut self, amount_precision: f64) -> Self {
        self.amount_precision = amount_precision;
        self
    }
}

/*----- */
// Book stream
/*----- */
pub type BookStream = BoxStream<'static, Result<OrderBookSnapshot, DriverError>>;

/*----- */
// Venue driver trait
/*----- */
// The opaque seam where concrete HTTP/WebSocket venue adapters plug in. Fee
// maps are keyed by the "BASE/QUOTE" pair identifier, with "*" as the
// venue-wide wildcard entry.
#[async_trait]
pub trait VenueDriver: Send + Sync {
    fn venue(&self) -> VenueId;

    fn capabilities(&self) -> Capabilities;

    // Depth values this venue accepts for book requests, ascending
    fn accepted_depths(&self) -> &[usize];

    async fn load_instruments(&self) -> Result<Vec<InstrumentSpec>, DriverError>;

    async fn fetch_order_book(
        &self,
        instrument: &Instrument,
        depth: usize,
    ) -> Result<OrderBookSnapshot, DriverError>;

    async fn stream_order_book(
        &self,
        instrument: &Instrument,
        depth: usize,
    ) -> Result<BookStream, DriverError>;

    async fn fetch_balances(&self) -> Result<Vec<AssetBalance>, DriverError>;

    async fn fetch_trading_fees(&self) -> Result<HashMap<String, TradingFees>, DriverError>;

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderResult, DriverError>;

    async fn fetch_order(
        &self,
        venue_order_id: &str,
        instrument: &Instrument,
    ) -> Result<OrderResult, DriverError>;

    async fn fetch_recent_orders(
        &self,
        instrument: &Instrument,
        limit: usize,
    ) -> Result<Vec<OrderResult>, DriverError>;

    async fn cancel_order(
        &self,
        venue_order_id: &str,
        instrument: &Instrument,
    ) -> Result<(), DriverError>;

    async fn cancel_all_orders(&self) -> Result<usize, DriverError>;

    async fn close(&self) -> Result<(), DriverError>;
}

/*----- */
// Credentials
/*----- */
#[derive(Debug, Clone, Default)]
pub struct VenueCredentials {
    pub api_key: Option<String>,
    pub secret: Option<String>,
    pub password: Option<String>,
}

/*----- */
// Driver registry
/*----- */
// Pluggable set of venue implementations chosen at config time: a factory per
// driver name, resolved once by the supervisor during init.
pub type DriverFactory = Arc<
    dyn Fn(&VenueId, &VenueCredentials) -> Result<Arc<dyn VenueDriver>, ExecutionError>
        + Send
        + Sync,
>;

#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<S>(&mut self, name: S, factory: DriverFactory)
    where
        S: Into<String>,
    {
        self.factories.insert(name.into().to_lowercase(), factory);
    }

    pub fn build(
        &self,
        name: &str,
        credentials: &VenueCredentials,
    ) -> Result<Arc<dyn VenueDriver>, ExecutionError> {
        let factory = self
            .factories
            .get(&name.to_lowercase())
            .ok_or_else(|| ExecutionError::UnknownDriver(name.to_owned()))?;

        factory(&VenueId::new(name), credentials)
    }
}

// Factory pointers are not worth dumping
impl Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::Capabilities;

    #[test]
    fn test_capability_bitmap() {
        let caps = Capabilities(Capabilities::CREATE_ORDER | Capabilities::FETCH_BALANCE);
        assert!(caps.supports(Capabilities::CREATE_ORDER));
        assert!(caps.supports(Capabilities::FETCH_BALANCE));
        assert!(!caps.supports(Capabilities::STREAM_ORDER_BOOK));

        let all = Capabilities::all();
        assert!(all.supports(Capabilities::CANCEL_ORDER));
        assert!(all.supports(Capabilities::FETCH_TRADING_FEES));
    }
}
