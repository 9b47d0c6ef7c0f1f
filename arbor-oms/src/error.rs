use thiserror::Error;

use arbor_data::shared::subscription_models::VenueId;

use crate::ledger::TradeStatus;

/*----- */
// Driver error
/*----- */
// Venue drivers report errors as opaque text. Nothing outside
// exchange::patterns is allowed to inspect the message content.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new<S>(detail: S) -> Self
    where
        S: Into<String>,
    {
        Self(detail.into())
    }
}

impl From<String> for DriverError {
    fn from(detail: String) -> Self {
        Self(detail)
    }
}

/*----- */
// ExecutionError
/*----- */
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("unknown venue: {0}")]
    UnknownVenue(VenueId),

    #[error("no driver registered under name: {0}")]
    UnknownDriver(String),

    #[error("venue {venue} does not support {operation}")]
    Unsupported {
        venue: VenueId,
        operation: &'static str,
    },

    #[error("driver error on {venue}: {source}")]
    Driver {
        venue: VenueId,
        source: DriverError,
    },
}

/*----- */
// LedgerError
/*----- */
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to write trade state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialise trade state: {0}")]
    Serialise(#[from] serde_json::Error),

    #[error("trade key already active: {0}")]
    DuplicateTradeKey(String),

    #[error("unknown trade key: {0}")]
    UnknownTradeKey(String),

    #[error("invalid transition for {trade_key}: {action} from {from:?}")]
    InvalidTransition {
        trade_key: String,
        from: TradeStatus,
        action: &'static str,
    },
}
