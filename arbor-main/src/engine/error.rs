use thiserror::Error;

use arbor_oms::error::LedgerError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to build struct due to missing attribute: {0}")]
    BuilderIncomplete(&'static str),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("no venue could be initialised")]
    NoVenuesAvailable,
}
