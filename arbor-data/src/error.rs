use thiserror::Error;

/*----- */
// DataError
/*----- */
#[derive(Debug, Error)]
pub enum DataError {
    #[error("invalid instrument {0}, expected BASE/QUOTE")]
    InvalidInstrument(String),
}
