use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::error::DataError;

/*----- */
// Venue ID
/*----- */
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct VenueId(pub String); // smol str

impl VenueId {
    pub fn new<S>(name: S) -> Self
    where
        S: Into<String>,
    {
        Self(name.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VenueId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl Display for VenueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/*----- */
// Instrument model
/*----- */
#[derive(Default, Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct Instrument {
    pub base: String,
    pub quote: String,
}

impl Instrument {
    pub fn new<S>(base: S, quote: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    // Split a "BASE/QUOTE" pair identifier
    pub fn from_pair(pair: &str) -> Result<Self, DataError> {
        match pair.split_once('/') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
                Ok(Self::new(base.trim(), quote.trim()))
            }
            _ => Err(DataError::InvalidInstrument(pair.to_owned())),
        }
    }
}

impl Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl From<(String, String)> for Instrument {
    fn from((base, quote): (String, String)) -> Self {
        Self::new(base, quote)
    }
}

/*----- */
// Subscription model
/*----- */
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Subscription {
    pub venue: VenueId,
    pub instrument: Instrument,
    pub depth: usize,
}

impl Subscription {
    pub fn new<V, I>(venue: V, instrument: I, depth: usize) -> Self
    where
        V: Into<VenueId>,
        I: Into<Instrument>,
    {
        Self {
            venue: venue.into(),
            instrument: instrument.into(),
            depth,
        }
    }
}

impl From<(VenueId, Instrument, usize)> for Subscription {
    fn from((venue, instrument, depth): (VenueId, Instrument, usize)) -> Self {
        Self {
            venue,
            instrument,
            depth,
        }
    }
}

#[cfg(test)]
mod test {
    use super::Instrument;

    #[test]
    fn test_instrument_from_pair() {
        let pair1 = Instrument::from_pair("OP/USDT").unwrap();
        assert_eq!(pair1, Instrument::new("OP", "USDT"));

        let pair2 = Instrument::from_pair("btc/usd").unwrap();
        assert_eq!(pair2, Instrument::new("btc", "usd"));

        let pair3 = Instrument::from_pair("OPUSDT");
        assert!(pair3.is_err());

        let pair4 = Instrument::from_pair("/usdt");
        assert!(pair4.is_err());

        let pair5 = Instrument::from_pair("op/");
        assert!(pair5.is_err());
    }
}
