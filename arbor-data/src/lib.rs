pub mod assets;
pub mod error;
pub mod model;
pub mod shared;

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use shared::subscription_models::{Instrument, VenueId};

/*----- */
// Markets
/*----- */
#[derive(Debug, Clone, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct Market {
    pub venue: VenueId,
    pub instrument: Instrument,
}

impl Market {
    pub fn new(venue: VenueId, instrument: Instrument) -> Self {
        Self { venue, instrument }
    }
}

impl From<(VenueId, Instrument)> for Market {
    fn from((venue, instrument): (VenueId, Instrument)) -> Self {
        Self { venue, instrument }
    }
}

impl Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.venue, self.instrument)
    }
}
