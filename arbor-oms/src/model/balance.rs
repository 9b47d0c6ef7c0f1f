use serde::{Deserialize, Serialize};

use arbor_data::shared::subscription_models::VenueId;

/*----- */
// Balance
/*----- */
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug, Serialize, Deserialize, Default)]
pub struct Balance {
    pub total: f64,
    pub free: f64,
}

impl Balance {
    pub fn new(total: f64, free: f64) -> Self {
        Self { total, free }
    }
}

/*----- */
// Balance id - keys of balance hashmaps e.g. venue_a_usdt
/*----- */
#[derive(Debug, Eq, PartialEq, Hash, Clone)]
pub struct BalanceId(pub String);

pub fn determine_balance_id(currency: &str, venue: &VenueId) -> BalanceId {
    BalanceId(format!("{}_{}", venue, currency).to_lowercase())
}

impl std::fmt::Display for BalanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/*----- */
// Asset balance
/*----- */
#[derive(Clone, PartialEq, PartialOrd, Debug, Serialize, Deserialize)]
pub struct AssetBalance {
    pub currency: String, // can be smol str e.g. btc
    pub venue: VenueId,
    pub balance: Balance,
}

impl AssetBalance {
    pub fn new(currency: String, venue: VenueId, balance: Balance) -> Self {
        Self {
            currency,
            venue,
            balance,
        }
    }
}

impl From<&AssetBalance> for BalanceId {
    fn from(asset_balance: &AssetBalance) -> Self {
        determine_balance_id(&asset_balance.currency, &asset_balance.venue)
    }
}
