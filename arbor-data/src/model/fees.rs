use serde::{Deserialize, Serialize};

use crate::shared::de::de_flexi_float;

/*----- */
// Trading fees
/*----- */
// Rates are fractional, e.g. 0.001 == 0.1%. `percentage` mirrors the flag
// venues report alongside their fee schedule.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct TradingFees {
    #[serde(deserialize_with = "de_flexi_float")]
    pub maker_rate: f64,
    #[serde(deserialize_with = "de_flexi_float")]
    pub taker_rate: f64,
    #[serde(default = "default_percentage")]
    pub percentage: bool,
}

fn default_percentage() -> bool {
    true
}

impl TradingFees {
    pub fn new(maker_rate: f64, taker_rate: f64) -> Self {
        Self {
            maker_rate,
            taker_rate,
            percentage: true,
        }
    }

    // Fallback schedule when a venue's fee endpoint is unavailable or the
    // cached entry has expired. Deliberately on the expensive side.
    pub fn conservative() -> Self {
        Self {
            maker_rate: 0.0025,
            taker_rate: 0.0025,
            percentage: true,
        }
    }

    pub fn taker_cost(&self, notional: f64) -> f64 {
        self.taker_rate * notional
    }
}

impl Default for TradingFees {
    fn default() -> Self {
        Self::conservative()
    }
}

#[cfg(test)]
mod test {
    use super::TradingFees;

    #[test]
    fn test_taker_cost() {
        let fees = TradingFees::new(0.001, 0.001);
        assert_eq!(fees.taker_cost(1000.0), 1.0);
    }

    #[test]
    fn test_de_stringified_rates() {
        let fees: TradingFees =
            serde_json::from_str(r#"{"maker_rate": "0.001", "taker_rate": 0.002}"#).unwrap();
        assert_eq!(fees.maker_rate, 0.001);
        assert_eq!(fees.taker_rate, 0.002);
        assert!(fees.percentage);
    }
}
