use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt::Display};

use crate::shared::de::de_flexi_float;

#[derive(Default, Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Level {
    #[serde(deserialize_with = "de_flexi_float")]
    pub price: f64,
    #[serde(deserialize_with = "de_flexi_float")]
    pub amount: f64,
}

impl Level {
    pub fn new(price: f64, amount: f64) -> Self {
        Self { price, amount }
    }
}

impl PartialOrd for Level {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.price.partial_cmp(&other.price) {
            Some(Ordering::Equal) => self.amount.partial_cmp(&other.amount),
            other_order => other_order,
        }
    }
}

impl PartialEq for Level {
    fn eq(&self, other: &Self) -> bool {
        self.price == other.price && self.amount == other.amount
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} : {})", self.price, self.amount)
    }
}
