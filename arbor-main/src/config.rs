use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use arbor_data::shared::subscription_models::{Instrument, VenueId};
use arbor_oms::gateway::GatewayConfig;
use arbor_oms::rate_limit::RateLimitConfig;

use crate::trader::TraderConfig;

// Config loads before the logging layer is up, so warnings raised during
// parsing are buffered in a bounded ring and flushed once tracing exists.
const WARNING_RING_CAPACITY: usize = 32;

/*----- */
// Config error
/*----- */
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/*----- */
// Shutdown behaviour
/*----- */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownBehavior {
    // Cancel all resting orders on every venue, then exit
    Cancel,
    // Wait a bounded time for in-flight trades to settle
    #[default]
    Wait,
    // Exit immediately
    Force,
}

impl FromStr for ShutdownBehavior {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "cancel" => Ok(ShutdownBehavior::Cancel),
            "wait" => Ok(ShutdownBehavior::Wait),
            "force" => Ok(ShutdownBehavior::Force),
            other => Err(format!("unknown shutdown behavior '{}'", other)),
        }
    }
}

/*----- */
// Per venue settings
/*----- */
#[derive(Debug, Clone, Default)]
pub struct VenueSettings {
    pub api_key: Option<String>,
    pub secret: Option<String>,
    pub password: Option<String>,
    // Requests per second for the token bucket
    pub rate_limit: Option<u32>,
    pub timeout_ms: Option<u64>,
}

/*----- */
// Strategy settings
/*----- */
#[derive(Debug, Clone)]
pub struct StrategySettings {
    pub min_profit_percent: f64,
    pub max_trade_amount: f64,
    pub check_interval: Duration,
    pub max_slippage_percent: f64,
    pub partial_fill_threshold: f64,
    pub price_tolerance_percent: f64,
    pub max_profit_erosion_percent: f64,
    pub dynamic_tolerance: bool,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            min_profit_percent: 0.5,
            max_trade_amount: 100.0,
            check_interval: Duration::from_secs(5),
            max_slippage_percent: 0.5,
            partial_fill_threshold: 95.0,
            price_tolerance_percent: 0.1,
            max_profit_erosion_percent: 20.0,
            dynamic_tolerance: true,
        }
    }
}

/*----- */
// Config
/*----- */
#[derive(Debug, Clone)]
pub struct Config {
    pub test_mode: bool,
    pub enabled_venues: Vec<String>,
    pub venue_settings: HashMap<String, VenueSettings>,
    pub symbols: Vec<Instrument>,
    pub max_concurrent_trades: usize,
    pub order_book_depth: usize,
    pub staleness_threshold_ms: u64,
    pub shutdown_behavior: ShutdownBehavior,
    pub strategy: StrategySettings,
    warnings: VecDeque<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            test_mode: true,
            enabled_venues: Vec::new(),
            venue_settings: HashMap::new(),
            symbols: Vec::new(),
            max_concurrent_trades: 3,
            order_book_depth: 10,
            staleness_threshold_ms: 500,
            shutdown_behavior: ShutdownBehavior::default(),
            strategy: StrategySettings::default(),
            warnings: VecDeque::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        config.test_mode = config.parse_or_default("TEST_MODE", true);
        config.enabled_venues = csv_env("ENABLED_EXCHANGES")
            .into_iter()
            .map(|name| name.to_lowercase())
            .collect();
        if config.enabled_venues.is_empty() {
            config.push_warning("ENABLED_EXCHANGES is empty, no venues will be traded".to_owned());
        }

        for venue in config.enabled_venues.clone().into_iter() {
            let prefix = venue.to_uppercase();
            let settings = VenueSettings {
                api_key: std::env::var(format!("{}_API_KEY", prefix)).ok(),
                secret: std::env::var(format!("{}_SECRET", prefix)).ok(),
                password: std::env::var(format!("{}_PASSWORD", prefix)).ok(),
                rate_limit: config.parse_optional(&format!("{}_RATE_LIMIT", prefix)),
                timeout_ms: config.parse_optional(&format!("{}_TIMEOUT", prefix)),
            };
            config.venue_settings.insert(venue, settings);
        }

        // Malformed symbols are fatal: trading the wrong pair is worse than
        // refusing to start.
        for pair in csv_env("TRADING_SYMBOLS").into_iter() {
            let instrument =
                Instrument::from_pair(&pair).map_err(|error| ConfigError::Invalid {
                    key: "TRADING_SYMBOLS".to_owned(),
                    value: pair.clone(),
                    reason: error.to_string(),
                })?;
            config.symbols.push(instrument);
        }

        config.max_concurrent_trades = config.parse_or_default("MAX_CONCURRENT_TRADES", 3);
        config.order_book_depth = config.parse_or_default("ORDER_BOOK_DEPTH", 10);
        config.staleness_threshold_ms =
            config.parse_or_default("ORDER_BOOK_STALENESS_THRESHOLD_MS", 500);
        config.shutdown_behavior =
            config.parse_or_default("SHUTDOWN_BEHAVIOR", ShutdownBehavior::default());

        config.strategy = StrategySettings {
            min_profit_percent: config.parse_or_default("SIMPLE_ARBITRAGE_MIN_PROFIT", 0.5),
            max_trade_amount: config.parse_or_default("SIMPLE_ARBITRAGE_MAX_TRADE_AMOUNT", 100.0),
            check_interval: Duration::from_secs_f64(
                config.parse_or_default("SIMPLE_ARBITRAGE_CHECK_INTERVAL", 5.0),
            ),
            max_slippage_percent: config.parse_or_default("SIMPLE_ARBITRAGE_MAX_SLIPPAGE", 0.5),
            partial_fill_threshold: config
                .parse_or_default("SIMPLE_ARBITRAGE_PARTIAL_FILL_THRESHOLD", 95.0),
            price_tolerance_percent: config
                .parse_or_default("SIMPLE_ARBITRAGE_PRICE_TOLERANCE", 0.1),
            max_profit_erosion_percent: config
                .parse_or_default("SIMPLE_ARBITRAGE_MAX_PROFIT_EROSION", 20.0),
            dynamic_tolerance: config.parse_or_default("SIMPLE_ARBITRAGE_DYNAMIC_TOLERANCE", true),
        };

        Ok(config)
    }

    /*----- Derived component configs ----- */
    pub fn gateway_config(&self) -> GatewayConfig {
        let mut venue_timeouts = HashMap::new();
        for (venue, settings) in self.venue_settings.iter() {
            if let Some(timeout_ms) = settings.timeout_ms {
                venue_timeouts.insert(VenueId::new(venue.clone()), Duration::from_millis(timeout_ms));
            }
        }

        GatewayConfig {
            staleness_threshold: chrono::Duration::milliseconds(self.staleness_threshold_ms as i64),
            venue_timeouts,
            ..GatewayConfig::default()
        }
    }

    pub fn trader_config(&self) -> TraderConfig {
        TraderConfig {
            min_profit_percent: self.strategy.min_profit_percent,
            max_trade_amount: self.strategy.max_trade_amount,
            check_interval: self.strategy.check_interval,
            max_slippage_percent: self.strategy.max_slippage_percent,
            partial_fill_threshold: self.strategy.partial_fill_threshold,
            price_tolerance_percent: self.strategy.price_tolerance_percent,
            max_profit_erosion_percent: self.strategy.max_profit_erosion_percent,
            dynamic_tolerance: self.strategy.dynamic_tolerance,
            max_concurrent_trades: self.max_concurrent_trades,
            order_book_depth: self.order_book_depth,
            staleness_threshold: chrono::Duration::milliseconds(self.staleness_threshold_ms as i64),
            ..TraderConfig::default()
        }
    }

    pub fn rate_limit_config(&self, venue: &str) -> Option<RateLimitConfig> {
        self.venue_settings
            .get(venue)
            .and_then(|settings| settings.rate_limit)
            .map(|capacity| RateLimitConfig {
                capacity,
                ..RateLimitConfig::default()
            })
    }

    /*----- Warning ring ----- */
    fn push_warning(&mut self, warning: String) {
        if self.warnings.len() == WARNING_RING_CAPACITY {
            self.warnings.pop_front();
        }
        self.warnings.push_back(warning);
    }

    // Flush buffered parse warnings once tracing is initialised. A no-op if
    // logging never comes up, or if parsing was clean.
    pub fn flush_warnings(&mut self) {
        for warning in self.warnings.drain(..) {
            warn!(message = "config warning", detail = %warning);
        }
    }

    /*----- Env parsing helpers ----- */
    fn parse_or_default<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr + std::fmt::Debug,
    {
        match std::env::var(key) {
            Ok(raw) => match raw.trim().parse::<T>() {
                Ok(value) => value,
                Err(_) => {
                    self.push_warning(format!(
                        "invalid value '{}' for {}, using default {:?}",
                        raw, key, default
                    ));
                    default
                }
            },
            Err(_) => default,
        }
    }

    fn parse_optional<T>(&mut self, key: &str) -> Option<T>
    where
        T: FromStr,
    {
        match std::env::var(key) {
            Ok(raw) => match raw.trim().parse::<T>() {
                Ok(value) => Some(value),
                Err(_) => {
                    self.push_warning(format!("invalid value '{}' for {}, ignoring", raw, key));
                    None
                }
            },
            Err(_) => None,
        }
    }
}

fn csv_env(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|raw| {
            raw.split(',')
                .map(|part| part.trim().to_owned())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;

    // Env vars are process-wide: each test uses its own key set
    #[test]
    fn test_from_env_defaults() {
        let config = Config::from_env().unwrap();
        assert!(config.test_mode);
        assert_eq!(config.max_concurrent_trades, 3);
        assert_eq!(config.order_book_depth, 10);
        assert_eq!(config.staleness_threshold_ms, 500);
        assert_eq!(config.shutdown_behavior, ShutdownBehavior::Wait);
        assert_eq!(config.strategy.partial_fill_threshold, 95.0);
    }

    #[test]
    fn test_shutdown_behavior_parsing() {
        assert_eq!(
            "cancel".parse::<ShutdownBehavior>().unwrap(),
            ShutdownBehavior::Cancel
        );
        assert_eq!(
            "WAIT".parse::<ShutdownBehavior>().unwrap(),
            ShutdownBehavior::Wait
        );
        assert_eq!(
            "force".parse::<ShutdownBehavior>().unwrap(),
            ShutdownBehavior::Force
        );
        assert!("explode".parse::<ShutdownBehavior>().is_err());
    }

    #[test]
    fn test_warning_ring_is_bounded() {
        let mut config = Config::default();
        for i in 0..(WARNING_RING_CAPACITY + 10) {
            config.push_warning(format!("warning {}", i));
        }
        assert_eq!(config.warnings.len(), WARNING_RING_CAPACITY);
        // Oldest entries were dropped
        assert_eq!(config.warnings.front().unwrap(), "warning 10");

        config.flush_warnings();
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn test_invalid_numeric_falls_back_with_warning() {
        std::env::set_var("ARBOR_TEST_BAD_NUMERIC", "not-a-number");
        let mut config = Config::default();
        let value: usize = config.parse_or_default("ARBOR_TEST_BAD_NUMERIC", 7);
        assert_eq!(value, 7);
        assert_eq!(config.warnings.len(), 1);
        std::env::remove_var("ARBOR_TEST_BAD_NUMERIC");
    }
}
