use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use arbor_data::shared::utils::current_timestamp_utc;
use arbor_strategy::Opportunity;

use crate::error::LedgerError;
use crate::model::order::OrderResult;

pub const LEDGER_SCHEMA_VERSION: u32 = 1;

/*----- */
// Trade status
/*----- */
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TradeStatus {
    Pending,
    BuyExecuted,
    Completed,
    Failed,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Completed | TradeStatus::Failed)
    }
}

/*----- */
// Ledger entry
/*----- */
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeLedgerEntry {
    pub trade_key: String,
    pub opportunity: Opportunity,
    pub status: TradeStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub buy_result: Option<OrderResult>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sell_result: Option<OrderResult>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/*----- */
// Persisted document
/*----- */
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct LedgerDocument {
    version: u32,
    last_updated: u64,
    active_trades: HashMap<String, TradeLedgerEntry>,
}

/*----- */
// Recovery report
/*----- */
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub resumable: Vec<TradeLedgerEntry>,
    pub orphaned: Vec<TradeLedgerEntry>,
}

/*----- */
// Ledger config
/*----- */
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub path: PathBuf,
    pub orphan_threshold: chrono::Duration,
}

impl LedgerConfig {
    pub fn new<P>(path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        Self {
            path: path.into(),
            orphan_threshold: chrono::Duration::hours(24),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new("data/trade-state.json")
    }
}

/*----- */
// Trade ledger
/*----- */
// Durable map of in-flight trades. Every mutation rewrites the whole
// document atomically (write temp, fsync, rename) before the caller is
// allowed to take the next externally visible action.
#[derive(Debug)]
pub struct TradeLedger {
    config: LedgerConfig,
    active: Mutex<HashMap<String, TradeLedgerEntry>>,
}

impl TradeLedger {
    pub fn open(config: LedgerConfig) -> Result<Self, LedgerError> {
        let active = match fs::read_to_string(&config.path) {
            Ok(raw) => match serde_json::from_str::<LedgerDocument>(&raw) {
                Ok(document) if document.version == LEDGER_SCHEMA_VERSION => {
                    document.active_trades
                }
                Ok(document) => {
                    warn!(
                        found_version = document.version,
                        expected_version = LEDGER_SCHEMA_VERSION,
                        path = %config.path.display(),
                        message = "trade state schema version mismatch, starting empty"
                    );
                    HashMap::new()
                }
                Err(error) => {
                    warn!(
                        error = %error,
                        path = %config.path.display(),
                        message = "trade state file unreadable, starting empty"
                    );
                    HashMap::new()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(error) => return Err(LedgerError::Io(error)),
        };

        Ok(Self {
            config,
            active: Mutex::new(active),
        })
    }

    // Creates the entry in state pending. Durable before returning: the
    // engine must not submit an order whose intent was never recorded.
    pub fn record_start(&self, opportunity: &Opportunity) -> Result<String, LedgerError> {
        let trade_key = opportunity.trade_key();
        let now = Utc::now();

        let mut active = self.active.lock();
        if let Some(existing) = active.get(&trade_key) {
            if !existing.status.is_terminal() {
                return Err(LedgerError::DuplicateTradeKey(trade_key));
            }
        }

        active.insert(
            trade_key.clone(),
            TradeLedgerEntry {
                trade_key: trade_key.clone(),
                opportunity: opportunity.clone(),
                status: TradeStatus::Pending,
                buy_result: None,
                sell_result: None,
                started_at: now,
                updated_at: now,
            },
        );
        self.persist(&active)?;

        Ok(trade_key)
    }

    pub fn record_buy_executed(
        &self,
        trade_key: &str,
        buy_result: OrderResult,
    ) -> Result<(), LedgerError> {
        let mut active = self.active.lock();
        let entry = active
            .get_mut(trade_key)
            .ok_or_else(|| LedgerError::UnknownTradeKey(trade_key.to_owned()))?;

        if entry.status != TradeStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                trade_key: trade_key.to_owned(),
                from: entry.status,
                action: "record_buy_executed",
            });
        }

        entry.status = TradeStatus::BuyExecuted;
        entry.buy_result = Some(buy_result);
        entry.updated_at = Utc::now();
        self.persist(&active)
    }

    // Terminal transition. The entry leaves the active set but the outcome
    // is logged so completed trades remain visible to operators.
    pub fn record_complete(
        &self,
        trade_key: &str,
        success: bool,
        sell_result: Option<OrderResult>,
    ) -> Result<(), LedgerError> {
        let mut active = self.active.lock();
        let mut entry = active
            .remove(trade_key)
            .ok_or_else(|| LedgerError::UnknownTradeKey(trade_key.to_owned()))?;

        entry.status = if success {
            TradeStatus::Completed
        } else {
            TradeStatus::Failed
        };
        entry.sell_result = sell_result;
        entry.updated_at = Utc::now();

        info!(
            trade_key = %trade_key,
            status = ?entry.status,
            buy_filled = entry
                .buy_result
                .as_ref()
                .map(|result| result.filled_amount)
                .unwrap_or(0.0),
            message = "trade reached terminal state"
        );

        self.persist(&active)
    }

    // Called once at startup. Orphans are reported but never removed here:
    // an operator has to acknowledge each one.
    pub fn recover(&self) -> RecoveryReport {
        let now = Utc::now();
        let active = self.active.lock();

        let mut report = RecoveryReport::default();
        for entry in active.values() {
            if now - entry.started_at > self.config.orphan_threshold {
                report.orphaned.push(entry.clone());
            } else {
                report.resumable.push(entry.clone());
            }
        }

        report
    }

    pub fn acknowledge_orphan(&self, trade_key: &str) -> Result<(), LedgerError> {
        let mut active = self.active.lock();
        active
            .remove(trade_key)
            .ok_or_else(|| LedgerError::UnknownTradeKey(trade_key.to_owned()))?;
        self.persist(&active)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn get(&self, trade_key: &str) -> Option<TradeLedgerEntry> {
        self.active.lock().get(trade_key).cloned()
    }

    fn persist(&self, active: &HashMap<String, TradeLedgerEntry>) -> Result<(), LedgerError> {
        let document = LedgerDocument {
            version: LEDGER_SCHEMA_VERSION,
            last_updated: current_timestamp_utc(),
            active_trades: active.clone(),
        };
        let serialised = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = self.config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = temp_path_for(&self.config.path);
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&serialised)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.config.path)?;
        Ok(())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    PathBuf::from(temp)
}

#[cfg(test)]
mod test {
    use arbor_data::shared::subscription_models::{Instrument, VenueId};
    use arbor_strategy::FeeBreakdown;

    use super::*;

    fn temp_ledger_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "arbor-ledger-{}-{}.json",
            tag,
            uuid::Uuid::new_v4()
        ))
    }

    fn opportunity() -> Opportunity {
        Opportunity {
            instrument: Instrument::new("OP", "USDT"),
            buy_venue: VenueId::new("venue_a"),
            sell_venue: VenueId::new("venue_b"),
            buy_price: 100.0,
            sell_price: 101.0,
            amount: 10.0,
            profit_percent: 0.799,
            profit_amount: 7.99,
            timestamp: Utc::now(),
            fees: FeeBreakdown {
                buy_fee: 1.0,
                sell_fee: 1.01,
                total: 2.01,
            },
        }
    }

    #[test]
    fn test_round_trip_survives_restart() {
        let path = temp_ledger_path("roundtrip");
        let config = LedgerConfig::new(path.clone());

        let ledger = TradeLedger::open(config.clone()).unwrap();
        let trade_key = ledger.record_start(&opportunity()).unwrap();
        assert_eq!(ledger.active_count(), 1);

        drop(ledger);
        let reopened = TradeLedger::open(config).unwrap();
        assert_eq!(reopened.active_count(), 1);

        let report = reopened.recover();
        assert_eq!(report.resumable.len(), 1);
        assert_eq!(report.orphaned.len(), 0);
        assert_eq!(report.resumable[0].trade_key, trade_key);
        assert_eq!(report.resumable[0].status, TradeStatus::Pending);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_completed_trades_leave_active_set() {
        let path = temp_ledger_path("complete");
        let config = LedgerConfig::new(path.clone());

        let ledger = TradeLedger::open(config.clone()).unwrap();
        let trade_key = ledger.record_start(&opportunity()).unwrap();
        ledger.record_complete(&trade_key, true, None).unwrap();
        assert_eq!(ledger.active_count(), 0);

        drop(ledger);
        let reopened = TradeLedger::open(config).unwrap();
        assert_eq!(reopened.active_count(), 0);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_duplicate_trade_key_rejected() {
        let path = temp_ledger_path("duplicate");
        let ledger = TradeLedger::open(LedgerConfig::new(path.clone())).unwrap();

        ledger.record_start(&opportunity()).unwrap();
        let duplicate = ledger.record_start(&opportunity());
        assert!(matches!(duplicate, Err(LedgerError::DuplicateTradeKey(_))));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let path = temp_ledger_path("transition");
        let ledger = TradeLedger::open(LedgerConfig::new(path.clone())).unwrap();

        let request = crate::model::order::OrderRequest::market(
            VenueId::new("venue_a"),
            Instrument::new("OP", "USDT"),
            arbor_data::model::Side::Buy,
            10.0,
            crate::model::ClientOrderId::random(),
        );
        let buy = crate::model::order::OrderResult::failure(&request, "n/a".to_owned());

        let missing = ledger.record_buy_executed("nope", buy.clone());
        assert!(matches!(missing, Err(LedgerError::UnknownTradeKey(_))));

        let trade_key = ledger.record_start(&opportunity()).unwrap();
        ledger.record_buy_executed(&trade_key, buy.clone()).unwrap();
        assert_eq!(
            ledger.get(&trade_key).unwrap().status,
            TradeStatus::BuyExecuted
        );

        let twice = ledger.record_buy_executed(&trade_key, buy);
        assert!(matches!(twice, Err(LedgerError::InvalidTransition { .. })));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_version_mismatch_starts_empty_and_keeps_file() {
        let path = temp_ledger_path("version");
        fs::write(
            &path,
            r#"{"version": 99, "lastUpdated": 0, "activeTrades": {}}"#,
        )
        .unwrap();

        let ledger = TradeLedger::open(LedgerConfig::new(path.clone())).unwrap();
        assert_eq!(ledger.active_count(), 0);
        assert!(path.exists());

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_orphan_detection_and_acknowledge() {
        let path = temp_ledger_path("orphan");

        // Craft a document holding one fresh and one day-old entry
        let fresh = opportunity();
        let mut old = opportunity();
        old.buy_venue = VenueId::new("venue_c");
        let now_ms = Utc::now().timestamp_millis();
        let old_ms = now_ms - 25 * 60 * 60 * 1000;

        let document = format!(
            r#"{{
              "version": 1,
              "lastUpdated": {now_ms},
              "activeTrades": {{
                "{fresh_key}": {{
                  "tradeKey": "{fresh_key}",
                  "opportunity": {fresh_opp},
                  "status": "buyExecuted",
                  "startedAt": {now_ms},
                  "updatedAt": {now_ms}
                }},
                "{old_key}": {{
                  "tradeKey": "{old_key}",
                  "opportunity": {old_opp},
                  "status": "pending",
                  "startedAt": {old_ms},
                  "updatedAt": {old_ms}
                }}
              }}
            }}"#,
            fresh_key = fresh.trade_key(),
            old_key = old.trade_key(),
            fresh_opp = serde_json::to_string(&fresh).unwrap(),
            old_opp = serde_json::to_string(&old).unwrap(),
        );
        fs::write(&path, document).unwrap();

        let ledger = TradeLedger::open(LedgerConfig::new(path.clone())).unwrap();
        let report = ledger.recover();
        assert_eq!(report.resumable.len(), 1);
        assert_eq!(report.orphaned.len(), 1);
        assert_eq!(report.orphaned[0].trade_key, old.trade_key());

        // Orphans survive recovery until acknowledged
        assert_eq!(ledger.active_count(), 2);
        ledger.acknowledge_orphan(&old.trade_key()).unwrap();
        assert_eq!(ledger.active_count(), 1);

        let _ = fs::remove_file(path);
    }
}
