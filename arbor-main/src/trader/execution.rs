use std::sync::Arc;

use tokio::time::timeout;
use tracing::{error, info, warn};

use arbor_data::model::Side;
use arbor_data::shared::utils::round_float_to_precision;
use arbor_oms::event::{EngineEvent, MessageTransmitter};
use arbor_oms::model::order::{OrderRequest, OrderResult};
use arbor_oms::model::ClientOrderId;
use arbor_strategy::Opportunity;

use super::ArbTrader;

impl ArbTrader {
    /*----- Two-leg execution ----- */
    // Entered holding the trade key lock taken in should_execute. Whatever
    // happens inside, reservations and the lock are released on the way out.
    pub async fn execute(self: Arc<Self>, opportunity: Opportunity) {
        let trade_key = opportunity.trade_key();
        let outcome = self.execute_inner(&opportunity, &trade_key).await;
        self.release_trade(&trade_key);

        match outcome {
            Ok(profit) => {
                info!(
                    trade_key = %trade_key,
                    profit = profit,
                    message = "arbitrage trade completed"
                );
                self.event_tx.send(EngineEvent::ExecutionCompleted {
                    trade_key,
                    success: true,
                    profit: Some(profit),
                });
            }
            Err(reason) => {
                warn!(
                    trade_key = %trade_key,
                    reason = %reason,
                    message = "arbitrage trade aborted"
                );
                self.event_tx.send(EngineEvent::ExecutionCompleted {
                    trade_key,
                    success: false,
                    profit: None,
                });
            }
        }
    }

    async fn execute_inner(
        &self,
        opportunity: &Opportunity,
        trade_key: &str,
    ) -> Result<f64, String> {
        // 1. Stale-data guard: balances one more time with fresh fetches
        match self.check_required_balances(opportunity, trade_key).await {
            Ok(true) => {}
            outcome => {
                // Keep the abort in the ledger's terminal log
                if let Ok(recorded) = self.ledger.record_start(opportunity) {
                    let _ = self.ledger.record_complete(&recorded, false, None);
                }
                return Err(match outcome {
                    Err(error) => format!("balance re-verification errored: {}", error),
                    _ => "balance re-verification failed".to_owned(),
                });
            }
        }

        // 2. Earmark both legs before anything is sent
        let required_quote =
            opportunity.required_quote() * (1.0 + self.config.reserve_percent / 100.0);
        self.gateway.reserve(
            trade_key,
            &opportunity.buy_venue,
            &opportunity.instrument.quote,
            required_quote,
        );
        self.gateway.reserve(
            trade_key,
            &opportunity.sell_venue,
            &opportunity.instrument.base,
            opportunity.amount,
        );

        // 3. Record intent. Failing to persist means no order goes out.
        let trade_key = match self.ledger.record_start(opportunity) {
            Ok(trade_key) => trade_key,
            Err(error) => {
                error!(
                    trade_key = %trade_key,
                    error = %error,
                    message = "failed to record trade intent, refusing to submit"
                );
                return Err(format!("ledger record_start failed: {}", error));
            }
        };

        // 4. Fresh idempotency keys for both legs
        let buy_cid = ClientOrderId::random();
        let sell_cid = ClientOrderId::random();

        // 5. Buy leg first. The sell is never issued unless the buy succeeds.
        let buy_request = OrderRequest::market(
            opportunity.buy_venue.clone(),
            opportunity.instrument.clone(),
            Side::Buy,
            opportunity.amount,
            buy_cid,
        );
        let buy_result = match timeout(
            self.config.order_timeout,
            self.gateway.execute_trade(buy_request),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                let _ = self.ledger.record_complete(&trade_key, false, None);
                return Err(format!("buy submission failed: {}", error));
            }
            Err(_) => {
                let _ = self.ledger.record_complete(&trade_key, false, None);
                return Err("buy leg timed out".to_owned());
            }
        };
        if !buy_result.is_success() {
            let _ = self.ledger.record_complete(&trade_key, false, None);
            return Err(format!(
                "buy leg failed: {}",
                buy_result.error.as_deref().unwrap_or("unknown")
            ));
        }

        // 6. Partial fill arithmetic against the detected amount
        let fill_percent = buy_result.filled_amount / opportunity.amount * 100.0;
        if fill_percent < self.config.partial_fill_threshold {
            error!(
                trade_key = %trade_key,
                filled = buy_result.filled_amount,
                requested = opportunity.amount,
                fill_percent = fill_percent,
                threshold = self.config.partial_fill_threshold,
                message = "buy fill below threshold, position stranded, manual intervention may be required"
            );
            let _ = self.ledger.record_buy_executed(&trade_key, buy_result);
            let _ = self.ledger.record_complete(&trade_key, false, None);
            return Err(format!(
                "partial buy fill {:.2}% below threshold {:.2}%",
                fill_percent, self.config.partial_fill_threshold
            ));
        }

        // 7. The sell trades what the buy delivered, floored to the sell
        // venue's amount step so it is never more than we hold
        let sell_precision = self
            .gateway
            .amount_precision(&opportunity.sell_venue, &opportunity.instrument)
            .unwrap_or(0.0);
        let sell_amount = round_float_to_precision(buy_result.filled_amount, sell_precision);

        // 8. Persist the buy before the sell becomes externally visible
        if let Err(ledger_error) = self
            .ledger
            .record_buy_executed(&trade_key, buy_result.clone())
        {
            error!(
                trade_key = %trade_key,
                error = %ledger_error,
                message = "holding a position but cannot persist the buy, refusing to sell, operator attention required"
            );
            return Err(format!("ledger record_buy_executed failed: {}", ledger_error));
        }

        // 9. Sell leg
        let sell_request = OrderRequest::market(
            opportunity.sell_venue.clone(),
            opportunity.instrument.clone(),
            Side::Sell,
            sell_amount,
            sell_cid,
        );
        let sell_result = match timeout(
            self.config.order_timeout,
            self.gateway.execute_trade(sell_request),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                return Err(self.handle_sell_failure(&trade_key, None, error.to_string()));
            }
            Err(_) => {
                return Err(self.handle_sell_failure(
                    &trade_key,
                    None,
                    "sell leg timed out".to_owned(),
                ));
            }
        };
        if !sell_result.is_success() {
            let detail = sell_result
                .error
                .clone()
                .unwrap_or_else(|| "unknown".to_owned());
            return Err(self.handle_sell_failure(&trade_key, Some(sell_result), detail));
        }

        let actual_profit = (sell_result.cost - sell_result.fee_paid)
            - (buy_result.cost + buy_result.fee_paid);
        if let Err(ledger_error) =
            self.ledger
                .record_complete(&trade_key, true, Some(sell_result))
        {
            error!(
                trade_key = %trade_key,
                error = %ledger_error,
                message = "trade completed but final ledger write failed"
            );
        }

        Ok(actual_profit)
    }

    // Buy succeeded, sell did not: a position-mismatch condition the
    // operator has to look at.
    fn handle_sell_failure(
        &self,
        trade_key: &str,
        sell_result: Option<OrderResult>,
        detail: String,
    ) -> String {
        error!(
            trade_key = %trade_key,
            detail = %detail,
            message = "POSITION MISMATCH: buy filled but sell failed, operator attention required"
        );
        let _ = self.ledger.record_complete(trade_key, false, sell_result);
        format!("sell leg failed after successful buy: {}", detail)
    }
}
