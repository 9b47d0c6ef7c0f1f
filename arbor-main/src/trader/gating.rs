use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use arbor_data::model::Side;
use arbor_strategy::{Opportunity, VarianceRecord};

use super::ArbTrader;

impl ArbTrader {
    /*----- Gating sequence ----- */
    // Short-circuits on the first failing gate. Passing the lock step (3)
    // transfers ownership of the trade key to the caller: every later gate
    // failure must release it, and a true return obliges the caller to run
    // execute, which releases in its finally path.
    pub async fn should_execute(&self, opportunity: &Opportunity) -> bool {
        // 1. Global concurrency cap
        if self.active_trades.len() >= self.config.max_concurrent_trades {
            debug!(
                active = self.active_trades.len(),
                cap = self.config.max_concurrent_trades,
                message = "concurrent trade cap reached, skipping opportunity"
            );
            return false;
        }

        // 2. Age and sanity checks
        if !self.validate_opportunity(opportunity) {
            return false;
        }

        // 3. THE race fence: atomic check-and-insert of the trade key
        let trade_key = opportunity.trade_key();
        if !self.active_trades.try_acquire(&trade_key) {
            debug!(
                trade_key = %trade_key,
                message = "trade key already in flight, skipping"
            );
            return false;
        }

        // 4. Balances on both legs, net of other trades' live reservations
        match self.check_required_balances(opportunity, &trade_key).await {
            Ok(true) => {}
            _ => {
                self.release_trade(&trade_key);
                return false;
            }
        }

        // 5. Fresh books: price variance, profit erosion and slippage
        if !self.validate_current_prices(opportunity).await {
            self.release_trade(&trade_key);
            return false;
        }

        true
    }

    /*----- Gate 2: opportunity sanity ----- */
    pub fn validate_opportunity(&self, opportunity: &Opportunity) -> bool {
        let now = self.venue_time_reference(opportunity);
        let age = now - opportunity.timestamp;

        if age < chrono::Duration::zero() {
            warn!(
                opportunity = %opportunity,
                age_ms = age.num_milliseconds(),
                message = "opportunity timestamp is in the future, severe clock skew"
            );
            return false;
        }
        if age > self.config.max_opportunity_age {
            debug!(
                opportunity = %opportunity,
                age_ms = age.num_milliseconds(),
                message = "opportunity too old"
            );
            return false;
        }

        if opportunity.profit_percent <= 0.0
            || opportunity.amount <= 0.0
            || opportunity.buy_price <= 0.0
            || opportunity.sell_price <= 0.0
        {
            debug!(
                opportunity = %opportunity,
                message = "opportunity has non-positive economics"
            );
            return false;
        }

        let min_amount = self.min_trade_amount(opportunity);
        if opportunity.amount < min_amount {
            debug!(
                opportunity = %opportunity,
                min_amount = min_amount,
                message = "opportunity below minimum trade amount"
            );
            return false;
        }

        true
    }

    // Venue-time "now": the freshest venue timestamp observed on either leg,
    // local clock as the fallback. Keeps age arithmetic inside one clock
    // domain when venues disagree with the local wall clock.
    fn venue_time_reference(&self, opportunity: &Opportunity) -> DateTime<Utc> {
        [&opportunity.buy_venue, &opportunity.sell_venue]
            .into_iter()
            .filter_map(|venue| self.gateway.last_update(venue))
            .max()
            .unwrap_or_else(Utc::now)
    }

    fn min_trade_amount(&self, opportunity: &Opportunity) -> f64 {
        let buy_min = self
            .gateway
            .min_trade_amount(&opportunity.buy_venue, &opportunity.instrument)
            .unwrap_or(0.0);
        let sell_min = self
            .gateway
            .min_trade_amount(&opportunity.sell_venue, &opportunity.instrument)
            .unwrap_or(0.0);
        buy_min.max(sell_min).max(self.config.min_trade_amount)
    }

    /*----- Gate 4: balances ----- */
    // The authoritative variant: reservations held by the caller's own trade
    // key do not count against it.
    pub async fn check_required_balances(
        &self,
        opportunity: &Opportunity,
        trade_key: &str,
    ) -> Result<bool, arbor_oms::error::ExecutionError> {
        let required_quote =
            opportunity.required_quote() * (1.0 + self.config.reserve_percent / 100.0);
        let available_quote = self
            .gateway
            .available_balance(
                &opportunity.buy_venue,
                &opportunity.instrument.quote,
                Some(trade_key),
            )
            .await?;
        if available_quote < required_quote {
            warn!(
                venue = %opportunity.buy_venue,
                currency = %opportunity.instrument.quote,
                required = required_quote,
                available = available_quote,
                message = "insufficient quote balance for buy leg"
            );
            return Ok(false);
        }

        let available_base = self
            .gateway
            .available_balance(
                &opportunity.sell_venue,
                &opportunity.instrument.base,
                Some(trade_key),
            )
            .await?;
        if available_base < opportunity.amount {
            warn!(
                venue = %opportunity.sell_venue,
                currency = %opportunity.instrument.base,
                required = opportunity.amount,
                available = available_base,
                message = "insufficient base balance for sell leg"
            );
            return Ok(false);
        }

        Ok(true)
    }

    /*----- Gate 5: fresh price revalidation ----- */
    // Refetches both books and recomputes the edge. Variance is recorded in
    // the history whether or not the gate passes.
    pub async fn validate_current_prices(&self, opportunity: &Opportunity) -> bool {
        let fresh_buy = match self
            .gateway
            .fetch_order_book(
                &opportunity.buy_venue,
                &opportunity.instrument,
                self.config.order_book_depth,
            )
            .await
        {
            Ok(book) => book,
            Err(error) => {
                warn!(
                    venue = %opportunity.buy_venue,
                    error = %error,
                    message = "failed to refetch buy book for validation"
                );
                return false;
            }
        };
        let fresh_sell = match self
            .gateway
            .fetch_order_book(
                &opportunity.sell_venue,
                &opportunity.instrument,
                self.config.order_book_depth,
            )
            .await
        {
            Ok(book) => book,
            Err(error) => {
                warn!(
                    venue = %opportunity.sell_venue,
                    error = %error,
                    message = "failed to refetch sell book for validation"
                );
                return false;
            }
        };

        let (Some(current_buy), Some(current_sell)) =
            (fresh_buy.best_ask(), fresh_sell.best_bid())
        else {
            warn!(
                opportunity = %opportunity,
                message = "fresh book missing top of book during validation"
            );
            return false;
        };

        let buy_variance =
            (current_buy.price - opportunity.buy_price) / opportunity.buy_price * 100.0;
        let sell_variance =
            (opportunity.sell_price - current_sell.price) / opportunity.sell_price * 100.0;
        let total_variance = buy_variance + sell_variance;
        let profit_impact = if opportunity.profit_percent > 0.0 {
            total_variance / opportunity.profit_percent * 100.0
        } else {
            0.0
        };

        self.variance.lock().push(VarianceRecord::new(
            buy_variance,
            sell_variance,
            profit_impact,
        ));

        if buy_variance > self.config.price_tolerance_percent
            || sell_variance > self.config.price_tolerance_percent
        {
            debug!(
                opportunity = %opportunity,
                buy_variance = buy_variance,
                sell_variance = sell_variance,
                tolerance = self.config.price_tolerance_percent,
                message = "price moved beyond tolerance since detection"
            );
            return false;
        }

        if self.config.dynamic_tolerance
            && total_variance > 0.0
            && profit_impact > self.config.max_profit_erosion_percent
        {
            debug!(
                opportunity = %opportunity,
                profit_impact = profit_impact,
                message = "variance erodes too much of the detected profit"
            );
            return false;
        }

        let buy_slippage = fresh_buy.slippage_percent(Side::Buy, opportunity.amount);
        let sell_slippage = fresh_sell.slippage_percent(Side::Sell, opportunity.amount);
        match (buy_slippage, sell_slippage) {
            (Some(buy_slippage), Some(sell_slippage))
                if buy_slippage <= self.config.max_slippage_percent
                    && sell_slippage <= self.config.max_slippage_percent =>
            {
                true
            }
            _ => {
                debug!(
                    opportunity = %opportunity,
                    buy_slippage = ?buy_slippage,
                    sell_slippage = ?sell_slippage,
                    message = "slippage beyond limit or depth insufficient"
                );
                false
            }
        }
    }
}
