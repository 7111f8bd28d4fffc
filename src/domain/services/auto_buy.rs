//! Auto-buy rule engine
//!
//! Decides whether a rule fires for a symbol, sizes and places the order and
//! commits the execution together with the rule's stats. Gate failures are
//! ordinary `RuleOutcome::Skipped` results, never errors.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::domain::entities::auto_buy::{
    AutoBuyExecution, AutoBuyRule, TriggerContext, TriggerType,
};
use crate::domain::entities::lifecycle_event::LifecycleEvent;
use crate::domain::entities::new_coin::WILDCARD_SYMBOL;
use crate::domain::entities::order::{OrderRequest, OrderSide, OrderType};
use crate::domain::entities::position::{Position, PositionSide, PositionType};
use crate::domain::errors::{AutoBuyError, HandlerError, RepositoryError};
use crate::domain::repositories::exchange_client::ExchangeClient;
use crate::domain::repositories::notifier::{Notification, Notifier};
use crate::domain::repositories::stores::Repositories;
use crate::domain::services::event_dispatcher::LifecycleEventHandler;
use crate::domain::services::risk_gate::RiskGate;
use crate::domain::value_objects::quantity::Quantity;

/// Why a rule did not fire.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    CooldownActive { until: DateTime<Utc> },
    Disabled,
    /// Another evaluation of the same rule is running
    InFlight,
    ConditionNotMet,
    QuoteAssetMismatch,
    PreTrading,
    AboveMaxBuyPrice { price: f64, max: f64 },
    InsufficientBaseVolume { volume: f64, min: f64 },
    InsufficientQuoteVolume { volume: f64, min: f64 },
    InvalidPrice(f64),
    QuantityTooSmall,
    BelowMinNotional { notional: f64, min: f64 },
    QuantityOutOfBounds { quantity: f64 },
    RiskCheckFailed,
    InvalidOrder(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Executed(AutoBuyExecution),
    Skipped(SkipReason),
}

impl RuleOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, RuleOutcome::Executed(_))
    }
}

/// Summary of a bulk sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepSummary {
    pub evaluated: usize,
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// What happens after a committed execution.
#[derive(Debug, Clone)]
pub struct AutoBuySettings {
    pub open_positions_on_fill: bool,
    pub default_stop_loss_percentage: f64,
    pub default_take_profit_percentage: f64,
}

impl Default for AutoBuySettings {
    fn default() -> Self {
        Self {
            open_positions_on_fill: true,
            default_stop_loss_percentage: 0.05,
            default_take_profit_percentage: 0.10,
        }
    }
}

/// Marks a rule as being evaluated until dropped, so an abandoned or
/// panicked evaluation never leaves the rule blocked.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    rule_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<String>>, rule_id: &str) -> Option<Self> {
        let inserted = in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(rule_id.to_string());
        inserted.then(|| Self {
            in_flight,
            rule_id: rule_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.rule_id);
    }
}

pub struct AutoBuyEngine {
    exchange: Arc<dyn ExchangeClient>,
    repos: Repositories,
    risk_gate: Arc<RiskGate>,
    notifier: Arc<dyn Notifier>,
    settings: AutoBuySettings,
    in_flight: Mutex<HashSet<String>>,
}

impl AutoBuyEngine {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        repos: Repositories,
        risk_gate: Arc<RiskGate>,
        notifier: Arc<dyn Notifier>,
        settings: AutoBuySettings,
    ) -> Self {
        Self {
            exchange,
            repos,
            risk_gate,
            notifier,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    // ---- rule management ----

    /// Store a new rule for `user_id`. Execution stats always start empty.
    pub async fn create_rule(
        &self,
        user_id: &str,
        mut rule: AutoBuyRule,
    ) -> Result<AutoBuyRule, AutoBuyError> {
        let now = Utc::now();
        rule.user_id = user_id.to_string();
        rule.execution_count = 0;
        rule.last_triggered = None;
        rule.last_price = 0.0;
        rule.created_at = now;
        rule.updated_at = now;
        rule.validate()?;
        self.repos.rules.create(&rule).await?;
        info!(rule_id = %rule.id, symbol = %rule.symbol, trigger = %rule.trigger_type, "Auto-buy rule created");
        Ok(rule)
    }

    /// Replace a rule's definition. Owner and execution stats stay as stored.
    pub async fn update_rule(&self, mut rule: AutoBuyRule) -> Result<AutoBuyRule, AutoBuyError> {
        rule.validate()?;
        rule.updated_at = Utc::now();
        match self.repos.rules.update_definition(&rule).await {
            Err(RepositoryError::NotFound { .. }) => Err(AutoBuyError::RuleNotFound(rule.id)),
            other => Ok(other?),
        }
    }

    pub async fn delete_rule(&self, rule_id: &str) -> Result<(), AutoBuyError> {
        match self.repos.rules.delete(rule_id).await {
            Err(RepositoryError::NotFound { .. }) => {
                Err(AutoBuyError::RuleNotFound(rule_id.to_string()))
            }
            other => Ok(other?),
        }
    }

    pub async fn get_rule(&self, rule_id: &str) -> Result<AutoBuyRule, AutoBuyError> {
        self.repos
            .rules
            .get(rule_id)
            .await?
            .ok_or_else(|| AutoBuyError::RuleNotFound(rule_id.to_string()))
    }

    pub async fn list_rules_by_user(&self, user_id: &str) -> Result<Vec<AutoBuyRule>, AutoBuyError> {
        Ok(self.repos.rules.list_by_user(user_id).await?)
    }

    pub async fn list_rules_by_symbol(&self, symbol: &str) -> Result<Vec<AutoBuyRule>, AutoBuyError> {
        Ok(self.repos.rules.list_by_symbol(symbol).await?)
    }

    pub async fn get_execution_history(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AutoBuyExecution>, AutoBuyError> {
        Ok(self
            .repos
            .executions
            .list_by_user(user_id, limit, offset)
            .await?)
    }

    // ---- evaluation ----

    /// Evaluate one rule against current market data. A no-op unless its
    /// condition holds right now.
    pub async fn evaluate_rule(&self, rule_id: &str) -> Result<RuleOutcome, AutoBuyError> {
        let rule = self.get_rule(rule_id).await?;
        let symbol = rule.symbol.clone();
        self.evaluate_guarded(rule_id, &symbol, TriggerContext::MarketRefresh)
            .await
    }

    /// Sweep every enabled market-driven rule. Failures are isolated per rule.
    pub async fn evaluate_rules(&self) -> Result<SweepSummary, AutoBuyError> {
        let rules = self.repos.rules.list_active().await?;
        let mut summary = SweepSummary::default();

        for rule in rules.iter().filter(|r| !r.trigger_type.is_event_driven()) {
            summary.evaluated += 1;
            match self
                .evaluate_guarded(&rule.id, &rule.symbol, TriggerContext::MarketRefresh)
                .await
            {
                Ok(RuleOutcome::Executed(_)) => summary.executed += 1,
                Ok(RuleOutcome::Skipped(_)) => summary.skipped += 1,
                Err(e) => {
                    warn!(rule_id = %rule.id, symbol = %rule.symbol, error = %e, "Rule evaluation failed");
                    summary.failed += 1;
                }
            }
        }

        debug!(
            evaluated = summary.evaluated,
            executed = summary.executed,
            failed = summary.failed,
            "Rule sweep complete"
        );
        Ok(summary)
    }

    /// Fire every matching new-listing rule for an Expected -> Trading event,
    /// then flag the coin as processed for auto-buy.
    pub async fn on_new_listing(
        &self,
        event: &LifecycleEvent,
    ) -> Result<Vec<RuleOutcome>, AutoBuyError> {
        let mut rules = self.repos.rules.list_by_symbol(&event.symbol).await?;
        rules.extend(self.repos.rules.list_by_symbol(WILDCARD_SYMBOL).await?);

        let mut outcomes = Vec::new();
        for rule in rules
            .iter()
            .filter(|r| r.trigger_type == TriggerType::NewListing)
        {
            if !rule.matches_quote_asset(&event.quote_asset) {
                debug!(rule_id = %rule.id, symbol = %event.symbol, "Quote asset does not match rule filter");
                outcomes.push(RuleOutcome::Skipped(SkipReason::QuoteAssetMismatch));
                continue;
            }
            match self
                .evaluate_guarded(&rule.id, &event.symbol, TriggerContext::NewListing)
                .await
            {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(rule_id = %rule.id, symbol = %event.symbol, error = %e, "New-listing rule failed")
                }
            }
        }

        if let Some(mut coin) = self.repos.symbols.get_by_symbol(&event.symbol).await? {
            if !coin.is_processed_for_autobuy {
                coin.is_processed_for_autobuy = true;
                coin.updated_at = Utc::now();
                self.repos.symbols.update(&coin).await?;
            }
        }
        Ok(outcomes)
    }

    /// Serialize evaluations of the same rule and reload it so the cooldown
    /// check sees the latest committed stats.
    async fn evaluate_guarded(
        &self,
        rule_id: &str,
        symbol: &str,
        context: TriggerContext,
    ) -> Result<RuleOutcome, AutoBuyError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, rule_id) else {
            debug!(rule_id = %rule_id, "Rule evaluation already in flight");
            return Ok(RuleOutcome::Skipped(SkipReason::InFlight));
        };
        let rule = self.get_rule(rule_id).await?;
        self.evaluate(rule, symbol, context).await
    }

    async fn evaluate(
        &self,
        rule: AutoBuyRule,
        symbol: &str,
        context: TriggerContext,
    ) -> Result<RuleOutcome, AutoBuyError> {
        let now = Utc::now();

        // Cooldown comes before every other gate
        if rule.is_in_cooldown(now) {
            let until = rule.cooldown_ends_at().unwrap_or(now);
            return Ok(skip(&rule, SkipReason::CooldownActive { until }));
        }
        if !rule.is_enabled {
            return Ok(skip(&rule, SkipReason::Disabled));
        }
        if rule.trigger_type.is_event_driven() && context != TriggerContext::NewListing {
            return Ok(skip(&rule, SkipReason::ConditionNotMet));
        }

        let market = self.exchange.get_market_data(symbol).await?;
        if !rule
            .trigger_type
            .is_satisfied(rule.trigger_value, &market, context)
        {
            return Ok(skip(&rule, SkipReason::ConditionNotMet));
        }

        let info = self.exchange.get_symbol_status(symbol).await?;
        if !rule.matches_quote_asset(&info.quote_asset) {
            return Ok(skip(&rule, SkipReason::QuoteAssetMismatch));
        }
        if !info.is_trading && !rule.allow_pre_trading {
            return Ok(skip(&rule, SkipReason::PreTrading));
        }

        let price = market.last_price;
        if let Some(max) = rule.max_buy_price.filter(|max| price > *max) {
            return Ok(skip(&rule, SkipReason::AboveMaxBuyPrice { price, max }));
        }
        if let Some(min) = rule
            .min_base_asset_volume
            .filter(|min| market.base_volume_24h < *min)
        {
            let volume = market.base_volume_24h;
            return Ok(skip(&rule, SkipReason::InsufficientBaseVolume { volume, min }));
        }
        if let Some(min) = rule
            .min_quote_asset_volume
            .filter(|min| market.quote_volume_24h < *min)
        {
            let volume = market.quote_volume_24h;
            return Ok(skip(&rule, SkipReason::InsufficientQuoteVolume { volume, min }));
        }

        if !(price.is_finite() && price > 0.0) {
            return Ok(skip(&rule, SkipReason::InvalidPrice(price)));
        }
        let constraints = &info.constraints;
        let quantity = match Quantity::new(rule.buy_amount_quote / price) {
            Ok(raw) => raw.floor_to_step(constraints.quantity_step()),
            Err(e) => return Ok(skip(&rule, SkipReason::InvalidOrder(e.to_string()))),
        };
        if quantity.is_zero() {
            return Ok(skip(&rule, SkipReason::QuantityTooSmall));
        }
        let notional = quantity.value() * price;
        if notional < constraints.min_notional {
            let min = constraints.min_notional;
            return Ok(skip(&rule, SkipReason::BelowMinNotional { notional, min }));
        }
        let below_min = constraints.min_quantity > 0.0 && quantity.value() < constraints.min_quantity;
        let above_max = constraints.max_quantity > 0.0 && quantity.value() > constraints.max_quantity;
        if below_min || above_max {
            let quantity = quantity.value();
            return Ok(skip(&rule, SkipReason::QuantityOutOfBounds { quantity }));
        }

        if rule.enable_risk_check {
            let decision = self.risk_gate.check(&rule.user_id, notional, symbol).await?;
            if !decision.passed {
                return Ok(skip(&rule, SkipReason::RiskCheckFailed));
            }
        }

        let limit_price = match rule.order_type {
            OrderType::Limit => Some(price),
            OrderType::Market => None,
        };
        let order = match OrderRequest::new(
            symbol,
            OrderSide::Buy,
            rule.order_type,
            quantity.value(),
            limit_price,
        ) {
            Ok(order) => order,
            Err(e) => return Ok(skip(&rule, SkipReason::InvalidOrder(e.to_string()))),
        };

        let placed = self.exchange.place_order(&order).await?;
        let fill_price = placed.average_price.filter(|p| *p > 0.0).unwrap_or(price);
        let filled_quantity = if placed.executed_quantity > 0.0 {
            placed.executed_quantity
        } else {
            quantity.value()
        };

        let execution = AutoBuyExecution::new(
            &rule,
            symbol,
            &placed.order_id,
            fill_price,
            filled_quantity,
            now,
        );
        if let Err(e) = self
            .repos
            .unit_of_work
            .commit_execution(&rule.id, price, &execution)
            .await
        {
            error!(
                rule_id = %rule.id,
                symbol = %symbol,
                order_id = %placed.order_id,
                error = %e,
                "Failed to commit auto-buy execution"
            );
            return Err(e.into());
        }

        info!(
            rule_id = %rule.id,
            symbol = %symbol,
            order_id = %placed.order_id,
            quantity = filled_quantity,
            price = fill_price,
            "Auto-buy rule fired"
        );

        if self.settings.open_positions_on_fill {
            self.open_position_for(&rule, &execution).await;
        }
        if let Err(e) = self
            .notifier
            .notify(&Notification::RuleExecuted(execution.clone()))
            .await
        {
            warn!(rule_id = %rule.id, error = %e, "Failed to send execution notification");
        }

        Ok(RuleOutcome::Executed(execution))
    }

    /// Open a long position for a committed execution. Failures do not roll
    /// back the execution.
    async fn open_position_for(&self, rule: &AutoBuyRule, execution: &AutoBuyExecution) {
        let position_type = if rule.trigger_type == TriggerType::NewListing {
            PositionType::NewCoin
        } else {
            PositionType::Automatic
        };
        let position = Position::open(
            &execution.user_id,
            &execution.symbol,
            PositionSide::Long,
            position_type,
            execution.price,
            execution.quantity,
            Some(execution.order_id.clone()),
            execution.timestamp,
        )
        .and_then(|p| {
            p.with_stops_from_percentages(
                Some(self.settings.default_stop_loss_percentage),
                Some(self.settings.default_take_profit_percentage),
            )
        });

        let result = match position {
            Ok(position) => self
                .repos
                .positions
                .create(&position)
                .await
                .map(|_| position.id)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match result {
            Ok(position_id) => {
                info!(position_id = %position_id, symbol = %execution.symbol, "Opened position from auto-buy fill")
            }
            Err(e) => {
                warn!(execution_id = %execution.id, error = %e, "Failed to open position for execution")
            }
        }
    }
}

fn skip(rule: &AutoBuyRule, reason: SkipReason) -> RuleOutcome {
    debug!(rule_id = %rule.id, symbol = %rule.symbol, reason = ?reason, "Rule skipped");
    RuleOutcome::Skipped(reason)
}

/// Dispatcher subscription that runs new-listing rules on Expected -> Trading.
pub struct NewListingHandler {
    engine: Arc<AutoBuyEngine>,
}

impl NewListingHandler {
    pub fn new(engine: Arc<AutoBuyEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl LifecycleEventHandler for NewListingHandler {
    fn name(&self) -> &str {
        "auto_buy_new_listing"
    }

    async fn handle(&self, event: &LifecycleEvent) -> Result<(), HandlerError> {
        if !event.is_new_listing() {
            return Ok(());
        }
        self.engine
            .on_new_listing(event)
            .await
            .map(|_| ())
            .map_err(|e| HandlerError::new(self.name(), e.to_string()))
    }
}
