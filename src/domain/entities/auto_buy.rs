//! Auto-buy rules and their execution audit records

use chrono::{DateTime, Duration, Utc};
use std::str::FromStr;
use uuid::Uuid;

use super::market_data::MarketData;
use super::new_coin::{split_symbol, WILDCARD_SYMBOL};
use super::order::OrderType;
use crate::domain::errors::RuleValidationError;

/// What woke the rule engine up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerContext {
    /// Expected -> Trading transition of the evaluated symbol
    NewListing,
    /// Periodic market-data sweep or explicit evaluation
    MarketRefresh,
}

/// Condition that makes a rule fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerType {
    NewListing,
    PriceBelow,
    PriceAbove,
    PercentDrop,
    PercentRise,
    VolumeSurge,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::NewListing => "new_listing",
            TriggerType::PriceBelow => "price_below",
            TriggerType::PriceAbove => "price_above",
            TriggerType::PercentDrop => "percent_drop",
            TriggerType::PercentRise => "percent_rise",
            TriggerType::VolumeSurge => "volume_surge",
        }
    }

    /// New-listing rules are event driven; every other trigger is market driven.
    pub fn is_event_driven(&self) -> bool {
        matches!(self, TriggerType::NewListing)
    }

    /// Whether the condition holds for `market` in the given context.
    pub fn is_satisfied(
        &self,
        trigger_value: f64,
        market: &MarketData,
        context: TriggerContext,
    ) -> bool {
        match self {
            TriggerType::NewListing => context == TriggerContext::NewListing,
            TriggerType::PriceBelow => market.last_price <= trigger_value,
            TriggerType::PriceAbove => market.last_price >= trigger_value,
            TriggerType::PercentDrop => market.percent_change_24h() <= -trigger_value,
            TriggerType::PercentRise => market.percent_change_24h() >= trigger_value,
            TriggerType::VolumeSurge => market.base_volume_24h >= trigger_value,
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = RuleValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new_listing" => Ok(TriggerType::NewListing),
            "price_below" => Ok(TriggerType::PriceBelow),
            "price_above" => Ok(TriggerType::PriceAbove),
            "percent_drop" => Ok(TriggerType::PercentDrop),
            "percent_rise" => Ok(TriggerType::PercentRise),
            "volume_surge" => Ok(TriggerType::VolumeSurge),
            other => Err(RuleValidationError::UnknownTriggerType(other.to_string())),
        }
    }
}

/// A user-defined auto-buy rule.
///
/// Execution stats (`execution_count`, `last_triggered`, `last_price`) are
/// owned by the rule engine and only change after a committed order.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoBuyRule {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// Exchange symbol or `*` for any new listing
    pub symbol: String,
    pub is_enabled: bool,
    pub trigger_type: TriggerType,
    pub trigger_value: f64,
    /// Empty means "derive from the symbol" (or any quote for wildcard rules)
    pub quote_asset: String,
    pub buy_amount_quote: f64,
    pub max_buy_price: Option<f64>,
    pub min_base_asset_volume: Option<f64>,
    pub min_quote_asset_volume: Option<f64>,
    pub allow_pre_trading: bool,
    pub cooldown_minutes: i64,
    pub order_type: OrderType,
    pub enable_risk_check: bool,
    pub execution_count: u64,
    pub last_triggered: Option<DateTime<Utc>>,
    pub last_price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutoBuyRule {
    /// A new enabled market-order rule with no optional gates.
    pub fn new(
        user_id: impl Into<String>,
        symbol: impl Into<String>,
        trigger_type: TriggerType,
        trigger_value: f64,
        buy_amount_quote: f64,
    ) -> Self {
        let now = Utc::now();
        let symbol = symbol.into();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            name: format!("{} {}", trigger_type, symbol),
            symbol,
            is_enabled: true,
            trigger_type,
            trigger_value,
            quote_asset: String::new(),
            buy_amount_quote,
            max_buy_price: None,
            min_base_asset_volume: None,
            min_quote_asset_volume: None,
            allow_pre_trading: false,
            cooldown_minutes: 0,
            order_type: OrderType::Market,
            enable_risk_check: false,
            execution_count: 0,
            last_triggered: None,
            last_price: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_cooldown_minutes(mut self, minutes: i64) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    pub fn with_quote_asset(mut self, quote_asset: impl Into<String>) -> Self {
        self.quote_asset = quote_asset.into();
        self
    }

    pub fn with_risk_check(mut self, enabled: bool) -> Self {
        self.enable_risk_check = enabled;
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.symbol == WILDCARD_SYMBOL
    }

    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if self.symbol.trim().is_empty() {
            return Err(RuleValidationError::EmptySymbol);
        }
        if self.is_wildcard() && self.trigger_type != TriggerType::NewListing {
            return Err(RuleValidationError::WildcardRequiresNewListing(
                self.trigger_type.to_string(),
            ));
        }
        // new_listing ignores its trigger value
        if self.trigger_type != TriggerType::NewListing && !(self.trigger_value > 0.0) {
            return Err(RuleValidationError::NonPositiveTriggerValue(
                self.trigger_value,
            ));
        }
        if !(self.buy_amount_quote > 0.0) {
            return Err(RuleValidationError::NonPositiveBuyAmount(
                self.buy_amount_quote,
            ));
        }
        if self.cooldown_minutes < 0 {
            return Err(RuleValidationError::NegativeCooldown(self.cooldown_minutes));
        }
        for (field, bound) in [
            ("max_buy_price", self.max_buy_price),
            ("min_base_asset_volume", self.min_base_asset_volume),
            ("min_quote_asset_volume", self.min_quote_asset_volume),
        ] {
            if let Some(value) = bound {
                if value < 0.0 {
                    return Err(RuleValidationError::NegativeBound { field, value });
                }
            }
        }
        Ok(())
    }

    pub fn cooldown_ends_at(&self) -> Option<DateTime<Utc>> {
        self.last_triggered
            .map(|t| t + Duration::minutes(self.cooldown_minutes))
    }

    pub fn is_in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_ends_at().is_some_and(|end| now < end)
    }

    /// Quote asset this rule buys with, if it can be determined.
    pub fn effective_quote_asset(&self) -> Option<String> {
        if !self.quote_asset.is_empty() {
            return Some(self.quote_asset.clone());
        }
        split_symbol(&self.symbol).map(|(_, quote)| quote)
    }

    /// Whether a symbol quoted in `quote_asset` passes this rule's filter.
    /// A rule with no resolvable quote asset accepts any.
    pub fn matches_quote_asset(&self, quote_asset: &str) -> bool {
        match self.effective_quote_asset() {
            Some(quote) => quote.eq_ignore_ascii_case(quote_asset),
            None => true,
        }
    }

    /// Carry over ownership and execution stats from the stored row.
    pub fn with_stats_from(mut self, stored: &AutoBuyRule) -> Self {
        self.user_id = stored.user_id.clone();
        self.execution_count = stored.execution_count;
        self.last_triggered = stored.last_triggered;
        self.last_price = stored.last_price;
        self.created_at = stored.created_at;
        self
    }

    /// Apply the stats of a confirmed order. Caller commits the result.
    pub fn record_execution(&mut self, price: f64, now: DateTime<Utc>) {
        self.execution_count += 1;
        self.last_triggered = Some(now);
        self.last_price = price;
        self.updated_at = now;
    }
}

/// Immutable audit record of one successful rule firing.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoBuyExecution {
    pub id: String,
    pub rule_id: String,
    pub user_id: String,
    pub symbol: String,
    pub order_id: String,
    pub price: f64,
    pub quantity: f64,
    /// Total amount in quote currency
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

impl AutoBuyExecution {
    pub fn new(
        rule: &AutoBuyRule,
        symbol: impl Into<String>,
        order_id: impl Into<String>,
        price: f64,
        quantity: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            user_id: rule.user_id.clone(),
            symbol: symbol.into(),
            order_id: order_id.into(),
            price,
            quantity,
            amount: price * quantity,
            timestamp,
        }
    }
}
