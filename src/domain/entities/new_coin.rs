//! Tradable symbol lifecycle
//!
//! A symbol moves strictly forward through `Expected -> Trading -> Processed`.
//! `became_tradable_at` is stamped exactly once, on the Expected -> Trading
//! transition, so it is set if and only if the status is Trading or later.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Wildcard symbol used by rules that match any new listing.
pub const WILDCARD_SYMBOL: &str = "*";

/// Quote assets recognised when splitting a symbol with no separator.
const KNOWN_QUOTE_ASSETS: [&str; 4] = ["USDT", "USDC", "BTC", "ETH"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoinStatus {
    Expected,
    Trading,
    Processed,
}

impl CoinStatus {
    fn rank(&self) -> u8 {
        match self {
            CoinStatus::Expected => 0,
            CoinStatus::Trading => 1,
            CoinStatus::Processed => 2,
        }
    }

    /// Only single forward steps are legal.
    pub fn can_transition_to(&self, next: CoinStatus) -> bool {
        next.rank() == self.rank() + 1
    }

    pub fn is_tradable(&self) -> bool {
        self.rank() >= CoinStatus::Trading.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoinStatus::Expected => "expected",
            CoinStatus::Trading => "trading",
            CoinStatus::Processed => "processed",
        }
    }
}

impl std::fmt::Display for CoinStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("Invalid status transition for {symbol}: {from} -> {to}")]
pub struct InvalidTransition {
    pub symbol: String,
    pub from: CoinStatus,
    pub to: CoinStatus,
}

/// Price and quantity trading constraints reported by the exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolConstraints {
    pub min_price: f64,
    pub max_price: f64,
    pub min_quantity: f64,
    pub max_quantity: f64,
    /// Quantity increment; zero means "derive from `quantity_scale`".
    pub step_size: f64,
    pub min_notional: f64,
    pub price_scale: u32,
    pub quantity_scale: u32,
}

impl SymbolConstraints {
    pub fn quantity_step(&self) -> f64 {
        if self.step_size > 0.0 {
            self.step_size
        } else if self.quantity_scale > 0 {
            10f64.powi(-(self.quantity_scale as i32))
        } else {
            0.0
        }
    }
}

/// A symbol observed on the exchange and the state of its listing.
#[derive(Debug, Clone, PartialEq)]
pub struct TradableSymbol {
    pub id: String,
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub status: CoinStatus,
    pub expected_listing_time: Option<DateTime<Utc>>,
    pub became_tradable_at: Option<DateTime<Utc>>,
    pub constraints: SymbolConstraints,
    pub is_processed_for_autobuy: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradableSymbol {
    /// A freshly detected symbol, always starting in `Expected`.
    pub fn new_expected(
        symbol: impl Into<String>,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
        expected_listing_time: Option<DateTime<Utc>>,
        constraints: SymbolConstraints,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
            status: CoinStatus::Expected,
            expected_listing_time,
            became_tradable_at: None,
            constraints,
            is_processed_for_autobuy: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_as_tradable(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(CoinStatus::Trading, now)?;
        self.became_tradable_at = Some(now);
        Ok(())
    }

    pub fn mark_as_processed(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(CoinStatus::Processed, now)
    }

    /// Whether the expected listing time has been reached.
    pub fn listing_time_reached(&self, now: DateTime<Utc>) -> bool {
        self.expected_listing_time.is_some_and(|t| t <= now)
    }

    fn transition(&mut self, next: CoinStatus, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                symbol: self.symbol.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

/// Split an exchange symbol into `(base, quote)`.
///
/// Handles `BTC-USDT`, `BTC/USDT` and separator-less symbols ending in a
/// well-known quote asset.
pub fn split_symbol(symbol: &str) -> Option<(String, String)> {
    for separator in ['-', '/', '_'] {
        if let Some((base, quote)) = symbol.split_once(separator) {
            if !base.is_empty() && !quote.is_empty() {
                return Some((base.to_string(), quote.to_string()));
            }
        }
    }

    let upper = symbol.to_ascii_uppercase();
    KNOWN_QUOTE_ASSETS.iter().find_map(|quote| {
        upper
            .strip_suffix(quote)
            .filter(|base| !base.is_empty())
            .map(|base| (base.to_string(), quote.to_string()))
    })
}
