//! Exchange Client Trait
//!
//! The engine only ever talks to the exchange through `ExchangeClient`, which
//! keeps detection, rule evaluation and position monitoring independent of a
//! specific venue and easy to drive from scripted test doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::entities::new_coin::SymbolConstraints;
use crate::domain::entities::order::{OrderRequest, PlacedOrder};
use crate::domain::errors::ExchangeError;

pub use crate::domain::entities::market_data::MarketData;

/// Common result type for exchange operations
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// One entry of the exchange's new-listing snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Whether the exchange already reports the symbol as trading
    pub is_trading: bool,
    pub expected_listing_time: Option<DateTime<Utc>>,
    pub constraints: SymbolConstraints,
}

/// Current trading status and filters of one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub is_trading: bool,
    pub constraints: SymbolConstraints,
}

/// Exchange client trait providing the market and order operations the engine needs
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Get the name of this exchange
    fn name(&self) -> &str;

    /// Snapshot of upcoming and freshly listed symbols
    async fn get_new_listings(&self) -> ExchangeResult<Vec<ListingInfo>>;

    async fn get_symbol_status(&self, symbol: &str) -> ExchangeResult<SymbolInfo>;

    /// 24h ticker for `symbol`
    async fn get_market_data(&self, symbol: &str) -> ExchangeResult<MarketData>;

    /// Submit an order
    ///
    /// # Returns
    /// The exchange acknowledgement, including the exchange-assigned order ID
    async fn place_order(&self, order: &OrderRequest) -> ExchangeResult<PlacedOrder>;

    async fn get_order_status(&self, symbol: &str, order_id: &str) -> ExchangeResult<PlacedOrder>;
}
