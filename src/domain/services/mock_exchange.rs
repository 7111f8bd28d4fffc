//! Scripted exchange used by the service tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::entities::new_coin::SymbolConstraints;
use crate::domain::entities::order::{OrderRequest, OrderStatus, PlacedOrder};
use crate::domain::errors::ExchangeError;
use crate::domain::repositories::exchange_client::{
    ExchangeClient, ExchangeResult, ListingInfo, MarketData, SymbolInfo,
};

#[derive(Default)]
pub struct MockExchange {
    listings: Mutex<Vec<ListingInfo>>,
    symbols: Mutex<HashMap<String, SymbolInfo>>,
    market: Mutex<HashMap<String, MarketData>>,
    orders: Mutex<Vec<OrderRequest>>,
    statuses: Mutex<HashMap<String, PlacedOrder>>,
    failing_market: Mutex<HashSet<String>>,
    market_delay: Mutex<Option<Duration>>,
    order_delay: Mutex<Option<Duration>>,
    pub fail_listings: AtomicBool,
    pub fail_orders: AtomicBool,
    pub fill_immediately: AtomicBool,
    next_order_id: AtomicU64,
}

pub fn step_constraints(step: f64) -> SymbolConstraints {
    SymbolConstraints {
        step_size: step,
        min_notional: 1.0,
        ..Default::default()
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listing(&self, symbol: &str, base: &str, quote: &str, is_trading: bool) {
        let mut listings = self.listings.lock().unwrap();
        listings.retain(|l| l.symbol != symbol);
        listings.push(ListingInfo {
            symbol: symbol.to_string(),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
            is_trading,
            expected_listing_time: None,
            constraints: step_constraints(0.01),
        });
        self.set_symbol(symbol, base, quote, is_trading, step_constraints(0.01));
    }

    pub fn set_symbol(
        &self,
        symbol: &str,
        base: &str,
        quote: &str,
        is_trading: bool,
        constraints: SymbolConstraints,
    ) {
        self.symbols.lock().unwrap().insert(
            symbol.to_string(),
            SymbolInfo {
                symbol: symbol.to_string(),
                base_asset: base.to_string(),
                quote_asset: quote.to_string(),
                is_trading,
                constraints,
            },
        );
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.set_market(symbol, price, 0.0, 1_000_000.0);
    }

    pub fn set_market(&self, symbol: &str, price: f64, change: f64, base_volume: f64) {
        self.market.lock().unwrap().insert(
            symbol.to_string(),
            MarketData {
                symbol: symbol.to_string(),
                last_price: price,
                price_change_24h: change,
                base_volume_24h: base_volume,
                quote_volume_24h: base_volume * price,
                observed_at: Utc::now(),
            },
        );
    }

    pub fn fail_market_data(&self, symbol: &str) {
        self.failing_market.lock().unwrap().insert(symbol.to_string());
    }

    /// Stall every market-data call for `delay`.
    pub fn delay_market_data(&self, delay: Duration) {
        *self.market_delay.lock().unwrap() = Some(delay);
    }

    /// Stall every order placement for `delay` before it is recorded.
    pub fn delay_orders(&self, delay: Duration) {
        *self.order_delay.lock().unwrap() = Some(delay);
    }

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    /// Mark a previously placed order as filled at `price`.
    pub fn fill_order(&self, order_id: &str, price: f64) {
        self.set_order_status(order_id, OrderStatus::Filled, Some(price));
    }

    pub fn set_order_status(&self, order_id: &str, status: OrderStatus, price: Option<f64>) {
        if let Some(order) = self.statuses.lock().unwrap().get_mut(order_id) {
            order.status = status;
            order.average_price = price;
        }
    }

    fn last_price(&self, symbol: &str) -> Option<f64> {
        self.market
            .lock()
            .unwrap()
            .get(symbol)
            .map(|m| m.last_price)
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get_new_listings(&self) -> ExchangeResult<Vec<ListingInfo>> {
        if self.fail_listings.load(Ordering::SeqCst) {
            return Err(ExchangeError::NetworkError("listings unavailable".to_string()));
        }
        Ok(self.listings.lock().unwrap().clone())
    }

    async fn get_symbol_status(&self, symbol: &str) -> ExchangeResult<SymbolInfo> {
        self.symbols
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::SymbolNotFound(symbol.to_string()))
    }

    async fn get_market_data(&self, symbol: &str) -> ExchangeResult<MarketData> {
        let delay = *self.market_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_market.lock().unwrap().contains(symbol) {
            return Err(ExchangeError::Timeout);
        }
        self.market
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::SymbolNotFound(symbol.to_string()))
    }

    async fn place_order(&self, order: &OrderRequest) -> ExchangeResult<PlacedOrder> {
        let delay = *self.order_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(ExchangeError::OrderPlacementFailed("rejected".to_string()));
        }
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst) + 1;
        let filled = self.fill_immediately.load(Ordering::SeqCst);
        let placed = PlacedOrder {
            order_id: format!("order-{}", id),
            symbol: order.symbol.clone(),
            status: if filled {
                OrderStatus::Filled
            } else {
                OrderStatus::New
            },
            executed_quantity: if filled { order.quantity.value() } else { 0.0 },
            average_price: if filled {
                self.last_price(&order.symbol)
            } else {
                None
            },
        };
        self.orders.lock().unwrap().push(order.clone());
        self.statuses
            .lock()
            .unwrap()
            .insert(placed.order_id.clone(), placed.clone());
        Ok(placed)
    }

    async fn get_order_status(&self, _symbol: &str, order_id: &str) -> ExchangeResult<PlacedOrder> {
        self.statuses
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::OrderStatusFailed(order_id.to_string()))
    }
}
