use async_trait::async_trait;
use chrono::Utc;
use listing_trader::application::trading_engine::{EngineLoop, TradingEngine};
use listing_trader::config::EngineConfig;
use listing_trader::domain::entities::auto_buy::{AutoBuyRule, TriggerType};
use listing_trader::domain::entities::new_coin::{CoinStatus, SymbolConstraints};
use listing_trader::domain::entities::order::{OrderRequest, OrderSide, OrderStatus, PlacedOrder};
use listing_trader::domain::entities::position::{PositionSide, PositionStatus};
use listing_trader::domain::errors::ExchangeError;
use listing_trader::domain::repositories::exchange_client::{
    ExchangeClient, ExchangeResult, ListingInfo, MarketData, SymbolInfo,
};
use listing_trader::domain::services::auto_buy::{RuleOutcome, SkipReason};
use listing_trader::domain::services::position_monitor::OpenPositionRequest;
use listing_trader::infrastructure::log_notifier::LogNotifier;
use listing_trader::infrastructure::memory_store::MemoryStore;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Exchange double driven entirely by the test.
#[derive(Default)]
struct ScriptedExchange {
    listings: Mutex<Vec<ListingInfo>>,
    symbols: Mutex<HashMap<String, SymbolInfo>>,
    prices: Mutex<HashMap<String, f64>>,
    unreachable: Mutex<HashSet<String>>,
    orders: Mutex<Vec<(PlacedOrder, OrderRequest)>>,
}

impl ScriptedExchange {
    fn list(&self, symbol: &str, base: &str, quote: &str, trading: bool, step: f64) {
        let constraints = SymbolConstraints {
            step_size: step,
            min_notional: 1.0,
            ..Default::default()
        };
        let mut listings = self.listings.lock().unwrap();
        listings.retain(|l| l.symbol != symbol);
        listings.push(ListingInfo {
            symbol: symbol.to_string(),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
            is_trading: trading,
            expected_listing_time: None,
            constraints: constraints.clone(),
        });
        self.symbols.lock().unwrap().insert(
            symbol.to_string(),
            SymbolInfo {
                symbol: symbol.to_string(),
                base_asset: base.to_string(),
                quote_asset: quote.to_string(),
                is_trading: trading,
                constraints,
            },
        );
    }

    fn price(&self, symbol: &str, price: f64) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    fn make_unreachable(&self, symbol: &str) {
        self.unreachable.lock().unwrap().insert(symbol.to_string());
    }

    fn orders(&self) -> Vec<OrderRequest> {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    fn fill_all(&self, price: f64) {
        for (placed, request) in self.orders.lock().unwrap().iter_mut() {
            placed.status = OrderStatus::Filled;
            placed.executed_quantity = request.quantity.value();
            placed.average_price = Some(price);
        }
    }
}

#[async_trait]
impl ExchangeClient for ScriptedExchange {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn get_new_listings(&self) -> ExchangeResult<Vec<ListingInfo>> {
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
        if self.unreachable.lock().unwrap().contains(symbol) {
            return Err(ExchangeError::NetworkError("connection reset".to_string()));
        }
        let price = self
            .prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::SymbolNotFound(symbol.to_string()))?;
        Ok(MarketData {
            symbol: symbol.to_string(),
            last_price: price,
            price_change_24h: 0.0,
            base_volume_24h: 1_000_000.0,
            quote_volume_24h: 1_000_000.0 * price,
            observed_at: Utc::now(),
        })
    }

    async fn place_order(&self, order: &OrderRequest) -> ExchangeResult<PlacedOrder> {
        let mut orders = self.orders.lock().unwrap();
        let placed = PlacedOrder {
            order_id: format!("ord-{}", orders.len() + 1),
            symbol: order.symbol.clone(),
            status: OrderStatus::New,
            executed_quantity: 0.0,
            average_price: None,
        };
        orders.push((placed.clone(), order.clone()));
        Ok(placed)
    }

    async fn get_order_status(&self, _symbol: &str, order_id: &str) -> ExchangeResult<PlacedOrder> {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .find(|(placed, _)| placed.order_id == order_id)
            .map(|(placed, _)| placed.clone())
            .ok_or_else(|| ExchangeError::OrderStatusFailed(order_id.to_string()))
    }
}

struct Harness {
    engine: TradingEngine,
    exchange: Arc<ScriptedExchange>,
    store: Arc<MemoryStore>,
}

async fn harness_with(config: EngineConfig) -> Harness {
    let exchange = Arc::new(ScriptedExchange::default());
    let store = Arc::new(MemoryStore::new());
    let engine = TradingEngine::new(
        &config,
        exchange.clone(),
        store.repositories(),
        Arc::new(LogNotifier::new()),
    )
    .await
    .unwrap();
    Harness {
        engine,
        exchange,
        store,
    }
}

async fn harness() -> Harness {
    harness_with(EngineConfig::default()).await
}

#[tokio::test]
async fn test_price_below_rule_fires_once_within_cooldown() {
    let h = harness().await;
    h.exchange.list("BTCUSDT", "BTC", "USDT", true, 0.00001);
    h.exchange.price("BTCUSDT", 49_000.0);

    let rule = h
        .engine
        .create_rule(
            "alice",
            AutoBuyRule::new("alice", "BTCUSDT", TriggerType::PriceBelow, 50_000.0, 100.0)
                .with_cooldown_minutes(60),
        )
        .await
        .unwrap();

    let outcome = h.engine.evaluate_rule(&rule.id).await.unwrap();
    assert!(outcome.is_executed());

    let orders = h.exchange.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert!((orders[0].quantity.value() - 0.00204).abs() < 1e-9);

    let stored = h.engine.get_rule(&rule.id).await.unwrap();
    assert_eq!(stored.execution_count, 1);
    assert!(stored.last_triggered.is_some());
    assert_eq!(stored.last_price, 49_000.0);

    // Still below the trigger, but inside the cooldown window
    h.exchange.price("BTCUSDT", 48_000.0);
    let again = h.engine.evaluate_rule(&rule.id).await.unwrap();
    assert!(matches!(
        again,
        RuleOutcome::Skipped(SkipReason::CooldownActive { .. })
    ));
    let sweep = h.engine.evaluate_rules().await.unwrap();
    assert_eq!(sweep.executed, 0);

    assert_eq!(h.exchange.orders().len(), 1);
    let history = h.engine.get_execution_history("alice", 10, 0).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].order_id, "ord-1");
    assert_eq!(h.store.execution_count().await, 1);
}

#[tokio::test]
async fn test_wildcard_new_listing_fires_once_per_transition() {
    let h = harness().await;
    let usdt_rule = h
        .engine
        .create_rule(
            "bob",
            AutoBuyRule::new("bob", "*", TriggerType::NewListing, 0.0, 20.0)
                .with_quote_asset("USDT"),
        )
        .await
        .unwrap();
    h.engine
        .create_rule(
            "bob",
            AutoBuyRule::new("bob", "*", TriggerType::NewListing, 0.0, 20.0)
                .with_quote_asset("BTC"),
        )
        .await
        .unwrap();

    h.exchange.list("XYZUSDT", "XYZ", "USDT", false, 0.01);
    h.exchange.price("XYZUSDT", 0.5);

    let report = h.engine.detect_new_coins().await.unwrap();
    assert_eq!(report.detected, 1);
    assert!(h.exchange.orders().is_empty());

    h.exchange.list("XYZUSDT", "XYZ", "USDT", true, 0.01);
    let report = h.engine.detect_new_coins().await.unwrap();
    assert_eq!(report.became_tradable, 1);
    assert_eq!(h.exchange.orders().len(), 1);
    assert!((h.exchange.orders()[0].quantity.value() - 40.0).abs() < 1e-9);

    let coin = h.engine.get_symbol("XYZUSDT").await.unwrap().unwrap();
    assert_eq!(coin.status, CoinStatus::Processed);
    assert!(coin.became_tradable_at.is_some());
    assert!(coin.is_processed_for_autobuy);

    // Repeated polls after the transition never re-fire
    for _ in 0..3 {
        let report = h.engine.detect_new_coins().await.unwrap();
        assert_eq!(report.transitions(), 0);
    }
    assert_eq!(h.exchange.orders().len(), 1);

    let history = h.engine.get_execution_history("bob", 10, 0).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].rule_id, usdt_rule.id);

    let events = h.engine.list_lifecycle_events(&coin.id).await.unwrap();
    let statuses: Vec<CoinStatus> = events.iter().map(|e| e.new_status).collect();
    assert_eq!(
        statuses,
        vec![CoinStatus::Expected, CoinStatus::Trading, CoinStatus::Processed]
    );
}

#[tokio::test]
async fn test_detection_is_idempotent() {
    let h = harness().await;
    h.exchange.list("AAAUSDT", "AAA", "USDT", false, 0.01);
    h.exchange.list("BBBUSDT", "BBB", "USDT", false, 0.01);

    let first = h.engine.detect_new_coins().await.unwrap();
    assert_eq!(first.detected, 2);
    let events_after_first = h.store.lifecycle_event_count().await;

    let second = h.engine.detect_new_coins().await.unwrap();
    assert_eq!(second.transitions(), 0);
    assert_eq!(h.store.lifecycle_event_count().await, events_after_first);
}

#[tokio::test]
async fn test_disabled_rule_never_places_orders() {
    let h = harness().await;
    h.exchange.list("ETHUSDT", "ETH", "USDT", true, 0.0001);
    h.exchange.price("ETHUSDT", 1_500.0);

    let mut rule = h
        .engine
        .create_rule(
            "carol",
            AutoBuyRule::new("carol", "ETHUSDT", TriggerType::PriceBelow, 2_000.0, 50.0),
        )
        .await
        .unwrap();
    rule.is_enabled = false;
    let rule = h.engine.update_rule(rule).await.unwrap();

    for _ in 0..3 {
        let outcome = h.engine.evaluate_rule(&rule.id).await.unwrap();
        assert_eq!(outcome, RuleOutcome::Skipped(SkipReason::Disabled));
    }
    assert!(h.exchange.orders().is_empty());

    let stored = h.engine.get_rule(&rule.id).await.unwrap();
    assert_eq!(stored.execution_count, 0);
    assert!(stored.last_triggered.is_none());
}

#[tokio::test]
async fn test_stop_loss_exit_waits_for_fill() {
    let h = harness().await;
    h.exchange.price("SOLUSDT", 100.0);
    let monitor = h.engine.position_monitor();

    let position = monitor
        .open_position(OpenPositionRequest {
            user_id: "dave".to_string(),
            symbol: "SOLUSDT".to_string(),
            side: PositionSide::Long,
            entry_price: 100.0,
            quantity: 1.0,
            stop_loss: Some(90.0),
            take_profit: Some(120.0),
            entry_order_id: None,
        })
        .await
        .unwrap();
    assert_eq!(position.risk_reward_ratio, 2.0);

    h.exchange.price("SOLUSDT", 89.0);
    let report = monitor.sweep().await.unwrap();
    assert_eq!(report.exits_submitted, 1);

    // Pending exit is never duplicated
    monitor.sweep().await.unwrap();
    let orders = h.exchange.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, OrderSide::Sell);

    let pending = monitor.get_position(&position.id).await.unwrap();
    assert_eq!(pending.status, PositionStatus::Open);
    assert!(pending.pending_exit.is_some());

    h.exchange.fill_all(89.0);
    let report = monitor.sweep().await.unwrap();
    assert_eq!(report.closed, 1);

    let closed = monitor.get_position(&position.id).await.unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert!(closed.closed_at.is_some());
    assert_eq!(closed.exit_order_ids, vec!["ord-1".to_string()]);
    assert_eq!(closed.realized_pnl().map(|p| p.value()), Some(-11.0));

    // Closed positions are left alone
    h.exchange.price("SOLUSDT", 150.0);
    let report = monitor.sweep().await.unwrap();
    assert_eq!(report.checked, 0);
    let frozen = monitor.get_position(&position.id).await.unwrap();
    assert_eq!(frozen.pnl, closed.pnl);
}

#[tokio::test]
async fn test_pnl_and_watermarks_across_updates() {
    let h = harness().await;
    let monitor = h.engine.position_monitor();
    h.exchange.price("ADAUSDT", 100.0);
    h.exchange.price("DOTUSDT", 100.0);

    let long = monitor
        .open_position(OpenPositionRequest {
            user_id: "erin".to_string(),
            symbol: "ADAUSDT".to_string(),
            side: PositionSide::Long,
            entry_price: 100.0,
            quantity: 2.0,
            stop_loss: None,
            take_profit: None,
            entry_order_id: None,
        })
        .await
        .unwrap();
    let short = monitor
        .open_position(OpenPositionRequest {
            user_id: "erin".to_string(),
            symbol: "DOTUSDT".to_string(),
            side: PositionSide::Short,
            entry_price: 100.0,
            quantity: 2.0,
            stop_loss: None,
            take_profit: None,
            entry_order_id: None,
        })
        .await
        .unwrap();
    assert_eq!(long.risk_reward_ratio, 0.0);

    let mut last_max_profit = f64::MIN;
    let mut last_max_drawdown = f64::MAX;
    for price in [110.0, 95.0, 105.0, 90.0] {
        h.exchange.price("ADAUSDT", price);
        h.exchange.price("DOTUSDT", price);
        monitor.sweep().await.unwrap();

        let l = monitor.get_position(&long.id).await.unwrap();
        let s = monitor.get_position(&short.id).await.unwrap();
        assert!((l.pnl.value() - (price - 100.0) * 2.0).abs() < 1e-9);
        assert!((s.pnl.value() - (100.0 - price) * 2.0).abs() < 1e-9);

        assert!(l.max_profit.value() >= last_max_profit);
        assert!(l.max_drawdown.value() <= last_max_drawdown);
        last_max_profit = l.max_profit.value();
        last_max_drawdown = l.max_drawdown.value();
        assert_eq!(l.risk_reward_ratio, 0.0);
    }
    let l = monitor.get_position(&long.id).await.unwrap();
    assert_eq!(l.max_profit.value(), 20.0);
    assert_eq!(l.max_drawdown.value(), -20.0);
}

#[tokio::test]
async fn test_one_failing_position_does_not_block_others() {
    let h = harness().await;
    let monitor = h.engine.position_monitor();
    h.exchange.price("GOODUSDT", 10.0);
    h.exchange.price("BADUSDT", 10.0);

    for symbol in ["GOODUSDT", "BADUSDT"] {
        monitor
            .open_position(OpenPositionRequest {
                user_id: "frank".to_string(),
                symbol: symbol.to_string(),
                side: PositionSide::Long,
                entry_price: 10.0,
                quantity: 1.0,
                stop_loss: Some(9.0),
                take_profit: None,
                entry_order_id: None,
            })
            .await
            .unwrap();
    }

    h.exchange.make_unreachable("BADUSDT");
    h.exchange.price("GOODUSDT", 8.5);
    let report = monitor.sweep().await.unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.exits_submitted, 1);
    assert_eq!(h.exchange.orders()[0].symbol, "GOODUSDT");
}

#[tokio::test]
async fn test_engine_loops_run_and_stop() {
    let config = EngineConfig {
        detection_interval_seconds: 3600,
        rule_sweep_interval_seconds: 3600,
        position_sweep_interval_seconds: 3600,
        ..EngineConfig::default()
    };
    let h = harness_with(config).await;
    h.exchange.list("LOOPUSDT", "LOOP", "USDT", false, 0.01);

    h.engine.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.engine.get_symbol("LOOPUSDT").await.unwrap().is_some());

    h.exchange.list("LOOPUSDT", "LOOP", "USDT", true, 0.01);
    assert!(h.engine.run_loop_now(EngineLoop::Detection).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let coin = h.engine.get_symbol("LOOPUSDT").await.unwrap().unwrap();
    assert!(coin.status.is_tradable());

    h.engine.stop().await;
    for engine_loop in EngineLoop::ALL {
        assert!(!h.engine.is_loop_running(engine_loop).await);
    }
}
