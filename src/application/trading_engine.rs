//! Trading engine facade
//!
//! Wires the tracker, dispatcher, rule engine, risk gate and position monitor
//! together and owns the three periodic loops.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::application::cycles::{DetectionCycle, PositionSweepCycle, RuleSweepCycle};
use crate::config::EngineConfig;
use crate::domain::entities::auto_buy::{AutoBuyExecution, AutoBuyRule};
use crate::domain::entities::lifecycle_event::LifecycleEvent;
use crate::domain::entities::new_coin::TradableSymbol;
use crate::domain::errors::{
    AutoBuyError, ConfigError, HandlerError, RepositoryError, TrackerError,
};
use crate::domain::repositories::exchange_client::ExchangeClient;
use crate::domain::repositories::notifier::{Notification, Notifier};
use crate::domain::repositories::stores::Repositories;
use crate::domain::services::auto_buy::{
    AutoBuyEngine, NewListingHandler, RuleOutcome, SweepSummary,
};
use crate::domain::services::coin_tracker::{CoinLifecycleTracker, DetectionReport};
use crate::domain::services::event_dispatcher::{
    EventDispatcher, LifecycleEventHandler, SubscriptionId,
};
use crate::domain::services::position_monitor::PositionMonitor;
use crate::domain::services::risk_gate::RiskGate;
use crate::task_runner::PeriodicWorker;

/// The engine's independently scheduled loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineLoop {
    Detection,
    RuleSweep,
    PositionSweep,
}

impl EngineLoop {
    pub const ALL: [EngineLoop; 3] = [
        EngineLoop::Detection,
        EngineLoop::RuleSweep,
        EngineLoop::PositionSweep,
    ];
}

/// Forwards every lifecycle transition to the notifier.
struct LifecycleNotifier {
    notifier: Arc<dyn Notifier>,
}

#[async_trait]
impl LifecycleEventHandler for LifecycleNotifier {
    fn name(&self) -> &str {
        "lifecycle_notifier"
    }

    async fn handle(&self, event: &LifecycleEvent) -> Result<(), HandlerError> {
        if let Err(e) = self
            .notifier
            .notify(&Notification::LifecycleTransition(event.clone()))
            .await
        {
            warn!(symbol = %event.symbol, error = %e, "Lifecycle notification failed");
        }
        Ok(())
    }
}

pub struct TradingEngine {
    repos: Repositories,
    dispatcher: Arc<EventDispatcher>,
    tracker: Arc<CoinLifecycleTracker>,
    auto_buy: Arc<AutoBuyEngine>,
    risk_gate: Arc<RiskGate>,
    monitor: Arc<PositionMonitor>,
    detection_worker: PeriodicWorker,
    rule_worker: PeriodicWorker,
    position_worker: PeriodicWorker,
}

impl TradingEngine {
    /// Build and wire the engine. Refuses an invalid configuration.
    pub async fn new(
        config: &EngineConfig,
        exchange: Arc<dyn ExchangeClient>,
        repos: Repositories,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let dispatcher = Arc::new(EventDispatcher::new());
        let tracker = Arc::new(CoinLifecycleTracker::new(
            exchange.clone(),
            repos.symbols.clone(),
            repos.lifecycle_events.clone(),
            dispatcher.clone(),
        ));
        let risk_gate = Arc::new(RiskGate::new(
            exchange.clone(),
            repos.risk_profiles.clone(),
            repos.risk_assessments.clone(),
            repos.positions.clone(),
        ));
        let auto_buy = Arc::new(AutoBuyEngine::new(
            exchange.clone(),
            repos.clone(),
            risk_gate.clone(),
            notifier.clone(),
            config.auto_buy_settings(),
        ));
        let monitor = Arc::new(PositionMonitor::new(
            exchange,
            repos.positions.clone(),
            notifier.clone(),
            config.exchange_call_timeout(),
        ));

        dispatcher
            .subscribe(Arc::new(NewListingHandler::new(auto_buy.clone())))
            .await;
        dispatcher
            .subscribe(Arc::new(LifecycleNotifier { notifier }))
            .await;

        let detection_worker = PeriodicWorker::new(
            Arc::new(DetectionCycle::new(tracker.clone())),
            config.detection_interval(),
        );
        let rule_worker = PeriodicWorker::new(
            Arc::new(RuleSweepCycle::new(auto_buy.clone())),
            config.rule_sweep_interval(),
        );
        let position_worker = PeriodicWorker::new(
            Arc::new(PositionSweepCycle::new(monitor.clone())),
            config.position_sweep_interval(),
        );

        Ok(Self {
            repos,
            dispatcher,
            tracker,
            auto_buy,
            risk_gate,
            monitor,
            detection_worker,
            rule_worker,
            position_worker,
        })
    }

    // ---- produced surface ----

    pub async fn detect_new_coins(&self) -> Result<DetectionReport, TrackerError> {
        self.tracker.detect_new_coins().await
    }

    pub async fn evaluate_rule(&self, rule_id: &str) -> Result<RuleOutcome, AutoBuyError> {
        self.auto_buy.evaluate_rule(rule_id).await
    }

    pub async fn evaluate_rules(&self) -> Result<SweepSummary, AutoBuyError> {
        self.auto_buy.evaluate_rules().await
    }

    pub async fn get_execution_history(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AutoBuyExecution>, AutoBuyError> {
        self.auto_buy
            .get_execution_history(user_id, limit, offset)
            .await
    }

    pub async fn subscribe_to_events(
        &self,
        handler: Arc<dyn LifecycleEventHandler>,
    ) -> SubscriptionId {
        self.dispatcher.subscribe(handler).await
    }

    pub async fn unsubscribe_from_events(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id).await
    }

    // ---- rules ----

    pub async fn create_rule(
        &self,
        user_id: &str,
        rule: AutoBuyRule,
    ) -> Result<AutoBuyRule, AutoBuyError> {
        self.auto_buy.create_rule(user_id, rule).await
    }

    pub async fn update_rule(&self, rule: AutoBuyRule) -> Result<AutoBuyRule, AutoBuyError> {
        self.auto_buy.update_rule(rule).await
    }

    pub async fn delete_rule(&self, rule_id: &str) -> Result<(), AutoBuyError> {
        self.auto_buy.delete_rule(rule_id).await
    }

    pub async fn get_rule(&self, rule_id: &str) -> Result<AutoBuyRule, AutoBuyError> {
        self.auto_buy.get_rule(rule_id).await
    }

    pub async fn list_rules_by_user(&self, user_id: &str) -> Result<Vec<AutoBuyRule>, AutoBuyError> {
        self.auto_buy.list_rules_by_user(user_id).await
    }

    pub async fn list_rules_by_symbol(&self, symbol: &str) -> Result<Vec<AutoBuyRule>, AutoBuyError> {
        self.auto_buy.list_rules_by_symbol(symbol).await
    }

    // ---- lookups ----

    pub async fn get_symbol(&self, symbol: &str) -> Result<Option<TradableSymbol>, RepositoryError> {
        self.repos.symbols.get_by_symbol(symbol).await
    }

    pub async fn list_lifecycle_events(
        &self,
        coin_id: &str,
    ) -> Result<Vec<LifecycleEvent>, RepositoryError> {
        self.repos.lifecycle_events.list_by_coin(coin_id).await
    }

    pub fn risk_gate(&self) -> &Arc<RiskGate> {
        &self.risk_gate
    }

    pub fn position_monitor(&self) -> &Arc<PositionMonitor> {
        &self.monitor
    }

    // ---- loop lifecycle ----

    fn worker(&self, engine_loop: EngineLoop) -> &PeriodicWorker {
        match engine_loop {
            EngineLoop::Detection => &self.detection_worker,
            EngineLoop::RuleSweep => &self.rule_worker,
            EngineLoop::PositionSweep => &self.position_worker,
        }
    }

    /// Start one loop. Returns false if it was already running.
    pub async fn start_loop(&self, engine_loop: EngineLoop) -> bool {
        self.worker(engine_loop).start().await
    }

    /// Stop one loop after its in-flight cycle. Returns false if it was not running.
    pub async fn stop_loop(&self, engine_loop: EngineLoop) -> bool {
        self.worker(engine_loop).stop().await
    }

    pub async fn run_loop_now(&self, engine_loop: EngineLoop) -> bool {
        self.worker(engine_loop).run_now().await
    }

    pub async fn is_loop_running(&self, engine_loop: EngineLoop) -> bool {
        self.worker(engine_loop).is_running().await
    }

    pub async fn start(&self) {
        for engine_loop in EngineLoop::ALL {
            self.start_loop(engine_loop).await;
        }
        info!("Trading engine started");
    }

    pub async fn stop(&self) {
        for engine_loop in EngineLoop::ALL {
            self.stop_loop(engine_loop).await;
        }
        info!("Trading engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::mock_exchange::MockExchange;
    use crate::infrastructure::log_notifier::LogNotifier;
    use crate::infrastructure::memory_store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl LifecycleEventHandler for CountingHandler {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, _event: &LifecycleEvent) -> Result<(), HandlerError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn engine_with(config: EngineConfig) -> Result<(TradingEngine, Arc<MockExchange>), ConfigError> {
        let exchange = Arc::new(MockExchange::new());
        let store = Arc::new(MemoryStore::new());
        let engine = TradingEngine::new(
            &config,
            exchange.clone(),
            store.repositories(),
            Arc::new(LogNotifier::new()),
        )
        .await?;
        Ok((engine, exchange))
    }

    #[tokio::test]
    async fn test_invalid_config_is_refused() {
        let config = EngineConfig {
            default_stop_loss_percentage: 0.0,
            ..EngineConfig::default()
        };
        assert!(engine_with(config).await.is_err());
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let (engine, exchange) = engine_with(EngineConfig::default()).await.unwrap();
        let handler = Arc::new(CountingHandler {
            seen: AtomicUsize::new(0),
        });
        let id = engine.subscribe_to_events(handler.clone()).await;

        exchange.add_listing("NEWUSDT", "NEW", "USDT", false);
        engine.detect_new_coins().await.unwrap();
        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);

        assert!(engine.unsubscribe_from_events(id).await);
        exchange.add_listing("NEWUSDT", "NEW", "USDT", true);
        engine.detect_new_coins().await.unwrap();
        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loops_start_and_stop_independently() {
        let (engine, _exchange) = engine_with(EngineConfig::default()).await.unwrap();

        assert!(engine.start_loop(EngineLoop::PositionSweep).await);
        assert!(engine.is_loop_running(EngineLoop::PositionSweep).await);
        assert!(!engine.is_loop_running(EngineLoop::Detection).await);

        engine.start().await;
        assert!(engine.is_loop_running(EngineLoop::Detection).await);
        assert!(engine.run_loop_now(EngineLoop::RuleSweep).await);

        assert!(engine.stop_loop(EngineLoop::Detection).await);
        assert!(engine.is_loop_running(EngineLoop::RuleSweep).await);

        engine.stop().await;
        for engine_loop in EngineLoop::ALL {
            assert!(!engine.is_loop_running(engine_loop).await);
        }
    }
}
