//! Persistence ports
//!
//! Every mutation is read-current, compute, write-back on a single entity.
//! The only multi-entity write is `AutoBuyUnitOfWork::commit_execution`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::entities::auto_buy::{AutoBuyExecution, AutoBuyRule};
use crate::domain::entities::lifecycle_event::LifecycleEvent;
use crate::domain::entities::new_coin::{CoinStatus, TradableSymbol};
use crate::domain::entities::position::Position;
use crate::domain::entities::risk::{RiskAssessment, RiskConstraint, RiskProfile};
use crate::domain::errors::RepositoryError;

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait TradableSymbolRepository: Send + Sync {
    /// Insert a new symbol. `Conflict` if the exchange symbol is already stored.
    async fn create(&self, coin: &TradableSymbol) -> RepositoryResult<()>;
    async fn update(&self, coin: &TradableSymbol) -> RepositoryResult<()>;
    async fn get_by_symbol(&self, symbol: &str) -> RepositoryResult<Option<TradableSymbol>>;
    async fn list_by_status(&self, status: CoinStatus) -> RepositoryResult<Vec<TradableSymbol>>;
}

#[async_trait]
pub trait LifecycleEventRepository: Send + Sync {
    async fn append(&self, event: &LifecycleEvent) -> RepositoryResult<()>;
    /// Events of one coin, oldest first
    async fn list_by_coin(&self, coin_id: &str) -> RepositoryResult<Vec<LifecycleEvent>>;
}

#[async_trait]
pub trait AutoBuyRuleRepository: Send + Sync {
    async fn create(&self, rule: &AutoBuyRule) -> RepositoryResult<()>;
    async fn update(&self, rule: &AutoBuyRule) -> RepositoryResult<()>;
    /// Replace a rule's definition, keeping the stored owner and execution
    /// stats. Returns the row as written.
    async fn update_definition(&self, rule: &AutoBuyRule) -> RepositoryResult<AutoBuyRule>;
    async fn delete(&self, rule_id: &str) -> RepositoryResult<()>;
    async fn get(&self, rule_id: &str) -> RepositoryResult<Option<AutoBuyRule>>;
    /// Enabled rules only
    async fn list_active(&self) -> RepositoryResult<Vec<AutoBuyRule>>;
    async fn list_by_symbol(&self, symbol: &str) -> RepositoryResult<Vec<AutoBuyRule>>;
    async fn list_by_user(&self, user_id: &str) -> RepositoryResult<Vec<AutoBuyRule>>;
}

#[async_trait]
pub trait AutoBuyExecutionRepository: Send + Sync {
    async fn create(&self, execution: &AutoBuyExecution) -> RepositoryResult<()>;
    /// Newest first
    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> RepositoryResult<Vec<AutoBuyExecution>>;
    async fn list_by_rule(&self, rule_id: &str) -> RepositoryResult<Vec<AutoBuyExecution>>;
}

/// Atomic commit of a rule firing.
#[async_trait]
pub trait AutoBuyUnitOfWork: Send + Sync {
    /// Persist the execution record and apply its stats to the current rule
    /// row together. On error neither write is visible. Returns the rule as
    /// written.
    async fn commit_execution(
        &self,
        rule_id: &str,
        trigger_price: f64,
        execution: &AutoBuyExecution,
    ) -> RepositoryResult<AutoBuyRule>;
}

#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn create(&self, position: &Position) -> RepositoryResult<()>;
    async fn update(&self, position: &Position) -> RepositoryResult<()>;
    /// Merge the outcome of a monitor pass into the current row, keeping exit
    /// levels changed since the pass started. Returns the row as written.
    async fn apply_monitor_pass(&self, pass: &Position) -> RepositoryResult<Position>;
    async fn get(&self, position_id: &str) -> RepositoryResult<Option<Position>>;
    async fn list_open(&self) -> RepositoryResult<Vec<Position>>;
    async fn list_by_user(&self, user_id: &str) -> RepositoryResult<Vec<Position>>;
    async fn list_by_symbol(&self, symbol: &str) -> RepositoryResult<Vec<Position>>;
}

#[async_trait]
pub trait RiskProfileRepository: Send + Sync {
    async fn get_by_user(&self, user_id: &str) -> RepositoryResult<Option<RiskProfile>>;
    /// Insert or replace the user's profile
    async fn save(&self, profile: &RiskProfile) -> RepositoryResult<()>;
    async fn list_constraints(&self, user_id: &str) -> RepositoryResult<Vec<RiskConstraint>>;
    async fn save_constraint(&self, constraint: &RiskConstraint) -> RepositoryResult<()>;
}

#[async_trait]
pub trait RiskAssessmentRepository: Send + Sync {
    async fn create(&self, assessment: &RiskAssessment) -> RepositoryResult<()>;
    async fn update(&self, assessment: &RiskAssessment) -> RepositoryResult<()>;
    async fn get(&self, assessment_id: &str) -> RepositoryResult<Option<RiskAssessment>>;
    async fn list_active_by_user(&self, user_id: &str) -> RepositoryResult<Vec<RiskAssessment>>;
}

/// Every persistence port the engine needs, shared across components.
#[derive(Clone)]
pub struct Repositories {
    pub symbols: Arc<dyn TradableSymbolRepository>,
    pub lifecycle_events: Arc<dyn LifecycleEventRepository>,
    pub rules: Arc<dyn AutoBuyRuleRepository>,
    pub executions: Arc<dyn AutoBuyExecutionRepository>,
    pub unit_of_work: Arc<dyn AutoBuyUnitOfWork>,
    pub positions: Arc<dyn PositionRepository>,
    pub risk_profiles: Arc<dyn RiskProfileRepository>,
    pub risk_assessments: Arc<dyn RiskAssessmentRepository>,
}
