//! In-memory persistence
//!
//! An arena of keyed tables, one per entity, implementing every repository
//! port. Production deployments swap in a durable store behind the same
//! traits.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::entities::auto_buy::{AutoBuyExecution, AutoBuyRule};
use crate::domain::entities::lifecycle_event::LifecycleEvent;
use crate::domain::entities::new_coin::{CoinStatus, TradableSymbol};
use crate::domain::entities::position::{Position, PositionStatus};
use crate::domain::entities::risk::{AssessmentStatus, RiskAssessment, RiskConstraint, RiskProfile};
use crate::domain::errors::RepositoryError;
use crate::domain::repositories::stores::{
    AutoBuyExecutionRepository, AutoBuyRuleRepository, AutoBuyUnitOfWork,
    LifecycleEventRepository, PositionRepository, Repositories, RepositoryResult,
    RiskAssessmentRepository, RiskProfileRepository, TradableSymbolRepository,
};

/// Keyed rows of one entity type.
pub struct Table<T> {
    entity: &'static str,
    rows: RwLock<HashMap<String, T>>,
}

impl<T: Clone> Table<T> {
    pub fn new(entity: &'static str) -> Self {
        Self {
            entity,
            rows: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        self.rows.read().await.get(key).cloned()
    }

    pub async fn insert(&self, key: &str, row: T) -> RepositoryResult<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(key) {
            return Err(RepositoryError::Conflict {
                entity: self.entity,
                id: key.to_string(),
            });
        }
        rows.insert(key.to_string(), row);
        Ok(())
    }

    pub async fn update(&self, key: &str, row: T) -> RepositoryResult<()> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(key) {
            Some(existing) => {
                *existing = row;
                Ok(())
            }
            None => Err(RepositoryError::not_found(self.entity, key)),
        }
    }

    pub async fn upsert(&self, key: &str, row: T) {
        self.rows.write().await.insert(key.to_string(), row);
    }

    pub async fn remove(&self, key: &str) -> RepositoryResult<T> {
        self.rows
            .write()
            .await
            .remove(key)
            .ok_or_else(|| RepositoryError::not_found(self.entity, key))
    }

    pub async fn filter<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.rows
            .read()
            .await
            .values()
            .filter(|row| predicate(row))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

/// All tables of the engine.
pub struct MemoryStore {
    /// Keyed by exchange symbol, which is globally unique
    symbols: Table<TradableSymbol>,
    lifecycle_events: Table<LifecycleEvent>,
    rules: Table<AutoBuyRule>,
    executions: Table<AutoBuyExecution>,
    positions: Table<Position>,
    /// Keyed by user id
    risk_profiles: Table<RiskProfile>,
    risk_constraints: Table<RiskConstraint>,
    risk_assessments: Table<RiskAssessment>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            symbols: Table::new("TradableSymbol"),
            lifecycle_events: Table::new("LifecycleEvent"),
            rules: Table::new("AutoBuyRule"),
            executions: Table::new("AutoBuyExecution"),
            positions: Table::new("Position"),
            risk_profiles: Table::new("RiskProfile"),
            risk_constraints: Table::new("RiskConstraint"),
            risk_assessments: Table::new("RiskAssessment"),
        }
    }

    /// Bundle this store behind every repository port.
    pub fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories {
            symbols: self.clone(),
            lifecycle_events: self.clone(),
            rules: self.clone(),
            executions: self.clone(),
            unit_of_work: self.clone(),
            positions: self.clone(),
            risk_profiles: self.clone(),
            risk_assessments: self.clone(),
        }
    }

    pub async fn lifecycle_event_count(&self) -> usize {
        self.lifecycle_events.len().await
    }

    pub async fn execution_count(&self) -> usize {
        self.executions.len().await
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TradableSymbolRepository for MemoryStore {
    async fn create(&self, coin: &TradableSymbol) -> RepositoryResult<()> {
        self.symbols.insert(&coin.symbol, coin.clone()).await
    }

    async fn update(&self, coin: &TradableSymbol) -> RepositoryResult<()> {
        self.symbols.update(&coin.symbol, coin.clone()).await
    }

    async fn get_by_symbol(&self, symbol: &str) -> RepositoryResult<Option<TradableSymbol>> {
        Ok(self.symbols.get(symbol).await)
    }

    async fn list_by_status(&self, status: CoinStatus) -> RepositoryResult<Vec<TradableSymbol>> {
        let mut coins = self.symbols.filter(|c| c.status == status).await;
        coins.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.symbol.cmp(&b.symbol)));
        Ok(coins)
    }
}

#[async_trait]
impl LifecycleEventRepository for MemoryStore {
    async fn append(&self, event: &LifecycleEvent) -> RepositoryResult<()> {
        self.lifecycle_events.insert(&event.id, event.clone()).await
    }

    async fn list_by_coin(&self, coin_id: &str) -> RepositoryResult<Vec<LifecycleEvent>> {
        let mut events = self.lifecycle_events.filter(|e| e.coin_id == coin_id).await;
        // Transitions of one coin are monotonic, so status breaks timestamp ties
        events.sort_by_key(|e| (e.created_at, e.new_status as u8));
        Ok(events)
    }
}

fn sort_rules(mut rules: Vec<AutoBuyRule>) -> Vec<AutoBuyRule> {
    rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    rules
}

#[async_trait]
impl AutoBuyRuleRepository for MemoryStore {
    async fn create(&self, rule: &AutoBuyRule) -> RepositoryResult<()> {
        self.rules.insert(&rule.id, rule.clone()).await
    }

    async fn update(&self, rule: &AutoBuyRule) -> RepositoryResult<()> {
        self.rules.update(&rule.id, rule.clone()).await
    }

    async fn update_definition(&self, rule: &AutoBuyRule) -> RepositoryResult<AutoBuyRule> {
        let mut rows = self.rules.rows.write().await;
        let stored = rows
            .get_mut(&rule.id)
            .ok_or_else(|| RepositoryError::not_found(self.rules.entity, &rule.id))?;
        *stored = rule.clone().with_stats_from(stored);
        Ok(stored.clone())
    }

    async fn delete(&self, rule_id: &str) -> RepositoryResult<()> {
        self.rules.remove(rule_id).await.map(|_| ())
    }

    async fn get(&self, rule_id: &str) -> RepositoryResult<Option<AutoBuyRule>> {
        Ok(self.rules.get(rule_id).await)
    }

    async fn list_active(&self) -> RepositoryResult<Vec<AutoBuyRule>> {
        Ok(sort_rules(self.rules.filter(|r| r.is_enabled).await))
    }

    async fn list_by_symbol(&self, symbol: &str) -> RepositoryResult<Vec<AutoBuyRule>> {
        Ok(sort_rules(self.rules.filter(|r| r.symbol == symbol).await))
    }

    async fn list_by_user(&self, user_id: &str) -> RepositoryResult<Vec<AutoBuyRule>> {
        Ok(sort_rules(self.rules.filter(|r| r.user_id == user_id).await))
    }
}

#[async_trait]
impl AutoBuyExecutionRepository for MemoryStore {
    async fn create(&self, execution: &AutoBuyExecution) -> RepositoryResult<()> {
        self.executions.insert(&execution.id, execution.clone()).await
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> RepositoryResult<Vec<AutoBuyExecution>> {
        let mut executions = self.executions.filter(|e| e.user_id == user_id).await;
        executions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(executions.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_by_rule(&self, rule_id: &str) -> RepositoryResult<Vec<AutoBuyExecution>> {
        let mut executions = self.executions.filter(|e| e.rule_id == rule_id).await;
        executions.sort_by_key(|e| e.timestamp);
        Ok(executions)
    }
}

#[async_trait]
impl AutoBuyUnitOfWork for MemoryStore {
    async fn commit_execution(
        &self,
        rule_id: &str,
        trigger_price: f64,
        execution: &AutoBuyExecution,
    ) -> RepositoryResult<AutoBuyRule> {
        // Lock order: rules, then executions
        let mut rules = self.rules.rows.write().await;
        let mut executions = self.executions.rows.write().await;

        let Some(rule) = rules.get_mut(rule_id) else {
            return Err(RepositoryError::not_found(self.rules.entity, rule_id));
        };
        if executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict {
                entity: self.executions.entity,
                id: execution.id.clone(),
            });
        }

        rule.record_execution(trigger_price, execution.timestamp);
        executions.insert(execution.id.clone(), execution.clone());
        debug!(rule_id = %rule_id, execution_id = %execution.id, "Committed auto-buy execution");
        Ok(rule.clone())
    }
}

fn sort_positions(mut positions: Vec<Position>) -> Vec<Position> {
    positions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then(a.id.cmp(&b.id)));
    positions
}

#[async_trait]
impl PositionRepository for MemoryStore {
    async fn create(&self, position: &Position) -> RepositoryResult<()> {
        self.positions.insert(&position.id, position.clone()).await
    }

    async fn update(&self, position: &Position) -> RepositoryResult<()> {
        self.positions.update(&position.id, position.clone()).await
    }

    async fn apply_monitor_pass(&self, pass: &Position) -> RepositoryResult<Position> {
        let mut rows = self.positions.rows.write().await;
        let stored = rows
            .get_mut(&pass.id)
            .ok_or_else(|| RepositoryError::not_found(self.positions.entity, &pass.id))?;
        stored.absorb_monitor_pass(pass);
        Ok(stored.clone())
    }

    async fn get(&self, position_id: &str) -> RepositoryResult<Option<Position>> {
        Ok(self.positions.get(position_id).await)
    }

    async fn list_open(&self) -> RepositoryResult<Vec<Position>> {
        Ok(sort_positions(
            self.positions
                .filter(|p| p.status == PositionStatus::Open)
                .await,
        ))
    }

    async fn list_by_user(&self, user_id: &str) -> RepositoryResult<Vec<Position>> {
        Ok(sort_positions(
            self.positions.filter(|p| p.user_id == user_id).await,
        ))
    }

    async fn list_by_symbol(&self, symbol: &str) -> RepositoryResult<Vec<Position>> {
        Ok(sort_positions(
            self.positions.filter(|p| p.symbol == symbol).await,
        ))
    }
}

#[async_trait]
impl RiskProfileRepository for MemoryStore {
    async fn get_by_user(&self, user_id: &str) -> RepositoryResult<Option<RiskProfile>> {
        Ok(self.risk_profiles.get(user_id).await)
    }

    async fn save(&self, profile: &RiskProfile) -> RepositoryResult<()> {
        self.risk_profiles
            .upsert(&profile.user_id, profile.clone())
            .await;
        Ok(())
    }

    async fn list_constraints(&self, user_id: &str) -> RepositoryResult<Vec<RiskConstraint>> {
        let mut constraints = self
            .risk_constraints
            .filter(|c| c.user_id == user_id)
            .await;
        constraints.sort_by_key(|c| c.created_at);
        Ok(constraints)
    }

    async fn save_constraint(&self, constraint: &RiskConstraint) -> RepositoryResult<()> {
        self.risk_constraints
            .upsert(&constraint.id, constraint.clone())
            .await;
        Ok(())
    }
}

#[async_trait]
impl RiskAssessmentRepository for MemoryStore {
    async fn create(&self, assessment: &RiskAssessment) -> RepositoryResult<()> {
        self.risk_assessments
            .insert(&assessment.id, assessment.clone())
            .await
    }

    async fn update(&self, assessment: &RiskAssessment) -> RepositoryResult<()> {
        self.risk_assessments
            .update(&assessment.id, assessment.clone())
            .await
    }

    async fn get(&self, assessment_id: &str) -> RepositoryResult<Option<RiskAssessment>> {
        Ok(self.risk_assessments.get(assessment_id).await)
    }

    async fn list_active_by_user(&self, user_id: &str) -> RepositoryResult<Vec<RiskAssessment>> {
        let mut assessments = self
            .risk_assessments
            .filter(|a| a.user_id == user_id && a.status == AssessmentStatus::Active)
            .await;
        assessments.sort_by_key(|a| a.created_at);
        Ok(assessments)
    }
}
