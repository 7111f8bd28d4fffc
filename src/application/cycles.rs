//! The three scheduled units of work, adapted to the periodic worker.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::services::auto_buy::AutoBuyEngine;
use crate::domain::services::coin_tracker::CoinLifecycleTracker;
use crate::domain::services::position_monitor::PositionMonitor;
use crate::task_runner::CycleTask;

pub struct DetectionCycle {
    tracker: Arc<CoinLifecycleTracker>,
}

impl DetectionCycle {
    pub fn new(tracker: Arc<CoinLifecycleTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl CycleTask for DetectionCycle {
    fn name(&self) -> &str {
        "coin_detection"
    }

    async fn run_cycle(&self) -> Result<(), String> {
        let report = self
            .tracker
            .detect_new_coins()
            .await
            .map_err(|e| e.to_string())?;
        if !report.failed_symbols.is_empty() {
            debug!(failed = ?report.failed_symbols, "Symbols left for the next detection cycle");
        }
        Ok(())
    }
}

pub struct RuleSweepCycle {
    engine: Arc<AutoBuyEngine>,
}

impl RuleSweepCycle {
    pub fn new(engine: Arc<AutoBuyEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl CycleTask for RuleSweepCycle {
    fn name(&self) -> &str {
        "rule_sweep"
    }

    async fn run_cycle(&self) -> Result<(), String> {
        let summary = self
            .engine
            .evaluate_rules()
            .await
            .map_err(|e| e.to_string())?;
        if summary.executed > 0 {
            info!(
                evaluated = summary.evaluated,
                executed = summary.executed,
                failed = summary.failed,
                "Rule sweep fired rules"
            );
        }
        Ok(())
    }
}

pub struct PositionSweepCycle {
    monitor: Arc<PositionMonitor>,
}

impl PositionSweepCycle {
    pub fn new(monitor: Arc<PositionMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl CycleTask for PositionSweepCycle {
    fn name(&self) -> &str {
        "position_sweep"
    }

    async fn run_cycle(&self) -> Result<(), String> {
        let report = self.monitor.sweep().await.map_err(|e| e.to_string())?;
        if report.exits_submitted > 0 || report.closed > 0 {
            info!(
                checked = report.checked,
                exits_submitted = report.exits_submitted,
                closed = report.closed,
                failed = report.failed,
                "Position sweep complete"
            );
        }
        Ok(())
    }
}
