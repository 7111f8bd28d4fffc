//! Risk tolerance configuration and audit records

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::RiskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn score(&self) -> u8 {
        match self {
            RiskLevel::Low => 25,
            RiskLevel::Medium => 50,
            RiskLevel::High => 75,
            RiskLevel::Critical => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskType {
    Position,
    Volatility,
    Liquidity,
    Exposure,
    Concentration,
    Drawdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentStatus {
    Active,
    Resolved,
    Ignored,
}

impl std::fmt::Display for AssessmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssessmentStatus::Active => write!(f, "active"),
            AssessmentStatus::Resolved => write!(f, "resolved"),
            AssessmentStatus::Ignored => write!(f, "ignored"),
        }
    }
}

/// Per-user risk tolerance. All amounts are in quote currency; drawdown and
/// concentration are fractions.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskProfile {
    pub id: String,
    pub user_id: String,
    pub max_position_size: f64,
    pub max_total_exposure: f64,
    pub max_drawdown: f64,
    pub max_concentration: f64,
    pub min_liquidity: f64,
    pub daily_loss_limit: f64,
    pub weekly_loss_limit: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RiskProfile {
    /// Conservative profile used when a user never configured one.
    pub fn default_for(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            max_position_size: 1000.0,
            max_total_exposure: 5000.0,
            max_drawdown: 0.10,
            max_concentration: 0.20,
            min_liquidity: 10000.0,
            daily_loss_limit: 100.0,
            weekly_loss_limit: 500.0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintParameter {
    MaxPositionSize,
    MaxTotalExposure,
    MinVolume,
    MaxVolatility,
}

/// Comparison that must hold between the observed value and the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOperator {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl ConstraintOperator {
    pub fn holds(&self, observed: f64, threshold: f64) -> bool {
        match self {
            ConstraintOperator::Lt => observed < threshold,
            ConstraintOperator::Lte => observed <= threshold,
            ConstraintOperator::Gt => observed > threshold,
            ConstraintOperator::Gte => observed >= threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintAction {
    Block,
    Warn,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskConstraint {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub parameter: ConstraintParameter,
    pub operator: ConstraintOperator,
    pub threshold: f64,
    pub action: ConstraintAction,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl RiskConstraint {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        parameter: ConstraintParameter,
        operator: ConstraintOperator,
        threshold: f64,
        action: ConstraintAction,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            name: name.into(),
            parameter,
            operator,
            threshold,
            action,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Audit record written when a risk check finds a problem.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub risk_type: RiskType,
    pub level: RiskLevel,
    pub status: AssessmentStatus,
    pub score: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl RiskAssessment {
    pub fn new(
        user_id: impl Into<String>,
        symbol: impl Into<String>,
        risk_type: RiskType,
        level: RiskLevel,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            symbol: symbol.into(),
            risk_type,
            level,
            status: AssessmentStatus::Active,
            score: level.score(),
            message: message.into(),
            created_at: now,
            resolved_at: None,
        }
    }

    pub fn resolve(&mut self, now: DateTime<Utc>) -> Result<(), RiskError> {
        self.finish(AssessmentStatus::Resolved, now)
    }

    pub fn ignore(&mut self, now: DateTime<Utc>) -> Result<(), RiskError> {
        self.finish(AssessmentStatus::Ignored, now)
    }

    fn finish(&mut self, status: AssessmentStatus, now: DateTime<Utc>) -> Result<(), RiskError> {
        if self.status != AssessmentStatus::Active {
            return Err(RiskError::AssessmentNotActive {
                id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        self.status = status;
        self.resolved_at = Some(now);
        Ok(())
    }
}
