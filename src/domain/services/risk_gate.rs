//! Pre-trade risk gate
//!
//! Evaluates a proposed trade against the user's risk profile, ad-hoc
//! constraints and current open exposure. Findings are persisted as Active
//! assessments; resolving or ignoring them later never changes the decision
//! that was already returned.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::domain::entities::position::Position;
use crate::domain::entities::risk::{
    ConstraintAction, ConstraintParameter, RiskAssessment, RiskConstraint, RiskLevel,
    RiskProfile, RiskType,
};
use crate::domain::errors::{RepositoryError, RiskError};
use crate::domain::repositories::exchange_client::{ExchangeClient, MarketData};
use crate::domain::repositories::stores::{
    PositionRepository, RiskAssessmentRepository, RiskProfileRepository,
};

/// Outcome of one risk check.
#[derive(Debug, Clone)]
pub struct RiskDecision {
    pub passed: bool,
    /// Everything the check flagged, blocking or not
    pub assessments: Vec<RiskAssessment>,
}

struct Finding {
    risk_type: RiskType,
    level: RiskLevel,
    message: String,
    blocking: bool,
}

impl Finding {
    fn block(risk_type: RiskType, level: RiskLevel, message: String) -> Self {
        Self {
            risk_type,
            level,
            message,
            blocking: true,
        }
    }
}

/// Aggregate view of a user's positions at check time.
struct Exposure {
    total: f64,
    in_symbol: f64,
    unrealized_pnl: f64,
    cost_basis: f64,
    daily_loss: f64,
    weekly_loss: f64,
}

impl Exposure {
    fn from_positions(positions: &[Position], symbol: &str, now: DateTime<Utc>) -> Self {
        let mut exposure = Exposure {
            total: 0.0,
            in_symbol: 0.0,
            unrealized_pnl: 0.0,
            cost_basis: 0.0,
            daily_loss: 0.0,
            weekly_loss: 0.0,
        };
        for position in positions {
            if position.is_open() {
                let value = position.market_value();
                exposure.total += value;
                if position.symbol == symbol {
                    exposure.in_symbol += value;
                }
                exposure.unrealized_pnl += position.pnl.value();
                exposure.cost_basis += position.cost_basis();
                continue;
            }
            let (Some(pnl), Some(closed_at)) = (position.realized_pnl(), position.closed_at) else {
                continue;
            };
            if !pnl.is_loss() {
                continue;
            }
            if closed_at >= now - Duration::days(7) {
                exposure.weekly_loss += pnl.abs();
            }
            if closed_at >= now - Duration::days(1) {
                exposure.daily_loss += pnl.abs();
            }
        }
        exposure
    }
}

pub struct RiskGate {
    exchange: Arc<dyn ExchangeClient>,
    profiles: Arc<dyn RiskProfileRepository>,
    assessments: Arc<dyn RiskAssessmentRepository>,
    positions: Arc<dyn PositionRepository>,
}

impl RiskGate {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        profiles: Arc<dyn RiskProfileRepository>,
        assessments: Arc<dyn RiskAssessmentRepository>,
        positions: Arc<dyn PositionRepository>,
    ) -> Self {
        Self {
            exchange,
            profiles,
            assessments,
            positions,
        }
    }

    /// The user's profile, creating the default one on first use.
    pub async fn get_or_create_profile(&self, user_id: &str) -> Result<RiskProfile, RiskError> {
        if let Some(profile) = self.profiles.get_by_user(user_id).await? {
            return Ok(profile);
        }
        let profile = RiskProfile::default_for(user_id, Utc::now());
        self.profiles.save(&profile).await?;
        info!(user_id = %user_id, "Created default risk profile");
        Ok(profile)
    }

    pub async fn save_profile(&self, profile: &RiskProfile) -> Result<(), RiskError> {
        Ok(self.profiles.save(profile).await?)
    }

    pub async fn add_constraint(&self, constraint: &RiskConstraint) -> Result<(), RiskError> {
        Ok(self.profiles.save_constraint(constraint).await?)
    }

    /// Check a proposed trade of `notional` quote currency in `symbol`.
    pub async fn check(
        &self,
        user_id: &str,
        notional: f64,
        symbol: &str,
    ) -> Result<RiskDecision, RiskError> {
        let now = Utc::now();
        let profile = self.get_or_create_profile(user_id).await?;
        let constraints = self.profiles.list_constraints(user_id).await?;
        let positions = self.positions.list_by_user(user_id).await?;
        let exposure = Exposure::from_positions(&positions, symbol, now);
        let market = self.exchange.get_market_data(symbol).await?;

        let mut findings = check_profile(&profile, &exposure, &market, notional);
        findings.extend(
            constraints
                .iter()
                .filter(|c| c.is_active)
                .filter_map(|c| check_constraint(c, &exposure, &market, notional)),
        );

        let passed = !findings.iter().any(|f| f.blocking);
        let mut assessments = Vec::with_capacity(findings.len());
        for finding in findings {
            let assessment = RiskAssessment::new(
                user_id,
                symbol,
                finding.risk_type,
                finding.level,
                finding.message,
                now,
            );
            self.assessments.create(&assessment).await?;
            assessments.push(assessment);
        }

        if passed {
            debug!(user_id = %user_id, symbol = %symbol, notional, "Risk check passed");
        } else {
            info!(
                user_id = %user_id,
                symbol = %symbol,
                notional,
                findings = assessments.len(),
                "Risk check failed"
            );
        }
        Ok(RiskDecision {
            passed,
            assessments,
        })
    }

    pub async fn resolve_assessment(&self, assessment_id: &str) -> Result<RiskAssessment, RiskError> {
        let mut assessment = self.load_assessment(assessment_id).await?;
        assessment.resolve(Utc::now())?;
        self.assessments.update(&assessment).await?;
        Ok(assessment)
    }

    pub async fn ignore_assessment(&self, assessment_id: &str) -> Result<RiskAssessment, RiskError> {
        let mut assessment = self.load_assessment(assessment_id).await?;
        assessment.ignore(Utc::now())?;
        self.assessments.update(&assessment).await?;
        Ok(assessment)
    }

    pub async fn list_active_assessments(&self, user_id: &str) -> Result<Vec<RiskAssessment>, RiskError> {
        Ok(self.assessments.list_active_by_user(user_id).await?)
    }

    async fn load_assessment(&self, assessment_id: &str) -> Result<RiskAssessment, RiskError> {
        self.assessments
            .get(assessment_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("RiskAssessment", assessment_id).into())
    }
}

fn check_profile(
    profile: &RiskProfile,
    exposure: &Exposure,
    market: &MarketData,
    notional: f64,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    if notional > profile.max_position_size {
        findings.push(Finding::block(
            RiskType::Position,
            RiskLevel::High,
            format!(
                "position size {:.2} exceeds limit {:.2}",
                notional, profile.max_position_size
            ),
        ));
    }

    let total_after = exposure.total + notional;
    if total_after > profile.max_total_exposure {
        findings.push(Finding::block(
            RiskType::Exposure,
            RiskLevel::High,
            format!(
                "total exposure {:.2} exceeds limit {:.2}",
                total_after, profile.max_total_exposure
            ),
        ));
    }

    if exposure.total > 0.0 {
        let concentration = (exposure.in_symbol + notional) / total_after;
        if concentration > profile.max_concentration {
            findings.push(Finding::block(
                RiskType::Concentration,
                RiskLevel::Medium,
                format!(
                    "concentration {:.1}% exceeds limit {:.1}%",
                    concentration * 100.0,
                    profile.max_concentration * 100.0
                ),
            ));
        }
    }

    if market.quote_volume_24h < profile.min_liquidity {
        findings.push(Finding::block(
            RiskType::Liquidity,
            RiskLevel::Medium,
            format!(
                "24h quote volume {:.2} below liquidity floor {:.2}",
                market.quote_volume_24h, profile.min_liquidity
            ),
        ));
    }

    if exposure.daily_loss >= profile.daily_loss_limit {
        findings.push(Finding::block(
            RiskType::Drawdown,
            RiskLevel::High,
            format!(
                "daily realized loss {:.2} reached limit {:.2}",
                exposure.daily_loss, profile.daily_loss_limit
            ),
        ));
    }
    if exposure.weekly_loss >= profile.weekly_loss_limit {
        findings.push(Finding::block(
            RiskType::Drawdown,
            RiskLevel::High,
            format!(
                "weekly realized loss {:.2} reached limit {:.2}",
                exposure.weekly_loss, profile.weekly_loss_limit
            ),
        ));
    }

    if exposure.cost_basis > 0.0 && exposure.unrealized_pnl < 0.0 {
        let drawdown = -exposure.unrealized_pnl / exposure.cost_basis;
        if drawdown > profile.max_drawdown {
            findings.push(Finding::block(
                RiskType::Drawdown,
                RiskLevel::Critical,
                format!(
                    "unrealized drawdown {:.1}% exceeds limit {:.1}%",
                    drawdown * 100.0,
                    profile.max_drawdown * 100.0
                ),
            ));
        }
    }

    findings
}

fn check_constraint(
    constraint: &RiskConstraint,
    exposure: &Exposure,
    market: &MarketData,
    notional: f64,
) -> Option<Finding> {
    let (observed, risk_type) = match constraint.parameter {
        ConstraintParameter::MaxPositionSize => (notional, RiskType::Position),
        ConstraintParameter::MaxTotalExposure => (exposure.total + notional, RiskType::Exposure),
        ConstraintParameter::MinVolume => (market.quote_volume_24h, RiskType::Liquidity),
        ConstraintParameter::MaxVolatility => {
            (market.percent_change_24h().abs(), RiskType::Volatility)
        }
    };
    if constraint.operator.holds(observed, constraint.threshold) {
        return None;
    }

    let (level, blocking) = match constraint.action {
        ConstraintAction::Block => (RiskLevel::High, true),
        ConstraintAction::Warn => (RiskLevel::Low, false),
    };
    Some(Finding {
        risk_type,
        level,
        message: format!(
            "constraint '{}' violated: observed {:.2}, threshold {:.2}",
            constraint.name, observed, constraint.threshold
        ),
        blocking,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::position::{PositionSide, PositionType};
    use crate::domain::entities::risk::{AssessmentStatus, ConstraintOperator};
    use crate::domain::services::mock_exchange::MockExchange;
    use crate::infrastructure::memory_store::MemoryStore;
    use crate::domain::value_objects::price::Price;

    struct Fixture {
        exchange: Arc<MockExchange>,
        store: Arc<MemoryStore>,
        gate: RiskGate,
    }

    fn fixture() -> Fixture {
        let exchange = Arc::new(MockExchange::new());
        // Quote volume 1M * 100
        exchange.set_price("BTCUSDT", 100.0);
        exchange.set_price("ETHUSDT", 100.0);
        let store = Arc::new(MemoryStore::new());
        let gate = RiskGate::new(exchange.clone(), store.clone(), store.clone(), store.clone());
        Fixture {
            exchange,
            store,
            gate,
        }
    }

    async fn open_position(store: &MemoryStore, symbol: &str, entry: f64, quantity: f64) -> Position {
        let position = Position::open(
            "u1",
            symbol,
            PositionSide::Long,
            PositionType::Manual,
            entry,
            quantity,
            None,
            Utc::now(),
        )
        .unwrap();
        PositionRepository::create(store, &position).await.unwrap();
        position
    }

    #[tokio::test]
    async fn test_passes_within_default_profile() {
        let f = fixture();
        let decision = f.gate.check("u1", 100.0, "BTCUSDT").await.unwrap();
        assert!(decision.passed);
        assert!(decision.assessments.is_empty());
        // Default profile was persisted on first use
        assert!(f.store.get_by_user("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_position_size_limit_blocks_and_persists() {
        let f = fixture();
        let decision = f.gate.check("u1", 1500.0, "BTCUSDT").await.unwrap();
        assert!(!decision.passed);
        assert_eq!(decision.assessments[0].risk_type, RiskType::Position);
        assert_eq!(decision.assessments[0].status, AssessmentStatus::Active);
        assert_eq!(decision.assessments[0].score, 75);

        let active = f.gate.list_active_assessments("u1").await.unwrap();
        assert_eq!(active.len(), decision.assessments.len());
    }

    #[tokio::test]
    async fn test_exposure_and_concentration() {
        let f = fixture();
        open_position(&f.store, "ETHUSDT", 100.0, 45.0).await;

        let decision = f.gate.check("u1", 600.0, "BTCUSDT").await.unwrap();
        assert!(!decision.passed);
        let types: Vec<RiskType> = decision.assessments.iter().map(|a| a.risk_type).collect();
        assert!(types.contains(&RiskType::Exposure));
        assert!(!types.contains(&RiskType::Position));

        // 100 / (4500 + 100) is about 2%, well under 20%
        let decision = f.gate.check("u1", 100.0, "BTCUSDT").await.unwrap();
        assert!(decision.passed);

        // Adding to the same symbol concentrates exposure
        let decision = f.gate.check("u1", 400.0, "ETHUSDT").await.unwrap();
        let types: Vec<RiskType> = decision.assessments.iter().map(|a| a.risk_type).collect();
        assert!(types.contains(&RiskType::Concentration));
    }

    #[tokio::test]
    async fn test_liquidity_floor() {
        let f = fixture();
        f.exchange.set_market("THINUSDT", 1.0, 0.0, 500.0);
        let decision = f.gate.check("u1", 10.0, "THINUSDT").await.unwrap();
        assert!(!decision.passed);
        assert_eq!(decision.assessments[0].risk_type, RiskType::Liquidity);
    }

    #[tokio::test]
    async fn test_daily_loss_limit() {
        let f = fixture();
        let mut position = open_position(&f.store, "ETHUSDT", 100.0, 10.0).await;
        position
            .close(Price::new(85.0).unwrap(), "exit-1", Utc::now())
            .unwrap();
        PositionRepository::update(f.store.as_ref(), &position).await.unwrap();

        let decision = f.gate.check("u1", 10.0, "BTCUSDT").await.unwrap();
        assert!(!decision.passed);
        assert!(decision
            .assessments
            .iter()
            .any(|a| a.risk_type == RiskType::Drawdown && a.message.contains("daily")));
    }

    #[tokio::test]
    async fn test_unrealized_drawdown() {
        let f = fixture();
        let mut position = open_position(&f.store, "ETHUSDT", 100.0, 10.0).await;
        position.update_price(Price::new(80.0).unwrap(), Utc::now()).unwrap();
        PositionRepository::update(f.store.as_ref(), &position).await.unwrap();

        let decision = f.gate.check("u1", 10.0, "BTCUSDT").await.unwrap();
        assert!(decision
            .assessments
            .iter()
            .any(|a| a.level == RiskLevel::Critical));
        assert!(!decision.passed);
    }

    #[tokio::test]
    async fn test_warn_constraint_records_but_passes() {
        let f = fixture();
        let constraint = RiskConstraint::new(
            "u1",
            "small orders",
            ConstraintParameter::MaxPositionSize,
            ConstraintOperator::Lte,
            50.0,
            ConstraintAction::Warn,
        );
        f.gate.add_constraint(&constraint).await.unwrap();

        let decision = f.gate.check("u1", 100.0, "BTCUSDT").await.unwrap();
        assert!(decision.passed);
        assert_eq!(decision.assessments.len(), 1);
        assert_eq!(decision.assessments[0].level, RiskLevel::Low);
    }

    #[tokio::test]
    async fn test_block_constraint_fails() {
        let f = fixture();
        let constraint = RiskConstraint::new(
            "u1",
            "calm markets",
            ConstraintParameter::MaxVolatility,
            ConstraintOperator::Lt,
            5.0,
            ConstraintAction::Block,
        );
        f.gate.add_constraint(&constraint).await.unwrap();
        // Opened at 80, now 100: +25%
        f.exchange.set_market("BTCUSDT", 100.0, 20.0, 1_000_000.0);

        let decision = f.gate.check("u1", 100.0, "BTCUSDT").await.unwrap();
        assert!(!decision.passed);
        assert_eq!(decision.assessments[0].risk_type, RiskType::Volatility);
    }

    #[tokio::test]
    async fn test_resolve_and_ignore_only_active() {
        let f = fixture();
        let decision = f.gate.check("u1", 5000.0, "BTCUSDT").await.unwrap();
        let first = &decision.assessments[0];

        let resolved = f.gate.resolve_assessment(&first.id).await.unwrap();
        assert_eq!(resolved.status, AssessmentStatus::Resolved);
        assert!(matches!(
            f.gate.ignore_assessment(&first.id).await,
            Err(RiskError::AssessmentNotActive { .. })
        ));
        assert!(matches!(
            f.gate.resolve_assessment("missing").await,
            Err(RiskError::Repository(RepositoryError::NotFound { .. }))
        ));

        let active = f.gate.list_active_assessments("u1").await.unwrap();
        assert!(active.iter().all(|a| a.id != first.id));
    }
}
