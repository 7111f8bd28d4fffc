use crate::domain::entities::order::OrderSide;
use crate::domain::errors::{PositionError, ValidationError};
use crate::domain::value_objects::{pnl::PnL, price::Price, quantity::Quantity};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Order side that closes a position on this side.
    pub fn exit_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    /// Terminal
    Closed,
}

/// Where a position came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionType {
    Manual,
    Automatic,
    NewCoin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::TakeProfit => write!(f, "take_profit"),
        }
    }
}

/// Exit order submitted but not yet confirmed filled.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingExit {
    pub order_id: String,
    pub reason: ExitReason,
    pub submitted_at: DateTime<Utc>,
}

/// An open or closed exposure in one symbol.
///
/// PnL fields only move while the position is Open; `close` freezes them
/// together with the entry and exit fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub status: PositionStatus,
    pub position_type: PositionType,
    pub entry_price: Price,
    pub quantity: Quantity,
    pub current_price: Price,
    pub pnl: PnL,
    pub pnl_percent: f64,
    /// Best PnL seen so far, never below zero
    pub max_profit: PnL,
    /// Worst PnL seen so far, never above zero
    pub max_drawdown: PnL,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub risk_reward_ratio: f64,
    pub entry_order_ids: Vec<String>,
    pub exit_order_ids: Vec<String>,
    pub pending_exit: Option<PendingExit>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        user_id: impl Into<String>,
        symbol: impl Into<String>,
        side: PositionSide,
        position_type: PositionType,
        entry_price: f64,
        quantity: f64,
        entry_order_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let entry_price = Price::new(entry_price)?;
        let quantity = Quantity::new(quantity)?;
        if entry_price.value() == 0.0 {
            return Err(ValidationError::InvalidPrice(
                "entry price must be positive".to_string(),
            ));
        }
        if quantity.is_zero() {
            return Err(ValidationError::InvalidQuantity(
                "position quantity must be positive".to_string(),
            ));
        }

        Ok(Position {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            symbol: symbol.into(),
            side,
            status: PositionStatus::Open,
            position_type,
            entry_price,
            quantity,
            current_price: entry_price,
            pnl: PnL::zero(),
            pnl_percent: 0.0,
            max_profit: PnL::zero(),
            max_drawdown: PnL::zero(),
            stop_loss: None,
            take_profit: None,
            risk_reward_ratio: 0.0,
            entry_order_ids: entry_order_id.into_iter().collect(),
            exit_order_ids: Vec::new(),
            pending_exit: None,
            opened_at: now,
            updated_at: now,
            closed_at: None,
        })
    }

    /// Place stop-loss and take-profit at a fraction of the entry price.
    pub fn with_stops_from_percentages(
        mut self,
        stop_loss_percentage: Option<f64>,
        take_profit_percentage: Option<f64>,
    ) -> Result<Self, ValidationError> {
        let entry = self.entry_price.value();
        if let Some(sl_pct) = stop_loss_percentage {
            let sl_price = match self.side {
                PositionSide::Long => Price::new(entry * (1.0 - sl_pct))?,
                PositionSide::Short => Price::new(entry * (1.0 + sl_pct))?,
            };
            self.stop_loss = Some(sl_price);
        }
        if let Some(tp_pct) = take_profit_percentage {
            let tp_price = match self.side {
                PositionSide::Long => Price::new(entry * (1.0 + tp_pct))?,
                PositionSide::Short => Price::new(entry * (1.0 - tp_pct))?,
            };
            self.take_profit = Some(tp_price);
        }
        self.risk_reward_ratio = self.compute_risk_reward_ratio();
        Ok(self)
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Quote value at entry.
    pub fn cost_basis(&self) -> f64 {
        self.entry_price.notional(self.quantity.value())
    }

    /// Quote value at the last observed price.
    pub fn market_value(&self) -> f64 {
        self.current_price.notional(self.quantity.value())
    }

    pub fn unrealized_pnl(&self, price: Price) -> f64 {
        let diff = match self.side {
            PositionSide::Long => price.value() - self.entry_price.value(),
            PositionSide::Short => self.entry_price.value() - price.value(),
        };
        diff * self.quantity.value()
    }

    /// Refresh price-derived fields. Rejected once the position is Closed.
    pub fn update_price(&mut self, price: Price, now: DateTime<Utc>) -> Result<(), PositionError> {
        if !self.is_open() {
            return Err(PositionError::PositionClosed(self.id.clone()));
        }
        self.apply_price(price, now)
    }

    fn apply_price(&mut self, price: Price, now: DateTime<Utc>) -> Result<(), PositionError> {
        let pnl = PnL::new(self.unrealized_pnl(price))
            .map_err(|e| PositionError::InvalidPosition(e.to_string()))?;
        self.current_price = price;
        self.pnl = pnl;
        self.pnl_percent = pnl.percent_of(self.cost_basis());
        self.max_profit = self.max_profit.max(pnl);
        self.max_drawdown = self.max_drawdown.min(pnl);
        self.risk_reward_ratio = self.compute_risk_reward_ratio();
        self.updated_at = now;
        Ok(())
    }

    /// `reward / risk` relative to side, or 0 if either bound is missing or risk <= 0.
    pub fn compute_risk_reward_ratio(&self) -> f64 {
        let (Some(stop_loss), Some(take_profit)) = (self.stop_loss, self.take_profit) else {
            return 0.0;
        };
        let entry = self.entry_price.value();
        let (risk, reward) = match self.side {
            PositionSide::Long => (entry - stop_loss.value(), take_profit.value() - entry),
            PositionSide::Short => (stop_loss.value() - entry, entry - take_profit.value()),
        };
        if risk <= 0.0 {
            0.0
        } else {
            reward / risk
        }
    }

    pub fn should_stop_loss(&self) -> bool {
        match self.stop_loss {
            Some(stop_loss) => match self.side {
                PositionSide::Long => self.current_price.value() <= stop_loss.value(),
                PositionSide::Short => self.current_price.value() >= stop_loss.value(),
            },
            None => false,
        }
    }

    pub fn should_take_profit(&self) -> bool {
        match self.take_profit {
            Some(take_profit) => match self.side {
                PositionSide::Long => self.current_price.value() >= take_profit.value(),
                PositionSide::Short => self.current_price.value() <= take_profit.value(),
            },
            None => false,
        }
    }

    /// Exit level crossed at the current price, stop-loss first.
    pub fn exit_trigger(&self) -> Option<ExitReason> {
        if self.should_stop_loss() {
            Some(ExitReason::StopLoss)
        } else if self.should_take_profit() {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }

    pub fn set_stop_loss(&mut self, price: f64, now: DateTime<Utc>) -> Result<(), PositionError> {
        if !self.is_open() {
            return Err(PositionError::PositionClosed(self.id.clone()));
        }
        let price = Price::new(price).map_err(|e| PositionError::InvalidStopLoss(e.to_string()))?;
        let entry = self.entry_price.value();
        let valid = match self.side {
            PositionSide::Long => price.value() < entry,
            PositionSide::Short => price.value() > entry,
        };
        if !valid {
            return Err(PositionError::InvalidStopLoss(format!(
                "{} stop-loss {} is on the wrong side of entry {}",
                self.side, price, entry
            )));
        }
        self.stop_loss = Some(price);
        self.risk_reward_ratio = self.compute_risk_reward_ratio();
        self.updated_at = now;
        Ok(())
    }

    pub fn set_take_profit(&mut self, price: f64, now: DateTime<Utc>) -> Result<(), PositionError> {
        if !self.is_open() {
            return Err(PositionError::PositionClosed(self.id.clone()));
        }
        let price =
            Price::new(price).map_err(|e| PositionError::InvalidTakeProfit(e.to_string()))?;
        let entry = self.entry_price.value();
        let valid = match self.side {
            PositionSide::Long => price.value() > entry,
            PositionSide::Short => price.value() < entry,
        };
        if !valid {
            return Err(PositionError::InvalidTakeProfit(format!(
                "{} take-profit {} is on the wrong side of entry {}",
                self.side, price, entry
            )));
        }
        self.take_profit = Some(price);
        self.risk_reward_ratio = self.compute_risk_reward_ratio();
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_exit_pending(&mut self, order_id: impl Into<String>, reason: ExitReason, now: DateTime<Utc>) {
        self.pending_exit = Some(PendingExit {
            order_id: order_id.into(),
            reason,
            submitted_at: now,
        });
        self.updated_at = now;
    }

    pub fn clear_pending_exit(&mut self, now: DateTime<Utc>) {
        self.pending_exit = None;
        self.updated_at = now;
    }

    /// Close at `exit_price`. Happens exactly once.
    pub fn close(
        &mut self,
        exit_price: Price,
        exit_order_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), PositionError> {
        if !self.is_open() {
            return Err(PositionError::PositionClosed(self.id.clone()));
        }
        self.apply_price(exit_price, now)?;
        self.exit_order_ids.push(exit_order_id.into());
        self.pending_exit = None;
        self.status = PositionStatus::Closed;
        self.closed_at = Some(now);
        Ok(())
    }

    /// Take price, PnL and exit state from a monitor pass computed on an
    /// earlier copy of this row. Exit levels stay as stored. A row that is
    /// already Closed is left frozen.
    pub fn absorb_monitor_pass(&mut self, pass: &Position) {
        if !self.is_open() {
            return;
        }
        self.current_price = pass.current_price;
        self.pnl = pass.pnl;
        self.pnl_percent = pass.pnl_percent;
        self.max_profit = self.max_profit.max(pass.max_profit);
        self.max_drawdown = self.max_drawdown.min(pass.max_drawdown);
        self.exit_order_ids = pass.exit_order_ids.clone();
        self.pending_exit = pass.pending_exit.clone();
        self.status = pass.status;
        self.closed_at = pass.closed_at;
        self.risk_reward_ratio = self.compute_risk_reward_ratio();
        self.updated_at = self.updated_at.max(pass.updated_at);
    }

    /// Realized PnL of a closed position.
    pub fn realized_pnl(&self) -> Option<PnL> {
        match self.status {
            PositionStatus::Closed => Some(self.pnl),
            PositionStatus::Open => None,
        }
    }
}
