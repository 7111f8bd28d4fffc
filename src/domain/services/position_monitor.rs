//! Position monitoring
//!
//! Each sweep refreshes every open position independently: price and PnL,
//! exit-level checks, exit-order submission and fill confirmation. A position
//! only becomes Closed once its exit order is confirmed filled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::domain::entities::order::{OrderRequest, OrderStatus, OrderType, PlacedOrder};
use crate::domain::entities::position::{ExitReason, Position, PositionSide, PositionType};
use crate::domain::errors::{ExchangeError, PositionError, RepositoryError};
use crate::domain::repositories::exchange_client::{ExchangeClient, ExchangeResult};
use crate::domain::repositories::notifier::{Notification, Notifier};
use crate::domain::repositories::stores::PositionRepository;
use crate::domain::value_objects::price::Price;

/// What one pass did to one position.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionCheck {
    Updated,
    ExitSubmitted { order_id: String, reason: ExitReason },
    AwaitingExit { order_id: String },
    Closed { exit_price: f64 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub checked: usize,
    pub exits_submitted: usize,
    pub closed: usize,
    pub failed: usize,
}

/// Request to open a position outside the rule engine.
#[derive(Debug, Clone)]
pub struct OpenPositionRequest {
    pub user_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub entry_order_id: Option<String>,
}

pub struct PositionMonitor {
    exchange: Arc<dyn ExchangeClient>,
    positions: Arc<dyn PositionRepository>,
    notifier: Arc<dyn Notifier>,
    call_timeout: Duration,
}

impl PositionMonitor {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        positions: Arc<dyn PositionRepository>,
        notifier: Arc<dyn Notifier>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            exchange,
            positions,
            notifier,
            call_timeout,
        }
    }

    pub async fn open_position(&self, request: OpenPositionRequest) -> Result<Position, PositionError> {
        let now = Utc::now();
        let mut position = Position::open(
            request.user_id,
            request.symbol,
            request.side,
            PositionType::Manual,
            request.entry_price,
            request.quantity,
            request.entry_order_id,
            now,
        )
        .map_err(|e| PositionError::InvalidPosition(e.to_string()))?;
        if let Some(stop_loss) = request.stop_loss {
            position.set_stop_loss(stop_loss, now)?;
        }
        if let Some(take_profit) = request.take_profit {
            position.set_take_profit(take_profit, now)?;
        }
        self.positions.create(&position).await?;
        info!(
            position_id = %position.id,
            symbol = %position.symbol,
            side = %position.side,
            "Position opened"
        );
        Ok(position)
    }

    pub async fn get_position(&self, position_id: &str) -> Result<Position, PositionError> {
        self.positions
            .get(position_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Position", position_id).into())
    }

    pub async fn set_stop_loss(&self, position_id: &str, price: f64) -> Result<Position, PositionError> {
        let mut position = self.get_position(position_id).await?;
        position.set_stop_loss(price, Utc::now())?;
        self.positions.update(&position).await?;
        Ok(position)
    }

    pub async fn set_take_profit(&self, position_id: &str, price: f64) -> Result<Position, PositionError> {
        let mut position = self.get_position(position_id).await?;
        position.set_take_profit(price, Utc::now())?;
        self.positions.update(&position).await?;
        Ok(position)
    }

    /// Run one pass for a single position outside the schedule.
    pub async fn check_position(&self, position_id: &str) -> Result<PositionCheck, PositionError> {
        let position = self.get_position(position_id).await?;
        if !position.is_open() {
            return Err(PositionError::PositionClosed(position.id));
        }
        self.process(position).await
    }

    /// Refresh every open position concurrently.
    pub async fn sweep(&self) -> Result<SweepReport, PositionError> {
        let open = self.positions.list_open().await?;
        let mut report = SweepReport {
            checked: open.len(),
            ..Default::default()
        };

        let passes = open.into_iter().map(|position| async move {
            let id = position.id.clone();
            let symbol = position.symbol.clone();
            (id, symbol, self.process(position).await)
        });

        for (id, symbol, result) in join_all(passes).await {
            match result {
                Ok(PositionCheck::ExitSubmitted { .. }) => report.exits_submitted += 1,
                Ok(PositionCheck::Closed { .. }) => report.closed += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(position_id = %id, symbol = %symbol, error = %e, "Position update failed");
                    report.failed += 1;
                }
            }
        }

        debug!(
            checked = report.checked,
            exits_submitted = report.exits_submitted,
            closed = report.closed,
            failed = report.failed,
            "Position sweep complete"
        );
        Ok(report)
    }

    async fn bounded<T>(&self, call: impl Future<Output = ExchangeResult<T>>) -> ExchangeResult<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::Timeout),
        }
    }

    async fn process(&self, mut position: Position) -> Result<PositionCheck, PositionError> {
        let market = self
            .bounded(self.exchange.get_market_data(&position.symbol))
            .await?;
        let price = Price::new(market.last_price)
            .map_err(|e| PositionError::InvalidPosition(e.to_string()))?;
        position.update_price(price, Utc::now())?;
        debug!(
            position_id = %position.id,
            symbol = %position.symbol,
            price = %price,
            pnl = %position.pnl,
            "Position refreshed"
        );

        let check = if let Some(pending) = position.pending_exit.clone() {
            self.confirm_exit(&mut position, &pending.order_id).await
        } else if let Some(reason) = position.exit_trigger() {
            self.submit_exit(&mut position, reason).await
        } else {
            PositionCheck::Updated
        };

        // Exit levels may have been edited while the exchange calls were in flight
        let position = self.positions.apply_monitor_pass(&position).await?;
        if let PositionCheck::Closed { exit_price } = check {
            info!(
                position_id = %position.id,
                symbol = %position.symbol,
                exit_price,
                pnl = %position.pnl,
                "Position closed"
            );
            if let Err(e) = self
                .notifier
                .notify(&Notification::PositionClosed(position.clone()))
                .await
            {
                warn!(position_id = %position.id, error = %e, "Failed to send close notification");
            }
        }
        Ok(check)
    }

    async fn confirm_exit(&self, position: &mut Position, order_id: &str) -> PositionCheck {
        let order = match self
            .bounded(self.exchange.get_order_status(&position.symbol, order_id))
            .await
        {
            Ok(order) => order,
            Err(e) => {
                warn!(position_id = %position.id, order_id = %order_id, error = %e, "Exit order status unavailable");
                return PositionCheck::AwaitingExit {
                    order_id: order_id.to_string(),
                };
            }
        };

        if order.status == OrderStatus::Filled {
            return self.close_filled(position, &order);
        }
        if order.status.is_dead() {
            warn!(
                position_id = %position.id,
                order_id = %order_id,
                status = %order.status,
                "Exit order will not fill, resubmitting on next crossing"
            );
            position.clear_pending_exit(Utc::now());
            return PositionCheck::Updated;
        }
        PositionCheck::AwaitingExit {
            order_id: order_id.to_string(),
        }
    }

    async fn submit_exit(&self, position: &mut Position, reason: ExitReason) -> PositionCheck {
        let order = match OrderRequest::new(
            &position.symbol,
            position.side.exit_side(),
            OrderType::Market,
            position.quantity.value(),
            None,
        ) {
            Ok(order) => order,
            Err(e) => {
                warn!(position_id = %position.id, error = %e, "Cannot build exit order");
                return PositionCheck::Updated;
            }
        };

        let placed = match self.bounded(self.exchange.place_order(&order)).await {
            Ok(placed) => placed,
            Err(e) => {
                warn!(
                    position_id = %position.id,
                    symbol = %position.symbol,
                    reason = %reason,
                    error = %e,
                    "Exit order submission failed, retrying next pass"
                );
                return PositionCheck::Updated;
            }
        };

        info!(
            position_id = %position.id,
            symbol = %position.symbol,
            reason = %reason,
            order_id = %placed.order_id,
            "Exit order submitted"
        );
        match placed.status {
            OrderStatus::Filled => self.close_filled(position, &placed),
            status if status.is_dead() => {
                warn!(position_id = %position.id, status = %status, "Exit order rejected");
                PositionCheck::Updated
            }
            _ => {
                position.mark_exit_pending(&placed.order_id, reason, Utc::now());
                PositionCheck::ExitSubmitted {
                    order_id: placed.order_id,
                    reason,
                }
            }
        }
    }

    fn close_filled(&self, position: &mut Position, order: &PlacedOrder) -> PositionCheck {
        let exit_price = order
            .average_price
            .and_then(|p| Price::new(p).ok())
            .filter(|p| p.value() > 0.0)
            .unwrap_or(position.current_price);
        match position.close(exit_price, &order.order_id, Utc::now()) {
            Ok(()) => PositionCheck::Closed {
                exit_price: exit_price.value(),
            },
            Err(e) => {
                warn!(position_id = %position.id, error = %e, "Failed to close position");
                PositionCheck::Updated
            }
        }
    }
}
