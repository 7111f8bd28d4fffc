use async_trait::async_trait;
use tracing::info;

use crate::domain::errors::NotifyError;
use crate::domain::repositories::notifier::{Notification, Notifier};

/// Default notifier: writes every notification to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::LifecycleTransition(event) => {
                info!(
                    symbol = %event.symbol,
                    from = event.old_status.map(|s| s.as_str()).unwrap_or("none"),
                    to = event.new_status.as_str(),
                    event_type = %event.event_type,
                    "Coin lifecycle transition"
                );
            }
            Notification::RuleExecuted(execution) => {
                info!(
                    rule_id = %execution.rule_id,
                    symbol = %execution.symbol,
                    order_id = %execution.order_id,
                    price = execution.price,
                    quantity = execution.quantity,
                    amount = execution.amount,
                    "Auto-buy executed"
                );
            }
            Notification::PositionClosed(position) => {
                let realized = position
                    .realized_pnl()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "n/a".to_string());
                info!(
                    position_id = %position.id,
                    symbol = %position.symbol,
                    realized_pnl = %realized,
                    "Position closed"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::new_coin::TradableSymbol;
    use crate::domain::entities::lifecycle_event::LifecycleEvent;
    use chrono::Utc;

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let now = Utc::now();
        let coin = TradableSymbol::new_expected("XYZUSDT", "XYZ", "USDT", None, Default::default(), now);
        let event = LifecycleEvent::for_transition(&coin, None, now);
        let notifier = LogNotifier::new();
        assert!(notifier
            .notify(&Notification::LifecycleTransition(event))
            .await
            .is_ok());
    }
}
