use async_trait::async_trait;

use crate::domain::entities::auto_buy::AutoBuyExecution;
use crate::domain::entities::lifecycle_event::LifecycleEvent;
use crate::domain::entities::position::Position;
use crate::domain::errors::NotifyError;

/// Something worth telling the outside world about.
#[derive(Debug, Clone)]
pub enum Notification {
    LifecycleTransition(LifecycleEvent),
    RuleExecuted(AutoBuyExecution),
    PositionClosed(Position),
}

/// Fire-and-forget alerting port. Errors are logged by callers and never
/// propagated into core state.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}
