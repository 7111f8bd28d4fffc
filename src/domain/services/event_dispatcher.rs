//! In-process delivery of lifecycle events to registered handlers
//!
//! Handlers run in registration order, one at a time, inside the detection
//! cycle that produced the event. A failing or panicking handler is logged
//! and skipped; the remaining handlers still receive the event.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::entities::lifecycle_event::LifecycleEvent;
use crate::domain::errors::HandlerError;

#[async_trait]
pub trait LifecycleEventHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn handle(&self, event: &LifecycleEvent) -> Result<(), HandlerError>;
}

/// Identity of one registration, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Result of delivering one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failures: Vec<HandlerError>,
}

pub struct EventDispatcher {
    handlers: RwLock<Vec<(SubscriptionId, Arc<dyn LifecycleEventHandler>)>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn subscribe(&self, handler: Arc<dyn LifecycleEventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(handler = handler.name(), "Subscribed lifecycle event handler");
        self.handlers.write().await.push((id, handler));
        id
    }

    /// Returns false if the subscription was not registered.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().await;
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Deliver `event` to every handler registered at the time of the call.
    pub async fn dispatch(&self, event: &LifecycleEvent) -> DispatchReport {
        // Snapshot so handlers may (un)subscribe without deadlocking
        let handlers: Vec<Arc<dyn LifecycleEventHandler>> = self
            .handlers
            .read()
            .await
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        let mut report = DispatchReport::default();
        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(_) => Some(HandlerError::new(handler.name(), "handler panicked")),
            };

            match failure {
                None => report.delivered += 1,
                Some(e) => {
                    warn!(
                        handler = handler.name(),
                        symbol = %event.symbol,
                        event_type = %event.event_type,
                        error = %e,
                        "Lifecycle event handler failed"
                    );
                    report.failures.push(e);
                }
            }
        }
        report
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
