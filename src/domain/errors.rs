use thiserror::Error;

/// Failures reported by the exchange port.
///
/// All of these are transient from the engine's point of view: the current
/// cycle or evaluation is abandoned and the next scheduled run retries.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Rate limited by exchange")]
    RateLimited,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Order placement failed: {0}")]
    OrderPlacementFailed(String),

    #[error("Order status query failed: {0}")]
    OrderStatusFailed(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Exchange call timed out")]
    Timeout,
}

/// Failures reported by the persistence ports.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    Conflict { entity: &'static str, id: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        RepositoryError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Malformed auto-buy rule definitions, surfaced to rule management callers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuleValidationError {
    #[error("Symbol must not be empty")]
    EmptySymbol,

    #[error("Trigger value must be positive, got {0}")]
    NonPositiveTriggerValue(f64),

    #[error("Buy amount must be positive, got {0}")]
    NonPositiveBuyAmount(f64),

    #[error("Cooldown must be non-negative, got {0}")]
    NegativeCooldown(i64),

    #[error("Wildcard symbol is only valid for new_listing triggers, got {0}")]
    WildcardRequiresNewListing(String),

    #[error("Optional bound {field} must be non-negative, got {value}")]
    NegativeBound { field: &'static str, value: f64 },

    #[error("Unknown trigger type: {0}")]
    UnknownTriggerType(String),

    #[error("Unknown order type: {0}")]
    UnknownOrderType(String),
}

/// Errors raised by the auto-buy rule engine.
#[derive(Debug, Error)]
pub enum AutoBuyError {
    #[error("Auto-buy rule not found: {0}")]
    RuleNotFound(String),

    #[error("Invalid rule: {0}")]
    Validation(#[from] RuleValidationError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Risk check failed to run: {0}")]
    Risk(#[from] RiskError),
}

/// Errors raised while evaluating a risk check (not a failed check).
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Assessment {id} is {status} and cannot transition")]
    AssessmentNotActive { id: String, status: String },
}

/// Errors raised by position bookkeeping.
#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Position {0} is closed")]
    PositionClosed(String),

    #[error("Invalid stop-loss: {0}")]
    InvalidStopLoss(String),

    #[error("Invalid take-profit: {0}")]
    InvalidTakeProfit(String),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

/// Errors raised by the coin lifecycle tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Failed to fetch listings: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Failure reported by a lifecycle event handler.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Handler '{handler}' failed: {message}")]
pub struct HandlerError {
    pub handler: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by the notification port. Never propagated into core state.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Errors related to value validation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Value must be non-negative")]
    MustBeNonNegative,

    #[error("Value must be finite")]
    MustBeFinite,
}

/// Invalid engine configuration, rejected at construction time.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_error_display() {
        let error = ExchangeError::OrderPlacementFailed("insufficient balance".to_string());
        assert_eq!(
            error.to_string(),
            "Order placement failed: insufficient balance"
        );
    }

    #[test]
    fn test_repository_not_found_display() {
        let error = RepositoryError::not_found("AutoBuyRule", "rule-1");
        assert_eq!(error.to_string(), "AutoBuyRule not found: rule-1");
    }

    #[test]
    fn test_auto_buy_error_wraps_validation() {
        let error: AutoBuyError = RuleValidationError::NonPositiveBuyAmount(0.0).into();
        assert!(matches!(error, AutoBuyError::Validation(_)));
        assert_eq!(
            error.to_string(),
            "Invalid rule: Buy amount must be positive, got 0"
        );
    }

    #[test]
    fn test_handler_error_display() {
        let error = HandlerError::new("autobuy", "boom");
        assert_eq!(error.to_string(), "Handler 'autobuy' failed: boom");
    }
}
