use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::domain::errors::ConfigError;

/// Rate limiter configuration
pub struct RateLimiterConfig {
    /// Maximum outbound requests per minute
    pub requests_per_minute: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 600,
        }
    }
}

/// Client-side throttle shared by every call an exchange adapter makes
pub type ExchangeRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a new rate limiter
pub fn create_rate_limiter(config: RateLimiterConfig) -> Result<ExchangeRateLimiter, ConfigError> {
    let per_minute = NonZeroU32::new(config.requests_per_minute)
        .ok_or_else(|| ConfigError("Requests per minute must be non-zero".to_string()))?;
    Ok(Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))))
}

/// Wait for a request slot, logging when the caller had to queue.
pub async fn acquire(limiter: &ExchangeRateLimiter, endpoint: &str) {
    if limiter.check().is_ok() {
        return;
    }
    tracing::debug!(endpoint, "Exchange rate limit reached, waiting for a slot");
    limiter.until_ready().await;
}
