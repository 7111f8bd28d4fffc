use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::domain::errors::ConfigError;
use crate::domain::services::auto_buy::AutoBuySettings;

/// Engine configuration, loaded once at startup
#[derive(Clone)]
pub struct EngineConfig {
    pub detection_interval_seconds: u64,
    pub rule_sweep_interval_seconds: u64,
    pub position_sweep_interval_seconds: u64,
    pub exchange_call_timeout_milliseconds: u64,
    pub default_stop_loss_percentage: f64,
    pub default_take_profit_percentage: f64,
    pub open_positions_on_fill: bool,
    pub exchange_requests_per_minute: u32,
    pub mexc_api_key: Option<Zeroizing<String>>,
    pub mexc_api_secret: Option<Zeroizing<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detection_interval_seconds: 300,
            rule_sweep_interval_seconds: 60,
            position_sweep_interval_seconds: 15,
            exchange_call_timeout_milliseconds: 10_000,
            default_stop_loss_percentage: 0.05,
            default_take_profit_percentage: 0.10,
            open_positions_on_fill: true,
            exchange_requests_per_minute: 600,
            mexc_api_key: None,
            mexc_api_secret: None,
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("detection_interval_seconds", &self.detection_interval_seconds)
            .field("rule_sweep_interval_seconds", &self.rule_sweep_interval_seconds)
            .field(
                "position_sweep_interval_seconds",
                &self.position_sweep_interval_seconds,
            )
            .field(
                "exchange_call_timeout_milliseconds",
                &self.exchange_call_timeout_milliseconds,
            )
            .field("default_stop_loss_percentage", &self.default_stop_loss_percentage)
            .field(
                "default_take_profit_percentage",
                &self.default_take_profit_percentage,
            )
            .field("open_positions_on_fill", &self.open_positions_on_fill)
            .field("exchange_requests_per_minute", &self.exchange_requests_per_minute)
            .field("mexc_api_key", &self.mexc_api_key.as_ref().map(|_| "<redacted>"))
            .field(
                "mexc_api_secret",
                &self.mexc_api_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source. Invalid values are logged and
    /// the default is kept.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.detection_interval_seconds = read_in_range(
            &lookup,
            "DETECTION_INTERVAL_SECONDS",
            10..=3600,
            config.detection_interval_seconds,
        );
        config.rule_sweep_interval_seconds = read_in_range(
            &lookup,
            "RULE_SWEEP_INTERVAL_SECONDS",
            5..=3600,
            config.rule_sweep_interval_seconds,
        );
        config.position_sweep_interval_seconds = read_in_range(
            &lookup,
            "POSITION_SWEEP_INTERVAL_SECONDS",
            1..=3600,
            config.position_sweep_interval_seconds,
        );
        config.exchange_call_timeout_milliseconds = read_in_range(
            &lookup,
            "EXCHANGE_CALL_TIMEOUT_MILLISECONDS",
            500..=60_000,
            config.exchange_call_timeout_milliseconds,
        );
        config.exchange_requests_per_minute = read_in_range(
            &lookup,
            "EXCHANGE_REQUESTS_PER_MINUTE",
            1..=6000,
            config.exchange_requests_per_minute,
        );

        if let Some(raw) = lookup("DEFAULT_STOP_LOSS_PERCENTAGE") {
            match raw.trim().parse::<f64>() {
                Ok(value) if value > 0.0 && value < 1.0 => {
                    config.default_stop_loss_percentage = value;
                }
                _ => {
                    tracing::warn!(
                        "Invalid DEFAULT_STOP_LOSS_PERCENTAGE value: {} (must be between 0.0 and 1.0, exclusive), using default: {}",
                        raw, config.default_stop_loss_percentage
                    );
                }
            }
        }

        if let Some(raw) = lookup("DEFAULT_TAKE_PROFIT_PERCENTAGE") {
            match raw.trim().parse::<f64>() {
                Ok(value) if value > 0.0 && value.is_finite() => {
                    config.default_take_profit_percentage = value;
                }
                _ => {
                    tracing::warn!(
                        "Invalid DEFAULT_TAKE_PROFIT_PERCENTAGE value: {} (must be positive), using default: {}",
                        raw, config.default_take_profit_percentage
                    );
                }
            }
        }

        if let Some(raw) = lookup("OPEN_POSITIONS_ON_FILL") {
            match parse_bool(&raw) {
                Some(value) => config.open_positions_on_fill = value,
                None => {
                    tracing::warn!(
                        "Invalid OPEN_POSITIONS_ON_FILL value: {}, using default: {}",
                        raw, config.open_positions_on_fill
                    );
                }
            }
        }

        config.mexc_api_key = lookup("MEXC_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .map(Zeroizing::new);
        config.mexc_api_secret = lookup("MEXC_API_SECRET")
            .filter(|v| !v.trim().is_empty())
            .map(Zeroizing::new);

        config
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection_interval_seconds == 0
            || self.rule_sweep_interval_seconds == 0
            || self.position_sweep_interval_seconds == 0
        {
            return Err(ConfigError("Loop intervals must be non-zero".to_string()));
        }
        if self.exchange_call_timeout_milliseconds == 0 {
            return Err(ConfigError(
                "Exchange call timeout must be non-zero".to_string(),
            ));
        }
        if !(self.default_stop_loss_percentage > 0.0 && self.default_stop_loss_percentage < 1.0) {
            return Err(ConfigError(format!(
                "Default stop-loss percentage must be in (0, 1), got {}",
                self.default_stop_loss_percentage
            )));
        }
        if !(self.default_take_profit_percentage > 0.0) {
            return Err(ConfigError(format!(
                "Default take-profit percentage must be positive, got {}",
                self.default_take_profit_percentage
            )));
        }
        if self.exchange_requests_per_minute == 0 {
            return Err(ConfigError(
                "Exchange requests per minute must be non-zero".to_string(),
            ));
        }
        if self.mexc_api_key.is_some() != self.mexc_api_secret.is_some() {
            return Err(ConfigError(
                "MEXC_API_KEY and MEXC_API_SECRET must be set together".to_string(),
            ));
        }
        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        self.mexc_api_key.is_some() && self.mexc_api_secret.is_some()
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_secs(self.detection_interval_seconds)
    }

    pub fn rule_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rule_sweep_interval_seconds)
    }

    pub fn position_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.position_sweep_interval_seconds)
    }

    pub fn exchange_call_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_call_timeout_milliseconds)
    }

    pub fn auto_buy_settings(&self) -> AutoBuySettings {
        AutoBuySettings {
            open_positions_on_fill: self.open_positions_on_fill,
            default_stop_loss_percentage: self.default_stop_loss_percentage,
            default_take_profit_percentage: self.default_take_profit_percentage,
        }
    }
}

fn read_in_range<F, T>(lookup: &F, key: &str, range: RangeInclusive<T>, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Display + Copy,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if range.contains(&value) => value,
        Ok(value) => {
            tracing::warn!(
                "Invalid {} value: {} (must be between {} and {}), using default: {}",
                key,
                value,
                range.start(),
                range.end(),
                default
            );
            default
        }
        Err(e) => {
            tracing::warn!(
                "Failed to parse {} '{}': {}, using default: {}",
                key,
                raw,
                e,
                default
            );
            default
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
