use chrono::{DateTime, Utc};

/// 24h ticker snapshot for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketData {
    pub symbol: String,
    pub last_price: f64,
    /// Absolute price change over the fixed 24h lookback.
    pub price_change_24h: f64,
    pub base_volume_24h: f64,
    pub quote_volume_24h: f64,
    pub observed_at: DateTime<Utc>,
}

impl MarketData {
    /// Percent change over the 24h lookback, relative to the opening price.
    pub fn percent_change_24h(&self) -> f64 {
        let open = self.last_price - self.price_change_24h;
        if open > 0.0 {
            self.price_change_24h / open * 100.0
        } else {
            0.0
        }
    }
}
