use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use super::new_coin::{CoinStatus, TradableSymbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEventType {
    /// First observation of a symbol
    Detected,
    BecameTradable,
    Processed,
}

impl LifecycleEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventType::Detected => "new_coin_detected",
            LifecycleEventType::BecameTradable => "became_tradable",
            LifecycleEventType::Processed => "processed",
        }
    }
}

impl std::fmt::Display for LifecycleEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one status transition of a tradable symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub id: String,
    pub coin_id: String,
    pub symbol: String,
    pub quote_asset: String,
    pub old_status: Option<CoinStatus>,
    pub new_status: CoinStatus,
    pub event_type: LifecycleEventType,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Build the event describing `coin` having just moved from `old_status`
    /// to its current status.
    pub fn for_transition(
        coin: &TradableSymbol,
        old_status: Option<CoinStatus>,
        now: DateTime<Utc>,
    ) -> Self {
        let event_type = match coin.status {
            CoinStatus::Expected => LifecycleEventType::Detected,
            CoinStatus::Trading => LifecycleEventType::BecameTradable,
            CoinStatus::Processed => LifecycleEventType::Processed,
        };

        let payload = json!({
            "base_asset": coin.base_asset,
            "quote_asset": coin.quote_asset,
            "expected_listing_time": coin.expected_listing_time.map(|t| t.to_rfc3339()),
            "became_tradable_at": coin.became_tradable_at.map(|t| t.to_rfc3339()),
        });

        Self {
            id: Uuid::new_v4().to_string(),
            coin_id: coin.id.clone(),
            symbol: coin.symbol.clone(),
            quote_asset: coin.quote_asset.clone(),
            old_status,
            new_status: coin.status,
            event_type,
            payload,
            created_at: now,
        }
    }

    /// True for the Expected -> Trading transition that new-listing rules react to.
    pub fn is_new_listing(&self) -> bool {
        self.old_status == Some(CoinStatus::Expected) && self.new_status == CoinStatus::Trading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::new_coin::SymbolConstraints;

    #[test]
    fn test_detected_event() {
        let now = Utc::now();
        let coin = TradableSymbol::new_expected(
            "XYZUSDT",
            "XYZ",
            "USDT",
            None,
            SymbolConstraints::default(),
            now,
        );
        let event = LifecycleEvent::for_transition(&coin, None, now);
        assert_eq!(event.event_type, LifecycleEventType::Detected);
        assert_eq!(event.coin_id, coin.id);
        assert_eq!(event.new_status, CoinStatus::Expected);
        assert!(!event.is_new_listing());
        assert_eq!(event.payload["quote_asset"], "USDT");
    }

    #[test]
    fn test_became_tradable_event_is_new_listing() {
        let now = Utc::now();
        let mut coin = TradableSymbol::new_expected(
            "XYZUSDT",
            "XYZ",
            "USDT",
            None,
            SymbolConstraints::default(),
            now,
        );
        coin.mark_as_tradable(now).unwrap();
        let event = LifecycleEvent::for_transition(&coin, Some(CoinStatus::Expected), now);
        assert_eq!(event.event_type, LifecycleEventType::BecameTradable);
        assert_eq!(event.event_type.to_string(), "became_tradable");
        assert!(event.is_new_listing());
        assert!(event.payload["became_tradable_at"].is_string());
    }
}
