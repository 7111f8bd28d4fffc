//! Coin lifecycle tracking
//!
//! Diffs the exchange's listing snapshot against stored symbols and walks each
//! symbol through `Expected -> Trading -> Processed`, persisting and
//! dispatching one lifecycle event per transition.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::domain::entities::lifecycle_event::LifecycleEvent;
use crate::domain::entities::new_coin::{CoinStatus, TradableSymbol};
use crate::domain::errors::TrackerError;
use crate::domain::repositories::exchange_client::{ExchangeClient, ListingInfo};
use crate::domain::repositories::stores::{LifecycleEventRepository, TradableSymbolRepository};
use crate::domain::services::event_dispatcher::EventDispatcher;

/// Outcome of one detection cycle.
#[derive(Debug, Clone, Default)]
pub struct DetectionReport {
    pub detected: usize,
    pub became_tradable: usize,
    pub processed: usize,
    /// Symbols whose processing failed this cycle and will be retried
    pub failed_symbols: Vec<String>,
    pub events: Vec<LifecycleEvent>,
}

impl DetectionReport {
    pub fn transitions(&self) -> usize {
        self.events.len()
    }
}

pub struct CoinLifecycleTracker {
    exchange: Arc<dyn ExchangeClient>,
    symbols: Arc<dyn TradableSymbolRepository>,
    events: Arc<dyn LifecycleEventRepository>,
    dispatcher: Arc<EventDispatcher>,
}

impl CoinLifecycleTracker {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        symbols: Arc<dyn TradableSymbolRepository>,
        events: Arc<dyn LifecycleEventRepository>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            exchange,
            symbols,
            events,
            dispatcher,
        }
    }

    /// Run one detection cycle.
    ///
    /// A failed listing fetch aborts the cycle. Failures on individual symbols
    /// are logged and reported; the remaining symbols are still processed.
    pub async fn detect_new_coins(&self) -> Result<DetectionReport, TrackerError> {
        let listings = self.exchange.get_new_listings().await?;
        let now = Utc::now();
        let mut report = DetectionReport::default();
        let mut seen = HashSet::with_capacity(listings.len());

        for listing in &listings {
            seen.insert(listing.symbol.clone());
            if let Err(e) = self.process_listing(listing, now, &mut report).await {
                warn!(symbol = %listing.symbol, error = %e, "Failed to process listing");
                report.failed_symbols.push(listing.symbol.clone());
            }
        }

        // Expected symbols that dropped off the snapshot can still open
        for coin in self.symbols.list_by_status(CoinStatus::Expected).await? {
            if seen.contains(&coin.symbol) || !coin.listing_time_reached(now) {
                continue;
            }
            let symbol = coin.symbol.clone();
            if let Err(e) = self.check_expected(coin, now, &mut report).await {
                warn!(symbol = %symbol, error = %e, "Failed to refresh expected symbol");
                report.failed_symbols.push(symbol);
            }
        }

        for coin in self.symbols.list_by_status(CoinStatus::Trading).await? {
            if !coin.is_processed_for_autobuy {
                continue;
            }
            let symbol = coin.symbol.clone();
            if let Err(e) = self.mark_processed(coin, now, &mut report).await {
                warn!(symbol = %symbol, error = %e, "Failed to mark symbol processed");
                report.failed_symbols.push(symbol);
            }
        }

        if report.transitions() > 0 {
            info!(
                detected = report.detected,
                became_tradable = report.became_tradable,
                processed = report.processed,
                "Detection cycle complete"
            );
        } else {
            debug!(listings = listings.len(), "Detection cycle found no changes");
        }
        Ok(report)
    }

    async fn process_listing(
        &self,
        listing: &ListingInfo,
        now: DateTime<Utc>,
        report: &mut DetectionReport,
    ) -> Result<(), TrackerError> {
        match self.symbols.get_by_symbol(&listing.symbol).await? {
            None => {
                let coin = TradableSymbol::new_expected(
                    &listing.symbol,
                    &listing.base_asset,
                    &listing.quote_asset,
                    listing.expected_listing_time,
                    listing.constraints.clone(),
                    now,
                );
                self.symbols.create(&coin).await?;
                info!(
                    symbol = %coin.symbol,
                    expected_listing_time = ?coin.expected_listing_time,
                    "New coin detected"
                );
                report.detected += 1;
                self.emit(&coin, None, now, report).await;

                if listing.is_trading {
                    self.mark_tradable(coin, now, report).await?;
                } else if coin.listing_time_reached(now) {
                    self.check_expected(coin, now, report).await?;
                }
            }
            Some(coin) if coin.status == CoinStatus::Expected => {
                if listing.is_trading {
                    self.mark_tradable(coin, now, report).await?;
                } else if coin.listing_time_reached(now) {
                    self.check_expected(coin, now, report).await?;
                }
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Ask the exchange whether an Expected symbol whose listing time passed is trading.
    async fn check_expected(
        &self,
        coin: TradableSymbol,
        now: DateTime<Utc>,
        report: &mut DetectionReport,
    ) -> Result<(), TrackerError> {
        let info = self.exchange.get_symbol_status(&coin.symbol).await?;
        if info.is_trading {
            self.mark_tradable(coin, now, report).await?;
        } else {
            debug!(symbol = %coin.symbol, "Listing time reached but symbol not trading yet");
        }
        Ok(())
    }

    async fn mark_tradable(
        &self,
        mut coin: TradableSymbol,
        now: DateTime<Utc>,
        report: &mut DetectionReport,
    ) -> Result<(), TrackerError> {
        let old_status = coin.status;
        if let Err(e) = coin.mark_as_tradable(now) {
            debug!(error = %e, "Skipping transition");
            return Ok(());
        }
        self.symbols.update(&coin).await?;
        info!(symbol = %coin.symbol, "Coin became tradable");
        report.became_tradable += 1;
        self.emit(&coin, Some(old_status), now, report).await;
        Ok(())
    }

    async fn mark_processed(
        &self,
        mut coin: TradableSymbol,
        now: DateTime<Utc>,
        report: &mut DetectionReport,
    ) -> Result<(), TrackerError> {
        let old_status = coin.status;
        if let Err(e) = coin.mark_as_processed(now) {
            debug!(error = %e, "Skipping transition");
            return Ok(());
        }
        self.symbols.update(&coin).await?;
        info!(symbol = %coin.symbol, "Coin processed for auto-buy");
        report.processed += 1;
        self.emit(&coin, Some(old_status), now, report).await;
        Ok(())
    }

    /// Persist and dispatch the event for a transition already written to the store.
    async fn emit(
        &self,
        coin: &TradableSymbol,
        old_status: Option<CoinStatus>,
        now: DateTime<Utc>,
        report: &mut DetectionReport,
    ) {
        let event = LifecycleEvent::for_transition(coin, old_status, now);
        if let Err(e) = self.events.append(&event).await {
            error!(symbol = %coin.symbol, error = %e, "Failed to persist lifecycle event");
        }
        self.dispatcher.dispatch(&event).await;
        report.events.push(event);
    }
}
