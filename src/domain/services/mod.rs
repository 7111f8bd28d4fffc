pub mod auto_buy;
pub mod coin_tracker;
pub mod event_dispatcher;
pub mod position_monitor;
pub mod risk_gate;

#[cfg(test)]
pub(crate) mod mock_exchange;
