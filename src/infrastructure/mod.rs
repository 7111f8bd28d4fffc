pub mod log_notifier;
pub mod memory_store;
pub mod mexc_client;
