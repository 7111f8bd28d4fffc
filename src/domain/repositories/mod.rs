pub mod exchange_client;
pub mod notifier;
pub mod stores;
