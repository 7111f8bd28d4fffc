pub mod auto_buy;
pub mod lifecycle_event;
pub mod market_data;
pub mod new_coin;
pub mod order;
pub mod position;
pub mod risk;
