pub mod cycles;
pub mod trading_engine;
