//! Listing Trader Library
//!
//! Decision engine for a crypto exchange: new-listing detection, auto-buy
//! rules under cooldown and risk gating, and position monitoring.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod rate_limit;
pub mod task_runner;
