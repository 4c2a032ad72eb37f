//! Sync relay: batch reconciliation of external records, event subscription
//! consumers and durable webhook delivery.

pub mod backend;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod finder;
pub mod model;
pub mod notify;
pub mod poll;
pub mod pool;
pub mod resolver;
pub mod retry;
pub mod sync;
pub mod webhook;
