//! FERRY: cross-chain DEX arbitrage automation loop
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod quotes;
pub mod chain;
pub mod engine;
pub mod storage;
pub mod dashboard;
