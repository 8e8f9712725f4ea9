//! Core engine: the scan → decide → execute → wallet-health cycle.

pub mod retry;
pub mod scanner;
pub mod decision;
pub mod executor;
pub mod wallets;
pub mod orchestrator;
