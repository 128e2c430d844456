//! khobor - backend for a Bangla news aggregator.
//!
//! Keeps category counters consistent with article publish state, and keeps
//! a prioritized pool of AI providers healthy with scheduled connectivity
//! checks and automatic recovery.

pub mod auth;
pub mod cli;
pub mod config;
pub mod models;
pub mod providers;
pub mod publish;
pub mod server;
pub mod store;
