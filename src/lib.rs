//! Distributed admission controller for bulk-import jobs: per-user,
//! per-tier concurrency limits, cooldowns, and crash recovery driven by
//! shared-store key expiry.

pub mod config;
pub mod error;
pub mod kernel;
pub mod server;

pub use config::Config;
