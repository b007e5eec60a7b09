//! Rotagate - health-scored proxy rotation gateway
//!
//! Sits between clients and a pool of upstream proxies.
//!
//! ## Features
//!
//! - Health scoring from latency and failure history
//! - Rotation strategies (random, round_robin, lru, best, health_score)
//! - Concurrent proxy probing with a periodic health scheduler
//! - HTTP forwarding with retries, strategy fallback and a concurrency cap
//! - Regex URL blacklist with a TTL cache
//! - Per-request activity reporting

pub mod backend;
pub mod blacklist;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod repository;
pub mod services;

pub use config::Config;
pub use error::{GatewayError, Result};
