//! Forwarder middleware for credential gating and concurrency limiting

mod auth;
mod rate_limit;

pub use auth::{bearer_token, mask_credential, AuthCheck};
pub use rate_limit::ConcurrencyLimiter;
