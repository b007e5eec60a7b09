pub mod activity;
pub mod proxy;

pub use activity::{ActivityLogger, TracingActivityLogger};
pub use proxy::{MemoryProxyStore, ProxyStore};
