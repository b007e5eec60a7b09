use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::models::ActivityRecord;

/// Sink for per-request activity records
///
/// Callers emit records fire-and-forget; an `Err` is logged and dropped.
#[async_trait]
pub trait ActivityLogger: Send + Sync {
    async fn record(&self, record: ActivityRecord) -> Result<()>;
}

/// Writes activity records to the tracing output
#[derive(Debug, Clone, Default)]
pub struct TracingActivityLogger;

#[async_trait]
impl ActivityLogger for TracingActivityLogger {
    async fn record(&self, record: ActivityRecord) -> Result<()> {
        info!(
            target: "rotagate::activity",
            user_id = ?record.user_id,
            proxy_id = ?record.proxy_id,
            method = %record.method,
            status_code = record.status_code,
            endpoint = %record.endpoint,
            "Request activity"
        );
        Ok(())
    }
}
