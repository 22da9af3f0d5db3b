//! Default sink implementations
//!
//! Production deployments plug in their own audit and notification
//! backends; these defaults keep the orchestrator usable without them.

pub mod cache;

use async_trait::async_trait;
use log::info;

use crate::core::{AuditRecord, AuditSink, DependencyError, DependencyResult};

pub use cache::MemoryCache;

pub const AUDIT_TARGET: &str = "audit";

/// Writes each audit record as one JSON line on the `audit` log target
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn create_record(&self, record: AuditRecord) -> DependencyResult<()> {
        let line = serde_json::to_string(&record)
            .map_err(|e| DependencyError::failed(format!("Failed to encode audit record: {e}")))?;
        info!(target: AUDIT_TARGET, "{line}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_log_audit_sink_accepts_records() {
        let _ = env_logger::builder().is_test(true).try_init();
        let record = AuditRecord::new(
            "conductor",
            "enroll",
            json!({ "user_id": "u1", "failed_dependencies": [] }),
        );
        assert!(LogAuditSink.create_record(record).await.is_ok());
    }
}
