//! Dead-letter sidecar for events that fail validation at apply time
//! (spec.md §4.5: "record the failure in a dead-letter sidecar and
//! advance the checkpoint").

use entdb_types::{Position, TenantId};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// One dead-lettered record, appended as a JSON line.
#[derive(Debug, serde::Serialize)]
pub struct DeadLetterRecord {
    /// Tenant the event belonged to.
    pub tenant_id: TenantId,
    /// Idempotency key of the poisoned event.
    pub idempotency_key: String,
    /// WAL position the event occupied.
    pub wal_position: Position,
    /// Why the applier rejected it.
    pub reason: String,
    /// When the applier gave up on it, epoch milliseconds.
    pub recorded_at: i64,
}

/// Appends dead-letter records to one JSONL file per tenant under a
/// shared directory (spec.md `apply.deadletter_dir`).
pub struct DeadLetterSink {
    dir: PathBuf,
}

impl DeadLetterSink {
    /// Sink rooted at `dir`, creating it lazily on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Append one record, creating the tenant's file if needed.
    pub async fn record(&self, record: DeadLetterRecord) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.jsonl", record.tenant_id.as_str()));
        let mut line = serde_json::to_string(&record).unwrap_or_default();
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}
