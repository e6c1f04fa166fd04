//! Audit records.
//!
//! One record per upstream attempt, written through a sink the gateway
//! only ever appends to. Error codes are fixed taxonomy labels, so no
//! caller-supplied bytes land in those fields.

use std::sync::Mutex;

use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// RFC 3339.
    pub timestamp: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    pub path: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub status: u16,
    pub latency_ms: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

impl AuditRecord {
    pub fn new(request_id: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: super::storage::rfc3339(OffsetDateTime::now_utc()),
            request_id: request_id.into(),
            identity: None,
            path: path.into(),
            method: method.into(),
            backend_kind: None,
            instance: None,
            status: 0,
            latency_ms: 0,
            bytes_in: 0,
            bytes_out: 0,
            error_code: None,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Default sink: structured log line per record.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        let rendered = serde_json::to_string(&record).unwrap_or_default();
        tracing::info!(target: "skybridge::audit", "{rendered}");
    }
}

/// Test sink that keeps every record.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_accumulates_in_order() {
        let sink = MemoryAuditSink::new();
        let mut first = AuditRecord::new("req-1", "POST", "/openai/a/chat/completions");
        first.status = 503;
        first.error_code = Some("upstream_unavailable");
        sink.record(first);

        let mut second = AuditRecord::new("req-1", "POST", "/openai/a/chat/completions");
        second.status = 200;
        sink.record(second);

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].request_id, records[1].request_id);
        assert_eq!(records[0].error_code, Some("upstream_unavailable"));
        assert_eq!(records[1].error_code, None);
    }
}
