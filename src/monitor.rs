//! In-memory request log ring, read-only to the admin surface.

use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub timestamp: i64,
    pub session_id: String,
    pub model: String,
    pub status_code: u16,
    pub status_text: String,
}

pub struct RequestLog {
    records: RwLock<VecDeque<LogRecord>>,
    capacity: usize,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, record: LogRecord) {
        let mut records = self.records.write().await;
        if records.len() >= self.capacity {
            records.pop_back();
        }
        records.push_front(record);
    }

    /// Newest-first page of records.
    pub async fn page(&self, offset: usize, limit: usize) -> (Vec<LogRecord>, usize) {
        let records = self.records.read().await;
        let total = records.len();
        let page = records
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        (page, total)
    }
}
