use crate::ports::HistoryStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{HistoryKind, HistoryRecord, MqResult};
use std::collections::VecDeque;

/// Bounded history; the oldest record is evicted once full.
pub struct InMemoryHistoryStore {
    capacity: usize,
    records: Mutex<VecDeque<HistoryRecord>>,
}

impl InMemoryHistoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    fn push(&self, record: HistoryRecord) {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Newest first.
    pub fn records(&self, limit: usize, offset: usize) -> Vec<HistoryRecord> {
        self.records
            .lock()
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn by_connection(&self, connection_id: &str) -> Vec<HistoryRecord> {
        self.filtered(|r| r.connection_id == connection_id)
    }

    pub fn by_kind(&self, kind: HistoryKind) -> Vec<HistoryRecord> {
        self.filtered(|r| r.kind == kind)
    }

    fn filtered(&self, keep: impl Fn(&HistoryRecord) -> bool) -> Vec<HistoryRecord> {
        self.records.lock().iter().rev().filter(|r| keep(r)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new(1_000)
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn record_produce(
        &self,
        connection_id: &str,
        topic: &str,
        success: bool,
        message: &str,
        latency_ms: u64,
    ) -> MqResult<()> {
        self.push(HistoryRecord::new(
            connection_id,
            HistoryKind::Produce,
            topic,
            success,
            message,
            latency_ms,
        ));
        Ok(())
    }

    async fn record_consume(
        &self,
        connection_id: &str,
        topic: &str,
        success: bool,
        message: &str,
        latency_ms: u64,
    ) -> MqResult<()> {
        self.push(HistoryRecord::new(
            connection_id,
            HistoryKind::Consume,
            topic,
            success,
            message,
            latency_ms,
        ));
        Ok(())
    }

    async fn record_test(
        &self,
        connection_id: &str,
        success: bool,
        message: &str,
        latency_ms: u64,
    ) -> MqResult<()> {
        self.push(HistoryRecord::new(
            connection_id,
            HistoryKind::TestConnection,
            "",
            success,
            message,
            latency_ms,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = InMemoryHistoryStore::new(2);
        for i in 0..3 {
            store
                .record_produce("c1", "orders", true, &format!("m{}", i), 1)
                .await
                .unwrap();
        }
        let records = store.records(10, 0);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "m2");
        assert_eq!(records[1].message, "m1");
    }

    #[tokio::test]
    async fn test_paging_and_filters() {
        let store = InMemoryHistoryStore::default();
        store.record_test("c1", true, "ok", 3).await.unwrap();
        store.record_consume("c2", "orders", true, "m", 0).await.unwrap();
        store.record_produce("c1", "orders", false, "boom", 2).await.unwrap();

        assert_eq!(store.records(1, 1)[0].kind, HistoryKind::Consume);
        assert_eq!(store.by_connection("c1").len(), 2);
        assert_eq!(store.by_kind(HistoryKind::TestConnection)[0].topic, "");

        store.clear();
        assert!(store.is_empty());
    }
}
