//! 内存存储实现
//!
//! 历史记录按监控项分区，每个分区一把锁，不同监控项的写入互不竞争

use crate::error::StorageResult;
use crate::monitor::{Monitor, MonitorId};
use crate::store::{HistoryEntry, HistoryStore, MonitorStore, WindowTally};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

type Partition = Arc<RwLock<VecDeque<HistoryEntry>>>;

/// 内存存储，同时实现 `HistoryStore` 和 `MonitorStore`
#[derive(Default)]
pub struct MemoryStore {
    /// 按监控项分区的历史记录
    history: RwLock<HashMap<MonitorId, Partition>>,
    /// 监控项表
    monitors: RwLock<HashMap<MonitorId, Monitor>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取分区，不存在时创建
    async fn partition(&self, monitor_id: MonitorId) -> Partition {
        if let Some(partition) = self.history.read().await.get(&monitor_id) {
            return partition.clone();
        }

        self.history
            .write()
            .await
            .entry(monitor_id)
            .or_default()
            .clone()
    }

    /// 获取已存在的分区
    async fn existing_partition(&self, monitor_id: MonitorId) -> Option<Partition> {
        self.history.read().await.get(&monitor_id).cloned()
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, entry: &HistoryEntry) -> StorageResult<()> {
        let partition = self.partition(entry.monitor_id).await;
        let mut entries = partition.write().await;

        // 保持按时间戳有序：通常直接追加到末尾
        let position = entries.partition_point(|e| e.timestamp <= entry.timestamp);
        entries.insert(position, entry.clone());
        Ok(())
    }

    async fn recent(
        &self,
        monitor_id: MonitorId,
        limit: usize,
    ) -> StorageResult<Vec<HistoryEntry>> {
        let Some(partition) = self.existing_partition(monitor_id).await else {
            return Ok(Vec::new());
        };

        let entries = partition.read().await;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }

    async fn tally_since(
        &self,
        monitor_id: MonitorId,
        since: DateTime<Utc>,
    ) -> StorageResult<WindowTally> {
        let Some(partition) = self.existing_partition(monitor_id).await else {
            return Ok(WindowTally::default());
        };

        let entries = partition.read().await;
        let start = entries.partition_point(|e| e.timestamp < since);
        let tally = entries
            .range(start..)
            .fold(WindowTally::default(), |mut tally, entry| {
                tally.total += 1;
                if entry.status.is_healthy() {
                    tally.up += 1;
                }
                tally
            });

        Ok(tally)
    }

    async fn purge_monitor(&self, monitor_id: MonitorId) -> StorageResult<u64> {
        let removed = self.history.write().await.remove(&monitor_id);
        match removed {
            Some(partition) => {
                let mut entries = partition.write().await;
                let count = entries.len() as u64;
                entries.clear();
                Ok(count)
            }
            None => Ok(0),
        }
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let partitions: Vec<Partition> = self.history.read().await.values().cloned().collect();

        let mut pruned = 0u64;
        for partition in partitions {
            let mut entries = partition.write().await;
            let stale = entries.partition_point(|e| e.timestamp < cutoff);
            entries.drain(..stale);
            pruned += stale as u64;
        }

        Ok(pruned)
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn load_all(&self) -> StorageResult<Vec<Monitor>> {
        let mut monitors: Vec<Monitor> = self.monitors.read().await.values().cloned().collect();
        monitors.sort_by_key(|m| m.created_at);
        Ok(monitors)
    }

    async fn upsert(&self, monitor: &Monitor) -> StorageResult<()> {
        self.monitors
            .write()
            .await
            .insert(monitor.id, monitor.clone());
        Ok(())
    }

    async fn delete(&self, monitor_id: MonitorId) -> StorageResult<bool> {
        Ok(self.monitors.write().await.remove(&monitor_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::result::ProbeStatus;
    use crate::monitor::NewMonitor;
    use chrono::Duration;

    fn entry(id: MonitorId, at: DateTime<Utc>, status: ProbeStatus) -> HistoryEntry {
        HistoryEntry {
            monitor_id: id,
            timestamp: at,
            status,
            response_time_ms: 12,
            message: "200 - OK".to_string(),
        }
    }

    #[tokio::test]
    async fn test_recent_is_most_recent_first_and_bounded() {
        let store = MemoryStore::new();
        let id = MonitorId::new();
        let base = Utc::now();

        for i in 0..5 {
            store
                .append(&entry(id, base + Duration::seconds(i), ProbeStatus::Up))
                .await
                .unwrap();
        }

        let recent = store.recent(id, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].timestamp, base + Duration::seconds(4));
        assert_eq!(recent[2].timestamp, base + Duration::seconds(2));

        assert!(store.recent(MonitorId::new(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_append_keeps_order() {
        let store = MemoryStore::new();
        let id = MonitorId::new();
        let base = Utc::now();

        store.append(&entry(id, base, ProbeStatus::Up)).await.unwrap();
        store
            .append(&entry(id, base - Duration::seconds(5), ProbeStatus::Down))
            .await
            .unwrap();

        let recent = store.recent(id, 10).await.unwrap();
        assert_eq!(recent[0].timestamp, base);
        assert_eq!(recent[1].status, ProbeStatus::Down);
    }

    #[tokio::test]
    async fn test_tally_since_respects_window() {
        let store = MemoryStore::new();
        let id = MonitorId::new();
        let now = Utc::now();

        store
            .append(&entry(id, now - Duration::hours(30), ProbeStatus::Down))
            .await
            .unwrap();
        store
            .append(&entry(id, now - Duration::hours(2), ProbeStatus::Up))
            .await
            .unwrap();
        store
            .append(&entry(id, now - Duration::hours(1), ProbeStatus::Down))
            .await
            .unwrap();

        let day = store.tally_since(id, now - Duration::hours(24)).await.unwrap();
        assert_eq!(day, WindowTally { up: 1, total: 2 });

        let month = store.tally_since(id, now - Duration::days(30)).await.unwrap();
        assert_eq!(month, WindowTally { up: 1, total: 3 });
    }

    #[tokio::test]
    async fn test_purge_and_prune() {
        let store = MemoryStore::new();
        let keep = MonitorId::new();
        let gone = MonitorId::new();
        let now = Utc::now();

        store
            .append(&entry(keep, now - Duration::days(40), ProbeStatus::Up))
            .await
            .unwrap();
        store.append(&entry(keep, now, ProbeStatus::Up)).await.unwrap();
        store.append(&entry(gone, now, ProbeStatus::Up)).await.unwrap();

        assert_eq!(store.purge_monitor(gone).await.unwrap(), 1);
        assert_eq!(store.purge_monitor(gone).await.unwrap(), 0);
        assert!(store.recent(gone, 10).await.unwrap().is_empty());

        assert_eq!(
            store.prune_before(now - Duration::days(30)).await.unwrap(),
            1
        );
        assert_eq!(store.recent(keep, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_monitor_table_operations() {
        let store = MemoryStore::new();
        let mut monitor = Monitor::new(NewMonitor::new("alice", "Site", "https://example.com", 60));

        store.upsert(&monitor).await.unwrap();
        monitor.name = "Renamed".to_string();
        store.upsert(&monitor).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Renamed");

        assert!(store.delete(monitor.id).await.unwrap());
        assert!(!store.delete(monitor.id).await.unwrap());
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
