//! 可用率统计
//!
//! 基于历史记录计算最近24小时与30天窗口内的可用率。
//! 窗口内没有任何记录时可用率定义为 100.0。

use crate::error::StorageResult;
use crate::monitor::MonitorId;
use crate::store::{HistoryEntry, HistoryStore, WindowTally};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 24小时窗口
pub const WINDOW_24H: Duration = Duration::hours(24);

/// 30天窗口
pub const WINDOW_30D: Duration = Duration::days(30);

/// 两个窗口的可用率（百分比，保留两位小数）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UptimeWindows {
    pub uptime_24h: f64,
    pub uptime_30d: f64,
}

impl Default for UptimeWindows {
    fn default() -> Self {
        Self {
            uptime_24h: 100.0,
            uptime_30d: 100.0,
        }
    }
}

/// 可用率计算器
#[derive(Clone)]
pub struct UptimeAggregator {
    history: Arc<dyn HistoryStore>,
}

impl UptimeAggregator {
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self { history }
    }

    /// 在新记录写入后重新计算窗口，以该记录的时间为窗口终点
    ///
    /// # 参数
    /// * `monitor_id` - 监控项ID
    /// * `latest` - 刚写入的记录
    ///
    /// # 返回
    /// * `StorageResult<UptimeWindows>` - 最新可用率
    pub async fn update(
        &self,
        monitor_id: MonitorId,
        latest: &HistoryEntry,
    ) -> StorageResult<UptimeWindows> {
        self.compute_at(monitor_id, latest.timestamp).await
    }

    /// 计算以 `now` 为终点的窗口可用率
    pub async fn compute_at(
        &self,
        monitor_id: MonitorId,
        now: DateTime<Utc>,
    ) -> StorageResult<UptimeWindows> {
        let day = self.history.tally_since(monitor_id, now - WINDOW_24H).await?;
        let month = self.history.tally_since(monitor_id, now - WINDOW_30D).await?;

        Ok(UptimeWindows {
            uptime_24h: uptime_percentage(day),
            uptime_30d: uptime_percentage(month),
        })
    }
}

/// 计算可用率百分比
///
/// 没有记录时返回 100.0，结果限制在 [0, 100] 并保留两位小数
pub fn uptime_percentage(tally: WindowTally) -> f64 {
    if tally.total == 0 {
        return 100.0;
    }

    let ratio = tally.up.min(tally.total) as f64 / tally.total as f64;
    let percentage = (ratio * 100.0).clamp(0.0, 100.0);
    (percentage * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::result::ProbeStatus;
    use crate::store::MemoryStore;

    #[test]
    fn test_uptime_percentage() {
        assert_eq!(uptime_percentage(WindowTally { up: 0, total: 0 }), 100.0);
        assert_eq!(uptime_percentage(WindowTally { up: 3, total: 3 }), 100.0);
        assert_eq!(uptime_percentage(WindowTally { up: 0, total: 4 }), 0.0);
        assert_eq!(uptime_percentage(WindowTally { up: 1, total: 3 }), 33.33);
        assert_eq!(uptime_percentage(WindowTally { up: 2, total: 3 }), 66.67);
        assert_eq!(uptime_percentage(WindowTally { up: 9, total: 4 }), 100.0);
    }

    #[tokio::test]
    async fn test_windows_only_count_recent_entries() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = UptimeAggregator::new(store.clone());
        let id = MonitorId::new();
        let now = Utc::now();

        let push = |offset: Duration, status: ProbeStatus| HistoryEntry {
            monitor_id: id,
            timestamp: now - offset,
            status,
            response_time_ms: 10,
            message: String::new(),
        };

        // 10天前的失败只计入30天窗口
        store.append(&push(Duration::days(10), ProbeStatus::Down)).await.unwrap();
        // 40天前的失败不计入任何窗口
        store.append(&push(Duration::days(40), ProbeStatus::Down)).await.unwrap();
        store.append(&push(Duration::hours(2), ProbeStatus::Up)).await.unwrap();
        let latest = push(Duration::zero(), ProbeStatus::Up);
        store.append(&latest).await.unwrap();

        let windows = aggregator.update(id, &latest).await.unwrap();
        assert_eq!(windows.uptime_24h, 100.0);
        assert_eq!(windows.uptime_30d, 66.67);
    }

    #[tokio::test]
    async fn test_empty_window_is_optimistic() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = UptimeAggregator::new(store.clone());
        let id = MonitorId::new();
        let now = Utc::now();

        store
            .append(&HistoryEntry {
                monitor_id: id,
                timestamp: now - Duration::days(3),
                status: ProbeStatus::Down,
                response_time_ms: 0,
                message: "Connection refused".to_string(),
            })
            .await
            .unwrap();

        let windows = aggregator.compute_at(id, now).await.unwrap();
        assert_eq!(windows.uptime_24h, 100.0);
        assert_eq!(windows.uptime_30d, 0.0);

        let fresh = aggregator.compute_at(MonitorId::new(), now).await.unwrap();
        assert_eq!(fresh, UptimeWindows::default());
    }
}
