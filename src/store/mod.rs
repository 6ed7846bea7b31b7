//! 持久化模块
//!
//! 定义检测历史与监控项的存储接口，提供内存和SQLite两种实现

pub mod memory;
pub mod sqlite;

use crate::error::StorageResult;
use crate::health::result::{ProbeResult, ProbeStatus};
use crate::monitor::{Monitor, MonitorId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// 一条检测历史记录，写入后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// 所属监控项
    pub monitor_id: MonitorId,
    /// 检测时间
    pub timestamp: DateTime<Utc>,
    /// 检测状态
    pub status: ProbeStatus,
    /// 响应时间（毫秒）
    pub response_time_ms: u64,
    /// 检测说明
    pub message: String,
}

impl HistoryEntry {
    /// 由探测结果生成历史记录
    pub fn from_probe(monitor_id: MonitorId, result: &ProbeResult) -> Self {
        Self {
            monitor_id,
            timestamp: result.checked_at,
            status: result.status,
            response_time_ms: result.response_time_ms(),
            message: result.message.clone(),
        }
    }

    /// 替换时间戳
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// 时间窗口内的检测计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowTally {
    /// 状态为 up 的次数
    pub up: u64,
    /// 总次数
    pub total: u64,
}

/// 检测历史存储接口
///
/// 每个监控项的记录按时间戳全序，只追加，仅在监控项删除或超过保留期时移除
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 追加一条记录，返回时已落盘
    async fn append(&self, entry: &HistoryEntry) -> StorageResult<()>;

    /// 获取最近的记录，按时间倒序，最多 `limit` 条
    async fn recent(&self, monitor_id: MonitorId, limit: usize)
        -> StorageResult<Vec<HistoryEntry>>;

    /// 统计 `since` 之后（含）的记录
    async fn tally_since(
        &self,
        monitor_id: MonitorId,
        since: DateTime<Utc>,
    ) -> StorageResult<WindowTally>;

    /// 删除监控项的全部记录，返回删除条数
    async fn purge_monitor(&self, monitor_id: MonitorId) -> StorageResult<u64>;

    /// 删除早于 `cutoff` 的记录，返回删除条数
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64>;
}

/// 监控项存储接口
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// 加载全部监控项
    async fn load_all(&self) -> StorageResult<Vec<Monitor>>;

    /// 插入或更新监控项
    async fn upsert(&self, monitor: &Monitor) -> StorageResult<()>;

    /// 删除监控项，返回是否存在
    async fn delete(&self, monitor_id: MonitorId) -> StorageResult<bool>;
}
