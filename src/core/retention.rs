//! 检测历史保留
//!
//! 后台任务按固定周期删除超过保留期的历史记录，参数可在运行时调整

use crate::config::GlobalConfig;
use crate::store::HistoryStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// 历史清理参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionSettings {
    /// 保留天数
    pub retention_days: u32,
    /// 清理周期
    pub prune_interval: Duration,
}

impl From<&GlobalConfig> for RetentionSettings {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            retention_days: config.history_retention_days,
            prune_interval: Duration::from_secs(config.history_prune_interval_seconds),
        }
    }
}

/// 历史清理任务
pub struct HistoryPruner {
    settings: watch::Sender<RetentionSettings>,
    handle: JoinHandle<()>,
}

impl HistoryPruner {
    /// 启动清理任务，启动时立即执行一次
    ///
    /// # 参数
    /// * `history` - 检测历史存储
    /// * `settings` - 初始清理参数
    pub fn start(history: Arc<dyn HistoryStore>, settings: RetentionSettings) -> Self {
        let (sender, receiver) = watch::channel(settings);
        let handle = tokio::spawn(Self::run(history, receiver));

        info!(
            "历史清理任务已启动，保留 {} 天，周期 {:?}",
            settings.retention_days, settings.prune_interval
        );
        Self {
            settings: sender,
            handle,
        }
    }

    /// 更新清理参数，从下一个周期开始生效
    pub fn update(&self, settings: RetentionSettings) {
        self.settings.send_if_modified(|current| {
            if *current == settings {
                return false;
            }
            info!(
                "历史清理参数已更新: 保留 {} 天，周期 {:?}",
                settings.retention_days, settings.prune_interval
            );
            *current = settings;
            true
        });
    }

    /// 当前清理参数
    pub fn settings(&self) -> RetentionSettings {
        *self.settings.borrow()
    }

    /// 停止清理任务
    pub fn stop(&self) {
        self.handle.abort();
    }

    async fn run(history: Arc<dyn HistoryStore>, mut settings: watch::Receiver<RetentionSettings>) {
        loop {
            let current = *settings.borrow_and_update();
            prune_once(history.as_ref(), current.retention_days).await;

            tokio::select! {
                _ = tokio::time::sleep(current.prune_interval) => {}
                changed = settings.changed() => {
                    if changed.is_err() {
                        debug!("清理参数发送端已关闭，停止历史清理");
                        return;
                    }
                }
            }
        }
    }
}

impl Drop for HistoryPruner {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// 删除超过保留期的历史记录
///
/// # 返回
/// * `u64` - 删除条数，失败时为 0
pub async fn prune_once(history: &dyn HistoryStore, retention_days: u32) -> u64 {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));

    match history.prune_before(cutoff).await {
        Ok(0) => {
            debug!("没有超过保留期的历史记录");
            0
        }
        Ok(removed) => {
            info!("已清理 {} 条早于 {} 的历史记录", removed, cutoff);
            removed
        }
        Err(e) => {
            error!("清理历史记录失败: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ProbeStatus;
    use crate::monitor::MonitorId;
    use crate::store::{HistoryEntry, MemoryStore};

    fn entry(monitor_id: MonitorId, days_ago: i64) -> HistoryEntry {
        HistoryEntry {
            monitor_id,
            timestamp: Utc::now() - chrono::Duration::days(days_ago),
            status: ProbeStatus::Up,
            response_time_ms: 10,
            message: "200 - OK".to_string(),
        }
    }

    #[tokio::test]
    async fn test_prune_once_removes_only_expired_entries() {
        let store = MemoryStore::new();
        let id = MonitorId::new();
        store.append(&entry(id, 45)).await.unwrap();
        store.append(&entry(id, 31)).await.unwrap();
        store.append(&entry(id, 1)).await.unwrap();

        assert_eq!(prune_once(&store, 30).await, 2);
        assert_eq!(store.recent(id, 10).await.unwrap().len(), 1);
        assert_eq!(prune_once(&store, 30).await, 0);
    }

    #[tokio::test]
    async fn test_pruner_runs_immediately_and_accepts_updates() {
        let store = Arc::new(MemoryStore::new());
        let id = MonitorId::new();
        store.append(&entry(id, 40)).await.unwrap();
        store.append(&entry(id, 35)).await.unwrap();

        let settings = RetentionSettings {
            retention_days: 38,
            prune_interval: Duration::from_secs(3600),
        };
        let pruner = HistoryPruner::start(store.clone(), settings);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.recent(id, 10).await.unwrap().len(), 1);

        // 参数变化会立即触发下一轮清理
        pruner.update(RetentionSettings {
            retention_days: 30,
            ..settings
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.recent(id, 10).await.unwrap().is_empty());
        assert_eq!(pruner.settings().retention_days, 30);

        pruner.stop();
    }
}
