//! 监控项注册表
//!
//! `MonitorRegistry` 负责监控项的创建、修改和删除，并同步维护调度器中的定时任务。
//! `MonitorTable` 保存监控项的内存快照，同时作为调度器的结果写回接口。
//! 注册表持有调度器，调度器只通过 `CheckSink` 持有监控项表，不存在循环引用。
//!
//! 每个监控项有两把锁：`writes` 串行化该监控项的持久化写入和调度器操作，
//! `state` 只在读取或替换快照时短暂持有，读路径不会被存储 I/O 阻塞。

use crate::error::{Result, SchedulerError, StorageResult, UptimeError};
use crate::health::checker::Prober;
use crate::health::result::ProbeResult;
use crate::health::scheduler::{CheckSink, Scheduler, SchedulerSettings, TaskScheduler};
use crate::health::uptime::UptimeAggregator;
use crate::monitor::model::{
    validate_interval, validate_name, validate_target, Monitor, MonitorId, MonitorUpdate,
    NewMonitor, OwnerId,
};
use crate::store::{HistoryEntry, HistoryStore, MonitorStore};
use async_trait::async_trait;
use reqwest::Url;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// 单个监控项的状态
struct SlotState {
    monitor: Monitor,
    /// 删除流程已完成，之后到达的检测结果全部丢弃
    removed: bool,
}

/// 单个监控项的内存槽位
struct MonitorSlot {
    /// 持有期间 `removed` 不会变化
    writes: Mutex<()>,
    state: RwLock<SlotState>,
}

type Slot = Arc<MonitorSlot>;

impl MonitorSlot {
    fn new(monitor: Monitor) -> Slot {
        Arc::new(Self {
            writes: Mutex::new(()),
            state: RwLock::new(SlotState {
                monitor,
                removed: false,
            }),
        })
    }

    /// 当前快照，已删除时返回 `None`
    async fn current(&self) -> Option<Monitor> {
        let state = self.state.read().await;
        (!state.removed).then(|| state.monitor.clone())
    }

    async fn commit(&self, monitor: Monitor) {
        self.state.write().await.monitor = monitor;
    }

    async fn mark_removed(&self) {
        self.state.write().await.removed = true;
    }
}

/// 失败时重试一次
async fn retry_once<T, F, Fut>(operation: &str, monitor_id: MonitorId, mut f: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    match f().await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("监控项 {} {}失败，重试一次: {}", monitor_id, operation, e);
            f().await
        }
    }
}

/// 监控项内存表
pub struct MonitorTable {
    slots: RwLock<HashMap<MonitorId, Slot>>,
    history: Arc<dyn HistoryStore>,
    store: Arc<dyn MonitorStore>,
    aggregator: UptimeAggregator,
}

impl MonitorTable {
    /// 创建监控项表
    ///
    /// # 参数
    /// * `history` - 检测历史存储
    /// * `store` - 监控项存储
    pub fn new(history: Arc<dyn HistoryStore>, store: Arc<dyn MonitorStore>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            aggregator: UptimeAggregator::new(history.clone()),
            history,
            store,
        }
    }

    async fn slot(&self, monitor_id: MonitorId) -> Option<Slot> {
        self.slots.read().await.get(&monitor_id).cloned()
    }

    /// 发布槽位，调用方通常已持有该槽位的写入锁
    async fn publish(&self, slot: &Slot) {
        let id = slot.state.read().await.monitor.id;
        self.slots.write().await.insert(id, slot.clone());
    }

    async fn unpublish(&self, monitor_id: MonitorId) {
        self.slots.write().await.remove(&monitor_id);
    }

    async fn contains(&self, monitor_id: MonitorId) -> bool {
        self.slots.read().await.contains_key(&monitor_id)
    }

    /// 获取监控项快照
    pub async fn get(&self, monitor_id: MonitorId) -> Option<Monitor> {
        self.slot(monitor_id).await?.current().await
    }

    /// 获取所有监控项快照，按创建时间排序
    pub async fn snapshot(&self) -> Vec<Monitor> {
        let slots: Vec<Slot> = self.slots.read().await.values().cloned().collect();

        let mut monitors = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(monitor) = slot.current().await {
                monitors.push(monitor);
            }
        }
        monitors.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        monitors
    }

    /// 写回检测结果
    ///
    /// 历史写入和监控项持久化失败时各重试一次，仍失败则记录日志后丢弃
    pub async fn apply(&self, monitor_id: MonitorId, result: ProbeResult) {
        let Some(slot) = self.slot(monitor_id).await else {
            debug!("监控项 {} 已删除，丢弃检测结果", monitor_id);
            return;
        };

        let _writes = slot.writes.lock().await;
        let Some(mut monitor) = slot.current().await else {
            debug!("监控项 {} 已删除，丢弃检测结果", monitor_id);
            return;
        };

        // 墙上时钟回拨时保持同一监控项的历史有序
        let timestamp = match monitor.last_checked {
            Some(last) if last > result.checked_at => last,
            _ => result.checked_at,
        };
        let entry = HistoryEntry::from_probe(monitor_id, &result).at(timestamp);

        let appended = match retry_once("写入检测历史", monitor_id, || {
            self.history.append(&entry)
        })
        .await
        {
            Ok(()) => true,
            Err(e) => {
                error!("监控项 {} 写入检测历史失败，已丢弃本次记录: {}", monitor_id, e);
                false
            }
        };

        let uptime = if appended {
            match self.aggregator.update(monitor_id, &entry).await {
                Ok(windows) => Some(windows),
                Err(e) => {
                    warn!("监控项 {} 可用率计算失败: {}", monitor_id, e);
                    None
                }
            }
        } else {
            None
        };

        monitor.record_check(&entry, uptime);

        if let Err(e) = retry_once("保存监控项", monitor_id, || self.store.upsert(&monitor)).await {
            error!("监控项 {} 保存检测状态失败: {}", monitor_id, e);
        }
        slot.commit(monitor).await;

        debug!(
            "监控项 {} 检测完成: {} ({}ms)",
            monitor_id, entry.status, entry.response_time_ms
        );
    }

    /// 标记降级并持久化，调用方需持有该槽位的写入锁
    async fn degrade(&self, slot: &MonitorSlot, mut monitor: Monitor, reason: String) {
        let monitor_id = monitor.id;
        monitor.mark_degraded(reason);
        if let Err(e) = retry_once("保存监控项", monitor_id, || self.store.upsert(&monitor)).await {
            error!("监控项 {} 保存降级状态失败: {}", monitor_id, e);
        }
        slot.commit(monitor).await;
    }
}

#[async_trait]
impl CheckSink for MonitorTable {
    async fn target(&self, monitor_id: MonitorId) -> Option<Url> {
        self.slot(monitor_id).await?.current().await?.target_url()
    }

    async fn apply_check_result(&self, monitor_id: MonitorId, result: ProbeResult) {
        self.apply(monitor_id, result).await;
    }

    async fn mark_degraded(&self, monitor_id: MonitorId, reason: String) {
        let Some(slot) = self.slot(monitor_id).await else {
            return;
        };

        let _writes = slot.writes.lock().await;
        if let Some(monitor) = slot.current().await {
            self.degrade(&slot, monitor, reason).await;
        }
    }
}

/// 监控项注册表
///
/// 所有调度器调用都在对应监控项的写入锁内进行，删除完成后不会再有定时任务被安装
pub struct MonitorRegistry {
    table: Arc<MonitorTable>,
    scheduler: Arc<dyn Scheduler>,
    min_interval_secs: AtomicU64,
}

impl MonitorRegistry {
    /// 使用已有的监控项表和调度器创建注册表
    pub fn new(
        table: Arc<MonitorTable>,
        scheduler: Arc<dyn Scheduler>,
        min_interval_secs: u64,
    ) -> Self {
        Self {
            table,
            scheduler,
            min_interval_secs: AtomicU64::new(min_interval_secs),
        }
    }

    /// 组装监控项表、任务调度器和注册表
    ///
    /// # 参数
    /// * `history` - 检测历史存储
    /// * `store` - 监控项存储
    /// * `prober` - 探测器
    /// * `settings` - 调度参数
    /// * `min_interval_secs` - 最小检测间隔
    pub fn build(
        history: Arc<dyn HistoryStore>,
        store: Arc<dyn MonitorStore>,
        prober: Arc<dyn Prober>,
        settings: SchedulerSettings,
        min_interval_secs: u64,
    ) -> Self {
        let table = Arc::new(MonitorTable::new(history, store));
        let scheduler = Arc::new(TaskScheduler::new(prober, table.clone(), settings));
        Self::new(table, scheduler, min_interval_secs)
    }

    pub fn table(&self) -> &Arc<MonitorTable> {
        &self.table
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn min_interval_secs(&self) -> u64 {
        self.min_interval_secs.load(Ordering::Relaxed)
    }

    /// 修改最小检测间隔，只影响之后的创建和修改
    pub fn set_min_interval_secs(&self, min_interval_secs: u64) {
        self.min_interval_secs
            .store(min_interval_secs, Ordering::Relaxed);
    }

    /// 创建监控项并立即开始调度
    ///
    /// # 参数
    /// * `input` - 创建参数
    ///
    /// # 返回
    /// * `Result<Monitor>` - 新建的监控项，状态为 unknown
    pub async fn create(&self, input: NewMonitor) -> Result<Monitor> {
        validate_name(&input.name)?;
        validate_target(&input.url)?;
        validate_interval(input.interval_secs, self.min_interval_secs())?;

        let monitor = Monitor::new(input);
        self.table.store.upsert(&monitor).await?;

        // 发布前先持有写入锁，并发的删除只能在调度完成后进行
        let slot = MonitorSlot::new(monitor.clone());
        let _writes = slot.writes.lock().await;
        self.table.publish(&slot).await;

        if !monitor.paused {
            if let Err(e) = self.schedule(&monitor).await {
                slot.mark_removed().await;
                self.table.unpublish(monitor.id).await;
                if let Err(store_err) = self.table.store.delete(monitor.id).await {
                    warn!("回滚监控项 {} 失败: {}", monitor.id, store_err);
                }
                return Err(e);
            }
        }

        info!(
            "已创建监控项: {} ({}) -> {}，间隔 {}秒",
            monitor.name, monitor.id, monitor.url, monitor.interval_secs
        );
        Ok(monitor)
    }

    /// 获取监控项
    pub async fn get(&self, monitor_id: MonitorId) -> Result<Monitor> {
        self.table
            .get(monitor_id)
            .await
            .ok_or(UptimeError::NotFound(monitor_id))
    }

    /// 获取用户的所有监控项，按创建时间排序
    pub async fn list_by_owner(&self, owner: &OwnerId) -> Vec<Monitor> {
        self.table
            .snapshot()
            .await
            .into_iter()
            .filter(|m| &m.owner == owner)
            .collect()
    }

    /// 获取所有监控项
    pub async fn list_all(&self) -> Vec<Monitor> {
        self.table.snapshot().await
    }

    /// 按名称查找用户的监控项
    pub async fn find_by_name(&self, owner: &OwnerId, name: &str) -> Option<Monitor> {
        self.list_by_owner(owner)
            .await
            .into_iter()
            .find(|m| m.name == name)
    }

    /// 获取最近的检测历史，按时间倒序
    ///
    /// 直接读取历史存储，对已不在内存中的监控项同样有效
    pub async fn recent(&self, monitor_id: MonitorId, limit: usize) -> Result<Vec<HistoryEntry>> {
        Ok(self.table.history.recent(monitor_id, limit).await?)
    }

    /// 写回检测结果，监控项已删除时为空操作
    pub async fn apply_check_result(&self, monitor_id: MonitorId, result: ProbeResult) {
        self.table.apply(monitor_id, result).await;
    }

    /// 删除监控项
    ///
    /// 在监控项写入锁内先取消定时任务，再删除持久化数据和历史。
    /// 仍在执行的探测允许完成，其结果会被丢弃。
    pub async fn delete(&self, monitor_id: MonitorId, owner: &OwnerId) -> Result<()> {
        let slot = self.owned_slot(monitor_id, owner).await?;

        let _writes = slot.writes.lock().await;
        let monitor = slot
            .current()
            .await
            .ok_or(UptimeError::NotFound(monitor_id))?;

        self.scheduler.unregister(monitor_id).await;

        if let Err(e) = self.table.store.delete(monitor_id).await {
            if !monitor.paused {
                if let Err(schedule_err) = self.schedule(&monitor).await {
                    error!("监控项 {} 恢复调度失败: {}", monitor_id, schedule_err);
                }
            }
            return Err(e.into());
        }

        match self.table.history.purge_monitor(monitor_id).await {
            Ok(count) => debug!("已清除监控项 {} 的 {} 条历史记录", monitor_id, count),
            Err(e) => warn!("清除监控项 {} 的历史记录失败: {}", monitor_id, e),
        }

        slot.mark_removed().await;
        self.table.unpublish(monitor_id).await;
        info!("已删除监控项: {} ({})", monitor.name, monitor_id);
        Ok(())
    }

    /// 修改监控项
    ///
    /// 间隔变化会重新调度；地址变化在下一次触发时生效
    pub async fn update(
        &self,
        monitor_id: MonitorId,
        owner: &OwnerId,
        update: MonitorUpdate,
    ) -> Result<Monitor> {
        let slot = self.owned_slot(monitor_id, owner).await?;

        if let Some(name) = &update.name {
            validate_name(name)?;
        }
        if let Some(url) = &update.url {
            validate_target(url)?;
        }
        if let Some(interval) = update.interval_secs {
            validate_interval(interval, self.min_interval_secs())?;
        }

        let _writes = slot.writes.lock().await;
        let mut next = slot
            .current()
            .await
            .ok_or(UptimeError::NotFound(monitor_id))?;

        if let Some(name) = update.name {
            next.name = name.trim().to_string();
        }
        if let Some(url) = update.url {
            next.url = url.trim().to_string();
        }
        let interval_changed = update
            .interval_secs
            .is_some_and(|interval| interval != next.interval_secs);
        if let Some(interval) = update.interval_secs {
            next.interval_secs = interval;
        }

        self.table.store.upsert(&next).await?;
        slot.commit(next.clone()).await;

        if interval_changed && !next.paused {
            let interval = Duration::from_secs(next.interval_secs);
            match self.scheduler.reschedule(monitor_id, interval).await {
                Ok(()) => {}
                Err(SchedulerError::NotScheduled(_)) => {
                    self.scheduler.register(monitor_id, interval).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!("已更新监控项: {} ({})", next.name, monitor_id);
        Ok(next)
    }

    /// 暂停监控项，暂停期间没有定时任务
    pub async fn pause(&self, monitor_id: MonitorId, owner: &OwnerId) -> Result<Monitor> {
        self.set_paused(monitor_id, owner, true).await
    }

    /// 恢复监控项，立即执行一次检测
    pub async fn resume(&self, monitor_id: MonitorId, owner: &OwnerId) -> Result<Monitor> {
        self.set_paused(monitor_id, owner, false).await
    }

    async fn set_paused(
        &self,
        monitor_id: MonitorId,
        owner: &OwnerId,
        paused: bool,
    ) -> Result<Monitor> {
        let slot = self.owned_slot(monitor_id, owner).await?;

        let _writes = slot.writes.lock().await;
        let mut monitor = slot
            .current()
            .await
            .ok_or(UptimeError::NotFound(monitor_id))?;
        if monitor.paused == paused {
            return Ok(monitor);
        }

        monitor.paused = paused;
        self.table.store.upsert(&monitor).await?;
        slot.commit(monitor.clone()).await;

        if paused {
            self.scheduler.unregister(monitor_id).await;
            info!("已暂停监控项: {} ({})", monitor.name, monitor_id);
        } else {
            self.schedule(&monitor).await?;
            info!("已恢复监控项: {} ({})", monitor.name, monitor_id);
        }

        Ok(monitor)
    }

    /// 删除用户的全部监控项
    ///
    /// # 返回
    /// * `Result<usize>` - 删除的数量
    pub async fn delete_owner(&self, owner: &OwnerId) -> Result<usize> {
        let mut deleted = 0;
        for monitor in self.list_by_owner(owner).await {
            match self.delete(monitor.id, owner).await {
                Ok(()) => deleted += 1,
                Err(UptimeError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        info!("已删除用户 {} 的 {} 个监控项", owner, deleted);
        Ok(deleted)
    }

    /// 从持久化存储恢复监控项，并为未暂停的监控项启动定时任务
    ///
    /// 单个监控项调度失败时记录日志并标记为降级，不影响其余监控项
    ///
    /// # 返回
    /// * `Result<usize>` - 恢复的监控项数量
    pub async fn restore(&self) -> Result<usize> {
        let monitors = self.table.store.load_all().await?;

        let mut restored = 0;
        let mut degraded = 0;
        for monitor in monitors {
            if self.table.contains(monitor.id).await {
                continue;
            }

            let slot = MonitorSlot::new(monitor.clone());
            let _writes = slot.writes.lock().await;
            self.table.publish(&slot).await;
            restored += 1;

            if monitor.paused {
                continue;
            }
            if let Err(e) = self.schedule(&monitor).await {
                error!("监控项 {} 恢复调度失败，已标记为降级: {}", monitor.id, e);
                self.table
                    .degrade(&slot, monitor, format!("调度失败: {e}"))
                    .await;
                degraded += 1;
            }
        }

        if degraded > 0 {
            warn!("已恢复 {} 个监控项，其中 {} 个无法调度", restored, degraded);
        } else {
            info!("已恢复 {} 个监控项", restored);
        }
        Ok(restored)
    }

    async fn schedule(&self, monitor: &Monitor) -> Result<()> {
        self.scheduler
            .register(monitor.id, Duration::from_secs(monitor.interval_secs))
            .await?;
        Ok(())
    }

    /// 获取监控项并校验所有者
    async fn owned_slot(&self, monitor_id: MonitorId, owner: &OwnerId) -> Result<Slot> {
        let slot = self
            .table
            .slot(monitor_id)
            .await
            .ok_or(UptimeError::NotFound(monitor_id))?;

        let monitor = slot
            .current()
            .await
            .ok_or(UptimeError::NotFound(monitor_id))?;
        if &monitor.owner != owner {
            return Err(UptimeError::Forbidden {
                monitor_id,
                owner: owner.clone(),
            });
        }

        Ok(slot)
    }
}
