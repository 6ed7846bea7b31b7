//! 任务调度器模块
//!
//! 每个监控项一个独立的定时任务，注册时立即执行首次检测。
//! 同一监控项同时最多只有一个探测在运行，上一次未完成时跳过本次触发；
//! 所有监控项共享一个有界的探测并发池。

use crate::config::types::GlobalConfig;
use crate::error::SchedulerError;
use crate::health::checker::Prober;
use crate::health::result::ProbeResult;
use crate::monitor::MonitorId;
use async_trait::async_trait;
use futures::FutureExt;
use reqwest::Url;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// 检测结果的写回接口
///
/// 调度器只通过该接口读取目标地址和写回结果，不直接持有监控项注册表
#[async_trait]
pub trait CheckSink: Send + Sync {
    /// 获取监控项当前的目标地址，监控项已删除时返回 `None`
    async fn target(&self, monitor_id: MonitorId) -> Option<Url>;

    /// 写回一次探测结果，监控项已删除时为空操作
    async fn apply_check_result(&self, monitor_id: MonitorId, result: ProbeResult);

    /// 检测流程内部故障时将监控项标记为降级
    async fn mark_degraded(&self, monitor_id: MonitorId, reason: String);
}

/// 调度器状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStatus {
    /// 已调度的监控项数量
    pub scheduled_monitors: usize,
    /// 正在执行的探测数量
    pub active_probes: usize,
    /// 探测并发上限
    pub max_concurrent_checks: usize,
    /// 调度器是否运行中
    pub is_running: bool,
}

/// 任务调度器trait，定义调度接口
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// 为监控项安装定时任务并立即触发首次检测
    ///
    /// 已存在的定时任务会被替换
    ///
    /// # 参数
    /// * `monitor_id` - 监控项ID
    /// * `interval` - 检测间隔
    async fn register(&self, monitor_id: MonitorId, interval: Duration)
        -> Result<(), SchedulerError>;

    /// 取消监控项的定时任务
    ///
    /// 返回后不会再有新的触发；正在执行的探测允许完成。
    /// 重复调用是安全的，监控项未被调度时返回 `false`
    async fn unregister(&self, monitor_id: MonitorId) -> bool;

    /// 修改检测间隔，不丢失已经到期或即将到期的触发
    async fn reschedule(
        &self,
        monitor_id: MonitorId,
        new_interval: Duration,
    ) -> Result<(), SchedulerError>;

    /// 停止调度器，取消所有定时任务
    async fn stop(&self);

    /// 获取调度器状态
    async fn status(&self) -> SchedulerStatus;

    /// 监控项是否已被调度
    async fn is_scheduled(&self, monitor_id: MonitorId) -> bool;
}

/// 调度参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// 探测并发上限
    pub max_concurrent_checks: usize,
    /// 单次探测超时上限
    pub max_probe_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_checks: 50,
            max_probe_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&GlobalConfig> for SchedulerSettings {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            max_concurrent_checks: config.max_concurrent_checks,
            max_probe_timeout: Duration::from_secs(config.max_probe_timeout_seconds),
        }
    }
}

/// 单个监控项的定时任务
struct ScheduleEntry {
    /// 检测间隔
    interval: Duration,
    /// 首次触发时间，之后的触发落在 `anchor + k * interval`
    anchor: Instant,
    /// 定时任务句柄
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    entries: HashMap<MonitorId, ScheduleEntry>,
    /// 每个监控项的单探测许可，探测任务仍持有时跨重新注册复用
    probe_guards: HashMap<MonitorId, Weak<Semaphore>>,
}

impl SchedulerState {
    fn probe_guard(&mut self, monitor_id: MonitorId) -> Arc<Semaphore> {
        self.probe_guards.retain(|_, guard| guard.strong_count() > 0);

        if let Some(guard) = self.probe_guards.get(&monitor_id).and_then(Weak::upgrade) {
            return guard;
        }

        let guard = Arc::new(Semaphore::new(1));
        self.probe_guards.insert(monitor_id, Arc::downgrade(&guard));
        guard
    }
}

/// 执行探测所需的共享上下文
#[derive(Clone)]
struct ProbeContext {
    prober: Arc<dyn Prober>,
    sink: Arc<dyn CheckSink>,
    pool: Arc<Semaphore>,
    max_probe_timeout: Duration,
}

impl ProbeContext {
    /// 执行一次探测并写回结果，探测任务内的panic会被捕获并标记为降级
    async fn run(&self, monitor_id: MonitorId, interval: Duration) {
        let job = async {
            let Ok(_slot) = self.pool.acquire().await else {
                return;
            };

            // 每次触发都读取最新地址，删除后直接跳过
            let Some(url) = self.sink.target(monitor_id).await else {
                debug!("监控项 {} 已不存在，跳过检测", monitor_id);
                return;
            };

            let timeout = interval.min(self.max_probe_timeout);
            debug!("开始检测监控项 {}: {}", monitor_id, url);
            let result = self.prober.probe(&url, timeout).await;

            if !result.status.is_healthy() {
                warn!("监控项 {} 检测失败: {}", monitor_id, result.message);
            }

            self.sink.apply_check_result(monitor_id, result).await;
        };

        if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
            let reason = panic_message(panic.as_ref());
            error!("监控项 {} 检测任务异常: {}", monitor_id, reason);
            self.sink
                .mark_degraded(monitor_id, format!("内部检测错误: {reason}"))
                .await;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知错误".to_string()
    }
}

/// 任务调度器实现
pub struct TaskScheduler {
    /// 探测共享上下文
    context: ProbeContext,
    /// 调度表
    state: Mutex<SchedulerState>,
    /// 探测并发上限
    max_concurrent: usize,
    /// 是否已停止
    stopped: AtomicBool,
}

impl TaskScheduler {
    /// 创建新的任务调度器
    ///
    /// # 参数
    /// * `prober` - 探测器
    /// * `sink` - 结果写回接口
    /// * `settings` - 调度参数
    ///
    /// # 返回
    /// * `Self` - 调度器实例
    pub fn new(
        prober: Arc<dyn Prober>,
        sink: Arc<dyn CheckSink>,
        settings: SchedulerSettings,
    ) -> Self {
        let max_concurrent = settings.max_concurrent_checks.max(1);

        Self {
            context: ProbeContext {
                prober,
                sink,
                pool: Arc::new(Semaphore::new(max_concurrent)),
                max_probe_timeout: settings.max_probe_timeout,
            },
            state: Mutex::new(SchedulerState::default()),
            max_concurrent,
            stopped: AtomicBool::new(false),
        }
    }

    /// 启动监控项的定时任务
    fn spawn_timer(
        &self,
        monitor_id: MonitorId,
        interval: Duration,
        start: Instant,
        probe_guard: Arc<Semaphore>,
    ) -> JoinHandle<()> {
        let context = self.context.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let Ok(permit) = probe_guard.clone().try_acquire_owned() else {
                    debug!("监控项 {} 上一次检测尚未完成，跳过本次触发", monitor_id);
                    continue;
                };

                let context = context.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    context.run(monitor_id, interval).await;
                });
            }
        })
    }

    async fn install(
        &self,
        monitor_id: MonitorId,
        interval: Duration,
        start: Instant,
    ) -> Result<Option<ScheduleEntry>, SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::ZeroInterval(monitor_id));
        }
        if start.checked_add(interval).is_none() {
            return Err(SchedulerError::IntervalOutOfRange(monitor_id));
        }
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::Stopped);
        }

        let mut state = self.state.lock().await;
        let probe_guard = state.probe_guard(monitor_id);
        let handle = self.spawn_timer(monitor_id, interval, start, probe_guard);

        Ok(state.entries.insert(
            monitor_id,
            ScheduleEntry {
                interval,
                anchor: start,
                handle,
            },
        ))
    }
}

/// 取消定时任务并等待其结束
async fn cancel(entry: ScheduleEntry) {
    entry.handle.abort();
    let _ = entry.handle.await;
}

/// 按旧的节奏计算下一次触发时间，超出 `Instant` 表示范围时返回 `None`
fn next_due(anchor: Instant, interval: Duration, now: Instant) -> Option<Instant> {
    // 首次触发尚未到达
    if anchor >= now {
        return Some(anchor);
    }

    let elapsed = now.duration_since(anchor);
    let into = elapsed.as_nanos() % interval.as_nanos();

    if into == 0 {
        Some(now)
    } else {
        now.checked_add(interval - Duration::from_nanos(into as u64))
    }
}

#[async_trait]
impl Scheduler for TaskScheduler {
    async fn register(
        &self,
        monitor_id: MonitorId,
        interval: Duration,
    ) -> Result<(), SchedulerError> {
        let replaced = self.install(monitor_id, interval, Instant::now()).await?;

        if let Some(previous) = replaced {
            cancel(previous).await;
            info!("已替换监控项 {} 的定时任务，间隔: {:?}", monitor_id, interval);
        } else {
            info!("已启动监控项 {} 的定时任务，间隔: {:?}", monitor_id, interval);
        }

        Ok(())
    }

    async fn unregister(&self, monitor_id: MonitorId) -> bool {
        let entry = self.state.lock().await.entries.remove(&monitor_id);

        match entry {
            Some(entry) => {
                cancel(entry).await;
                info!("已停止监控项 {} 的定时任务", monitor_id);
                true
            }
            None => {
                debug!("监控项 {} 没有定时任务，无需取消", monitor_id);
                false
            }
        }
    }

    async fn reschedule(
        &self,
        monitor_id: MonitorId,
        new_interval: Duration,
    ) -> Result<(), SchedulerError> {
        if new_interval.is_zero() {
            return Err(SchedulerError::ZeroInterval(monitor_id));
        }

        let start = {
            let state = self.state.lock().await;
            let entry = state
                .entries
                .get(&monitor_id)
                .ok_or(SchedulerError::NotScheduled(monitor_id))?;

            let now = Instant::now();
            [
                next_due(entry.anchor, entry.interval, now),
                now.checked_add(new_interval),
            ]
            .into_iter()
            .flatten()
            .min()
            .ok_or(SchedulerError::IntervalOutOfRange(monitor_id))?
        };

        if let Some(previous) = self.install(monitor_id, new_interval, start).await? {
            cancel(previous).await;
        }

        info!(
            "已调整监控项 {} 的检测间隔为 {:?}",
            monitor_id, new_interval
        );
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);

        let entries: Vec<ScheduleEntry> = {
            let mut state = self.state.lock().await;
            state.entries.drain().map(|(_, entry)| entry).collect()
        };

        let count = entries.len();
        for entry in entries {
            cancel(entry).await;
        }

        info!("调度器已停止，共取消 {} 个定时任务", count);
    }

    async fn status(&self) -> SchedulerStatus {
        let scheduled_monitors = self.state.lock().await.entries.len();

        SchedulerStatus {
            scheduled_monitors,
            active_probes: self.max_concurrent - self.context.pool.available_permits(),
            max_concurrent_checks: self.max_concurrent,
            is_running: !self.stopped.load(Ordering::SeqCst),
        }
    }

    async fn is_scheduled(&self, monitor_id: MonitorId) -> bool {
        self.state.lock().await.entries.contains_key(&monitor_id)
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        for (_, entry) in self.state.get_mut().entries.drain() {
            entry.handle.abort();
        }
    }
}
