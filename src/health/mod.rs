//! 健康检测模块
//!
//! 提供HTTP探测、检测结果、可用率统计和按监控项的任务调度

pub mod checker;
pub mod result;
pub mod scheduler;
pub mod uptime;

// 重新导出主要类型
pub use checker::{HttpProber, Prober};
pub use result::{ProbeResult, ProbeStatus};
pub use scheduler::{CheckSink, Scheduler, SchedulerSettings, SchedulerStatus, TaskScheduler};
pub use uptime::{UptimeAggregator, UptimeWindows};
