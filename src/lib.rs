//! Uptime Vitals - 可用性监控引擎
//!
//! 这是一个用Rust编写的可用性监控引擎，支持：
//! - 每个监控项独立调度的HTTP/HTTPS探测
//! - 探测超时与慢探测跳过
//! - 检测历史与24小时/30天可用率统计
//! - 内存或SQLite持久化
//! - 配置热重载
//! - 结构化日志记录

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod health;
pub mod logging;
pub mod monitor;
pub mod store;

#[cfg(test)]
mod logging_tests;

// 重新导出主要类型
pub use config::{Config, GlobalConfig, MonitorConfig};
pub use error::UptimeError;
pub use health::{HttpProber, ProbeResult, ProbeStatus, Prober, UptimeWindows};
pub use monitor::{Monitor, MonitorId, MonitorRegistry, MonitorStatus, NewMonitor, OwnerId};
pub use store::{HistoryEntry, HistoryStore, MemoryStore, MonitorStore, SqliteStore};

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
