//! 核心模块
//!
//! 包含应用程序的核心逻辑和生命周期管理

pub mod app;
pub mod foreground_service;
pub mod retention;
pub mod service;

// 重新导出主要类型
pub use app::execute_command;
pub use foreground_service::ForegroundService;
pub use retention::{HistoryPruner, RetentionSettings};
pub use service::{apply_config_update, sync_monitor, ServiceComponents, ServiceLauncher};
