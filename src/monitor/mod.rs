//! 监控项模块
//!
//! 监控项定义、输入校验以及作为唯一数据源的监控项注册表

pub mod model;
pub mod registry;

pub use model::{
    validate_interval, validate_name, validate_target, Monitor, MonitorId, MonitorStatus,
    MonitorUpdate, NewMonitor, OwnerId, MAX_INTERVAL_SECS,
};
pub use registry::{MonitorRegistry, MonitorTable};
