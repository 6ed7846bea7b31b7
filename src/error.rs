//! 错误处理模块
//!
//! 定义监控引擎的统一错误类型。探测失败不属于错误，会被归类为 `down` 结果。

use crate::monitor::{MonitorId, OwnerId};
use thiserror::Error;

/// Uptime Vitals 的主要错误类型
#[derive(Error, Debug)]
pub enum UptimeError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 输入校验失败
    #[error("校验失败: {0}")]
    Validation(#[from] ValidationError),

    /// 监控项不存在
    #[error("监控项不存在: {0}")]
    NotFound(MonitorId),

    /// 所有者不匹配
    #[error("用户 {owner} 无权操作监控项 {monitor_id}")]
    Forbidden {
        monitor_id: MonitorId,
        owner: OwnerId,
    },

    /// 调度器错误
    #[error("调度错误: {0}")]
    Scheduler(#[from] SchedulerError),

    /// 持久化错误
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    /// HTTP客户端初始化错误
    #[error("HTTP客户端初始化失败: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 监控项输入校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// URL 无法解析或不是绝对地址
    #[error("无效的URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// 仅支持 http/https
    #[error("不支持的URL协议: {scheme}")]
    UnsupportedScheme { scheme: String },

    /// 检测间隔低于下限
    #[error("检测间隔 {interval}秒 低于最小值 {minimum}秒")]
    IntervalTooShort { interval: u64, minimum: u64 },

    /// 检测间隔超过上限
    #[error("检测间隔 {interval}秒 超过最大值 {maximum}秒")]
    IntervalTooLong { interval: u64, maximum: u64 },

    /// 名称为空
    #[error("监控项名称不能为空")]
    EmptyName,
}

/// 存储层错误
#[derive(Error, Debug)]
pub enum StorageError {
    /// 数据库错误
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    /// 数据库迁移失败
    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// 存储中的数据无法解析
    #[error("存储数据损坏: {0}")]
    Corrupted(String),

    /// 数值超出存储列的表示范围
    #[error("数值超出存储范围: {0}")]
    OutOfRange(String),

    /// 存储暂时不可用
    #[error("存储不可用: {0}")]
    Unavailable(String),
}

/// 调度器错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// 监控项没有对应的定时任务
    #[error("监控项未被调度: {0}")]
    NotScheduled(MonitorId),

    /// 检测间隔为零
    #[error("监控项 {0} 的检测间隔必须大于零")]
    ZeroInterval(MonitorId),

    /// 检测间隔过大，无法计算触发时间
    #[error("监控项 {0} 的检测间隔超出可调度范围")]
    IntervalOutOfRange(MonitorId),

    /// 调度器已停止
    #[error("调度器已停止")]
    Stopped,
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, UptimeError>;

/// 存储层结果类型别名
pub type StorageResult<T> = std::result::Result<T, StorageError>;
