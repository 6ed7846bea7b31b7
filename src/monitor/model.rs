//! 监控项数据结构
//!
//! 定义监控项、标识类型、状态枚举以及创建/更新时的输入校验

use crate::error::ValidationError;
use crate::health::result::ProbeStatus;
use crate::health::uptime::UptimeWindows;
use crate::store::HistoryEntry;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 监控项唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorId(Uuid);

impl MonitorId {
    /// 生成新的随机标识
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MonitorId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for MonitorId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MonitorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// 监控项所有者（用户）标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(owner: impl Into<String>) -> Self {
        Self(owner.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OwnerId {
    fn from(owner: &str) -> Self {
        Self(owner.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(owner: String) -> Self {
        Self(owner)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 监控项当前状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    /// 尚未完成首次检测
    #[default]
    Unknown,
    /// 最近一次检测正常
    Up,
    /// 最近一次检测失败
    Down,
    /// 检测流程内部故障，调度仍在继续
    Degraded,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Unknown => "unknown",
            MonitorStatus::Up => "up",
            MonitorStatus::Down => "down",
            MonitorStatus::Degraded => "degraded",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, MonitorStatus::Up)
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(MonitorStatus::Unknown),
            "up" => Ok(MonitorStatus::Up),
            "down" => Ok(MonitorStatus::Down),
            "degraded" => Ok(MonitorStatus::Degraded),
            other => Err(format!("未知的监控状态: {other}")),
        }
    }
}

impl From<ProbeStatus> for MonitorStatus {
    fn from(status: ProbeStatus) -> Self {
        match status {
            ProbeStatus::Up => MonitorStatus::Up,
            ProbeStatus::Down => MonitorStatus::Down,
        }
    }
}

/// 监控项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    /// 标识
    pub id: MonitorId,
    /// 所有者
    pub owner: OwnerId,
    /// 显示名称
    pub name: String,
    /// 目标URL（创建时已校验为 http/https 绝对地址）
    pub url: String,
    /// 检测间隔（秒）
    pub interval_secs: u64,
    /// 是否暂停
    pub paused: bool,
    /// 当前状态
    pub status: MonitorStatus,
    /// 最后检测时间
    pub last_checked: Option<DateTime<Utc>>,
    /// 最后一次响应时间（毫秒）
    pub response_time_ms: Option<u64>,
    /// 最后一次检测的说明
    pub last_message: Option<String>,
    /// 24小时可用率（百分比）
    pub uptime_24h: f64,
    /// 30天可用率（百分比）
    pub uptime_30d: f64,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

impl Monitor {
    /// 由已校验的输入创建监控项，初始状态为 unknown
    pub fn new(input: NewMonitor) -> Self {
        Self {
            id: MonitorId::new(),
            owner: input.owner,
            name: input.name.trim().to_string(),
            url: input.url.trim().to_string(),
            interval_secs: input.interval_secs,
            paused: input.paused,
            status: MonitorStatus::Unknown,
            last_checked: None,
            response_time_ms: None,
            last_message: None,
            uptime_24h: 100.0,
            uptime_30d: 100.0,
            created_at: Utc::now(),
        }
    }

    /// 解析目标URL
    pub fn target_url(&self) -> Option<Url> {
        Url::parse(&self.url).ok()
    }

    /// 写入一次检测结果
    pub fn record_check(&mut self, entry: &HistoryEntry, uptime: Option<UptimeWindows>) {
        self.status = entry.status.into();
        self.last_checked = Some(entry.timestamp);
        self.response_time_ms = Some(entry.response_time_ms);
        self.last_message = Some(entry.message.clone());
        if let Some(uptime) = uptime {
            self.uptime_24h = uptime.uptime_24h;
            self.uptime_30d = uptime.uptime_30d;
        }
    }

    /// 标记为降级
    pub fn mark_degraded(&mut self, reason: String) {
        self.status = MonitorStatus::Degraded;
        self.last_message = Some(reason);
    }
}

/// 创建监控项的输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMonitor {
    pub owner: OwnerId,
    pub name: String,
    pub url: String,
    pub interval_secs: u64,
    #[serde(default)]
    pub paused: bool,
}

impl NewMonitor {
    pub fn new(
        owner: impl Into<OwnerId>,
        name: impl Into<String>,
        url: impl Into<String>,
        interval_secs: u64,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            url: url.into(),
            interval_secs,
            paused: false,
        }
    }

    /// 以暂停状态创建
    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }
}

/// 更新监控项的输入，`None` 表示保持不变
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub interval_secs: Option<u64>,
}

impl MonitorUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.url.is_none() && self.interval_secs.is_none()
    }
}

/// 校验目标URL
///
/// # 参数
/// * `url` - 用户输入的URL
///
/// # 返回
/// * `Result<Url, ValidationError>` - 解析后的 http/https 绝对地址
pub fn validate_target(url: &str) -> Result<Url, ValidationError> {
    let parsed = Url::parse(url.trim()).map_err(|e| ValidationError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::UnsupportedScheme {
                scheme: other.to_string(),
            })
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ValidationError::InvalidUrl {
            url: url.to_string(),
            reason: "缺少主机名".to_string(),
        });
    }

    Ok(parsed)
}

/// 检测间隔上限，与最长的可用率窗口一致
pub const MAX_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

/// 校验检测间隔
pub fn validate_interval(interval_secs: u64, minimum_secs: u64) -> Result<(), ValidationError> {
    if interval_secs < minimum_secs {
        return Err(ValidationError::IntervalTooShort {
            interval: interval_secs,
            minimum: minimum_secs,
        });
    }
    if interval_secs > MAX_INTERVAL_SECS {
        return Err(ValidationError::IntervalTooLong {
            interval: interval_secs,
            maximum: MAX_INTERVAL_SECS,
        });
    }
    Ok(())
}

/// 校验名称
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_target_accepts_http_and_https() {
        assert!(validate_target("https://example.com/200").is_ok());
        assert!(validate_target("http://127.0.0.1:8080/health").is_ok());
    }

    #[test]
    fn test_validate_target_rejects_relative_and_other_schemes() {
        assert!(matches!(
            validate_target("example.com"),
            Err(ValidationError::InvalidUrl { .. })
        ));
        assert!(matches!(
            validate_target("ftp://example.com"),
            Err(ValidationError::UnsupportedScheme { .. })
        ));
        assert!(matches!(
            validate_target("tcp://example.com:22"),
            Err(ValidationError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn test_validate_interval() {
        assert!(validate_interval(10, 10).is_ok());
        assert!(validate_interval(60, 10).is_ok());
        assert_eq!(
            validate_interval(9, 10),
            Err(ValidationError::IntervalTooShort {
                interval: 9,
                minimum: 10
            })
        );

        assert!(validate_interval(MAX_INTERVAL_SECS, 10).is_ok());
        assert_eq!(
            validate_interval(u64::MAX, 10),
            Err(ValidationError::IntervalTooLong {
                interval: u64::MAX,
                maximum: MAX_INTERVAL_SECS
            })
        );
    }

    #[test]
    fn test_new_monitor_defaults() {
        let monitor = Monitor::new(NewMonitor::new("alice", " Homepage ", "https://example.com", 60));
        assert_eq!(monitor.status, MonitorStatus::Unknown);
        assert_eq!(monitor.name, "Homepage");
        assert_eq!(monitor.uptime_24h, 100.0);
        assert_eq!(monitor.uptime_30d, 100.0);
        assert!(monitor.last_checked.is_none());
        assert!(monitor.response_time_ms.is_none());
        assert!(!monitor.paused);
    }

    #[test]
    fn test_monitor_status_round_trip_through_str() {
        for status in [
            MonitorStatus::Unknown,
            MonitorStatus::Up,
            MonitorStatus::Down,
            MonitorStatus::Degraded,
        ] {
            assert_eq!(status.as_str().parse::<MonitorStatus>().unwrap(), status);
        }
        assert!("sideways".parse::<MonitorStatus>().is_err());
    }
}
