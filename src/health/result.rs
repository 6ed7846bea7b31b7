//! 探测结果数据结构
//!
//! 定义单次HTTP探测的结果类型和状态枚举

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 探测状态枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// 在超时前收到响应且状态码 < 400
    Up,
    /// 其他所有情况
    Down,
}

impl ProbeStatus {
    /// 判断状态是否为健康
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeStatus::Up)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Up => "up",
            ProbeStatus::Down => "down",
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ProbeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(ProbeStatus::Up),
            "down" => Ok(ProbeStatus::Down),
            other => Err(format!("未知的探测状态: {other}")),
        }
    }
}

/// 单次探测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// 探测状态
    pub status: ProbeStatus,
    /// 从发起请求到收到响应头（或失败）的耗时
    #[serde(with = "duration_serde")]
    pub response_time: Duration,
    /// HTTP状态码（收到响应时）
    pub status_code: Option<u16>,
    /// `"<code> - <reason>"` 或传输错误描述
    pub message: String,
    /// 探测完成时间
    pub checked_at: DateTime<Utc>,
}

impl ProbeResult {
    /// 根据收到的响应创建结果，状态码 < 400 视为正常
    ///
    /// # 参数
    /// * `status_code` - HTTP状态码
    /// * `reason` - 状态码原因短语
    /// * `response_time` - 响应时间
    pub fn from_response(status_code: u16, reason: &str, response_time: Duration) -> Self {
        let status = if status_code < 400 {
            ProbeStatus::Up
        } else {
            ProbeStatus::Down
        };

        Self {
            status,
            response_time,
            status_code: Some(status_code),
            message: format!("{status_code} - {reason}"),
            checked_at: Utc::now(),
        }
    }

    /// 创建失败结果（超时、DNS、连接拒绝、TLS等）
    pub fn failure(message: impl Into<String>, response_time: Duration) -> Self {
        Self {
            status: ProbeStatus::Down,
            response_time,
            status_code: None,
            message: message.into(),
            checked_at: Utc::now(),
        }
    }

    /// 设置完成时间
    pub fn with_checked_at(mut self, checked_at: DateTime<Utc>) -> Self {
        self.checked_at = checked_at;
        self
    }

    /// 获取响应时间（毫秒）
    pub fn response_time_ms(&self) -> u64 {
        self.response_time.as_millis() as u64
    }

    /// 转换为JSON字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Duration序列化模块
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
