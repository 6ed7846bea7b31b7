//! 配置数据结构定义
//!
//! 定义应用程序的配置结构体和验证逻辑

use crate::monitor::{validate_interval, validate_target, NewMonitor, OwnerId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 主配置结构，包含全局配置和预置监控项列表
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// 全局配置项
    #[serde(default)]
    pub global: GlobalConfig,
    /// 预置监控项列表
    #[serde(default)]
    pub monitors: Vec<MonitorConfig>,
}

/// 全局配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 最小检测间隔（秒）
    #[serde(default = "default_min_check_interval")]
    pub min_check_interval_seconds: u64,
    /// 单次探测超时上限（秒），实际超时为 min(间隔, 上限)
    #[serde(default = "default_max_probe_timeout")]
    pub max_probe_timeout_seconds: u64,
    /// 最大并发检测数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_checks: usize,
    /// 最多跟随的重定向次数
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// 数据库地址，未配置时使用内存存储
    #[serde(default)]
    pub database_url: Option<String>,
    /// 历史记录保留天数
    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: u32,
    /// 历史清理间隔（秒）
    #[serde(default = "default_history_prune_interval")]
    pub history_prune_interval_seconds: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            min_check_interval_seconds: default_min_check_interval(),
            max_probe_timeout_seconds: default_max_probe_timeout(),
            max_concurrent_checks: default_max_concurrent(),
            max_redirects: default_max_redirects(),
            database_url: None,
            history_retention_days: default_history_retention_days(),
            history_prune_interval_seconds: default_history_prune_interval(),
        }
    }
}

/// 预置监控项配置，以 (owner, name) 作为唯一键
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// 监控项名称
    pub name: String,
    /// 目标URL
    pub url: String,
    /// 检测间隔（秒）
    pub interval_seconds: u64,
    /// 所有者
    #[serde(default = "default_owner")]
    pub owner: String,
    /// 是否启用，未启用的监控项以暂停状态创建
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl MonitorConfig {
    /// 唯一键
    pub fn key(&self) -> (String, String) {
        (self.owner.clone(), self.name.clone())
    }

    /// 转换为创建参数
    pub fn to_new_monitor(&self) -> NewMonitor {
        NewMonitor::new(
            OwnerId::new(self.owner.clone()),
            self.name.clone(),
            self.url.clone(),
            self.interval_seconds,
        )
        .paused(!self.enabled)
    }
}

// 默认值函数
fn default_log_level() -> String {
    "info".to_string()
}
fn default_min_check_interval() -> u64 {
    10
}
fn default_max_probe_timeout() -> u64 {
    30
}
fn default_max_concurrent() -> usize {
    50
}
fn default_max_redirects() -> usize {
    10
}
fn default_history_retention_days() -> u32 {
    30
}
fn default_history_prune_interval() -> u64 {
    3600
}
fn default_owner() -> String {
    "admin".to_string()
}
fn default_enabled() -> bool {
    true
}

/// 配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &Config) -> Result<(), String> {
    let global = &config.global;

    if global.min_check_interval_seconds == 0 {
        return Err("最小检测间隔不能为0".to_string());
    }

    if global.max_probe_timeout_seconds == 0 {
        return Err("探测超时上限不能为0".to_string());
    }

    if global.max_concurrent_checks == 0 {
        return Err("最大并发检测数不能为0".to_string());
    }

    if global.history_prune_interval_seconds == 0 {
        return Err("历史清理间隔不能为0".to_string());
    }

    // 保证30天窗口的数据完整
    if global.history_retention_days < 30 {
        return Err(format!(
            "历史保留天数 {} 小于30天",
            global.history_retention_days
        ));
    }

    // 验证日志级别
    let valid_log_levels = ["debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&global.log_level.as_str()) {
        return Err(format!(
            "无效的日志级别: {}，支持的级别: {:?}",
            global.log_level, valid_log_levels
        ));
    }

    if let Some(url) = &global.database_url {
        if !url.starts_with("sqlite:") {
            return Err(format!("不支持的数据库地址: {url}，仅支持 sqlite"));
        }
    }

    // 验证监控项配置
    let mut seen = HashSet::new();
    for monitor in &config.monitors {
        if monitor.name.trim().is_empty() {
            return Err("监控项名称不能为空".to_string());
        }

        if monitor.owner.trim().is_empty() {
            return Err(format!("监控项 {} 的所有者不能为空", monitor.name));
        }

        if let Err(e) = validate_target(&monitor.url) {
            return Err(format!("监控项 {} 的URL无效: {}", monitor.name, e));
        }

        if let Err(e) = validate_interval(monitor.interval_seconds, global.min_check_interval_seconds)
        {
            return Err(format!("监控项 {} 的检测间隔无效: {}", monitor.name, e));
        }

        if !seen.insert(monitor.key()) {
            return Err(format!(
                "监控项重复: 用户 {} 下已存在名为 {} 的监控项",
                monitor.owner, monitor.name
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_monitor() -> MonitorConfig {
        MonitorConfig {
            name: "Test Monitor".to_string(),
            url: "https://example.com/health".to_string(),
            interval_seconds: 60,
            owner: "admin".to_string(),
            enabled: true,
        }
    }

    fn create_test_config() -> Config {
        Config {
            global: GlobalConfig::default(),
            monitors: vec![create_test_monitor()],
        }
    }

    #[test]
    fn test_config_serialization() {
        let config = create_test_config();

        let serialized = toml::to_string(&config).expect("序列化失败");
        assert!(!serialized.is_empty());

        let deserialized: Config = toml::from_str(&serialized).expect("反序列化失败");
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_defaults_from_empty_document() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.global, GlobalConfig::default());
        assert_eq!(config.global.min_check_interval_seconds, 10);
        assert_eq!(config.global.max_probe_timeout_seconds, 30);
        assert!(config.global.database_url.is_none());
        assert!(config.monitors.is_empty());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_monitor_defaults() {
        let config: Config = toml::from_str(
            r#"
[[monitors]]
name = "Site"
url = "https://example.com"
interval_seconds = 60
"#,
        )
        .unwrap();

        assert_eq!(config.monitors[0].owner, "admin");
        assert!(config.monitors[0].enabled);
    }

    #[test]
    fn test_config_validation() {
        assert!(validate_config(&create_test_config()).is_ok());
    }

    #[test]
    fn test_config_validation_invalid_url() {
        let mut config = create_test_config();
        config.monitors[0].url = "invalid-url".to_string();

        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("URL无效"));
    }

    #[test]
    fn test_config_validation_interval_below_minimum() {
        let mut config = create_test_config();
        config.monitors[0].interval_seconds = 5;

        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("检测间隔无效"));
    }

    #[test]
    fn test_config_validation_duplicate_monitor() {
        let mut config = create_test_config();
        config.monitors.push(create_test_monitor());
        assert!(validate_config(&config).unwrap_err().contains("监控项重复"));

        // 不同所有者可以使用相同名称
        config.monitors[1].owner = "bob".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_config_validation_global_limits() {
        let mut config = create_test_config();
        config.global.history_retention_days = 7;
        assert!(validate_config(&config).is_err());

        let mut config = create_test_config();
        config.global.log_level = "trace".to_string();
        assert!(validate_config(&config).unwrap_err().contains("无效的日志级别"));

        let mut config = create_test_config();
        config.global.max_concurrent_checks = 0;
        assert!(validate_config(&config).is_err());

        let mut config = create_test_config();
        config.global.database_url = Some("postgres://localhost/uptime".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_disabled_monitor_is_created_paused() {
        let mut monitor = create_test_monitor();
        monitor.enabled = false;
        let input = monitor.to_new_monitor();
        assert!(input.paused);
        assert_eq!(input.owner.as_str(), "admin");
    }
}
