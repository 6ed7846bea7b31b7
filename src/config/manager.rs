//! 配置管理器模块
//!
//! 保存当前配置，计算新旧配置的差异并广播给监控引擎

use crate::config::types::{Config, GlobalConfig, MonitorConfig};
use crate::config::watcher::{ConfigChangeEvent, ConfigWatcher};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// 配置差异类型
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigDiff {
    /// 监控项移除
    MonitorRemoved { owner: String, name: String },
    /// 监控项修改
    MonitorModified {
        old: Box<MonitorConfig>,
        new: Box<MonitorConfig>,
    },
    /// 监控项添加
    MonitorAdded(MonitorConfig),
    /// 全局配置修改
    GlobalConfigModified {
        old: Box<GlobalConfig>,
        new: Box<GlobalConfig>,
    },
}

/// 配置变更通知
#[derive(Debug, Clone)]
pub struct ConfigUpdateNotification {
    /// 配置版本号
    pub version: u64,
    /// 配置差异列表，按 移除、修改、添加、全局 的顺序排列
    pub diffs: Vec<ConfigDiff>,
    /// 变更时间
    pub timestamp: Instant,
    /// 是否包含只能在重启后生效的变更
    pub requires_restart: bool,
}

struct ConfigState {
    config: Config,
    version: u64,
    last_update: Instant,
}

/// 配置管理器
pub struct ConfigManager {
    /// 当前配置及版本
    state: Arc<RwLock<ConfigState>>,
    /// 配置文件监控器
    watcher: Option<ConfigWatcher>,
    /// 配置更新通知发送器
    update_sender: broadcast::Sender<ConfigUpdateNotification>,
}

impl ConfigManager {
    /// 创建新的配置管理器
    ///
    /// # 参数
    /// * `initial_config` - 初始配置
    ///
    /// # 返回
    /// * `(Self, broadcast::Receiver<ConfigUpdateNotification>)` - 管理器和更新通知接收器
    pub fn new(initial_config: Config) -> (Self, broadcast::Receiver<ConfigUpdateNotification>) {
        let (update_sender, update_receiver) = broadcast::channel(32);

        let manager = Self {
            state: Arc::new(RwLock::new(ConfigState {
                config: initial_config,
                version: 1,
                last_update: Instant::now(),
            })),
            watcher: None,
            update_sender,
        };

        (manager, update_receiver)
    }

    /// 启用配置文件监控
    ///
    /// # 参数
    /// * `config_path` - 配置文件路径
    /// * `debounce_delay` - 防抖动延迟
    pub fn enable_hot_reload(&mut self, config_path: &Path, debounce_delay: Duration) -> Result<()> {
        info!("启用配置热重载功能");

        let (mut watcher, mut change_receiver) =
            ConfigWatcher::new(config_path, debounce_delay).context("创建配置监控器失败")?;
        watcher.start().context("启动配置监控失败")?;
        self.watcher = Some(watcher);

        let state = Arc::clone(&self.state);
        let update_sender = self.update_sender.clone();
        tokio::spawn(async move {
            loop {
                match change_receiver.recv().await {
                    Ok(event) => Self::handle_config_change(event, &state, &update_sender).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("配置变更事件积压，跳过 {} 个", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        info!("配置热重载功能已启用");
        Ok(())
    }

    /// 处理文件监控产生的配置变更
    async fn handle_config_change(
        event: ConfigChangeEvent,
        state: &Arc<RwLock<ConfigState>>,
        update_sender: &broadcast::Sender<ConfigUpdateNotification>,
    ) {
        info!(
            "处理配置变更: {}，版本: {}",
            event.config_path.display(),
            event.version
        );

        let notification = {
            let mut state = state.write().await;
            let diffs = calculate_config_diff(&state.config, &event.new_config);
            if diffs.is_empty() {
                debug!("配置无实质性变更，跳过更新");
                return;
            }

            state.version += 1;
            state.config = event.new_config;
            state.last_update = event.timestamp;

            ConfigUpdateNotification {
                version: state.version,
                requires_restart: requires_restart(&diffs),
                diffs,
                timestamp: event.timestamp,
            }
        };

        let version = notification.version;
        if let Err(e) = update_sender.send(notification) {
            error!("发送配置更新通知失败: {}", e);
        }
        info!("配置更新完成，版本: {}", version);
    }

    /// 获取当前配置
    pub async fn get_config(&self) -> Config {
        self.state.read().await.config.clone()
    }

    /// 获取当前版本号
    pub async fn get_version(&self) -> u64 {
        self.state.read().await.version
    }

    /// 获取最后更新时间
    pub async fn get_last_update(&self) -> Instant {
        self.state.read().await.last_update
    }

    /// 手动更新配置
    ///
    /// # 参数
    /// * `new_config` - 新配置
    ///
    /// # 返回
    /// * `u64` - 更新后的版本号，配置无变化时版本不变
    pub async fn update_config(&self, new_config: Config) -> u64 {
        let now = Instant::now();
        let notification = {
            let mut state = self.state.write().await;
            let diffs = calculate_config_diff(&state.config, &new_config);
            if diffs.is_empty() {
                debug!("配置无变更");
                return state.version;
            }

            state.version += 1;
            state.config = new_config;
            state.last_update = now;

            ConfigUpdateNotification {
                version: state.version,
                requires_restart: requires_restart(&diffs),
                diffs,
                timestamp: now,
            }
        };

        let version = notification.version;
        if let Err(e) = self.update_sender.send(notification) {
            warn!("发送配置更新通知失败: {}", e);
        }

        info!("配置手动更新完成，版本: {}", version);
        version
    }

    /// 订阅配置更新通知
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigUpdateNotification> {
        self.update_sender.subscribe()
    }
}

/// 计算配置差异，监控项以 (owner, name) 为键
pub fn calculate_config_diff(old_config: &Config, new_config: &Config) -> Vec<ConfigDiff> {
    let old_monitors: HashMap<(String, String), &MonitorConfig> =
        old_config.monitors.iter().map(|m| (m.key(), m)).collect();
    let new_monitors: HashMap<(String, String), &MonitorConfig> =
        new_config.monitors.iter().map(|m| (m.key(), m)).collect();

    let mut diffs = Vec::new();

    for old in &old_config.monitors {
        if !new_monitors.contains_key(&old.key()) {
            diffs.push(ConfigDiff::MonitorRemoved {
                owner: old.owner.clone(),
                name: old.name.clone(),
            });
        }
    }

    for new in &new_config.monitors {
        if let Some(old) = old_monitors.get(&new.key()) {
            if *old != new {
                diffs.push(ConfigDiff::MonitorModified {
                    old: Box::new((*old).clone()),
                    new: Box::new(new.clone()),
                });
            }
        }
    }

    for new in &new_config.monitors {
        if !old_monitors.contains_key(&new.key()) {
            diffs.push(ConfigDiff::MonitorAdded(new.clone()));
        }
    }

    if old_config.global != new_config.global {
        diffs.push(ConfigDiff::GlobalConfigModified {
            old: Box::new(old_config.global.clone()),
            new: Box::new(new_config.global.clone()),
        });
    }

    diffs
}

/// 检查是否包含需要重启才能生效的全局配置变更
///
/// 最小检测间隔和历史清理参数可以在运行时生效，其余全局配置需要重启
fn requires_restart(diffs: &[ConfigDiff]) -> bool {
    diffs.iter().any(|diff| match diff {
        ConfigDiff::GlobalConfigModified { old, new } => {
            old.log_level != new.log_level
                || old.max_probe_timeout_seconds != new.max_probe_timeout_seconds
                || old.max_concurrent_checks != new.max_concurrent_checks
                || old.max_redirects != new.max_redirects
                || old.database_url != new.database_url
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(owner: &str, name: &str, interval: u64) -> MonitorConfig {
        MonitorConfig {
            name: name.to_string(),
            url: format!("https://{}.example.com", name.to_lowercase()),
            interval_seconds: interval,
            owner: owner.to_string(),
            enabled: true,
        }
    }

    fn create_test_config() -> Config {
        Config {
            global: GlobalConfig::default(),
            monitors: vec![monitor("admin", "Alpha", 60), monitor("admin", "Beta", 60)],
        }
    }

    #[tokio::test]
    async fn test_config_manager_creation() {
        let (manager, _receiver) = ConfigManager::new(create_test_config());

        assert_eq!(manager.get_config().await.global.log_level, "info");
        assert_eq!(manager.get_version().await, 1);
    }

    #[test]
    fn test_diff_detects_add_remove_modify() {
        let old = create_test_config();
        let mut new = create_test_config();
        new.monitors.remove(0);
        new.monitors[0].interval_seconds = 30;
        new.monitors.push(monitor("ops", "Gamma", 60));

        let diffs = calculate_config_diff(&old, &new);
        assert_eq!(diffs.len(), 3);
        assert_eq!(
            diffs[0],
            ConfigDiff::MonitorRemoved {
                owner: "admin".to_string(),
                name: "Alpha".to_string()
            }
        );
        assert!(matches!(
            &diffs[1],
            ConfigDiff::MonitorModified { old, new } if old.interval_seconds == 60 && new.interval_seconds == 30
        ));
        assert!(matches!(&diffs[2], ConfigDiff::MonitorAdded(m) if m.name == "Gamma"));
    }

    #[test]
    fn test_same_name_different_owner_is_distinct() {
        let old = create_test_config();
        let mut new = create_test_config();
        new.monitors.push(monitor("ops", "Alpha", 60));

        let diffs = calculate_config_diff(&old, &new);
        assert_eq!(diffs.len(), 1);
        assert!(matches!(&diffs[0], ConfigDiff::MonitorAdded(m) if m.owner == "ops"));
    }

    #[test]
    fn test_requires_restart() {
        let old = create_test_config();

        let mut new = create_test_config();
        new.global.min_check_interval_seconds = 20;
        assert!(!requires_restart(&calculate_config_diff(&old, &new)));

        new.global.max_concurrent_checks = 5;
        assert!(requires_restart(&calculate_config_diff(&old, &new)));
    }

    #[tokio::test]
    async fn test_manual_config_update() {
        let (manager, mut receiver) = ConfigManager::new(create_test_config());

        // 无变化时版本不变
        assert_eq!(manager.update_config(create_test_config()).await, 1);

        let mut new_config = create_test_config();
        new_config.monitors[1].enabled = false;
        assert_eq!(manager.update_config(new_config).await, 2);

        let notification = receiver.recv().await.unwrap();
        assert_eq!(notification.version, 2);
        assert_eq!(notification.diffs.len(), 1);
        assert!(!notification.requires_restart);
        assert!(!manager.get_config().await.monitors[1].enabled);
    }
}
