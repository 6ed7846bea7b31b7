//! 服务管理模块
//!
//! 负责服务组件的初始化、配置同步和生命周期管理

use crate::config::{
    self, Config, ConfigDiff, ConfigLoader, ConfigManager, ConfigUpdateNotification,
    MonitorConfig, TomlConfigLoader,
};
use crate::core::retention::{HistoryPruner, RetentionSettings};
use crate::health::{HttpProber, SchedulerSettings};
use crate::monitor::{MonitorRegistry, MonitorUpdate, OwnerId};
use crate::store::{HistoryStore, MemoryStore, MonitorStore, SqliteStore};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 配置文件变更的防抖时间
const HOT_RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

/// 服务组件结构
pub struct ServiceComponents {
    /// 监控项注册表，持有调度器和监控项表
    pub registry: Arc<MonitorRegistry>,
    /// 检测历史存储
    pub history: Arc<dyn HistoryStore>,
    /// 历史清理任务
    pub pruner: Arc<HistoryPruner>,
}

/// 服务启动器
pub struct ServiceLauncher;

impl ServiceLauncher {
    /// 加载和验证配置
    pub async fn load_and_validate_config(
        config_path: &Path,
        max_concurrent: Option<usize>,
    ) -> Result<Config> {
        info!("加载配置文件: {:?}", config_path);

        let config_loader = TomlConfigLoader::new(true);
        let mut config = config_loader
            .load_from_file(config_path)
            .await
            .context("加载配置文件失败")?;

        // 应用命令行参数覆盖
        if let Some(max_concurrent) = max_concurrent {
            config.global.max_concurrent_checks = max_concurrent;
        }

        config::validate_config(&config).map_err(|e| anyhow::anyhow!("配置验证失败: {}", e))?;

        info!("配置加载成功，共 {} 个监控项", config.monitors.len());
        Ok(config)
    }

    /// 根据配置打开存储，未配置数据库时使用内存存储
    pub async fn open_stores(
        config: &Config,
    ) -> Result<(Arc<dyn HistoryStore>, Arc<dyn MonitorStore>)> {
        match &config.global.database_url {
            Some(url) => {
                info!("使用SQLite存储: {}", url);
                let store = Arc::new(
                    SqliteStore::connect(url)
                        .await
                        .with_context(|| format!("打开数据库失败: {url}"))?,
                );
                let history: Arc<dyn HistoryStore> = store.clone();
                let monitors: Arc<dyn MonitorStore> = store;
                Ok((history, monitors))
            }
            None => {
                info!("未配置数据库，使用内存存储");
                let store = Arc::new(MemoryStore::new());
                let history: Arc<dyn HistoryStore> = store.clone();
                let monitors: Arc<dyn MonitorStore> = store;
                Ok((history, monitors))
            }
        }
    }

    /// 初始化服务组件
    ///
    /// 恢复已持久化的监控项，同步配置中的种子监控项，并启动历史清理
    pub async fn initialize_service_components(config: &Config) -> Result<ServiceComponents> {
        info!("初始化服务组件...");

        let (history, store) = Self::open_stores(config).await?;
        let prober = Arc::new(
            HttpProber::new(config.global.max_redirects).context("创建HTTP探测器失败")?,
        );

        let registry = Arc::new(MonitorRegistry::build(
            history.clone(),
            store,
            prober,
            SchedulerSettings::from(&config.global),
            config.global.min_check_interval_seconds,
        ));

        registry.restore().await.context("恢复监控项失败")?;
        for monitor in &config.monitors {
            sync_monitor(&registry, monitor)
                .await
                .with_context(|| format!("同步监控项 {} 失败", monitor.name))?;
        }

        let pruner = Arc::new(HistoryPruner::start(
            history.clone(),
            RetentionSettings::from(&config.global),
        ));

        let status = registry.scheduler().status().await;
        info!(
            "服务组件初始化完成，{} 个监控项已调度，并发上限 {}",
            status.scheduled_monitors, status.max_concurrent_checks
        );

        Ok(ServiceComponents {
            registry,
            history,
            pruner,
        })
    }

    /// 设置配置热重载
    ///
    /// # 返回
    /// * `Result<(ConfigManager, JoinHandle<()>)>` - 配置管理器（需要保持存活）和变更处理任务
    pub fn setup_config_hot_reload(
        config_path: &Path,
        config: Config,
        components: &ServiceComponents,
    ) -> Result<(ConfigManager, JoinHandle<()>)> {
        let (mut manager, mut receiver) = ConfigManager::new(config);
        manager
            .enable_hot_reload(config_path, HOT_RELOAD_DEBOUNCE)
            .context("启用配置热重载失败")?;

        let registry = components.registry.clone();
        let pruner = components.pruner.clone();
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(notification) => {
                        apply_config_update(&registry, &pruner, notification).await
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("配置更新通知积压，跳过 {} 个", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok((manager, handle))
    }

    /// 处理关闭和清理
    pub async fn handle_shutdown_and_cleanup(
        mut shutdown_rx: broadcast::Receiver<()>,
        components: &ServiceComponents,
        reload_handle: Option<JoinHandle<()>>,
    ) -> Result<()> {
        info!("等待关闭信号...");

        let _ = shutdown_rx.recv().await;

        info!("收到关闭信号，正在停止服务...");

        if let Some(handle) = reload_handle {
            handle.abort();
        }
        components.pruner.stop();
        components.registry.scheduler().stop().await;

        info!("服务已停止");
        Ok(())
    }
}

/// 按 (owner, name) 将一个种子监控项同步到注册表
///
/// 不存在时创建；已存在时更新地址和间隔，并按 `enabled` 暂停或恢复
pub async fn sync_monitor(
    registry: &MonitorRegistry,
    seed: &MonitorConfig,
) -> crate::error::Result<()> {
    let owner = OwnerId::from(seed.owner.as_str());

    let Some(existing) = registry.find_by_name(&owner, &seed.name).await else {
        registry.create(seed.to_new_monitor()).await?;
        return Ok(());
    };

    let update = MonitorUpdate {
        name: None,
        url: (existing.url != seed.url.trim()).then(|| seed.url.clone()),
        interval_secs: (existing.interval_secs != seed.interval_seconds)
            .then_some(seed.interval_seconds),
    };
    if !update.is_empty() {
        registry.update(existing.id, &owner, update).await?;
    }

    match (seed.enabled, existing.paused) {
        (true, true) => {
            registry.resume(existing.id, &owner).await?;
        }
        (false, false) => {
            registry.pause(existing.id, &owner).await?;
        }
        _ => {}
    }

    Ok(())
}

/// 将配置变更应用到注册表
///
/// 全局配置先于监控项生效，新的最小间隔可能是修改监控项的前提
pub async fn apply_config_update(
    registry: &MonitorRegistry,
    pruner: &HistoryPruner,
    notification: ConfigUpdateNotification,
) {
    info!(
        "应用配置版本 {}，共 {} 项变更",
        notification.version,
        notification.diffs.len()
    );
    if notification.requires_restart {
        warn!("部分全局配置变更需要重启服务后生效");
    }

    for diff in &notification.diffs {
        if let ConfigDiff::GlobalConfigModified { new, .. } = diff {
            registry.set_min_interval_secs(new.min_check_interval_seconds);
            pruner.update(RetentionSettings::from(new.as_ref()));
        }
    }

    for diff in notification.diffs {
        let outcome = match &diff {
            ConfigDiff::MonitorRemoved { owner, name } => {
                remove_monitor(registry, &OwnerId::from(owner.as_str()), name).await
            }
            ConfigDiff::MonitorModified { new, .. } => sync_monitor(registry, new).await,
            ConfigDiff::MonitorAdded(seed) => sync_monitor(registry, seed).await,
            ConfigDiff::GlobalConfigModified { .. } => Ok(()),
        };

        if let Err(e) = outcome {
            error!("应用配置变更失败 {:?}: {}", diff, e);
        }
    }
}

async fn remove_monitor(
    registry: &MonitorRegistry,
    owner: &OwnerId,
    name: &str,
) -> crate::error::Result<()> {
    match registry.find_by_name(owner, name).await {
        Some(monitor) => registry.delete(monitor.id, owner).await,
        None => {
            warn!("用户 {} 没有名为 {} 的监控项，忽略移除", owner, name);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;
    use crate::health::{ProbeResult, Prober};
    use crate::monitor::MonitorStatus;
    use async_trait::async_trait;
    use reqwest::Url;
    use std::time::Instant as StdInstant;

    struct UpProber;

    #[async_trait]
    impl Prober for UpProber {
        async fn probe(&self, _url: &Url, _timeout: Duration) -> ProbeResult {
            ProbeResult::from_response(200, "OK", Duration::from_millis(5))
        }
    }

    fn seed(name: &str, interval: u64, enabled: bool) -> MonitorConfig {
        MonitorConfig {
            name: name.to_string(),
            url: format!("https://{}.example.com", name.to_lowercase()),
            interval_seconds: interval,
            owner: "admin".to_string(),
            enabled,
        }
    }

    fn registry() -> Arc<MonitorRegistry> {
        let store = Arc::new(MemoryStore::new());
        Arc::new(MonitorRegistry::build(
            store.clone(),
            store,
            Arc::new(UpProber),
            SchedulerSettings::default(),
            10,
        ))
    }

    #[tokio::test]
    async fn test_sync_monitor_creates_then_updates() {
        let registry = registry();
        let owner = OwnerId::from("admin");

        sync_monitor(&registry, &seed("Alpha", 60, true)).await.unwrap();
        let created = registry.find_by_name(&owner, "Alpha").await.unwrap();
        assert!(registry.scheduler().is_scheduled(created.id).await);

        // 再次同步相同配置不会重复创建
        sync_monitor(&registry, &seed("Alpha", 60, true)).await.unwrap();
        assert_eq!(registry.list_by_owner(&owner).await.len(), 1);

        sync_monitor(&registry, &seed("Alpha", 30, false)).await.unwrap();
        let updated = registry.get(created.id).await.unwrap();
        assert_eq!(updated.interval_secs, 30);
        assert!(updated.paused);
        assert!(!registry.scheduler().is_scheduled(created.id).await);

        registry.scheduler().stop().await;
    }

    #[tokio::test]
    async fn test_disabled_seed_is_created_paused() {
        let registry = registry();

        sync_monitor(&registry, &seed("Beta", 60, false)).await.unwrap();
        let monitor = registry
            .find_by_name(&OwnerId::from("admin"), "Beta")
            .await
            .unwrap();
        assert!(monitor.paused);
        assert_eq!(monitor.status, MonitorStatus::Unknown);
        assert!(!registry.scheduler().is_scheduled(monitor.id).await);
    }

    #[tokio::test]
    async fn test_apply_config_update() {
        let registry = registry();
        let owner = OwnerId::from("admin");
        sync_monitor(&registry, &seed("Alpha", 60, true)).await.unwrap();

        let old_global = GlobalConfig::default();
        let new_global = GlobalConfig {
            min_check_interval_seconds: 5,
            history_retention_days: 60,
            ..GlobalConfig::default()
        };
        let pruner = HistoryPruner::start(
            Arc::new(MemoryStore::new()),
            RetentionSettings::from(&old_global),
        );

        let notification = ConfigUpdateNotification {
            version: 2,
            diffs: vec![
                ConfigDiff::MonitorRemoved {
                    owner: "admin".to_string(),
                    name: "Alpha".to_string(),
                },
                ConfigDiff::MonitorAdded(seed("Gamma", 5, true)),
                ConfigDiff::GlobalConfigModified {
                    old: Box::new(old_global),
                    new: Box::new(new_global),
                },
            ],
            timestamp: StdInstant::now(),
            requires_restart: false,
        };

        apply_config_update(&registry, &pruner, notification).await;

        assert!(registry.find_by_name(&owner, "Alpha").await.is_none());
        let gamma = registry.find_by_name(&owner, "Gamma").await.unwrap();
        assert_eq!(gamma.interval_secs, 5);
        assert_eq!(registry.min_interval_secs(), 5);
        assert_eq!(pruner.settings().retention_days, 60);

        registry.scheduler().stop().await;
    }
}
