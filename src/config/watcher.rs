//! 配置文件监控模块
//!
//! 监听配置文件变化，防抖后重新加载并校验，只广播校验通过的新配置

use crate::config::loader::{ConfigLoader, TomlConfigLoader};
use crate::config::types::Config;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// 配置变更事件
#[derive(Debug, Clone)]
pub struct ConfigChangeEvent {
    /// 配置文件路径
    pub config_path: PathBuf,
    /// 新配置
    pub new_config: Config,
    /// 变更时间
    pub timestamp: Instant,
    /// 重载序号
    pub version: u64,
}

/// 配置文件监控器
pub struct ConfigWatcher {
    /// 配置文件路径（绝对路径）
    config_path: PathBuf,
    /// 文件系统监控器
    watcher: Option<RecommendedWatcher>,
    /// 事件发送器
    event_sender: broadcast::Sender<ConfigChangeEvent>,
    /// 防抖动延迟
    debounce_delay: Duration,
}

impl ConfigWatcher {
    /// 创建新的配置监控器
    ///
    /// # 参数
    /// * `config_path` - 配置文件路径
    /// * `debounce_delay` - 防抖动延迟时间
    ///
    /// # 返回
    /// * `Result<(Self, broadcast::Receiver<ConfigChangeEvent>)>` - 监控器和事件接收器
    pub fn new(
        config_path: &Path,
        debounce_delay: Duration,
    ) -> Result<(Self, broadcast::Receiver<ConfigChangeEvent>)> {
        Self::validate_config_path(config_path)?;

        // 文件系统事件中的路径是绝对路径
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("无法解析配置文件路径: {}", config_path.display()))?;
        let (event_sender, event_receiver) = broadcast::channel(32);

        let watcher = Self {
            config_path,
            watcher: None,
            event_sender,
            debounce_delay,
        };

        Ok((watcher, event_receiver))
    }

    /// 验证配置文件路径
    fn validate_config_path(path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", path.display()));
        }

        if !path.is_file() {
            return Err(anyhow::anyhow!("路径不是文件: {}", path.display()));
        }

        if path.extension().is_some_and(|ext| ext != "toml") {
            warn!("配置文件扩展名不是.toml: {}", path.display());
        }

        std::fs::File::open(path)
            .map(|_| ())
            .with_context(|| format!("无法读取配置文件 {}", path.display()))
    }

    /// 启动配置文件监控
    pub fn start(&mut self) -> Result<()> {
        info!("启动配置文件监控: {}", self.config_path.display());

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(1)),
        )
        .context("创建文件监控器失败")?;

        // 监控配置文件所在目录，编辑器常用"写临时文件再改名"的方式保存
        let watch_path = self.config_path.parent().unwrap_or(&self.config_path);
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("监控目录失败: {}", watch_path.display()))?;

        self.watcher = Some(watcher);

        tokio::spawn(Self::handle_file_events(
            rx,
            self.config_path.clone(),
            self.event_sender.clone(),
            self.debounce_delay,
        ));

        info!("配置文件监控已启动");
        Ok(())
    }

    /// 处理文件系统事件
    async fn handle_file_events(
        mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
        config_path: PathBuf,
        event_sender: broadcast::Sender<ConfigChangeEvent>,
        debounce_delay: Duration,
    ) {
        let loader = TomlConfigLoader::new(true);
        let mut version = 1u64;

        while let Some(res) = rx.recv().await {
            match res {
                Ok(event) if Self::is_target_file_event(&event, &config_path) => {
                    debug!("检测到配置文件变更事件: {:?}", event.kind);
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("文件监控事件错误: {}", e);
                    continue;
                }
            }

            // 等待写入完成，合并期间的重复事件
            tokio::time::sleep(debounce_delay).await;
            while rx.try_recv().is_ok() {}

            match loader.load_from_file(&config_path).await {
                Ok(new_config) => {
                    info!("配置重载成功，序号: {}", version);
                    let change_event = ConfigChangeEvent {
                        config_path: config_path.clone(),
                        new_config,
                        timestamp: Instant::now(),
                        version,
                    };
                    version += 1;

                    if event_sender.send(change_event).is_err() {
                        debug!("没有配置变更订阅者");
                    }
                }
                Err(e) => error!("配置重载失败，继续使用当前配置: {}", e),
            }
        }
    }

    /// 检查是否是目标文件的事件
    fn is_target_file_event(event: &Event, target_path: &Path) -> bool {
        matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
            && event.paths.iter().any(|path| path == target_path)
    }

    /// 停止监控
    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            info!("配置文件监控已停止");
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
