//! 前台服务模块
//!
//! 处理前台模式的启动和信号处理

use crate::core::service::ServiceLauncher;
use anyhow::Result;
use std::path::Path;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 前台服务
pub struct ForegroundService;

impl ForegroundService {
    /// 创建新的前台服务
    pub fn new() -> Self {
        Self
    }

    /// 启动前台模式，直到收到 Ctrl-C
    pub async fn start(&self, config_path: &Path, max_concurrent: Option<usize>) -> Result<()> {
        info!("以前台模式启动服务...");

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("收到中断信号，正在停止服务...");
                    let _ = shutdown_tx.send(());
                }
                Err(err) => {
                    error!("监听中断信号失败: {}", err);
                }
            }
        });

        self.run_service_main(config_path, max_concurrent, shutdown_rx)
            .await
    }

    /// 运行服务主逻辑
    pub async fn run_service_main(
        &self,
        config_path: &Path,
        max_concurrent: Option<usize>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        // 1. 加载和验证配置
        let config = ServiceLauncher::load_and_validate_config(config_path, max_concurrent).await?;

        // 2. 初始化核心组件，恢复并调度监控项
        let components = ServiceLauncher::initialize_service_components(&config).await?;

        // 3. 设置配置热重载，失败时继续使用启动时的配置
        let (_config_manager, reload_handle) =
            match ServiceLauncher::setup_config_hot_reload(config_path, config, &components) {
                Ok((manager, handle)) => (Some(manager), Some(handle)),
                Err(e) => {
                    warn!("配置热重载不可用: {:#}", e);
                    (None, None)
                }
            };

        // 4. 等待关闭信号并清理
        ServiceLauncher::handle_shutdown_and_cleanup(shutdown_rx, &components, reload_handle).await
    }
}

impl Default for ForegroundService {
    fn default() -> Self {
        Self::new()
    }
}
