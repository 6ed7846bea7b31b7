//! 应用程序核心逻辑
//!
//! 包含主函数、命令执行和应用程序生命周期管理

use crate::cli::args::{Args, Commands};
use crate::cli::commands::{
    CheckCommand, Command, HistoryCommand, InitCommand, StatusCommand, ValidateCommand,
    VersionCommand,
};
use crate::config::{ConfigLoader, TomlConfigLoader};
use crate::core::foreground_service::ForegroundService;
use crate::logging::{parse_level, LogConfig, LoggingSystem};
use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use tracing::{error, info};

/// 应用程序主函数
pub async fn main() -> Result<()> {
    let args = Args::parse();

    let log_config = LogConfig {
        level: resolve_log_level(&args).await,
        console: true,
        json_format: false,
        ..Default::default()
    };

    let _logging_system = LoggingSystem::setup_logging(log_config).context("初始化日志系统失败")?;

    info!("Uptime Vitals v{} 启动", crate::VERSION);

    if let Err(e) = execute_command(&args).await {
        error!("命令执行失败: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// 确定日志级别：命令行参数优先，其次为配置文件中的 `log_level`
async fn resolve_log_level(args: &Args) -> LevelFilter {
    if let Some(level) = &args.log_level {
        return level.clone().into();
    }

    let config_path = args.get_config_path();
    if !config_path.exists() {
        return LevelFilter::Info;
    }

    // 配置错误交给具体命令报告
    TomlConfigLoader::new(true)
        .load_from_file(&config_path)
        .await
        .map(|config| parse_level(&config.global.log_level))
        .unwrap_or(LevelFilter::Info)
}

/// 执行CLI命令
pub async fn execute_command(args: &Args) -> Result<()> {
    match &args.command {
        Commands::Start { max_concurrent } => {
            info!("启动监控引擎...");
            ForegroundService::new()
                .start(&args.get_config_path(), *max_concurrent)
                .await
        }
        Commands::Check { .. } => run(&CheckCommand, args).await,
        Commands::Status { .. } => run(&StatusCommand, args).await,
        Commands::History { .. } => run(&HistoryCommand, args).await,
        Commands::Init { .. } => run(&InitCommand, args).await,
        Commands::Validate { .. } => run(&ValidateCommand, args).await,
        Commands::Version { .. } => run(&VersionCommand, args).await,
    }
}

async fn run(command: &dyn Command, args: &Args) -> Result<()> {
    command.execute(args).await.map_err(anyhow::Error::from)
}
