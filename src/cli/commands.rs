//! 命令处理逻辑
//!
//! 实现各种CLI命令的处理逻辑

use crate::cli::args::{Args, Commands, ConfigTemplate, OutputFormat};
use crate::config::{Config, ConfigLoader, TomlConfigLoader};
use crate::error::{ConfigError, Result};
use crate::health::checker::DEFAULT_MAX_REDIRECTS;
use crate::health::{HttpProber, ProbeResult, Prober};
use crate::monitor::{validate_target, Monitor, OwnerId};
use crate::store::{HistoryEntry, HistoryStore, MonitorStore, SqliteStore};
use async_trait::async_trait;
use reqwest::Url;
use std::path::Path;
use std::time::Duration;

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    async fn execute(&self, args: &Args) -> Result<()>;
}

/// 版本命令
pub struct VersionCommand;

#[async_trait]
impl Command for VersionCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Version { format } = &args.command {
            match format {
                OutputFormat::Json => {
                    let version_info = serde_json::json!({
                        "name": crate::APP_NAME,
                        "version": crate::VERSION,
                        "description": crate::APP_DESCRIPTION
                    });
                    println!("{}", serde_json::to_string_pretty(&version_info)?);
                }
                OutputFormat::Text => {
                    println!("{} v{}", crate::APP_NAME, crate::VERSION);
                    println!("{}", crate::APP_DESCRIPTION);
                }
            }
        }
        Ok(())
    }
}

/// 初始化命令
pub struct InitCommand;

#[async_trait]
impl Command for InitCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Init {
            config_path,
            force,
            template,
        } = &args.command
        {
            self.create_config_file(config_path, *force, template).await
        } else {
            Ok(())
        }
    }
}

impl InitCommand {
    /// 创建配置文件
    async fn create_config_file(
        &self,
        config_path: &Path,
        force: bool,
        template: &ConfigTemplate,
    ) -> Result<()> {
        if config_path.exists() && !force {
            eprintln!("配置文件已存在: {}", config_path.display());
            eprintln!("使用 --force 参数覆盖现有文件");
            return Ok(());
        }

        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tokio::fs::write(config_path, Self::template_content(template)).await?;

        println!("配置文件已创建: {}", config_path.display());
        println!("请编辑配置文件以添加您的监控项");

        Ok(())
    }

    /// 获取配置模板内容
    fn template_content(template: &ConfigTemplate) -> &'static str {
        match template {
            ConfigTemplate::Minimal => include_str!("../../templates/minimal_config.toml"),
            ConfigTemplate::Full => include_str!("../../templates/full_config.toml"),
        }
    }
}

/// 验证命令
pub struct ValidateCommand;

#[async_trait]
impl Command for ValidateCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Validate { config_path } = &args.command {
            let config_file = config_path
                .clone()
                .unwrap_or_else(|| args.get_config_path());

            self.validate_config_file(&config_file, args.is_verbose())
                .await
        } else {
            Ok(())
        }
    }
}

impl ValidateCommand {
    /// 验证配置文件
    async fn validate_config_file(&self, config_path: &Path, verbose: bool) -> Result<()> {
        println!("验证配置文件: {}", config_path.display());

        let loader = TomlConfigLoader::new(true);
        let config = loader.load_from_file(config_path).await?;

        if verbose {
            let global = &config.global;
            println!("配置验证通过！");
            println!("全局配置:");
            println!("  日志级别: {}", global.log_level);
            println!("  最小检测间隔: {}秒", global.min_check_interval_seconds);
            println!("  最大探测超时: {}秒", global.max_probe_timeout_seconds);
            println!("  最大并发: {}", global.max_concurrent_checks);
            println!("  最大重定向: {}", global.max_redirects);
            println!(
                "  存储: {}",
                global.database_url.as_deref().unwrap_or("内存")
            );
            println!("  历史保留: {}天", global.history_retention_days);

            println!("监控项:");
            for (i, monitor) in config.monitors.iter().enumerate() {
                println!("  {}. {} ({})", i + 1, monitor.name, monitor.url);
                println!("     所有者: {}", monitor.owner);
                println!("     检测间隔: {}秒", monitor.interval_seconds);
                println!(
                    "     启用状态: {}",
                    if monitor.enabled { "是" } else { "否" }
                );
            }
        } else {
            println!("✓ 配置文件验证通过");
            println!("✓ 找到 {} 个监控项", config.monitors.len());
        }

        Ok(())
    }
}

/// 一次性探测命令
pub struct CheckCommand;

#[async_trait]
impl Command for CheckCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Check {
            url,
            timeout,
            format,
        } = &args.command
        {
            self.perform_check(args, url.as_deref(), Duration::from_secs(*timeout), format)
                .await
        } else {
            Ok(())
        }
    }
}

impl CheckCommand {
    /// 执行探测
    async fn perform_check(
        &self,
        args: &Args,
        url: Option<&str>,
        timeout: Duration,
        format: &OutputFormat,
    ) -> Result<()> {
        let (targets, max_redirects) = match url {
            Some(url) => (
                vec![(url.to_string(), validate_target(url)?)],
                DEFAULT_MAX_REDIRECTS,
            ),
            None => {
                let config = load_config(args).await?;
                let targets = config
                    .monitors
                    .iter()
                    .filter(|m| m.enabled)
                    .map(|m| Ok((m.name.clone(), validate_target(&m.url)?)))
                    .collect::<Result<Vec<(String, Url)>>>()?;
                (targets, config.global.max_redirects)
            }
        };

        if targets.is_empty() {
            eprintln!("未找到任何启用的监控项");
            return Ok(());
        }

        let prober = HttpProber::new(max_redirects)?;
        let urls: Vec<Url> = targets.iter().map(|(_, url)| url.clone()).collect();
        let results = prober.check_batch(&urls, timeout).await;

        match format {
            OutputFormat::Json => {
                let json_results: Vec<_> = targets
                    .iter()
                    .zip(&results)
                    .map(|((name, url), result)| {
                        serde_json::json!({
                            "name": name,
                            "url": url.as_str(),
                            "result": result,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&json_results)?);
            }
            OutputFormat::Text => {
                for ((name, url), result) in targets.iter().zip(&results) {
                    print_probe_result(name, url, result);
                }
            }
        }

        Ok(())
    }
}

fn print_probe_result(name: &str, url: &Url, result: &ProbeResult) {
    let status_icon = if result.status.is_healthy() {
        "✓"
    } else {
        "✗"
    };
    println!(
        "{} {} ({}) - {} - {}ms",
        status_icon,
        name,
        url,
        result.status,
        result.response_time_ms()
    );
    println!("  {}", result.message);
}

/// 状态查看命令
pub struct StatusCommand;

#[async_trait]
impl Command for StatusCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Status { owner, format } = &args.command {
            let store = open_persisted_store(args).await?;
            let mut monitors = store.load_all().await?;
            if let Some(owner) = owner {
                let owner = OwnerId::from(owner.as_str());
                monitors.retain(|m| m.owner == owner);
            }

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&monitors)?),
                OutputFormat::Text => self.print_table(&monitors),
            }
        }
        Ok(())
    }
}

impl StatusCommand {
    fn print_table(&self, monitors: &[Monitor]) {
        if monitors.is_empty() {
            println!("没有已保存的监控项");
            return;
        }

        println!(
            "{:<20} {:<10} {:<9} {:>8} {:>8} {:>9} {:<30}",
            "名称", "所有者", "状态", "24小时", "30天", "响应时间", "URL"
        );
        println!("{}", "-".repeat(100));

        for monitor in monitors {
            let status = if monitor.paused {
                "paused".to_string()
            } else {
                monitor.status.to_string()
            };
            let response_time = monitor
                .response_time_ms
                .map(|ms| format!("{ms}ms"))
                .unwrap_or_else(|| "N/A".to_string());

            println!(
                "{:<20} {:<10} {:<9} {:>7.2}% {:>7.2}% {:>9} {:<30}",
                truncate_string(&monitor.name, 20),
                truncate_string(monitor.owner.as_str(), 10),
                status,
                monitor.uptime_24h,
                monitor.uptime_30d,
                response_time,
                truncate_string(&monitor.url, 30)
            );
        }
    }
}

/// 历史查看命令
pub struct HistoryCommand;

#[async_trait]
impl Command for HistoryCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::History {
            name,
            owner,
            limit,
            format,
        } = &args.command
        {
            let store = open_persisted_store(args).await?;
            let owner = OwnerId::from(owner.as_str());
            let monitor = store
                .load_all()
                .await?
                .into_iter()
                .find(|m| m.owner == owner && m.name == *name);

            let Some(monitor) = monitor else {
                eprintln!("未找到用户 {owner} 名为 '{name}' 的监控项");
                return Ok(());
            };

            let entries = store.recent(monitor.id, *limit).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                OutputFormat::Text => self.print_entries(&monitor, &entries),
            }
        }
        Ok(())
    }
}

impl HistoryCommand {
    fn print_entries(&self, monitor: &Monitor, entries: &[HistoryEntry]) {
        println!(
            "{} ({}) - 24小时 {:.2}% / 30天 {:.2}%",
            monitor.name, monitor.url, monitor.uptime_24h, monitor.uptime_30d
        );
        if entries.is_empty() {
            println!("暂无检测记录");
            return;
        }

        for entry in entries {
            println!(
                "{}  {:<4} {:>6}ms  {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.status,
                entry.response_time_ms,
                entry.message
            );
        }
    }
}

/// 加载配置文件
async fn load_config(args: &Args) -> Result<Config> {
    let loader = TomlConfigLoader::new(true);
    loader.load_from_file(&args.get_config_path()).await
}

/// 打开配置中的持久化存储，内存存储没有可查看的数据
async fn open_persisted_store(args: &Args) -> Result<SqliteStore> {
    let config = load_config(args).await?;
    let database_url = config.global.database_url.ok_or_else(|| {
        ConfigError::ValidationError(
            "未配置 database_url，内存存储的数据只存在于运行中的进程".to_string(),
        )
    })?;

    Ok(SqliteStore::connect(&database_url).await?)
}

/// 截断字符串
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
