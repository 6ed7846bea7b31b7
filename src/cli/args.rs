//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Uptime Vitals - 可用性监控引擎
#[derive(Parser, Debug, Clone)]
#[command(
    name = "uptime-vitals",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 配置文件路径
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径",
        env = "UPTIME_VITALS_CONFIG",
        global = true
    )]
    pub config: Option<PathBuf>,

    /// 日志级别，未指定时使用配置文件中的 `log_level`
    #[arg(
        short,
        long,
        value_enum,
        help = "日志级别",
        env = "UPTIME_VITALS_LOG_LEVEL",
        global = true
    )]
    pub log_level: Option<LogLevel>,

    /// 是否启用详细输出
    #[arg(short, long, help = "启用详细输出", global = true)]
    pub verbose: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

/// 日志级别枚举
#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum LogLevel {
    /// 调试级别
    Debug,
    /// 信息级别
    Info,
    /// 警告级别
    Warn,
    /// 错误级别
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// 子命令定义
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 在前台启动监控引擎，Ctrl-C 停止
    Start {
        /// 最大并发检测数
        #[arg(
            long,
            value_name = "COUNT",
            help = "最大并发检测数",
            env = "UPTIME_VITALS_MAX_CONCURRENT"
        )]
        max_concurrent: Option<usize>,
    },

    /// 执行一次性探测
    Check {
        /// 目标URL（可选，不指定则探测配置中的所有监控项）
        #[arg(value_name = "URL", help = "目标URL")]
        url: Option<String>,

        /// 超时时间（秒）
        #[arg(
            short,
            long,
            value_name = "SECONDS",
            default_value = "10",
            help = "超时时间（秒）"
        )]
        timeout: u64,

        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },

    /// 查看已持久化的监控项状态
    Status {
        /// 只显示该用户的监控项
        #[arg(long, value_name = "OWNER", help = "所有者")]
        owner: Option<String>,

        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },

    /// 查看监控项的最近检测历史
    History {
        /// 监控项名称
        #[arg(value_name = "NAME", help = "监控项名称")]
        name: String,

        /// 所有者
        #[arg(long, value_name = "OWNER", default_value = "admin", help = "所有者")]
        owner: String,

        /// 显示条数
        #[arg(
            short = 'n',
            long,
            value_name = "COUNT",
            default_value = "20",
            help = "显示条数"
        )]
        limit: usize,

        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },

    /// 初始化配置文件
    Init {
        /// 配置文件路径
        #[arg(
            value_name = "FILE",
            help = "配置文件路径",
            default_value = "config.toml"
        )]
        config_path: PathBuf,

        /// 是否覆盖现有文件
        #[arg(long, help = "覆盖现有文件")]
        force: bool,

        /// 配置模板类型
        #[arg(
            short,
            long,
            value_enum,
            default_value = "minimal",
            help = "配置模板类型"
        )]
        template: ConfigTemplate,
    },

    /// 验证配置文件
    Validate {
        /// 配置文件路径
        #[arg(value_name = "FILE", help = "配置文件路径")]
        config_path: Option<PathBuf>,
    },

    /// 显示版本信息
    Version {
        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },
}

/// 输出格式枚举
#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum OutputFormat {
    /// 文本格式
    Text,
    /// JSON格式
    Json,
}

/// 配置模板类型
#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum ConfigTemplate {
    /// 最小模板
    Minimal,
    /// 完整模板
    Full,
}

impl Args {
    /// 解析命令行参数
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// 获取配置文件路径
    pub fn get_config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::get_default_config_path)
    }

    /// 是否启用详细输出
    pub fn is_verbose(&self) -> bool {
        self.verbose || matches!(self.log_level, Some(LogLevel::Debug))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_check_command() {
        let args = Args::try_parse_from([
            "uptime-vitals",
            "check",
            "https://example.com",
            "--timeout",
            "5",
            "--format",
            "json",
        ])
        .unwrap();

        match args.command {
            Commands::Check {
                url,
                timeout,
                format,
            } => {
                assert_eq!(url.as_deref(), Some("https://example.com"));
                assert_eq!(timeout, 5);
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let args = Args::try_parse_from([
            "uptime-vitals",
            "status",
            "--config",
            "/tmp/uptime.toml",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(args.get_config_path(), PathBuf::from("/tmp/uptime.toml"));
        assert!(args.is_verbose());
        assert!(matches!(
            args.command,
            Commands::Status { owner: None, .. }
        ));
    }

    #[test]
    fn test_history_defaults() {
        let args = Args::try_parse_from(["uptime-vitals", "history", "Example"]).unwrap();
        match args.command {
            Commands::History {
                name, owner, limit, ..
            } => {
                assert_eq!(name, "Example");
                assert_eq!(owner, "admin");
                assert_eq!(limit, 20);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(log::LevelFilter::from(LogLevel::Warn), log::LevelFilter::Warn);
        assert_eq!(LogLevel::Error.to_string(), "error");
    }
}
