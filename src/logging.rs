//! 日志系统
//!
//! 基于 tracing 的结构化日志，支持文本/JSON格式、文件输出和按模块设置级别，
//! 并通过 `LogTracer` 将 `log` crate 的日志桥接到 tracing

use log::LevelFilter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter, Layer};

/// 全局日志初始化状态
#[derive(Debug, Default)]
struct GlobalLoggingState {
    /// 是否已初始化
    initialized: bool,
    /// 初始化失败原因
    init_error: Option<String>,
    /// 当前配置
    current_config: Option<LogConfig>,
}

/// 全局日志状态管理器
static GLOBAL_LOGGING_STATE: OnceLock<Mutex<GlobalLoggingState>> = OnceLock::new();

/// 日志配置结构
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// 日志级别
    pub level: LevelFilter,
    /// 日志文件路径（可选）
    pub file_path: Option<PathBuf>,
    /// 是否输出到控制台
    pub console: bool,
    /// 是否使用JSON格式
    pub json_format: bool,
    /// 模块级别日志控制
    pub module_levels: HashMap<String, LevelFilter>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            file_path: None,
            console: true,
            json_format: false,
            module_levels: HashMap::new(),
        }
    }
}

impl LogConfig {
    /// 由级别字符串创建配置，无法识别时使用 info
    pub fn with_level(level: &str) -> Self {
        Self {
            level: parse_level(level),
            ..Self::default()
        }
    }
}

/// 解析日志级别字符串
pub fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level).unwrap_or(LevelFilter::Info)
}

/// 日志系统管理器
#[derive(Debug)]
pub struct LoggingSystem {
    config: LogConfig,
}

impl LoggingSystem {
    /// 初始化日志系统
    ///
    /// 多次调用只会初始化一次；全局subscriber已被其他代码设置时视为成功
    ///
    /// # 参数
    /// * `config` - 日志配置
    ///
    /// # 返回
    /// * `anyhow::Result<LoggingSystem>` - 初始化结果
    pub fn setup_logging(config: LogConfig) -> anyhow::Result<Self> {
        Self::setup_logging_with_options(config, false)
    }

    /// 初始化日志系统（带选项）
    ///
    /// # 参数
    /// * `config` - 日志配置
    /// * `force_reinit` - 之前初始化失败时是否重试
    pub fn setup_logging_with_options(
        config: LogConfig,
        force_reinit: bool,
    ) -> anyhow::Result<Self> {
        let state_mutex =
            GLOBAL_LOGGING_STATE.get_or_init(|| Mutex::new(GlobalLoggingState::default()));
        let mut state = state_mutex
            .lock()
            .map_err(|_| anyhow::anyhow!("日志状态锁已损坏"))?;

        if state.initialized && !force_reinit {
            if let Some(e) = &state.init_error {
                return Err(anyhow::anyhow!("日志系统之前初始化失败: {}", e));
            }
            return Ok(Self { config });
        }

        let result = Self::perform_initialization(&config);
        state.initialized = true;
        state.current_config = Some(config.clone());
        state.init_error = result.as_ref().err().map(|e| e.to_string());

        result.map(|()| Self { config })
    }

    /// 执行实际的日志系统初始化
    fn perform_initialization(config: &LogConfig) -> anyhow::Result<()> {
        Self::init_log_tracer()?;
        Self::init_tracing_subscriber(config)
    }

    /// 初始化 LogTracer
    fn init_log_tracer() -> anyhow::Result<()> {
        static LOG_TRACER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

        LOG_TRACER_INIT
            .get_or_init(|| tracing_log::LogTracer::init().map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| anyhow::anyhow!("LogTracer初始化失败: {}", e))?;
        Ok(())
    }

    /// 构建过滤器，在 `RUST_LOG` 的基础上叠加配置中的级别
    fn build_filter(config: &LogConfig) -> EnvFilter {
        let mut env_filter = EnvFilter::from_default_env().add_directive(
            level_name(config.level)
                .parse()
                .unwrap_or_else(|_| tracing::Level::INFO.into()),
        );

        for (module, level) in &config.module_levels {
            match format!("{}={}", module, level_name(*level)).parse() {
                Ok(directive) => env_filter = env_filter.add_directive(directive),
                Err(e) => eprintln!("忽略无效的模块日志级别 {module}: {e}"),
            }
        }

        env_filter
    }

    /// 初始化 tracing subscriber
    fn init_tracing_subscriber(config: &LogConfig) -> anyhow::Result<()> {
        let console_layer = (config.console || config.file_path.is_none()).then(|| {
            if config.json_format {
                fmt::layer()
                    .json()
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .with_target(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_names(true)
                    .boxed()
            }
        });

        let file_layer = match &config.file_path {
            Some(file_path) => {
                if let Some(parent) = file_path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)
                            .map_err(|e| anyhow::anyhow!("创建日志目录失败: {}", e))?;
                    }
                }
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(file_path)
                    .map_err(|e| anyhow::anyhow!("创建日志文件失败: {}", e))?;

                let layer = fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .with_ansi(false);
                Some(if config.json_format {
                    layer.json().boxed()
                } else {
                    layer.boxed()
                })
            }
            None => None,
        };

        let result = registry()
            .with(Self::build_filter(config))
            .with(console_layer)
            .with(file_layer)
            .try_init();

        match result {
            Ok(()) => {
                tracing::info!("日志系统初始化完成");
                tracing::debug!("日志配置: {:?}", config);
                Ok(())
            }
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("already been set")
                    || error_msg.contains("already initialized")
                {
                    // 全局subscriber已由其他代码设置
                    tracing::debug!("日志系统已经初始化过了");
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("tracing subscriber初始化失败: {}", error_msg))
                }
            }
        }
    }

    /// 当前实例的配置
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// 检查日志系统是否已初始化
    pub fn is_initialized() -> bool {
        GLOBAL_LOGGING_STATE
            .get()
            .and_then(|state| state.lock().ok().map(|s| s.initialized))
            .unwrap_or(false)
    }

    /// 获取当前日志配置（如果已初始化）
    pub fn current_config() -> Option<LogConfig> {
        GLOBAL_LOGGING_STATE
            .get()
            .and_then(|state| state.lock().ok().and_then(|s| s.current_config.clone()))
    }

    /// 重置日志系统状态（主要用于测试）
    #[cfg(test)]
    pub fn reset_for_testing() {
        if let Some(state_mutex) = GLOBAL_LOGGING_STATE.get() {
            if let Ok(mut state) = state_mutex.lock() {
                *state = GlobalLoggingState::default();
            }
        }
    }
}

/// 将 log::LevelFilter 转换为过滤指令中的级别名
fn level_name(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}
