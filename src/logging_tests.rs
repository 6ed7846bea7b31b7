//! 日志系统测试模块

use crate::logging::{parse_level, LogConfig, LoggingSystem};
use log::LevelFilter;
use serial_test::serial;
use tempfile::NamedTempFile;

/// 创建测试用的日志配置
fn create_test_config() -> LogConfig {
    LogConfig {
        level: LevelFilter::Info,
        ..LogConfig::default()
    }
}

#[test]
#[serial]
fn test_logging_system_single_initialization() {
    LoggingSystem::reset_for_testing();

    let config = create_test_config();

    assert!(LoggingSystem::setup_logging(config.clone()).is_ok());
    assert!(LoggingSystem::is_initialized());

    // 第二次调用不会重复初始化
    assert!(LoggingSystem::setup_logging(config).is_ok());
}

#[test]
#[serial]
fn test_logging_system_force_reinit() {
    LoggingSystem::reset_for_testing();

    let config = create_test_config();
    LoggingSystem::setup_logging(config.clone()).unwrap();

    assert!(LoggingSystem::setup_logging_with_options(config, true).is_ok());
}

#[test]
#[serial]
fn test_logging_system_with_file_output() {
    LoggingSystem::reset_for_testing();

    let temp_file = NamedTempFile::new().unwrap();
    let config = LogConfig {
        file_path: Some(temp_file.path().to_path_buf()),
        console: false,
        ..create_test_config()
    };

    let system = LoggingSystem::setup_logging(config).unwrap();
    assert!(system.config().file_path.is_some());
}

#[test]
#[serial]
fn test_logging_system_with_json_format() {
    LoggingSystem::reset_for_testing();

    let config = LogConfig {
        json_format: true,
        ..create_test_config()
    };

    assert!(LoggingSystem::setup_logging(config).is_ok());
}

#[test]
#[serial]
fn test_current_config_retrieval() {
    LoggingSystem::reset_for_testing();

    let config = create_test_config();
    LoggingSystem::setup_logging(config.clone()).unwrap();

    assert_eq!(LoggingSystem::current_config(), Some(config));
}

#[test]
#[serial]
fn test_module_level_filtering() {
    LoggingSystem::reset_for_testing();

    let mut config = create_test_config();
    config
        .module_levels
        .insert("uptime_vitals::health".to_string(), LevelFilter::Debug);
    config
        .module_levels
        .insert("sqlx".to_string(), LevelFilter::Warn);

    assert!(LoggingSystem::setup_logging(config).is_ok());
}

#[test]
fn test_parse_level() {
    assert_eq!(parse_level("debug"), LevelFilter::Debug);
    assert_eq!(parse_level("WARN"), LevelFilter::Warn);
    assert_eq!(parse_level("nonsense"), LevelFilter::Info);
    assert_eq!(LogConfig::with_level("error").level, LevelFilter::Error);
}
