//! 持久化与服务启动测试
//!
//! 使用SQLite文件数据库验证重启后的恢复和种子监控项同步

use std::time::Duration;
use tempfile::TempDir;
use uptime_vitals::config::{Config, GlobalConfig, MonitorConfig};
use uptime_vitals::core::ServiceLauncher;
use uptime_vitals::monitor::{MonitorRegistry, MonitorStatus, OwnerId};
use uptime_vitals::store::{HistoryStore, MonitorStore, SqliteStore};

fn config_with(database_url: String, url: String, enabled: bool) -> Config {
    Config {
        global: GlobalConfig {
            database_url: Some(database_url),
            ..GlobalConfig::default()
        },
        monitors: vec![MonitorConfig {
            name: "Homepage".to_string(),
            url,
            interval_seconds: 60,
            owner: "admin".to_string(),
            enabled,
        }],
    }
}

async fn wait_for_status(registry: &MonitorRegistry, expected: MonitorStatus) {
    let owner = OwnerId::from("admin");
    for _ in 0..100 {
        if let Some(monitor) = registry.find_by_name(&owner, "Homepage").await {
            if monitor.status == expected {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("monitor never reached {expected}");
}

#[tokio::test]
async fn test_restart_restores_monitors_without_duplicates() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/health")
        .with_status(200)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let database_url = format!("sqlite://{}", dir.path().join("data/uptime.db").display());
    let config = config_with(
        database_url.clone(),
        format!("{}/health", server.url()),
        true,
    );

    let first = ServiceLauncher::initialize_service_components(&config)
        .await
        .unwrap();
    wait_for_status(&first.registry, MonitorStatus::Up).await;
    let original = first
        .registry
        .find_by_name(&OwnerId::from("admin"), "Homepage")
        .await
        .unwrap();
    first.pruner.stop();
    first.registry.scheduler().stop().await;
    drop(first);

    // 第二次启动：恢复已保存的监控项，同名种子不会重复创建
    let second = ServiceLauncher::initialize_service_components(&config)
        .await
        .unwrap();
    let monitors = second.registry.list_all().await;
    assert_eq!(monitors.len(), 1);
    assert_eq!(monitors[0].id, original.id);
    assert_eq!(monitors[0].status, MonitorStatus::Up);
    assert!(second.registry.scheduler().is_scheduled(original.id).await);

    second.pruner.stop();
    second.registry.scheduler().stop().await;
    drop(second);

    let store = SqliteStore::connect(&database_url).await.unwrap();
    assert_eq!(store.load_all().await.unwrap().len(), 1);
    assert!(!store.recent(original.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_disabling_seed_pauses_persisted_monitor() {
    let dir = TempDir::new().unwrap();
    let database_url = format!("sqlite://{}", dir.path().join("uptime.db").display());

    // 目标不可达也没关系，只关心暂停状态
    let config = config_with(
        database_url.clone(),
        "http://127.0.0.1:9/unreachable".to_string(),
        false,
    );

    let components = ServiceLauncher::initialize_service_components(&config)
        .await
        .unwrap();
    let monitor = components
        .registry
        .find_by_name(&OwnerId::from("admin"), "Homepage")
        .await
        .unwrap();
    assert!(monitor.paused);
    assert_eq!(monitor.status, MonitorStatus::Unknown);
    assert!(!components.registry.scheduler().is_scheduled(monitor.id).await);

    components.pruner.stop();
    components.registry.scheduler().stop().await;
    drop(components);

    let store = SqliteStore::connect(&database_url).await.unwrap();
    let persisted = store.load_all().await.unwrap();
    assert_eq!(persisted.len(), 1);
    assert!(persisted[0].paused);
}
