//! SQLite存储实现
//!
//! 时间戳以定长RFC3339 UTC文本保存（微秒精度，`Z` 结尾），字典序即时间序

use crate::error::{StorageError, StorageResult};
use crate::health::result::ProbeStatus;
use crate::monitor::{Monitor, MonitorId, MonitorStatus, OwnerId};
use crate::store::{HistoryEntry, HistoryStore, MonitorStore, WindowTally};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// 基于 `SqlitePool` 的存储，同时实现 `HistoryStore` 和 `MonitorStore`
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 连接数据库并执行迁移
    ///
    /// # 参数
    /// * `database_url` - 例如 `sqlite://uptime.db`
    ///
    /// # 返回
    /// * `StorageResult<Self>` - 存储实例
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        ensure_parent_dir(database_url)?;

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        info!("已连接数据库: {}", database_url);
        Self::with_pool(pool).await
    }

    /// 创建内存数据库，单连接以保证所有查询看到同一个库
    pub async fn in_memory() -> StorageResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::with_pool(pool).await
    }

    /// 使用已有连接池，执行迁移
    pub async fn with_pool(pool: SqlitePool) -> StorageResult<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// 为文件数据库创建所在目录
fn ensure_parent_dir(database_url: &str) -> StorageResult<()> {
    let Some(path) = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
    else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Unavailable(format!(
                    "无法创建数据库目录 {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    Ok(())
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupted(format!("无效的时间戳 {raw}: {e}")))
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn append(&self, entry: &HistoryEntry) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO monitor_history (monitor_id, timestamp, status, response_time_ms, message)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.monitor_id.to_string())
        .bind(format_timestamp(&entry.timestamp))
        .bind(entry.status.as_str())
        .bind(saturating_i64(entry.response_time_ms))
        .bind(&entry.message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(
        &self,
        monitor_id: MonitorId,
        limit: usize,
    ) -> StorageResult<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT monitor_id, timestamp, status, response_time_ms, message
            FROM monitor_history
            WHERE monitor_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(monitor_id.to_string())
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryEntry::try_from).collect()
    }

    async fn tally_since(
        &self,
        monitor_id: MonitorId,
        since: DateTime<Utc>,
    ) -> StorageResult<WindowTally> {
        let (up, total): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(CASE WHEN status = 'up' THEN 1 ELSE 0 END), 0),
                   COUNT(*)
            FROM monitor_history
            WHERE monitor_id = ? AND timestamp >= ?
            "#,
        )
        .bind(monitor_id.to_string())
        .bind(format_timestamp(&since))
        .fetch_one(&self.pool)
        .await?;

        Ok(WindowTally {
            up: up.max(0) as u64,
            total: total.max(0) as u64,
        })
    }

    async fn purge_monitor(&self, monitor_id: MonitorId) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM monitor_history WHERE monitor_id = ?")
            .bind(monitor_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM monitor_history WHERE timestamp < ?")
            .bind(format_timestamp(&cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MonitorStore for SqliteStore {
    async fn load_all(&self) -> StorageResult<Vec<Monitor>> {
        let rows = sqlx::query_as::<_, MonitorRow>(
            r#"
            SELECT id, owner, name, url, interval_secs, paused, status,
                   last_checked, response_time_ms, last_message,
                   uptime_24h, uptime_30d, created_at
            FROM monitors
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Monitor::try_from).collect()
    }

    async fn upsert(&self, monitor: &Monitor) -> StorageResult<()> {
        let interval_secs = i64::try_from(monitor.interval_secs).map_err(|_| {
            StorageError::OutOfRange(format!(
                "监控项 {} 的检测间隔 {}秒",
                monitor.id, monitor.interval_secs
            ))
        })?;

        sqlx::query(
            r#"
            INSERT INTO monitors (
                id, owner, name, url, interval_secs, paused, status,
                last_checked, response_time_ms, last_message,
                uptime_24h, uptime_30d, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner = excluded.owner,
                name = excluded.name,
                url = excluded.url,
                interval_secs = excluded.interval_secs,
                paused = excluded.paused,
                status = excluded.status,
                last_checked = excluded.last_checked,
                response_time_ms = excluded.response_time_ms,
                last_message = excluded.last_message,
                uptime_24h = excluded.uptime_24h,
                uptime_30d = excluded.uptime_30d
            "#,
        )
        .bind(monitor.id.to_string())
        .bind(monitor.owner.as_str())
        .bind(&monitor.name)
        .bind(&monitor.url)
        .bind(interval_secs)
        .bind(monitor.paused)
        .bind(monitor.status.as_str())
        .bind(monitor.last_checked.as_ref().map(format_timestamp))
        .bind(monitor.response_time_ms.map(saturating_i64))
        .bind(&monitor.last_message)
        .bind(monitor.uptime_24h)
        .bind(monitor.uptime_30d)
        .bind(format_timestamp(&monitor.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, monitor_id: MonitorId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM monitors WHERE id = ?")
            .bind(monitor_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// --- Internal Row Types ---

#[derive(sqlx::FromRow)]
struct HistoryRow {
    monitor_id: String,
    timestamp: String,
    status: String,
    response_time_ms: i64,
    message: String,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = StorageError;

    fn try_from(row: HistoryRow) -> StorageResult<Self> {
        Ok(Self {
            monitor_id: parse_monitor_id(&row.monitor_id)?,
            timestamp: parse_timestamp(&row.timestamp)?,
            status: ProbeStatus::from_str(&row.status).map_err(StorageError::Corrupted)?,
            response_time_ms: row.response_time_ms.max(0) as u64,
            message: row.message,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MonitorRow {
    id: String,
    owner: String,
    name: String,
    url: String,
    interval_secs: i64,
    paused: bool,
    status: String,
    last_checked: Option<String>,
    response_time_ms: Option<i64>,
    last_message: Option<String>,
    uptime_24h: f64,
    uptime_30d: f64,
    created_at: String,
}

impl TryFrom<MonitorRow> for Monitor {
    type Error = StorageError;

    fn try_from(row: MonitorRow) -> StorageResult<Self> {
        Ok(Self {
            id: parse_monitor_id(&row.id)?,
            owner: OwnerId::new(row.owner),
            name: row.name,
            url: row.url,
            interval_secs: u64::try_from(row.interval_secs).map_err(|_| {
                StorageError::Corrupted(format!("无效的检测间隔: {}", row.interval_secs))
            })?,
            paused: row.paused,
            status: MonitorStatus::from_str(&row.status).map_err(StorageError::Corrupted)?,
            last_checked: row.last_checked.as_deref().map(parse_timestamp).transpose()?,
            response_time_ms: row.response_time_ms.map(|ms| ms.max(0) as u64),
            last_message: row.last_message,
            uptime_24h: row.uptime_24h,
            uptime_30d: row.uptime_30d,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

fn parse_monitor_id(raw: &str) -> StorageResult<MonitorId> {
    MonitorId::from_str(raw)
        .map_err(|e| StorageError::Corrupted(format!("无效的监控项ID {raw}: {e}")))
}
