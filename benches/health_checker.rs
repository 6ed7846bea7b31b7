//! 可用率计算基准测试
//!
//! 测试探测结果处理、窗口统计和可用率计算的性能

use chrono::{Duration as ChronoDuration, Utc};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use uptime_vitals::health::uptime::uptime_percentage;
use uptime_vitals::health::{ProbeResult, UptimeAggregator};
use uptime_vitals::monitor::MonitorId;
use uptime_vitals::store::{HistoryEntry, HistoryStore, MemoryStore, WindowTally};

/// 探测结果处理基准测试
fn probe_result_benchmark(c: &mut Criterion) {
    c.bench_function("probe_result_creation", |b| {
        b.iter(|| {
            let result = ProbeResult::from_response(200, "OK", Duration::from_millis(150));
            black_box(result)
        });
    });

    c.bench_function("probe_result_serialization", |b| {
        let result = ProbeResult::from_response(503, "Service Unavailable", Duration::from_millis(80));

        b.iter(|| {
            let json = serde_json::to_string(&result).unwrap();
            black_box(json)
        });
    });

    c.bench_function("uptime_percentage", |b| {
        b.iter(|| {
            let tally = WindowTally {
                up: black_box(1437),
                total: black_box(1440),
            };
            black_box(uptime_percentage(tally))
        });
    });
}

/// 窗口统计基准测试，30天内每分钟一条记录
fn uptime_window_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let monitor_id = MonitorId::new();
    let now = Utc::now();

    runtime.block_on(async {
        for minute in (0..30 * 24 * 60).rev() {
            let result = if minute % 97 == 0 {
                ProbeResult::failure("Connection refused: test", Duration::from_millis(3))
            } else {
                ProbeResult::from_response(200, "OK", Duration::from_millis(40))
            };
            let entry = HistoryEntry::from_probe(monitor_id, &result)
                .at(now - ChronoDuration::minutes(minute));
            store.append(&entry).await.unwrap();
        }
    });

    let aggregator = UptimeAggregator::new(store.clone());

    c.bench_function("uptime_windows_30d", |b| {
        b.iter(|| {
            let windows = runtime
                .block_on(aggregator.compute_at(monitor_id, now))
                .unwrap();
            black_box(windows)
        });
    });

    c.bench_function("history_recent_50", |b| {
        b.iter(|| {
            let entries = runtime.block_on(store.recent(monitor_id, 50)).unwrap();
            black_box(entries)
        });
    });
}

criterion_group!(benches, probe_result_benchmark, uptime_window_benchmark);
criterion_main!(benches);
