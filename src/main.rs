//! Uptime Vitals 主程序入口
//!
//! 可用性监控引擎

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    uptime_vitals::core::app::main().await
}
