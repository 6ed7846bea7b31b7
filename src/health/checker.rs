//! HTTP探测器实现
//!
//! 对目标URL发起一次带超时的GET请求，并将所有失败归类为 `down` 结果

use crate::error::Result;
use crate::health::result::ProbeResult;
use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// 默认最大重定向次数
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// 探测器trait，定义单次检测接口
#[async_trait]
pub trait Prober: Send + Sync {
    /// 执行一次探测
    ///
    /// # 参数
    /// * `url` - 目标URL
    /// * `timeout_duration` - 本次探测的超时时间
    ///
    /// # 返回
    /// * `ProbeResult` - 探测结果，失败也以 `down` 结果返回
    async fn probe(&self, url: &Url, timeout_duration: Duration) -> ProbeResult;

    /// 批量探测
    async fn check_batch(&self, urls: &[Url], timeout_duration: Duration) -> Vec<ProbeResult> {
        let futures = urls.iter().map(|url| self.probe(url, timeout_duration));
        futures::future::join_all(futures).await
    }
}

/// HTTP探测器实现
pub struct HttpProber {
    /// HTTP客户端
    client: Client,
}

impl HttpProber {
    /// 创建新的HTTP探测器
    ///
    /// # 参数
    /// * `max_redirects` - 最多跟随的重定向次数
    ///
    /// # 返回
    /// * `Result<Self>` - 探测器实例
    pub fn new(max_redirects: usize) -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::limited(max_redirects))
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()?;

        Ok(Self { client })
    }

    /// 格式化请求错误信息，保留原始错误文本
    fn format_request_error(&self, error: &reqwest::Error) -> String {
        let category = if error.is_timeout() {
            "Request timeout"
        } else if error.is_redirect() {
            "Too many redirects"
        } else if error.is_connect() {
            let error_str = format!("{error:?}").to_lowercase();
            if error_str.contains("dns") || error_str.contains("resolve") {
                "DNS resolution failed"
            } else if error_str.contains("certificate")
                || error_str.contains("tls")
                || error_str.contains("ssl")
            {
                "SSL/TLS certificate error"
            } else {
                "Connection refused"
            }
        } else if error.is_request() {
            "Invalid request"
        } else {
            "Request failed"
        };

        format!("{category}: {error}")
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &Url, timeout_duration: Duration) -> ProbeResult {
        if !matches!(url.scheme(), "http" | "https") {
            return ProbeResult::failure(
                format!("Unsupported URL scheme: {}", url.scheme()),
                Duration::ZERO,
            );
        }

        let start_time = Instant::now();

        // send() 在收到响应头后返回，响应体不读取
        let response_result = timeout(timeout_duration, self.client.get(url.clone()).send()).await;

        let response_time = start_time.elapsed();

        match response_result {
            Ok(Ok(response)) => {
                let status = response.status();
                ProbeResult::from_response(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown"),
                    response_time,
                )
            }
            Ok(Err(e)) => ProbeResult::failure(self.format_request_error(&e), response_time),
            Err(_) => ProbeResult::failure(
                format!("Request timeout after {}ms", timeout_duration.as_millis()),
                response_time,
            ),
        }
    }
}
