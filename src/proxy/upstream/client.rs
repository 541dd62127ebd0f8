// 上游客户端实现
// 每次调用只发一次请求，不做重试或端点降级 (重试提示交给调用方)

use reqwest::Client;
use tokio::time::Duration;

use crate::constants::USER_AGENT;
use crate::error::AppResult;
use crate::proxy::config::{normalize_proxy_url, UpstreamConfig};
use crate::proxy::gateway::OutboundCall;
use crate::proxy::normalizer::BackendResponse;

pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> AppResult<Self> {
        Ok(Self {
            client: Self::build_client(config)?,
        })
    }

    fn build_client(config: &UpstreamConfig) -> Result<Client, reqwest::Error> {
        let mut builder = Client::builder()
            // Connection settings (优化连接复用，减少建立开销)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(16) // 每主机最多 16 个空闲连接
            .pool_idle_timeout(Duration::from_secs(90)) // 空闲连接保持 90 秒
            .tcp_keepalive(Duration::from_secs(60)) // TCP 保活探测 60 秒
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(USER_AGENT);

        if let Some(proxy) = config.proxy.as_ref() {
            if proxy.enabled && !proxy.url.trim().is_empty() {
                let url = normalize_proxy_url(&proxy.url);
                match reqwest::Proxy::all(&url) {
                    Ok(p) => {
                        builder = builder.proxy(p);
                        tracing::info!("UpstreamClient enabled proxy: {}", url);
                    }
                    Err(e) => tracing::warn!("Invalid upstream proxy {}: {}", url, e),
                }
            }
        }

        builder.build()
    }

    /// Issue exactly one request and buffer the whole response.
    pub async fn execute(&self, call: OutboundCall) -> AppResult<BackendResponse> {
        tracing::debug!("Upstream {} {}", call.method, call.url);

        let response = self
            .client
            .request(call.method, &call.url)
            .headers(call.headers)
            .body(call.body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Upstream returned {} for {}", status, call.url);
        }

        BackendResponse::from_upstream(response).await
    }
}
