// Shared HTTP transport: one reqwest connection pool reused by every adapter of a pool

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use super::context::SendContext;
use super::error::{ImError, Result};
use super::types::Platform;
use super::util::truncate_for_log;
use crate::proxy_config::{self, ProxySettings};
use crate::ulog_debug;

/// Pooled connections are dropped after this long without use.
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(90);

/// HTTP client tuning.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    pub proxy: Option<ProxySettings>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_idle_conns: 100,
            max_idle_conns_per_host: 10,
            proxy: None,
        }
    }
}

struct TransportInner {
    config: TransportConfig,
    client: RwLock<reqwest::Client>,
    /// Standalone adapters own their transport; pooled ones borrow the pool's.
    owned: bool,
}

/// Cheaply cloneable handle to the shared HTTP client.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.inner.config)
            .field("owned", &self.inner.owned)
            .finish()
    }
}

fn build_client(config: &TransportConfig) -> Result<reqwest::Client> {
    // reqwest has no global idle cap, so the per-host cap is bounded by it instead
    let per_host = config.max_idle_conns_per_host.min(config.max_idle_conns);
    let builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .pool_max_idle_per_host(per_host)
        .pool_idle_timeout(IDLE_CONNECTION_TIMEOUT);
    proxy_config::apply_proxy(builder, config.proxy.as_ref())?
        .build()
        .map_err(|e| ImError::Transport(format!("failed to build HTTP client: {}", e)))
}

impl Transport {
    /// Transport shared by the adapters of a pool.
    pub fn shared(config: TransportConfig) -> Result<Self> {
        Self::build(config, false)
    }

    /// Transport owned by one standalone adapter; its `close()` releases it.
    pub fn owned(config: TransportConfig) -> Result<Self> {
        Self::build(config, true)
    }

    fn build(config: TransportConfig, owned: bool) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(Self {
            inner: Arc::new(TransportInner {
                config,
                client: RwLock::new(client),
                owned,
            }),
        })
    }

    pub fn is_owned(&self) -> bool {
        self.inner.owned
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Current client. Requests built from it keep its pool alive until they finish.
    pub fn client(&self) -> reqwest::Client {
        self.inner.client.read().clone()
    }

    /// Drop pooled idle connections by swapping in a freshly built client.
    pub fn close_idle_connections(&self) {
        match build_client(&self.inner.config) {
            Ok(fresh) => {
                *self.inner.client.write() = fresh;
                ulog_debug!("[transport] Idle connections released");
            }
            Err(e) => {
                // Config was valid at construction, keep the old client
                ulog_debug!("[transport] Failed to rebuild client: {}", e);
            }
        }
    }

    /// Send `request` bound to `ctx` and decode a JSON response body.
    ///
    /// A body that fails to decode on a non-2xx status becomes `PlatformApi` carrying the
    /// HTTP status; on a 2xx status it is a `Decode` error.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        ctx: &SendContext,
        platform: Platform,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        ctx.run(async move {
            let resp = request.send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            match serde_json::from_str::<T>(&body) {
                Ok(value) => Ok(value),
                Err(_) if !status.is_success() => Err(ImError::PlatformApi {
                    platform,
                    code: i64::from(status.as_u16()),
                    message: truncate_for_log(&body, 200),
                }),
                Err(e) => Err(ImError::Decode(format!(
                    "{} (body: {})",
                    e,
                    truncate_for_log(&body, 200)
                ))),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Envelope {
        ok: bool,
    }

    #[tokio::test]
    async fn test_send_json_decodes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .mount(&server)
            .await;

        let transport = Transport::shared(TransportConfig::default()).unwrap();
        let req = transport.client().get(format!("{}/ping", server.uri()));
        let env: Envelope = transport
            .send_json(&SendContext::background(), Platform::Telegram, req)
            .await
            .unwrap();
        assert!(env.ok);
    }

    #[tokio::test]
    async fn test_non_json_error_status_is_platform_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let transport = Transport::shared(TransportConfig::default()).unwrap();
        let req = transport.client().get(server.uri());
        let err = transport
            .send_json::<Envelope>(&SendContext::background(), Platform::WeCom, req)
            .await
            .unwrap_err();
        match err {
            ImError::PlatformApi { code, message, .. } => {
                assert_eq!(code, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_success_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let transport = Transport::shared(TransportConfig::default()).unwrap();
        let req = transport.client().get(server.uri());
        let err = transport
            .send_json::<Envelope>(&SendContext::background(), Platform::Feishu, req)
            .await
            .unwrap_err();
        assert!(matches!(err, ImError::Decode(_)));
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .expect(0)
            .mount(&server)
            .await;

        let transport = Transport::shared(TransportConfig::default()).unwrap();
        let ctx = SendContext::background();
        ctx.cancel();
        let req = transport.client().get(server.uri());
        let err = transport
            .send_json::<Envelope>(&ctx, Platform::Telegram, req)
            .await
            .unwrap_err();
        assert!(matches!(err, ImError::Cancelled));
    }

    #[tokio::test]
    async fn test_close_idle_connections_keeps_transport_usable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .expect(2)
            .mount(&server)
            .await;

        let transport = Transport::owned(TransportConfig::default()).unwrap();
        assert!(transport.is_owned());
        let ctx = SendContext::background();
        let first: Envelope = transport
            .send_json(&ctx, Platform::Telegram, transport.client().get(server.uri()))
            .await
            .unwrap();
        transport.close_idle_connections();
        let second: Envelope = transport
            .send_json(&ctx, Platform::Telegram, transport.client().get(server.uri()))
            .await
            .unwrap();
        assert!(first.ok && second.ok);
    }
}
