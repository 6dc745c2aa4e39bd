// WeCom (WeChat Work) application message adapter
// Token from cgi-bin/gettoken, delivery through cgi-bin/message/send.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::adapter::ImClient;
use super::config::WeComConfig;
use super::context::SendContext;
use super::delivery::{self, RetryPolicy};
use super::error::{ImError, Result};
use super::token::{IssuedToken, TokenManager, TokenSource};
use super::transport::Transport;
use super::types::{ChatType, Message, MessageKind, Platform, SendOptions, Target};
use super::util::{join_url, mask_secret};
use crate::{ulog_debug, ulog_info};

const WECOM_API_BASE: &str = "https://qyapi.weixin.qq.com/cgi-bin";
const TOKEN_VALIDITY_SECS: u64 = 7200;
/// 40014 invalid access_token, 42001 access_token expired
const TOKEN_INVALID_CODES: [i64; 2] = [40014, 42001];

fn api_error(json: &Value) -> Option<ImError> {
    let code = json["errcode"].as_i64().unwrap_or(0);
    if code == 0 {
        return None;
    }
    Some(ImError::PlatformApi {
        platform: Platform::WeCom,
        code,
        message: json["errmsg"].as_str().unwrap_or("unknown").to_string(),
    })
}

struct CorpTokenSource {
    transport: Transport,
    base_url: String,
    corp_id: String,
    corp_secret: String,
}

#[async_trait]
impl TokenSource for CorpTokenSource {
    async fn fetch(&self, ctx: &SendContext) -> Result<IssuedToken> {
        let url = format!(
            "{}?corpid={}&corpsecret={}",
            join_url(&self.base_url, "gettoken"),
            urlencoding::encode(&self.corp_id),
            urlencoding::encode(&self.corp_secret)
        );
        let req = self.transport.client().get(&url);
        let json: Value = self.transport.send_json(ctx, Platform::WeCom, req).await?;

        if let Some(err) = api_error(&json) {
            return Err(ImError::TokenRefresh {
                platform: Platform::WeCom,
                reason: err.to_string(),
            });
        }
        let value = json["access_token"]
            .as_str()
            .ok_or_else(|| ImError::Decode("No access_token in response".to_string()))?
            .to_string();
        let expires_in = json["expires_in"].as_u64().unwrap_or(TOKEN_VALIDITY_SECS);
        Ok(IssuedToken {
            value,
            ttl: Duration::from_secs(expires_in),
        })
    }
}

/// WeCom application client
pub struct WeComClient {
    transport: Transport,
    base_url: String,
    agent_id: i64,
    tokens: TokenManager,
    retry: RetryPolicy,
    closed: AtomicBool,
}

impl WeComClient {
    /// Build a client and fetch the first access token.
    pub async fn connect(
        ctx: &SendContext,
        config: WeComConfig,
        transport: Transport,
    ) -> Result<Self> {
        let base_url = config
            .base_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| WECOM_API_BASE.to_string());
        let source = CorpTokenSource {
            transport: transport.clone(),
            base_url: base_url.clone(),
            corp_id: config.corp_id.clone(),
            corp_secret: config.corp_secret,
        };
        let tokens = TokenManager::new(Platform::WeCom, Box::new(source));
        tokens.get_token(ctx).await?;
        ulog_info!(
            "[wecom] Connected corp {} agent {}",
            mask_secret(&config.corp_id),
            config.agent_id
        );

        Ok(Self {
            transport,
            base_url,
            agent_id: config.agent_id,
            tokens,
            retry: RetryPolicy::default(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn body_for(&self, message: &Message, target: &Target) -> Value {
        let mut body = json!({ "agentid": self.agent_id });
        match target.chat_type {
            ChatType::Private => body["touser"] = json!(target.id),
            ChatType::Group => body["toparty"] = json!(target.id),
        }
        match message.kind {
            MessageKind::Text => {
                body["msgtype"] = json!("text");
                body["text"] = json!({ "content": message.content });
            }
            MessageKind::Markdown => {
                body["msgtype"] = json!("markdown");
                body["markdown"] = json!({ "content": message.content });
            }
            MessageKind::Card => {
                body["msgtype"] = json!("textcard");
                body["textcard"] = json!({
                    "title": message
                        .extra
                        .get("title")
                        .cloned()
                        .unwrap_or_else(|| json!("Message")),
                    "description": message.content,
                    "url": message.extra.get("url").cloned().unwrap_or_else(|| json!("")),
                });
            }
            MessageKind::Image => {
                body["msgtype"] = json!("image");
                body["image"] = json!({ "media_id": message.content });
            }
        }
        body
    }

    async fn send_to_target(
        &self,
        ctx: &SendContext,
        message: &Message,
        target: &Target,
    ) -> Result<()> {
        let token = self.tokens.get_token(ctx).await?;
        let url = format!(
            "{}?access_token={}",
            join_url(&self.base_url, "message/send"),
            urlencoding::encode(&token)
        );
        let req = self
            .transport
            .client()
            .post(&url)
            .json(&self.body_for(message, target));
        let json: Value = self.transport.send_json(ctx, Platform::WeCom, req).await?;

        if let Some(err) = api_error(&json) {
            if let ImError::PlatformApi { code, .. } = &err {
                if TOKEN_INVALID_CODES.contains(code) {
                    // Next attempt fetches a fresh token
                    self.tokens.invalidate().await;
                }
            }
            return Err(err);
        }
        ulog_debug!("[wecom] Sent {} to {}", message.kind.as_str(), target);
        Ok(())
    }
}

#[async_trait]
impl ImClient for WeComClient {
    async fn send(
        &self,
        ctx: &SendContext,
        message: &Message,
        options: &SendOptions,
    ) -> Result<()> {
        message.ensure_not_empty()?;
        options.require_targets()?;
        delivery::deliver_all(
            ctx,
            self.retry,
            Platform::WeCom,
            &options.targets,
            move |target, _| async move { self.send_to_target(ctx, message, &target).await },
        )
        .await
    }

    fn platform_name(&self) -> &'static str {
        Platform::WeCom.as_str()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.tokens.clear().await;
        if self.transport.is_owned() {
            self.transport.close_idle_connections();
        }
        ulog_debug!("[wecom] Client closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::transport::TransportConfig;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_token(server: &MockServer, token: &str, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/gettoken"))
            .and(query_param("corpid", "ww1"))
            .and(query_param("corpsecret", "sec"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errcode": 0,
                "errmsg": "ok",
                "access_token": token,
                "expires_in": 7200
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn ok() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"errcode": 0, "errmsg": "ok"}))
    }

    fn config(server: &MockServer) -> WeComConfig {
        WeComConfig {
            corp_id: "ww1".into(),
            corp_secret: "sec".into(),
            agent_id: 1000002,
            base_url: Some(server.uri()),
        }
    }

    async fn client(server: &MockServer) -> WeComClient {
        let transport = Transport::shared(TransportConfig::default()).unwrap();
        WeComClient::connect(&SendContext::background(), config(server), transport)
            .await
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                backoff_step: Duration::from_millis(1),
            })
    }

    #[tokio::test]
    async fn test_private_and_group_recipients() {
        let server = MockServer::start().await;
        mount_token(&server, "wx-tok", 1).await;
        Mock::given(method("POST"))
            .and(path("/message/send"))
            .and(query_param("access_token", "wx-tok"))
            .and(body_partial_json(json!({
                "touser": "zhangsan",
                "agentid": 1000002,
                "msgtype": "text"
            })))
            .respond_with(ok())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/message/send"))
            .and(body_partial_json(json!({"toparty": "2", "msgtype": "markdown"})))
            .respond_with(ok())
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server).await;
        let ctx = SendContext::background();
        c.send_private(&ctx, "zhangsan", &Message::text("hi")).await.unwrap();
        c.send_group(&ctx, "2", &Message::markdown("**hi**")).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_token_invalidated_and_refetched() {
        let server = MockServer::start().await;
        mount_token(&server, "wx-tok", 2).await;
        Mock::given(method("POST"))
            .and(path("/message/send"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"errcode": 42001, "errmsg": "access_token expired"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/message/send"))
            .respond_with(ok())
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server).await;
        c.send_private(&SendContext::background(), "lisi", &Message::text("ping"))
            .await
            .unwrap();
        assert_eq!(c.tokens.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_propagates_token_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gettoken"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"errcode": 40013, "errmsg": "invalid corpid"})),
            )
            .mount(&server)
            .await;

        let transport = Transport::shared(TransportConfig::default()).unwrap();
        let err = WeComClient::connect(&SendContext::background(), config(&server), transport)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ImError::TokenRefresh {
                platform: Platform::WeCom,
                ..
            }
        ));
        assert!(err.to_string().contains("invalid corpid"));
    }

    #[tokio::test]
    async fn test_unreachable_token_endpoint_hides_secret() {
        let config = WeComConfig {
            corp_id: "ww1".into(),
            corp_secret: "TOPSECRET".into(),
            agent_id: 1,
            base_url: Some("http://127.0.0.1:9".into()),
        };
        let transport = Transport::shared(TransportConfig::default()).unwrap();
        let err = WeComClient::connect(&SendContext::background(), config, transport)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ImError::TokenRefresh { .. }));
        assert!(!err.to_string().contains("TOPSECRET"));
    }

    #[tokio::test]
    async fn test_close_clears_token() {
        let server = MockServer::start().await;
        mount_token(&server, "wx-tok", 1).await;
        let c = client(&server).await;
        c.close().await.unwrap();
        c.close().await.unwrap();
        assert!(c.tokens.cache_is_empty().await);
    }
}
