// Feishu (Lark) adapter
// Handles tenant_access_token management, message sending through the IM API,
// custom-bot webhooks (optionally signed), and open_id lookups.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::adapter::ImClient;
use super::config::FeishuConfig;
use super::context::SendContext;
use super::delivery::{self, RetryPolicy};
use super::error::{ImError, Result};
use super::token::{IssuedToken, TokenManager, TokenSource};
use super::transport::Transport;
use super::types::{ChatType, Message, MessageKind, Platform, SendOptions, Target};
use super::util::{hmac_sha256_base64, join_url, mask_secret};
use crate::{ulog_debug, ulog_info, ulog_warn};

/// Feishu API base URL
const FEISHU_API_BASE: &str = "https://open.feishu.cn/open-apis";
/// Token validity period when the response omits `expire` (2 hours)
const TOKEN_VALIDITY_SECS: u64 = 7200;
/// Error codes meaning the tenant token is invalid or expired
const TOKEN_INVALID_CODES: [i64; 2] = [99991661, 99991663];

/// Pull `code`/`msg` out of a Feishu envelope. Webhooks answer older bots with
/// `StatusCode`/`StatusMessage` instead.
fn envelope_status(json: &Value) -> (i64, String) {
    let code = json["code"]
        .as_i64()
        .or_else(|| json["StatusCode"].as_i64())
        .unwrap_or(-1);
    let msg = json["msg"]
        .as_str()
        .or_else(|| json["StatusMessage"].as_str())
        .unwrap_or("unknown")
        .to_string();
    (code, msg)
}

/// Signature for webhook bots with "signature verification" enabled:
/// HMAC-SHA256 keyed by `"{timestamp}\n{secret}"` over an empty message.
fn webhook_sign(timestamp: i64, secret: &str) -> Result<String> {
    let string_to_sign = format!("{}\n{}", timestamp, secret);
    hmac_sha256_base64(string_to_sign.as_bytes(), b"")
}

/// `tenant_access_token/internal` credential endpoint
struct TenantTokenSource {
    transport: Transport,
    base_url: String,
    app_id: String,
    app_secret: String,
}

#[async_trait]
impl TokenSource for TenantTokenSource {
    async fn fetch(&self, ctx: &SendContext) -> Result<IssuedToken> {
        let url = join_url(&self.base_url, "auth/v3/tenant_access_token/internal");
        let body = json!({
            "app_id": self.app_id,
            "app_secret": self.app_secret,
        });
        let req = self.transport.client().post(&url).json(&body);
        let json: Value = self.transport.send_json(ctx, Platform::Feishu, req).await?;

        let (code, msg) = envelope_status(&json);
        if code != 0 {
            return Err(ImError::TokenRefresh {
                platform: Platform::Feishu,
                reason: format!("error code {}: {}", code, msg),
            });
        }

        let value = json["tenant_access_token"]
            .as_str()
            .ok_or_else(|| ImError::Decode("No tenant_access_token in response".to_string()))?
            .to_string();
        let expire = json["expire"].as_u64().unwrap_or(TOKEN_VALIDITY_SECS);

        Ok(IssuedToken {
            value,
            ttl: Duration::from_secs(expire),
        })
    }
}

enum Mode {
    /// Bot app: IM API with a tenant token
    App { tokens: TokenManager },
    /// Custom bot: one webhook URL, no credential
    Webhook { url: String, secret: Option<String> },
}

/// Feishu client in either app or webhook mode
pub struct FeishuClient {
    transport: Transport,
    base_url: String,
    mode: Mode,
    retry: RetryPolicy,
    closed: AtomicBool,
}

impl FeishuClient {
    /// Build a client. App mode fetches the first tenant token before returning.
    pub async fn connect(
        ctx: &SendContext,
        config: FeishuConfig,
        transport: Transport,
    ) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| FEISHU_API_BASE.to_string());

        let mode = if config.is_webhook() {
            Mode::Webhook {
                url: config.webhook_url.unwrap_or_default(),
                secret: config.webhook_secret.filter(|s| !s.is_empty()),
            }
        } else {
            let source = TenantTokenSource {
                transport: transport.clone(),
                base_url: base_url.clone(),
                app_id: config.app_id.clone(),
                app_secret: config.app_secret,
            };
            let tokens = TokenManager::new(Platform::Feishu, Box::new(source));
            tokens.get_token(ctx).await?;
            ulog_info!("[feishu] Connected app {}", mask_secret(&config.app_id));
            Mode::App { tokens }
        };

        Ok(Self {
            transport,
            base_url,
            mode,
            retry: RetryPolicy::default(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_webhook(&self) -> bool {
        matches!(self.mode, Mode::Webhook { .. })
    }

    fn tokens(&self, operation: &'static str) -> Result<&TokenManager> {
        match &self.mode {
            Mode::App { tokens } => Ok(tokens),
            Mode::Webhook { .. } => Err(ImError::unsupported(Platform::Feishu, operation)),
        }
    }

    /// Authenticated POST, retrying once with a fresh token when the current one is rejected.
    async fn api_call(
        &self,
        ctx: &SendContext,
        tokens: &TokenManager,
        url: &str,
        body: &Value,
    ) -> Result<Value> {
        let mut retried = false;
        loop {
            let token = tokens.get_token(ctx).await?;
            let req = self
                .transport
                .client()
                .post(url)
                .header("Authorization", format!("Bearer {}", token))
                .json(body);
            let json: Value = self.transport.send_json(ctx, Platform::Feishu, req).await?;

            let (code, msg) = envelope_status(&json);
            if code == 0 {
                return Ok(json);
            }
            if TOKEN_INVALID_CODES.contains(&code) {
                tokens.invalidate().await;
                if !retried {
                    ulog_warn!("[feishu] Token invalid (code {}), refreshing", code);
                    retried = true;
                    continue;
                }
            }
            return Err(ImError::PlatformApi {
                platform: Platform::Feishu,
                code,
                message: msg,
            });
        }
    }

    /// `msg_type` and serialized `content` for the IM API.
    fn app_content(message: &Message, at_users: &[String]) -> (&'static str, String) {
        match message.kind {
            MessageKind::Text => {
                let mut text = String::new();
                for user in at_users {
                    text.push_str(&format!("<at user_id=\"{}\"></at> ", user));
                }
                text.push_str(&message.content);
                ("text", json!({ "text": text }).to_string())
            }
            MessageKind::Markdown => (
                "interactive",
                json!({
                    "elements": [{ "tag": "markdown", "content": message.content }]
                })
                .to_string(),
            ),
            MessageKind::Card => ("interactive", message.content.clone()),
            MessageKind::Image => ("image", json!({ "image_key": message.content }).to_string()),
        }
    }

    async fn send_to_target(
        &self,
        ctx: &SendContext,
        tokens: &TokenManager,
        message: &Message,
        target: &Target,
        at_users: &[String],
    ) -> Result<()> {
        let receive_id_type = match target.chat_type {
            ChatType::Private => "open_id",
            ChatType::Group => "chat_id",
        };
        let url = format!(
            "{}?receive_id_type={}",
            join_url(&self.base_url, "im/v1/messages"),
            receive_id_type
        );
        let (msg_type, content) = Self::app_content(message, at_users);
        let body = json!({
            "receive_id": target.id,
            "msg_type": msg_type,
            "content": content,
        });

        self.api_call(ctx, tokens, &url, &body).await?;
        ulog_debug!("[feishu] Sent {} to {}", message.kind.as_str(), target);
        Ok(())
    }

    fn webhook_body(message: &Message, secret: Option<&str>) -> Result<Map<String, Value>> {
        let mut body = match message.kind {
            MessageKind::Text => json!({
                "msg_type": "text",
                "content": { "text": message.content },
            }),
            MessageKind::Markdown => json!({
                "msg_type": "interactive",
                "card": {
                    "elements": [{ "tag": "markdown", "content": message.content }]
                },
            }),
            MessageKind::Card => {
                let card: Value = serde_json::from_str(&message.content).map_err(|e| {
                    ImError::InvalidArgument(format!("card content is not valid JSON: {}", e))
                })?;
                json!({ "msg_type": "interactive", "card": card })
            }
            MessageKind::Image => {
                return Err(ImError::unsupported(
                    Platform::Feishu,
                    "image messages in webhook mode",
                ))
            }
        };

        if let Some(secret) = secret {
            let timestamp = chrono::Utc::now().timestamp();
            body["timestamp"] = json!(timestamp.to_string());
            body["sign"] = json!(webhook_sign(timestamp, secret)?);
        }

        let mut body = match body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (k, v) in &message.extra {
            body.insert(k.clone(), v.clone());
        }
        Ok(body)
    }

    async fn send_webhook(
        &self,
        ctx: &SendContext,
        url: &str,
        secret: Option<&str>,
        message: &Message,
    ) -> Result<()> {
        delivery::retry(ctx, self.retry, move |_| async move {
            // Rebuilt per attempt so signed timestamps stay fresh
            let body = Self::webhook_body(message, secret)?;
            let req = self.transport.client().post(url).json(&body);
            let json: Value = self.transport.send_json(ctx, Platform::Feishu, req).await?;
            let (code, msg) = envelope_status(&json);
            if code != 0 {
                return Err(ImError::PlatformApi {
                    platform: Platform::Feishu,
                    code,
                    message: msg,
                });
            }
            Ok(())
        })
        .await
    }

    async fn lookup_open_id(&self, ctx: &SendContext, field: &str, value: &str) -> Result<String> {
        let tokens = self.tokens("user lookup")?;
        let url = format!(
            "{}?user_id_type=open_id",
            join_url(&self.base_url, "contact/v3/users/batch_get_id")
        );
        let mut body = Map::new();
        body.insert(field.to_string(), json!([value]));
        let body = Value::Object(body);
        let json = self.api_call(ctx, tokens, &url, &body).await?;

        json["data"]["user_list"]
            .as_array()
            .and_then(|users| users.first())
            .and_then(|user| user["user_id"].as_str())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ImError::InvalidArgument(format!("no Feishu user found for {}", value)))
    }

    /// Resolve a user's open_id from a mobile number.
    pub async fn open_id_by_mobile(&self, ctx: &SendContext, mobile: &str) -> Result<String> {
        self.lookup_open_id(ctx, "mobiles", mobile).await
    }

    /// Resolve a user's open_id from an email address.
    pub async fn open_id_by_email(&self, ctx: &SendContext, email: &str) -> Result<String> {
        self.lookup_open_id(ctx, "emails", email).await
    }
}

#[async_trait]
impl ImClient for FeishuClient {
    async fn send(
        &self,
        ctx: &SendContext,
        message: &Message,
        options: &SendOptions,
    ) -> Result<()> {
        message.ensure_not_empty()?;
        match &self.mode {
            Mode::Webhook { url, secret } => {
                self.send_webhook(ctx, url, secret.as_deref(), message).await
            }
            Mode::App { tokens } => {
                options.require_targets()?;
                delivery::deliver_all(
                    ctx,
                    self.retry,
                    Platform::Feishu,
                    &options.targets,
                    move |target, _| async move {
                        self.send_to_target(ctx, tokens, message, &target, &options.at_users)
                            .await
                    },
                )
                .await
            }
        }
    }

    fn platform_name(&self) -> &'static str {
        Platform::Feishu.as_str()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Mode::App { tokens } = &self.mode {
            tokens.clear().await;
        }
        if self.transport.is_owned() {
            self.transport.close_idle_connections();
        }
        ulog_debug!("[feishu] Client closed");
        Ok(())
    }
}
