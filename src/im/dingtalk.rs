// DingTalk group robot adapter (custom robot webhook, optionally signed)

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::adapter::ImClient;
use super::config::DingTalkConfig;
use super::context::SendContext;
use super::delivery::{self, RetryPolicy};
use super::error::{ImError, Result};
use super::transport::Transport;
use super::types::{Message, MessageKind, Platform, SendOptions};
use super::util::hmac_sha256_base64;
use crate::ulog_debug;

const DINGTALK_WEBHOOK: &str = "https://oapi.dingtalk.com/robot/send";
/// Title shown in the conversation list for markdown and action cards
const DEFAULT_TITLE: &str = "Message";

/// `sign` query parameter: HMAC-SHA256 keyed by the secret over
/// `"{timestamp_ms}\n{secret}"`, base64 then URL-encoded.
fn sign(timestamp_ms: i64, secret: &str) -> Result<String> {
    let string_to_sign = format!("{}\n{}", timestamp_ms, secret);
    let signature = hmac_sha256_base64(secret.as_bytes(), string_to_sign.as_bytes())?;
    Ok(urlencoding::encode(&signature).into_owned())
}

/// DingTalk robot client. Every message goes to the robot's own group.
pub struct DingTalkClient {
    transport: Transport,
    webhook: String,
    access_token: String,
    secret: Option<String>,
    retry: RetryPolicy,
    closed: AtomicBool,
}

impl DingTalkClient {
    pub fn new(config: DingTalkConfig, transport: Transport) -> Self {
        let webhook = config
            .base_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DINGTALK_WEBHOOK.to_string());
        Self {
            transport,
            webhook,
            access_token: config.access_token,
            secret: config.secret.filter(|s| !s.is_empty()),
            retry: RetryPolicy::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Webhook URL with access token and, for signed robots, a fresh signature.
    fn signed_url(&self) -> Result<String> {
        let mut url = format!(
            "{}?access_token={}",
            self.webhook,
            urlencoding::encode(&self.access_token)
        );
        if let Some(secret) = &self.secret {
            let timestamp = chrono::Utc::now().timestamp_millis();
            url.push_str(&format!("&timestamp={}&sign={}", timestamp, sign(timestamp, secret)?));
        }
        Ok(url)
    }

    fn body_for(message: &Message, at_users: &[String]) -> Value {
        let title = message
            .extra
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_TITLE);

        let mut body = match message.kind {
            MessageKind::Text => json!({
                "msgtype": "text",
                "text": { "content": message.content },
            }),
            MessageKind::Markdown => json!({
                "msgtype": "markdown",
                "markdown": { "title": title, "text": message.content },
            }),
            MessageKind::Card => json!({
                "msgtype": "actionCard",
                "actionCard": { "title": title, "text": message.content },
            }),
            // Robots cannot reference uploaded media; embed the image URL
            MessageKind::Image => json!({
                "msgtype": "markdown",
                "markdown": {
                    "title": title,
                    "text": format!("![image]({})", message.content),
                },
            }),
        };

        if !at_users.is_empty() {
            body["at"] = json!({
                "atMobiles": at_users,
                "isAtAll": false,
            });
        }
        body
    }

    async fn post(&self, ctx: &SendContext, body: &Value) -> Result<()> {
        let url = self.signed_url()?;
        let req = self.transport.client().post(&url).json(body);
        let json: Value = self.transport.send_json(ctx, Platform::DingTalk, req).await?;

        let code = json["errcode"].as_i64().unwrap_or(-1);
        if code != 0 {
            return Err(ImError::PlatformApi {
                platform: Platform::DingTalk,
                code,
                message: json["errmsg"].as_str().unwrap_or("unknown").to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ImClient for DingTalkClient {
    /// Targets are ignored: a robot webhook is bound to a single group.
    async fn send(
        &self,
        ctx: &SendContext,
        message: &Message,
        options: &SendOptions,
    ) -> Result<()> {
        message.ensure_not_empty()?;
        let body = Self::body_for(message, &options.at_users);
        let body = &body;
        delivery::retry(ctx, self.retry, move |_| async move { self.post(ctx, body).await }).await?;
        ulog_debug!("[dingtalk] Sent {}", message.kind.as_str());
        Ok(())
    }

    async fn send_private(
        &self,
        _ctx: &SendContext,
        _user_id: &str,
        _message: &Message,
    ) -> Result<()> {
        Err(ImError::unsupported(Platform::DingTalk, "private messages"))
    }

    fn platform_name(&self) -> &'static str {
        Platform::DingTalk.as_str()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.transport.is_owned() {
            self.transport.close_idle_connections();
        }
        Ok(())
    }
}
