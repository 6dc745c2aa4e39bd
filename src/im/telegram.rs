// Telegram Bot API adapter
// Sends text/markdown through sendMessage and images through sendPhoto.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::adapter::ImClient;
use super::config::TelegramConfig;
use super::context::SendContext;
use super::delivery::{self, RetryPolicy};
use super::error::{ImError, Result};
use super::transport::Transport;
use super::types::{Message, MessageKind, Platform, SendOptions, Target};
use super::util::{join_url, mask_secret};
use crate::{ulog_debug, ulog_warn};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
/// Longest rate-limit wait honoured inside one call
const MAX_RETRY_AFTER_SECS: u64 = 30;

/// Telegram bot client
pub struct TelegramClient {
    transport: Transport,
    api_root: String,
    bot_token: String,
    retry: RetryPolicy,
    closed: AtomicBool,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig, transport: Transport) -> Self {
        let api_root = config
            .base_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| TELEGRAM_API_BASE.to_string());
        ulog_debug!("[telegram] Client for bot {}", mask_secret(&config.bot_token));
        Self {
            transport,
            api_root,
            bot_token: config.bot_token,
            retry: RetryPolicy::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn api_url(&self, method: &str) -> String {
        join_url(&self.api_root, &format!("bot{}/{}", self.bot_token, method))
    }

    /// One Bot API call. A 429 is waited out once (bounded by the context) before
    /// failing.
    async fn api_call(&self, ctx: &SendContext, method: &str, body: &Value) -> Result<Value> {
        let mut rate_limited = false;
        loop {
            let req = self.transport.client().post(self.api_url(method)).json(body);
            let json: Value = self.transport.send_json(ctx, Platform::Telegram, req).await?;

            if json["ok"].as_bool() == Some(true) {
                return Ok(json["result"].clone());
            }

            let description = json["description"].as_str().unwrap_or("unknown").to_string();
            let error_code = json["error_code"].as_i64().unwrap_or(0);

            if error_code == 429 && !rate_limited {
                let retry_after = json["parameters"]["retry_after"]
                    .as_u64()
                    .unwrap_or(5)
                    .min(MAX_RETRY_AFTER_SECS);
                ulog_warn!(
                    "[telegram] Rate limited on {}, retry after {}s",
                    method,
                    retry_after
                );
                ctx.sleep(Duration::from_secs(retry_after)).await?;
                rate_limited = true;
                continue;
            }

            return Err(ImError::PlatformApi {
                platform: Platform::Telegram,
                code: error_code,
                message: description,
            });
        }
    }

    /// Bot API method for a message kind.
    fn method_for(kind: MessageKind) -> Result<&'static str> {
        match kind {
            MessageKind::Text | MessageKind::Markdown => Ok("sendMessage"),
            MessageKind::Image => Ok("sendPhoto"),
            MessageKind::Card => Err(ImError::unsupported(Platform::Telegram, "card messages")),
        }
    }

    /// Request body for one target.
    fn request_body(message: &Message, target: &Target, options: &SendOptions) -> Value {
        let mut body = Map::new();
        body.insert("chat_id".into(), json!(target.id));

        match message.kind {
            MessageKind::Image => {
                body.insert("photo".into(), json!(message.content));
            }
            MessageKind::Markdown => {
                body.insert("text".into(), json!(message.content));
                body.insert("parse_mode".into(), json!("MarkdownV2"));
            }
            MessageKind::Text | MessageKind::Card => {
                let mut text = String::new();
                for user in &options.at_users {
                    text.push('@');
                    text.push_str(user.trim_start_matches('@'));
                    text.push(' ');
                }
                text.push_str(&message.content);
                body.insert("text".into(), json!(text));
            }
        }

        // Per-call options first, then per-message fields win
        for (k, v) in options.extra.iter().chain(message.extra.iter()) {
            body.insert(k.clone(), v.clone());
        }
        Value::Object(body)
    }

    async fn send_to_target(
        &self,
        ctx: &SendContext,
        method: &str,
        message: &Message,
        target: &Target,
        options: &SendOptions,
    ) -> Result<()> {
        let body = Self::request_body(message, target, options);
        let result = self.api_call(ctx, method, &body).await?;
        ulog_debug!(
            "[telegram] Sent message {} to {}",
            result["message_id"].as_i64().unwrap_or_default(),
            target
        );
        Ok(())
    }
}

#[async_trait]
impl ImClient for TelegramClient {
    async fn send(
        &self,
        ctx: &SendContext,
        message: &Message,
        options: &SendOptions,
    ) -> Result<()> {
        message.ensure_not_empty()?;
        options.require_targets()?;
        let method = Self::method_for(message.kind)?;

        delivery::deliver_all(
            ctx,
            self.retry,
            Platform::Telegram,
            &options.targets,
            move |target, _| async move {
                self.send_to_target(ctx, method, message, &target, options)
                    .await
            },
        )
        .await
    }

    fn platform_name(&self) -> &'static str {
        Platform::Telegram.as_str()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.transport.is_owned() {
            self.transport.close_idle_connections();
        }
        ulog_debug!("[telegram] Client closed");
        Ok(())
    }
}
