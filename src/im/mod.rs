// IM sending module
// One client API over Feishu, Telegram, DingTalk and WeCom, plus a pool that
// shares an HTTP transport and evicts idle clients.

pub mod adapter;
pub mod config;
pub mod context;
pub mod delivery;
pub mod dingtalk;
pub mod error;
pub mod factory;
pub mod feishu;
pub mod pool;
pub mod telegram;
pub mod token;
pub mod transport;
pub mod types;
mod util;
pub mod wecom;

use std::sync::Arc;

pub use adapter::ImClient;
pub use config::{DingTalkConfig, FeishuConfig, PlatformConfig, TelegramConfig, WeComConfig};
pub use context::SendContext;
pub use delivery::RetryPolicy;
pub use dingtalk::DingTalkClient;
pub use error::{ImError, Result};
pub use factory::ClientFactory;
pub use feishu::FeishuClient;
pub use pool::{ClientPool, PoolConfig};
pub use telegram::TelegramClient;
pub use transport::{Transport, TransportConfig};
pub use types::{
    ChatType, FailedTarget, Message, MessageKind, Platform, SendOptions, SendReport, Target,
};
pub use wecom::WeComClient;

/// Standalone client for any platform, with its own HTTP connection pool.
///
/// Closing the client also releases its idle connections.
pub async fn connect(ctx: &SendContext, config: PlatformConfig) -> Result<Arc<dyn ImClient>> {
    let platform = config.platform();
    let transport = Transport::owned(TransportConfig::default())?;
    ClientFactory::with_builtin()
        .create(ctx, platform, config, transport)
        .await
}

/// Feishu application bot. Fetches the first tenant token before returning.
pub async fn feishu_client(
    ctx: &SendContext,
    app_id: impl Into<String>,
    app_secret: impl Into<String>,
) -> Result<FeishuClient> {
    let config = FeishuConfig::app(app_id, app_secret);
    PlatformConfig::from(config.clone()).validate()?;
    FeishuClient::connect(ctx, config, Transport::owned(TransportConfig::default())?).await
}

/// Feishu custom-bot webhook, signed when `secret` is given.
pub async fn feishu_webhook_client(
    ctx: &SendContext,
    webhook_url: impl Into<String>,
    secret: Option<String>,
) -> Result<FeishuClient> {
    let mut config = FeishuConfig::webhook(webhook_url);
    config.webhook_secret = secret;
    PlatformConfig::from(config.clone()).validate()?;
    FeishuClient::connect(ctx, config, Transport::owned(TransportConfig::default())?).await
}

pub fn telegram_client(bot_token: impl Into<String>) -> Result<TelegramClient> {
    let config = TelegramConfig {
        bot_token: bot_token.into(),
        base_url: None,
    };
    PlatformConfig::from(config.clone()).validate()?;
    Ok(TelegramClient::new(
        config,
        Transport::owned(TransportConfig::default())?,
    ))
}

pub fn dingtalk_client(
    access_token: impl Into<String>,
    secret: Option<String>,
) -> Result<DingTalkClient> {
    let config = DingTalkConfig {
        access_token: access_token.into(),
        secret,
        base_url: None,
    };
    PlatformConfig::from(config.clone()).validate()?;
    Ok(DingTalkClient::new(
        config,
        Transport::owned(TransportConfig::default())?,
    ))
}

/// WeCom application. Fetches the first access token before returning.
pub async fn wecom_client(
    ctx: &SendContext,
    corp_id: impl Into<String>,
    corp_secret: impl Into<String>,
    agent_id: i64,
) -> Result<WeComClient> {
    let config = WeComConfig {
        corp_id: corp_id.into(),
        corp_secret: corp_secret.into(),
        agent_id,
        base_url: None,
    };
    PlatformConfig::from(config.clone()).validate()?;
    WeComClient::connect(ctx, config, Transport::owned(TransportConfig::default())?).await
}
