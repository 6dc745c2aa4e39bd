// Client factory: registry of per-platform constructors

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use super::adapter::ImClient;
use super::config::PlatformConfig;
use super::context::SendContext;
use super::dingtalk::DingTalkClient;
use super::error::{ImError, Result};
use super::feishu::FeishuClient;
use super::telegram::TelegramClient;
use super::transport::Transport;
use super::types::Platform;
use super::wecom::WeComClient;

/// Builds one adapter from a validated config bound to `transport`.
pub type Constructor = Arc<
    dyn Fn(SendContext, PlatformConfig, Transport) -> BoxFuture<'static, Result<Arc<dyn ImClient>>>
        + Send
        + Sync,
>;

fn mismatch(expected: Platform, config: &PlatformConfig) -> ImError {
    ImError::ConfigTypeMismatch {
        expected,
        actual: config.platform(),
    }
}

async fn build_feishu(
    ctx: SendContext,
    config: PlatformConfig,
    transport: Transport,
) -> Result<Arc<dyn ImClient>> {
    match config {
        PlatformConfig::Feishu(c) => Ok(Arc::new(FeishuClient::connect(&ctx, c, transport).await?)),
        other => Err(mismatch(Platform::Feishu, &other)),
    }
}

async fn build_telegram(
    _ctx: SendContext,
    config: PlatformConfig,
    transport: Transport,
) -> Result<Arc<dyn ImClient>> {
    match config {
        PlatformConfig::Telegram(c) => Ok(Arc::new(TelegramClient::new(c, transport))),
        other => Err(mismatch(Platform::Telegram, &other)),
    }
}

async fn build_dingtalk(
    _ctx: SendContext,
    config: PlatformConfig,
    transport: Transport,
) -> Result<Arc<dyn ImClient>> {
    match config {
        PlatformConfig::DingTalk(c) => Ok(Arc::new(DingTalkClient::new(c, transport))),
        other => Err(mismatch(Platform::DingTalk, &other)),
    }
}

async fn build_wecom(
    ctx: SendContext,
    config: PlatformConfig,
    transport: Transport,
) -> Result<Arc<dyn ImClient>> {
    match config {
        PlatformConfig::WeCom(c) => Ok(Arc::new(WeComClient::connect(&ctx, c, transport).await?)),
        other => Err(mismatch(Platform::WeCom, &other)),
    }
}

/// Platform → constructor registry
#[derive(Clone, Default)]
pub struct ClientFactory {
    constructors: HashMap<Platform, Constructor>,
}

impl ClientFactory {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Feishu, Telegram, DingTalk and WeCom adapters.
    pub fn with_builtin() -> Self {
        let mut factory = Self::new();
        factory.register(Platform::Feishu, build_feishu);
        factory.register(Platform::Telegram, build_telegram);
        factory.register(Platform::DingTalk, build_dingtalk);
        factory.register(Platform::WeCom, build_wecom);
        factory
    }

    /// Register (or replace) the constructor for `platform`.
    pub fn register<F, Fut>(&mut self, platform: Platform, constructor: F)
    where
        F: Fn(SendContext, PlatformConfig, Transport) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn ImClient>>> + Send + 'static,
    {
        let constructor: Constructor =
            Arc::new(move |ctx, config, transport| constructor(ctx, config, transport).boxed());
        self.constructors.insert(platform, constructor);
    }

    pub fn is_registered(&self, platform: Platform) -> bool {
        self.constructors.contains_key(&platform)
    }

    /// Check `config` against `platform` and build the adapter.
    pub async fn create(
        &self,
        ctx: &SendContext,
        platform: Platform,
        config: PlatformConfig,
        transport: Transport,
    ) -> Result<Arc<dyn ImClient>> {
        let constructor = self
            .constructors
            .get(&platform)
            .ok_or_else(|| ImError::UnknownPlatform(platform.to_string()))?;
        if config.platform() != platform {
            return Err(mismatch(platform, &config));
        }
        config.validate()?;
        constructor(ctx.clone(), config, transport).await
    }

    /// Like [`create`](Self::create) with the platform given by tag (`"lark"`, `"wechat"`, ...).
    pub async fn create_by_name(
        &self,
        ctx: &SendContext,
        platform: &str,
        config: PlatformConfig,
        transport: Transport,
    ) -> Result<Arc<dyn ImClient>> {
        let platform: Platform = platform.parse()?;
        self.create(ctx, platform, config, transport).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::config::{DingTalkConfig, FeishuConfig, TelegramConfig};
    use crate::im::transport::TransportConfig;
    use crate::im::types::{Message, SendOptions};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullClient;

    #[async_trait]
    impl ImClient for NullClient {
        async fn send(&self, _: &SendContext, _: &Message, _: &SendOptions) -> Result<()> {
            Ok(())
        }
        fn platform_name(&self) -> &'static str {
            "telegram"
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn transport() -> Transport {
        Transport::shared(TransportConfig::default()).unwrap()
    }

    fn telegram_config() -> PlatformConfig {
        PlatformConfig::Telegram(TelegramConfig {
            bot_token: "123:abc".into(),
            base_url: None,
        })
    }

    #[tokio::test]
    async fn test_builtin_creates_offline_adapters() {
        let factory = ClientFactory::with_builtin();
        let ctx = SendContext::background();
        let tg = factory
            .create(&ctx, Platform::Telegram, telegram_config(), transport())
            .await
            .unwrap();
        assert_eq!(tg.platform_name(), "telegram");

        let ding = factory
            .create_by_name(
                &ctx,
                "dingtalk",
                PlatformConfig::DingTalk(DingTalkConfig {
                    access_token: "tok".into(),
                    ..Default::default()
                }),
                transport(),
            )
            .await
            .unwrap();
        assert_eq!(ding.platform_name(), "dingtalk");
    }

    #[tokio::test]
    async fn test_platform_mismatch() {
        let factory = ClientFactory::with_builtin();
        let err = factory
            .create(&SendContext::background(), Platform::Feishu, telegram_config(), transport())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ImError::ConfigTypeMismatch {
                expected: Platform::Feishu,
                actual: Platform::Telegram
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_constructor() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut factory = ClientFactory::new();
        let counter = calls.clone();
        factory.register(Platform::Feishu, move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Arc::new(NullClient) as Arc<dyn ImClient>) }
        });

        let err = factory
            .create(
                &SendContext::background(),
                Platform::Feishu,
                PlatformConfig::Feishu(FeishuConfig::default()),
                transport(),
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ImError::ConfigValidation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unregistered_and_unknown_platforms() {
        let factory = ClientFactory::new();
        let ctx = SendContext::background();
        let err = factory
            .create(&ctx, Platform::Telegram, telegram_config(), transport())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ImError::UnknownPlatform(ref p) if p == "telegram"));

        let err = ClientFactory::with_builtin()
            .create_by_name(&ctx, "slack", telegram_config(), transport())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ImError::UnknownPlatform(ref p) if p == "slack"));
    }

    #[tokio::test]
    async fn test_register_replaces_builtin() {
        let mut factory = ClientFactory::with_builtin();
        factory.register(Platform::Telegram, |_, _, _| async {
            Err::<Arc<dyn ImClient>, _>(ImError::Transport("offline".into()))
        });
        let err = factory
            .create(&SendContext::background(), Platform::Telegram, telegram_config(), transport())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ImError::Transport(_)));
    }
}
