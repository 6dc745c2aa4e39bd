// im-parrot: unified IM sending client
// Pooled, token-aware adapters for Feishu, Telegram, DingTalk and WeCom.

pub mod logger;
pub mod im;
pub mod proxy_config;
pub mod settings;

pub use im::{
    connect, ClientPool, ImClient, ImError, Message, MessageKind, Platform, PlatformConfig,
    PoolConfig, Result, SendContext, SendOptions, Target,
};
pub use settings::ParrotSettings;
