//! Unified IM client trait.
//!
//! Each messaging platform (Feishu, Telegram, DingTalk, WeCom) implements this
//! trait so that callers and the client pool stay platform-agnostic.

use async_trait::async_trait;

use super::context::SendContext;
use super::error::Result;
use super::types::{Message, SendOptions, Target};

#[async_trait]
pub trait ImClient: Send + Sync {
    /// Send `message` to every target in `options`.
    ///
    /// Each target gets its own retry budget. When some targets fail, the error is
    /// `ImError::PartialSend` with the per-target outcome.
    async fn send(&self, ctx: &SendContext, message: &Message, options: &SendOptions)
        -> Result<()>;

    /// Send to one user.
    async fn send_private(
        &self,
        ctx: &SendContext,
        user_id: &str,
        message: &Message,
    ) -> Result<()> {
        self.send(ctx, message, &SendOptions::to([Target::private(user_id)]))
            .await
    }

    /// Send to one group chat.
    async fn send_group(&self, ctx: &SendContext, group_id: &str, message: &Message) -> Result<()> {
        self.send(ctx, message, &SendOptions::to([Target::group(group_id)]))
            .await
    }

    /// Platform tag, e.g. "telegram".
    fn platform_name(&self) -> &'static str;

    /// Release cached credentials and, for standalone clients, idle connections.
    /// Idempotent; in-flight sends are not interrupted.
    async fn close(&self) -> Result<()>;
}
