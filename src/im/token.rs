// Per-adapter bearer token cache with transparent refresh

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use super::context::SendContext;
use super::error::{ImError, Result};
use super::types::Platform;
use crate::{ulog_debug, ulog_info, ulog_warn};

/// Tokens are treated as expired this long before the platform says so.
pub const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// A token as issued by a credential endpoint.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub value: String,
    pub ttl: Duration,
}

/// Credential endpoint of one platform.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self, ctx: &SendContext) -> Result<IssuedToken>;
}

/// Token and expiry are stored together so readers never see a torn pair.
#[derive(Debug, Clone)]
struct TokenCache {
    access_token: String,
    expires_at: Instant,
}

impl TokenCache {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

pub struct TokenManager {
    platform: Platform,
    source: Box<dyn TokenSource>,
    cache: RwLock<Option<TokenCache>>,
    /// Serializes refreshes so concurrent callers trigger one fetch
    refresh_lock: Mutex<()>,
    refresh_count: AtomicU64,
}

impl TokenManager {
    pub fn new(platform: Platform, source: Box<dyn TokenSource>) -> Self {
        Self {
            platform,
            source,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            refresh_count: AtomicU64::new(0),
        }
    }

    /// Cached token, refreshed first when missing or within the margin of expiry.
    pub async fn get_token(&self, ctx: &SendContext) -> Result<String> {
        {
            let cache = self.cache.read().await;
            if let Some(ref c) = *cache {
                if c.is_fresh() {
                    return Ok(c.access_token.clone());
                }
            }
        }
        self.refresh_token(ctx).await
    }

    async fn refresh_token(&self, ctx: &SendContext) -> Result<String> {
        let _guard = ctx.run(async { Ok(self.refresh_lock.lock().await) }).await?;

        // Another caller may have refreshed while we waited on the lock
        {
            let cache = self.cache.read().await;
            if let Some(ref c) = *cache {
                if c.is_fresh() {
                    ulog_debug!("[{}] Token refreshed by concurrent caller", self.platform);
                    return Ok(c.access_token.clone());
                }
            }
        }

        let issued = self.source.fetch(ctx).await.map_err(|e| match e {
            ImError::Cancelled | ImError::DeadlineExceeded | ImError::TokenRefresh { .. } => e,
            other => ImError::TokenRefresh {
                platform: self.platform,
                reason: other.to_string(),
            },
        })?;

        let expires_at = Instant::now() + issued.ttl.saturating_sub(TOKEN_REFRESH_MARGIN);
        let token = issued.value;
        *self.cache.write().await = Some(TokenCache {
            access_token: token.clone(),
            expires_at,
        });
        self.refresh_count.fetch_add(1, Ordering::Relaxed);

        ulog_info!(
            "[{}] Access token refreshed, valid for {}s",
            self.platform,
            issued.ttl.as_secs()
        );
        Ok(token)
    }

    /// Forget the cached token so the next call refreshes.
    pub async fn invalidate(&self) {
        if self.cache.write().await.take().is_some() {
            ulog_warn!("[{}] Access token invalidated", self.platform);
        }
    }

    /// Wipe the cached token on adapter close.
    pub async fn clear(&self) {
        *self.cache.write().await = None;
    }

    /// Number of successful fetches so far.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) async fn cache_is_empty(&self) -> bool {
        self.cache.read().await.is_none()
    }
}
