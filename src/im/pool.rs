// Client pool: keyed cache of IM clients sharing one HTTP transport,
// with background idle eviction and bulk shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::adapter::ImClient;
use super::config::PlatformConfig;
use super::context::SendContext;
use super::error::{ImError, Result};
use super::factory::ClientFactory;
use super::transport::{Transport, TransportConfig};
use super::types::Platform;
use crate::proxy_config::ProxySettings;
use crate::settings::ParrotSettings;
use crate::{ulog_debug, ulog_error, ulog_info, ulog_warn};

/// Pool tuning. Durations are whole seconds in the serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    /// Idle time after which a client is evicted (default 30 min)
    pub max_idle_secs: u64,
    /// Period of the eviction sweep (default 5 min)
    pub cleanup_interval_secs: u64,
    /// Per-request HTTP timeout (default 30 s)
    pub http_timeout_secs: u64,
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySettings>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_secs: 30 * 60,
            cleanup_interval_secs: 5 * 60,
            http_timeout_secs: 30,
            max_idle_conns: 100,
            max_idle_conns_per_host: 10,
            proxy: None,
        }
    }
}

impl PoolConfig {
    pub fn max_idle_time(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cleanup_interval_secs == 0 {
            return Err(ImError::ConfigValidation(
                "cleanupIntervalSecs must be greater than 0".to_string(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(ImError::ConfigValidation(
                "httpTimeoutSecs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            timeout: self.http_timeout(),
            max_idle_conns: self.max_idle_conns,
            max_idle_conns_per_host: self.max_idle_conns_per_host,
            proxy: self.proxy.clone(),
        }
    }
}

struct PoolEntry {
    client: Arc<dyn ImClient>,
    /// Stamped on every hit, including read-locked lookups
    last_used: parking_lot::Mutex<Instant>,
}

impl PoolEntry {
    fn new(client: Arc<dyn ImClient>) -> Self {
        Self {
            client,
            last_used: parking_lot::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) -> Arc<dyn ImClient> {
        *self.last_used.lock() = Instant::now();
        self.client.clone()
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_used.lock())
    }
}

#[derive(Default)]
struct PoolState {
    entries: HashMap<String, PoolEntry>,
    closed: bool,
}

/// Keyed pool of IM clients.
///
/// Must be created inside a Tokio runtime: construction spawns the eviction task.
pub struct ClientPool {
    state: Arc<RwLock<PoolState>>,
    factory: ClientFactory,
    transport: Transport,
    config: PoolConfig,
    shutdown_tx: watch::Sender<bool>,
    eviction_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ClientPool {
    /// Pool using the built-in platform adapters.
    pub fn new(config: PoolConfig) -> Result<Self> {
        Self::with_factory(config, ClientFactory::with_builtin())
    }

    pub fn with_factory(config: PoolConfig, factory: ClientFactory) -> Result<Self> {
        config.validate()?;
        let transport = Transport::shared(config.transport_config())?;
        let state = Arc::new(RwLock::new(PoolState::default()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = start_eviction_loop(
            Arc::clone(&state),
            config.max_idle_time(),
            config.cleanup_interval(),
            shutdown_rx,
        );
        ulog_info!(
            "[pool] Started (max idle {}s, cleanup every {}s)",
            config.max_idle_secs,
            config.cleanup_interval_secs
        );

        Ok(Self {
            state,
            factory,
            transport,
            config,
            shutdown_tx,
            eviction_task: parking_lot::Mutex::new(Some(handle)),
        })
    }

    /// Pool configured from a settings file. Top-level proxy settings apply when the
    /// pool section has none.
    pub fn from_settings(settings: &ParrotSettings) -> Result<Self> {
        Self::new(settings.pool_config())
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Existing client for `key`, or a new one built from `config`.
    ///
    /// An existing entry is returned as-is; `config` is only used on a miss.
    pub async fn get_or_create(
        &self,
        ctx: &SendContext,
        key: &str,
        platform: Platform,
        config: PlatformConfig,
    ) -> Result<Arc<dyn ImClient>> {
        {
            let state = self.state.read().await;
            if state.closed {
                return Err(ImError::PoolClosed);
            }
            if let Some(entry) = state.entries.get(key) {
                return Ok(entry.touch());
            }
        }

        let mut state = self.state.write().await;
        // Another caller may have created it while we waited for the write lock
        if state.closed {
            return Err(ImError::PoolClosed);
        }
        if let Some(entry) = state.entries.get(key) {
            return Ok(entry.touch());
        }

        let client = self
            .factory
            .create(ctx, platform, config, self.transport.clone())
            .await?;
        state
            .entries
            .insert(key.to_string(), PoolEntry::new(Arc::clone(&client)));
        ulog_info!("[pool] Created {} client for key {}", platform, key);
        Ok(client)
    }

    /// [`get_or_create`](Self::get_or_create) with the platform given by tag.
    pub async fn get_or_create_by_name(
        &self,
        ctx: &SendContext,
        key: &str,
        platform: &str,
        config: PlatformConfig,
    ) -> Result<Arc<dyn ImClient>> {
        let platform: Platform = platform.parse()?;
        self.get_or_create(ctx, key, platform, config).await
    }

    /// Lookup without creating; a hit counts as use.
    pub async fn get(&self, key: &str) -> Option<Arc<dyn ImClient>> {
        let state = self.state.read().await;
        state.entries.get(key).map(PoolEntry::touch)
    }

    /// Remove and close the client for `key`. Absent keys are not an error.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let entry = self.state.write().await.entries.remove(key);
        match entry {
            Some(entry) => {
                ulog_debug!("[pool] Removing client {}", key);
                entry.client.close().await
            }
            None => Ok(()),
        }
    }

    pub async fn size(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    /// Create every bot listed in `settings`. All bots are attempted; the first
    /// failure is returned after the rest have been tried.
    pub async fn warm_up(&self, ctx: &SendContext, settings: &ParrotSettings) -> Result<usize> {
        let mut created = 0;
        let mut first_err = None;
        for (key, config) in &settings.bots {
            match self
                .get_or_create(ctx, key, config.platform(), config.clone())
                .await
            {
                Ok(_) => created += 1,
                Err(e) => {
                    ulog_warn!("[pool] Failed to warm up {}: {}", key, e);
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(created),
        }
    }

    /// Stop eviction, close every client and release idle connections.
    ///
    /// Idempotent. Returns the last close error, if any. Sends already in flight keep
    /// running on their own handles.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }

        let _ = self.shutdown_tx.send(true);
        let handle = self.eviction_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                ulog_error!("[pool] Eviction task failed: {}", e);
            }
        }

        let drained: Vec<(String, PoolEntry)> = self.state.write().await.entries.drain().collect();
        let count = drained.len();
        let mut last_err = None;
        for (key, entry) in drained {
            if let Err(e) = entry.client.close().await {
                ulog_warn!("[pool] Failed to close client {}: {}", key, e);
                last_err = Some(e);
            }
        }

        self.transport.close_idle_connections();
        ulog_info!("[pool] Closed {} clients", count);

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for ClientPool {
    fn drop(&mut self) {
        // Stops the eviction task if close() was never called
        let _ = self.shutdown_tx.send(true);
    }
}

fn start_eviction_loop(
    state: Arc<RwLock<PoolState>>,
    max_idle: Duration,
    cleanup_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval_at(Instant::now() + cleanup_interval, cleanup_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    evict_idle(&state, max_idle).await;
                }
                res = shutdown_rx.changed() => {
                    if res.is_err() || *shutdown_rx.borrow() {
                        ulog_debug!("[pool] Eviction loop shutting down");
                        break;
                    }
                }
            }
        }
    })
}

/// Remove entries idle longer than `max_idle`, then close them outside the lock.
async fn evict_idle(state: &RwLock<PoolState>, max_idle: Duration) -> usize {
    let now = Instant::now();
    let idle: Vec<(String, PoolEntry)> = {
        let mut s = state.write().await;
        let idle_keys: Vec<String> = s
            .entries
            .iter()
            .filter(|(_, e)| e.idle_for(now) > max_idle)
            .map(|(k, _)| k.clone())
            .collect();
        idle_keys
            .into_iter()
            .filter_map(|k| s.entries.remove(&k).map(|e| (k, e)))
            .collect()
    };

    let count = idle.len();
    for (key, entry) in idle {
        ulog_info!(
            "[pool] Evicting idle client {} (inactive for {}s)",
            key,
            entry.idle_for(now).as_secs()
        );
        if let Err(e) = entry.client.close().await {
            ulog_warn!("[pool] Failed to close idle client {}: {}", key, e);
        }
    }
    count
}
