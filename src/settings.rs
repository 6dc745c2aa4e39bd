//! Settings file: pool tuning, proxy and named bot configs
//!
//! Read from `~/.im-parrot/config.json` by default:
//!
//! ```json
//! {
//!   "pool": { "maxIdleSecs": 1800, "httpTimeoutSecs": 30 },
//!   "proxySettings": { "enabled": true, "host": "127.0.0.1", "port": 7890 },
//!   "bots": {
//!     "ops-alerts": { "platform": "dingtalk", "accessToken": "...", "secret": "SEC..." },
//!     "release-bot": { "platform": "lark", "appId": "cli_...", "appSecret": "..." }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::im::config::PlatformConfig;
use crate::im::error::{ImError, Result};
use crate::im::pool::PoolConfig;
use crate::proxy_config::ProxySettings;
use crate::ulog_info;

const CONFIG_DIR: &str = ".im-parrot";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParrotSettings {
    pub pool: PoolConfig,
    /// Applied to the pool when `pool.proxy` is not set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_settings: Option<ProxySettings>,
    /// Pool key → bot config
    pub bots: BTreeMap<String, PlatformConfig>,
}

impl ParrotSettings {
    /// `~/.im-parrot/config.json`, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content).map_err(|e| {
            ImError::ConfigValidation(format!("failed to parse {}: {}", path.display(), e))
        })?;
        settings.validate()?;
        ulog_info!(
            "[settings] Loaded {} bots from {}",
            settings.bots.len(),
            path.display()
        );
        Ok(settings)
    }

    /// Load the default file. A missing file yields default settings.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Pool config with the top-level proxy filled in.
    pub fn pool_config(&self) -> PoolConfig {
        let mut pool = self.pool.clone();
        if pool.proxy.is_none() {
            pool.proxy = self.proxy_settings.clone();
        }
        pool
    }

    /// Validate pool tuning and every bot; errors name the offending bot.
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        for (key, bot) in &self.bots {
            bot.validate().map_err(|e| match e {
                ImError::ConfigValidation(msg) => {
                    ImError::ConfigValidation(format!("bot '{}': {}", key, msg))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}
