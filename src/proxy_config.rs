//! Proxy configuration for the shared HTTP transport
//!
//! Proxy settings arrive inside the pool configuration (or the settings file) and are
//! applied when the shared reqwest client is built.
//!
//! Note: Localhost connections always bypass proxy (NO_PROXY is automatically set).

use serde::{Deserialize, Serialize};

use crate::im::error::ImError;

/// Default proxy protocol (when not specified in config)
const DEFAULT_PROXY_PROTOCOL: &str = "http";
/// Default proxy host (when not specified in config)
const DEFAULT_PROXY_HOST: &str = "127.0.0.1";
/// Default proxy port (when not specified in config)
const DEFAULT_PROXY_PORT: u16 = 7890;

/// Proxy settings
///
/// # Example JSON
/// ```json
/// {
///   "proxySettings": {
///     "enabled": true,
///     "protocol": "http",
///     "host": "127.0.0.1",
///     "port": 7890
///   }
/// }
/// ```
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettings {
    /// Whether proxy is enabled
    pub enabled: bool,
    /// Proxy protocol: "http", "https", or "socks5"
    pub protocol: Option<String>,
    /// Proxy host (IP or domain)
    pub host: Option<String>,
    /// Proxy port (1-65535)
    pub port: Option<u16>,
}

/// Get proxy URL string from settings with validation
pub fn get_proxy_url(settings: &ProxySettings) -> Result<String, ImError> {
    let protocol = settings.protocol.as_deref().unwrap_or(DEFAULT_PROXY_PROTOCOL);
    if !["http", "https", "socks5"].contains(&protocol) {
        return Err(ImError::ConfigValidation(format!(
            "Invalid proxy protocol '{}'. Supported: http, https, socks5",
            protocol
        )));
    }

    let port = settings.port.unwrap_or(DEFAULT_PROXY_PORT);
    if port == 0 {
        return Err(ImError::ConfigValidation(format!(
            "Invalid proxy port: {}. Port must be between 1 and 65535",
            port
        )));
    }

    let host = settings.host.as_deref().unwrap_or(DEFAULT_PROXY_HOST);

    Ok(format!("{}://{}:{}", protocol, host, port))
}

/// Apply proxy settings to a reqwest client builder
/// - If a proxy is enabled, use it for external requests
/// - Always exclude localhost/127.0.0.1/::1 from proxy
/// - Otherwise disable all proxies (including system proxy)
pub fn apply_proxy(
    builder: reqwest::ClientBuilder,
    settings: Option<&ProxySettings>,
) -> Result<reqwest::ClientBuilder, ImError> {
    match settings.filter(|p| p.enabled) {
        Some(proxy_settings) => {
            let proxy_url = get_proxy_url(proxy_settings)?;
            log::info!("[proxy_config] Using proxy for external requests: {}", proxy_url);

            let proxy = reqwest::Proxy::all(&proxy_url)
                .map_err(|e| {
                    ImError::ConfigValidation(format!("Failed to create proxy: {}", e))
                })?
                .no_proxy(reqwest::NoProxy::from_string(
                    "localhost,localhost.localdomain,127.0.0.1,127.0.0.0/8,::1,[::1]",
                ));

            Ok(builder.proxy(proxy))
        }
        None => Ok(builder.no_proxy()),
    }
}
