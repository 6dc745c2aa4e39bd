//! Per-platform credential configs.
//!
//! Configs are plain data, validated once before a client is built. The serialized form
//! carries an internal `"platform"` tag so a settings file can describe any bot:
//!
//! ```json
//! { "platform": "telegram", "botToken": "123456:ABC" }
//! ```

use serde::{Deserialize, Serialize};

use super::error::{ImError, Result};
use super::types::Platform;

/// Feishu (Lark) app credentials, or a custom-bot webhook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeishuConfig {
    pub app_id: String,
    pub app_secret: String,
    /// Webhook mode: when set, app credentials are not needed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Signing secret of a webhook bot with signature verification enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl FeishuConfig {
    pub fn app(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            ..Default::default()
        }
    }

    pub fn webhook(url: impl Into<String>) -> Self {
        Self {
            webhook_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn is_webhook(&self) -> bool {
        self.webhook_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// API root, `https://api.telegram.org` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// DingTalk group robot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DingTalkConfig {
    /// Robot webhook access token
    pub access_token: String,
    /// Signing secret (robots with "additional signature" security)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Full webhook endpoint, `https://oapi.dingtalk.com/robot/send` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// WeCom (WeChat Work) self-built application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WeComConfig {
    pub corp_id: String,
    pub corp_secret: String,
    pub agent_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Credentials for one bot on one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum PlatformConfig {
    #[serde(alias = "lark")]
    Feishu(FeishuConfig),
    Telegram(TelegramConfig),
    DingTalk(DingTalkConfig),
    #[serde(alias = "wechat")]
    WeCom(WeComConfig),
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ImError::ConfigValidation(format!("{} is required", what)));
    }
    Ok(())
}

impl PlatformConfig {
    pub fn platform(&self) -> Platform {
        match self {
            PlatformConfig::Feishu(_) => Platform::Feishu,
            PlatformConfig::Telegram(_) => Platform::Telegram,
            PlatformConfig::DingTalk(_) => Platform::DingTalk,
            PlatformConfig::WeCom(_) => Platform::WeCom,
        }
    }

    /// Check that every field required by the platform is present.
    pub fn validate(&self) -> Result<()> {
        match self {
            PlatformConfig::Feishu(c) if c.is_webhook() => Ok(()),
            PlatformConfig::Feishu(c) => {
                require(&c.app_id, "app_id (or webhook_url for webhook mode)")?;
                require(&c.app_secret, "app_secret (or webhook_url for webhook mode)")
            }
            PlatformConfig::Telegram(c) => require(&c.bot_token, "bot_token"),
            PlatformConfig::DingTalk(c) => require(&c.access_token, "access_token"),
            PlatformConfig::WeCom(c) => {
                require(&c.corp_id, "corp_id")?;
                require(&c.corp_secret, "corp_secret")
            }
        }
    }
}

impl From<FeishuConfig> for PlatformConfig {
    fn from(c: FeishuConfig) -> Self {
        PlatformConfig::Feishu(c)
    }
}

impl From<TelegramConfig> for PlatformConfig {
    fn from(c: TelegramConfig) -> Self {
        PlatformConfig::Telegram(c)
    }
}

impl From<DingTalkConfig> for PlatformConfig {
    fn from(c: DingTalkConfig) -> Self {
        PlatformConfig::DingTalk(c)
    }
}

impl From<WeComConfig> for PlatformConfig {
    fn from(c: WeComConfig) -> Self {
        PlatformConfig::WeCom(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_reported_per_variant() {
        let configs: Vec<PlatformConfig> = vec![
            FeishuConfig::app("cli_a", "s").into(),
            TelegramConfig {
                bot_token: "t".into(),
                ..Default::default()
            }
            .into(),
            DingTalkConfig {
                access_token: "a".into(),
                ..Default::default()
            }
            .into(),
            WeComConfig {
                corp_id: "ww1".into(),
                corp_secret: "s".into(),
                agent_id: 1000002,
                ..Default::default()
            }
            .into(),
        ];
        let platforms: Vec<Platform> = configs.iter().map(|c| c.platform()).collect();
        assert_eq!(platforms, Platform::ALL.to_vec());
        assert!(configs.iter().all(|c| c.validate().is_ok()));
    }

    #[test]
    fn test_feishu_requires_credentials_or_webhook() {
        let empty = PlatformConfig::Feishu(FeishuConfig::default());
        let err = empty.validate().unwrap_err();
        assert!(matches!(err, ImError::ConfigValidation(_)));
        assert!(err.to_string().contains("app_id"));

        let half = PlatformConfig::Feishu(FeishuConfig::app("cli_a", ""));
        assert!(half.validate().unwrap_err().to_string().contains("app_secret"));

        let webhook = PlatformConfig::Feishu(FeishuConfig::webhook(
            "https://open.feishu.cn/open-apis/bot/v2/hook/xxx",
        ));
        assert!(webhook.validate().is_ok());
    }

    #[test]
    fn test_missing_required_fields() {
        assert!(PlatformConfig::Telegram(TelegramConfig::default())
            .validate()
            .is_err());
        assert!(PlatformConfig::DingTalk(DingTalkConfig::default())
            .validate()
            .is_err());
        let wecom = PlatformConfig::WeCom(WeComConfig {
            corp_id: "ww1".into(),
            ..Default::default()
        });
        assert!(wecom.validate().unwrap_err().to_string().contains("corp_secret"));
    }

    #[test]
    fn test_tagged_deserialize_with_aliases() {
        let lark: PlatformConfig =
            serde_json::from_str(r#"{"platform":"lark","appId":"cli_a","appSecret":"s"}"#).unwrap();
        assert_eq!(lark.platform(), Platform::Feishu);

        let wechat: PlatformConfig = serde_json::from_str(
            r#"{"platform":"wechat","corpId":"ww1","corpSecret":"s","agentId":1000002}"#,
        )
        .unwrap();
        match wechat {
            PlatformConfig::WeCom(ref c) => assert_eq!(c.agent_id, 1000002),
            ref other => panic!("unexpected config: {other:?}"),
        }

        let ding: PlatformConfig =
            serde_json::from_str(r#"{"platform":"dingtalk","accessToken":"abc","secret":"SEC1"}"#)
                .unwrap();
        assert_eq!(ding.platform(), Platform::DingTalk);
    }

    #[test]
    fn test_serialize_round_trip_keeps_platform() {
        let cfg = PlatformConfig::Telegram(TelegramConfig {
            bot_token: "123:abc".into(),
            base_url: Some("http://localhost:8081".into()),
        });
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["platform"], "telegram");
        let back: PlatformConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, cfg);
        assert_eq!(back.platform(), Platform::Telegram);
    }
}
