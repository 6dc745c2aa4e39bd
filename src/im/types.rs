// Unified message model shared by every platform adapter

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ImError;

/// Supported IM platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(alias = "lark")]
    Feishu,
    Telegram,
    #[serde(rename = "dingtalk")]
    DingTalk,
    #[serde(rename = "wecom", alias = "wechat")]
    WeCom,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Feishu,
        Platform::Telegram,
        Platform::DingTalk,
        Platform::WeCom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Feishu => "feishu",
            Platform::Telegram => "telegram",
            Platform::DingTalk => "dingtalk",
            Platform::WeCom => "wecom",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ImError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feishu" | "lark" => Ok(Platform::Feishu),
            "telegram" => Ok(Platform::Telegram),
            "dingtalk" => Ok(Platform::DingTalk),
            "wecom" | "wechat" => Ok(Platform::WeCom),
            other => Err(ImError::UnknownPlatform(other.to_string())),
        }
    }
}

/// Chat kind of a destination (private chat vs group)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Group,
}

/// Message kind determines how `content` is interpreted by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text
    Text,
    /// Markdown source text
    Markdown,
    /// Interactive card, `content` is the platform's card JSON
    Card,
    /// Media reference: an uploaded image key / media id, or a photo URL on Telegram
    Image,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Markdown => "markdown",
            MessageKind::Card => "card",
            MessageKind::Image => "image",
        }
    }
}

/// Outgoing message, immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub content: String,
    /// Additional platform-specific fields merged into the request body
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            extra: Map::new(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Text, content)
    }

    pub fn markdown(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Markdown, content)
    }

    pub fn card(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Card, content)
    }

    pub fn image(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Image, content)
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Reject messages that would produce an empty request on every platform.
    pub(crate) fn ensure_not_empty(&self) -> Result<(), ImError> {
        if self.content.trim().is_empty() {
            return Err(ImError::InvalidArgument(
                "message content cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// One message destination
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: String,
    pub chat_type: ChatType,
}

impl Target {
    pub fn private(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            chat_type: ChatType::Private,
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            chat_type: ChatType::Group,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.chat_type {
            ChatType::Private => "private",
            ChatType::Group => "group",
        };
        write!(f, "{}:{}", kind, self.id)
    }
}

/// Options for a single `send` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    /// Ordered destinations; order is preserved in failure reports
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Users to @mention (mobile numbers on DingTalk, user ids elsewhere)
    #[serde(default)]
    pub at_users: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl SendOptions {
    pub fn to(targets: impl IntoIterator<Item = Target>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn with_mentions(mut self, users: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.at_users = users.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn require_targets(&self) -> Result<(), ImError> {
        if self.targets.is_empty() {
            return Err(ImError::InvalidArgument(
                "at least one target is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// A target that exhausted its retry budget, with the last error observed
#[derive(Debug)]
pub struct FailedTarget {
    pub target: Target,
    pub error: ImError,
}

/// Aggregate outcome of a multi-target send with at least one failure
#[derive(Debug)]
pub struct SendReport {
    pub success_count: usize,
    pub total_count: usize,
    pub failed: Vec<FailedTarget>,
}

impl fmt::Display for SendReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent to {}/{} targets",
            self.success_count, self.total_count
        )?;
        for (i, failed) in self.failed.iter().enumerate() {
            let sep = if i == 0 { "; failed: " } else { ", " };
            write!(f, "{}{} ({})", sep, failed.target, failed.error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_platform_parse_accepts_aliases() {
        assert_eq!("lark".parse::<Platform>().unwrap(), Platform::Feishu);
        assert_eq!("Feishu".parse::<Platform>().unwrap(), Platform::Feishu);
        assert_eq!("wechat".parse::<Platform>().unwrap(), Platform::WeCom);
        assert_eq!("dingtalk".parse::<Platform>().unwrap(), Platform::DingTalk);
    }

    #[test]
    fn test_platform_parse_unknown() {
        let err = "slack".parse::<Platform>().unwrap_err();
        assert!(matches!(err, ImError::UnknownPlatform(ref p) if p == "slack"));
    }

    #[test]
    fn test_platform_display_round_trip() {
        for p in Platform::ALL {
            assert_eq!(p.to_string().parse::<Platform>().unwrap(), p);
        }
    }

    #[test]
    fn test_message_builder_extra() {
        let msg = Message::text("hi").with_extra("disable_notification", json!(true));
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.extra["disable_notification"], json!(true));
    }

    #[test]
    fn test_empty_message_rejected() {
        let err = Message::text("   ").ensure_not_empty().unwrap_err();
        assert!(matches!(err, ImError::InvalidArgument(_)));
    }

    #[test]
    fn test_send_options_deserialize() {
        let opts: SendOptions = serde_json::from_value(json!({
            "targets": [{"id": "user123", "chatType": "private"}],
            "atUsers": ["u1", "u2"],
            "extra": {"priority": "high"}
        }))
        .unwrap();
        assert_eq!(opts.targets, vec![Target::private("user123")]);
        assert_eq!(opts.at_users.len(), 2);
        assert_eq!(opts.extra["priority"], json!("high"));
    }

    #[test]
    fn test_send_report_display_lists_failures() {
        let report = SendReport {
            success_count: 1,
            total_count: 2,
            failed: vec![FailedTarget {
                target: Target::group("g1"),
                error: ImError::Transport("connection reset".to_string()),
            }],
        };
        let text = report.to_string();
        assert!(text.starts_with("sent to 1/2 targets"));
        assert!(text.contains("group:g1"));
        assert!(text.contains("connection reset"));
    }
}
