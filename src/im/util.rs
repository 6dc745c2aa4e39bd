// Shared IM utilities (used by the Feishu, DingTalk and WeCom adapters)

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::error::ImError;

/// HMAC-SHA256 of `message` keyed with `key`, base64 (standard alphabet) encoded.
pub(super) fn hmac_sha256_base64(key: &[u8], message: &[u8]) -> Result<String, ImError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| ImError::ConfigValidation(format!("invalid signing key: {}", e)))?;
    mac.update(message);
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Shorten a response body for error messages and logs (char-boundary safe).
pub(super) fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut)
}

/// Mask a credential for logging, keeping the first four characters.
pub(super) fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{}***", visible)
}

/// Join `base` and `path` with exactly one slash between them.
pub(super) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sha256_known_vector() {
        // RFC 4231 test case 2
        let sig = hmac_sha256_base64(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(sig, "W9zBRr9gdU5qBCQmCJV1x1oAPwidJzmDnexYuWTsOEM=");
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        assert_eq!(truncate_for_log("短消息", 10), "短消息");
        assert_eq!(truncate_for_log("野猪拉屎啦", 2), "野猪…");
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("123456:ABCDEF"), "1234***");
        assert_eq!(mask_secret("ab"), "ab***");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://x/", "/a/b"), "http://x/a/b");
        assert_eq!(join_url("http://x", "a"), "http://x/a");
    }
}
