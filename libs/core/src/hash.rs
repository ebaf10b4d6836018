//! Canonical body hashing for DLQ entries.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 over the raw payload bytes. For an opaque byte body
/// the payload itself is already canonical, so no further normalization is
/// applied before hashing.
pub fn body_hash(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Truncates a message body into a lossy-but-safe UTF-8 preview, even when
/// the payload is not valid UTF-8.
pub fn body_preview(body: &[u8], max_len: usize) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= max_len {
        text.into_owned()
    } else {
        let truncated: String = text.chars().take(max_len).collect();
        format!("{truncated}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        let a = body_hash(b"hello world");
        let b = body_hash(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn preview_handles_malformed_utf8() {
        let body = vec![0xff, 0xfe, b'h', b'i'];
        let preview = body_preview(&body, 10);
        assert!(preview.contains('h'));
    }

    #[test]
    fn preview_truncates_long_bodies() {
        let body = "x".repeat(500);
        let preview = body_preview(body.as_bytes(), 50);
        assert!(preview.chars().count() <= 51);
        assert!(preview.ends_with('…'));
    }
}
