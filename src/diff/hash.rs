use sha2::{Digest, Sha256};

/// Digest of an ordered list of text parts. Parts are length-prefixed so
/// ["ab","c"] and ["a","bc"] never collide.
pub fn content_digest<I, S>(parts: I) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        let part = part.as_ref();
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let result = hasher.finalize();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&result[0..8]);
    u64::from_le_bytes(buf)
}

/// Signature of one data row, used to suppress byte-identical re-inserts.
pub fn row_signature(values: &[String]) -> u64 {
    content_digest(values.iter().map(|v| v.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_prevents_concat_collisions() {
        let a = content_digest(["ab", "c"]);
        let b = content_digest(["a", "bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn row_signature_is_order_sensitive() {
        let a = row_signature(&["x".into(), "y".into()]);
        let b = row_signature(&["y".into(), "x".into()]);
        assert_ne!(a, b);
        assert_eq!(a, row_signature(&["x".into(), "y".into()]));
    }
}
