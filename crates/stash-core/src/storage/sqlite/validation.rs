//! Key, tag and value validation.

use std::collections::BTreeSet;

use crate::error::{Result, StashError};

/// Maximum key size in bytes.
pub const MAX_KEY_BYTES: usize = 512;

/// Maximum bytes per tag.
pub const MAX_TAG_BYTES: usize = 128;

/// Maximum tags per item.
pub const MAX_TAGS_PER_ITEM: usize = 100;

/// Maximum serialized value size in bytes.
pub const MAX_VALUE_BYTES: u64 = 1024 * 1024;

pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StashError::Validation("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(StashError::Validation(format!(
            "Key too long (max {} bytes)",
            MAX_KEY_BYTES
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(StashError::Validation(
            "Key contains control characters".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_value_size(size: u64) -> Result<()> {
    if size > MAX_VALUE_BYTES {
        return Err(StashError::Validation(format!(
            "Value too large ({} bytes, max {})",
            size, MAX_VALUE_BYTES
        )));
    }
    Ok(())
}

/// Normalize and validate tags.
///
/// - Trims whitespace
/// - Removes duplicates (the result is a sorted set)
/// - Rejects empty tags and control characters
/// - Enforces length limits
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Result<BTreeSet<String>> {
    if tags.len() > MAX_TAGS_PER_ITEM {
        return Err(StashError::Validation(format!(
            "Too many tags (max {})",
            MAX_TAGS_PER_ITEM
        )));
    }

    let mut normalized = BTreeSet::new();
    for tag in tags {
        let trimmed = tag.as_ref().trim();
        if trimmed.is_empty() {
            return Err(StashError::Validation("Empty tag is not allowed".to_string()));
        }
        if trimmed.len() > MAX_TAG_BYTES {
            return Err(StashError::Validation(format!(
                "Tag too long (max {} bytes)",
                MAX_TAG_BYTES
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(StashError::Validation(
                "Tag contains control characters".to_string(),
            ));
        }
        normalized.insert(trimmed.to_string());
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tags_dedupes_and_trims() {
        let tags = normalize_tags(&[" work ", "work", "Home"]).unwrap();
        assert_eq!(
            tags.into_iter().collect::<Vec<_>>(),
            vec!["Home".to_string(), "work".to_string()]
        );
    }

    #[test]
    fn test_normalize_tags_rejects_empty() {
        assert!(normalize_tags(&["   "]).is_err());
    }

    #[test]
    fn test_too_many_tags() {
        let tags: Vec<String> = (0..=MAX_TAGS_PER_ITEM).map(|i| format!("t{}", i)).collect();
        assert!(normalize_tags(&tags).is_err());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("user:1").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("a\nb").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_BYTES + 1)).is_err());
    }

    #[test]
    fn test_value_size_limit() {
        assert!(validate_value_size(MAX_VALUE_BYTES).is_ok());
        assert!(validate_value_size(MAX_VALUE_BYTES + 1).is_err());
    }
}
