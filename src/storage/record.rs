use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

const SEPARATOR: &str = "::";

/// Composite key of a stored asset.
///
/// Rendered as `user::pub::timestamp`; ids may not contain `:` so the
/// rendering parses back unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetKey {
    pub user_id: String,
    pub pub_id: String,
    pub captured_at_ms: i64,
}

impl AssetKey {
    pub fn new(
        user_id: impl Into<String>,
        pub_id: impl Into<String>,
        captured_at_ms: i64,
    ) -> Result<Self, StoreError> {
        let key = Self {
            user_id: user_id.into(),
            pub_id: pub_id.into(),
            captured_at_ms,
        };
        key.validate()?;
        Ok(key)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        for (name, id) in [("user id", &self.user_id), ("pub id", &self.pub_id)] {
            if id.is_empty() {
                return Err(StoreError::InvalidKey {
                    details: format!("{} is empty", name),
                });
            }
            if id.contains(':') {
                return Err(StoreError::InvalidKey {
                    details: format!("{} '{}' contains ':'", name, id),
                });
            }
        }
        Ok(())
    }

    /// Same user and pub, later timestamp
    pub(crate) fn bumped(&self) -> Self {
        Self {
            captured_at_ms: self.captured_at_ms + 1,
            ..self.clone()
        }
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.user_id,
            self.pub_id,
            self.captured_at_ms,
            sep = SEPARATOR
        )
    }
}

impl FromStr for AssetKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        let [user_id, pub_id, timestamp] = parts.as_slice() else {
            return Err(StoreError::InvalidKey {
                details: format!("'{}' is not user::pub::timestamp", s),
            });
        };

        let captured_at_ms = timestamp.parse().map_err(|_| StoreError::InvalidKey {
            details: format!("bad timestamp '{}'", timestamp),
        })?;
        Self::new(*user_id, *pub_id, captured_at_ms)
    }
}

/// One persisted capture. Never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAssetRecord {
    pub user_id: String,
    pub pub_id: String,
    pub pub_name: String,
    pub captured_at_ms: i64,
    /// Encoded image; file-backed stores keep it next to the metadata
    #[serde(skip)]
    pub blob: Bytes,
    pub byte_size: u64,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

impl StoredAssetRecord {
    pub fn key(&self) -> AssetKey {
        AssetKey {
            user_id: self.user_id.clone(),
            pub_id: self.pub_id.clone(),
            captured_at_ms: self.captured_at_ms,
        }
    }

    /// Copy of the record stored under `key`
    pub(crate) fn with_key(&self, key: &AssetKey) -> Self {
        Self {
            user_id: key.user_id.clone(),
            pub_id: key.pub_id.clone(),
            captured_at_ms: key.captured_at_ms,
            ..self.clone()
        }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_and_parse() {
        let key = AssetKey::new("alice", "the-crown", 1_700_000_000_123).unwrap();
        let rendered = key.to_string();
        assert_eq!(rendered, "alice::the-crown::1700000000123");
        assert_eq!(rendered.parse::<AssetKey>().unwrap(), key);
    }

    #[test]
    fn test_invalid_keys() {
        assert!(AssetKey::new("", "pub", 1).is_err());
        assert!(AssetKey::new("a:b", "pub", 1).is_err());
        assert!("alice::pub".parse::<AssetKey>().is_err());
        assert!("alice::pub::soon".parse::<AssetKey>().is_err());
        assert!("alice::pub::1::2".parse::<AssetKey>().is_err());
    }

    #[test]
    fn test_keys_order_by_user_pub_time() {
        let mut keys = vec![
            AssetKey::new("b", "x", 1).unwrap(),
            AssetKey::new("a", "y", 1).unwrap(),
            AssetKey::new("a", "x", 5).unwrap(),
            AssetKey::new("a", "x", 2).unwrap(),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered, vec!["a::x::2", "a::x::5", "a::y::1", "b::x::1"]);
    }

    #[test]
    fn test_blob_is_not_serialized() {
        let record = StoredAssetRecord {
            user_id: "u".to_string(),
            pub_id: "p".to_string(),
            pub_name: "The Pub".to_string(),
            captured_at_ms: 10,
            blob: Bytes::from_static(b"\xff\xd8\xff"),
            byte_size: 3,
            mime_type: "image/jpeg".to_string(),
            width: 1,
            height: 1,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("blob"));

        let restored: StoredAssetRecord = serde_json::from_str(&json).unwrap();
        assert!(restored.blob.is_empty());
        assert_eq!(restored.key(), record.key());
    }
}
