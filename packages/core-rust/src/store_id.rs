//! Validated store identifiers.
//!
//! A store id is a path-like tenant name: lowercase alphanumeric segments
//! joined by `/`, at most 4 segments and 128 characters total. The id maps
//! directly onto the store's directory below the stores root, so validation
//! here is also the path-traversal guard for the whole server.

use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maximum number of `/`-separated segments in a store id.
pub const MAX_SEGMENTS: usize = 4;

/// Maximum total length of a store id in bytes.
pub const MAX_LENGTH: usize = 128;

/// The reserved id of the auto-created, undeletable default store.
pub const DEFAULT_STORE_ID: &str = "default";

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("segment pattern is valid")
    })
}

/// Errors produced by [`StoreId::parse`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreIdError {
    #[error("store id is empty")]
    Empty,
    #[error("store id exceeds {MAX_LENGTH} characters: {length}")]
    TooLong { length: usize },
    #[error("store id exceeds {MAX_SEGMENTS} segments: {count}")]
    TooManySegments { count: usize },
    #[error("invalid store id segment: {segment:?}")]
    BadSegment { segment: String },
}

/// A validated, path-like store identifier.
///
/// Construction always goes through [`StoreId::parse`]; a held `StoreId`
/// is guaranteed well-formed, so it can be joined onto the stores root
/// without further checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(String);

impl StoreId {
    /// Parses and validates a raw string as a store id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreIdError`] describing the first rule violated:
    /// emptiness, total length, segment count, or segment shape.
    pub fn parse(raw: &str) -> Result<Self, StoreIdError> {
        if raw.is_empty() {
            return Err(StoreIdError::Empty);
        }
        if raw.len() > MAX_LENGTH {
            return Err(StoreIdError::TooLong { length: raw.len() });
        }

        let segments: Vec<&str> = raw.split('/').collect();
        if segments.len() > MAX_SEGMENTS {
            return Err(StoreIdError::TooManySegments {
                count: segments.len(),
            });
        }
        for segment in &segments {
            if !segment_pattern().is_match(segment) {
                return Err(StoreIdError::BadSegment {
                    segment: (*segment).to_string(),
                });
            }
        }

        Ok(Self(raw.to_string()))
    }

    /// The reserved default store id.
    #[must_use]
    pub fn default_store() -> Self {
        Self(DEFAULT_STORE_ID.to_string())
    }

    /// Whether this is the reserved `default` store.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_STORE_ID
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id's segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// The relative filesystem path of this store below the stores root.
    ///
    /// Each id segment becomes one path component, so `org/team/project`
    /// maps to `org/team/project/` on disk.
    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        self.segments().collect()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StoreId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for StoreId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for StoreId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_default() {
        let id = StoreId::parse("default").unwrap();
        assert!(id.is_default());
        assert_eq!(id.as_str(), "default");
    }

    #[test]
    fn accepts_hyphenated_single_segment() {
        let id = StoreId::parse("my-project").unwrap();
        assert_eq!(id.as_str(), "my-project");
        assert!(!id.is_default());
    }

    #[test]
    fn accepts_nested_segments() {
        let id = StoreId::parse("org/team/project").unwrap();
        assert_eq!(id.segments().count(), 3);
        assert_eq!(id.relative_path(), PathBuf::from("org/team/project"));
    }

    #[test]
    fn accepts_four_segments() {
        assert!(StoreId::parse("a/b/c/d").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(StoreId::parse(""), Err(StoreIdError::Empty));
    }

    #[test]
    fn rejects_uppercase() {
        assert!(matches!(
            StoreId::parse("Invalid/ID"),
            Err(StoreIdError::BadSegment { .. })
        ));
    }

    #[test]
    fn rejects_five_segments() {
        assert_eq!(
            StoreId::parse("a/b/c/d/e"),
            Err(StoreIdError::TooManySegments { count: 5 })
        );
    }

    #[test]
    fn rejects_over_128_chars() {
        let long = "a".repeat(129);
        assert_eq!(
            StoreId::parse(&long),
            Err(StoreIdError::TooLong { length: 129 })
        );
    }

    #[test]
    fn accepts_exactly_128_chars() {
        let id = "a".repeat(128);
        assert!(StoreId::parse(&id).is_ok());
    }

    #[test]
    fn rejects_leading_or_trailing_hyphen() {
        assert!(StoreId::parse("-abc").is_err());
        assert!(StoreId::parse("abc-").is_err());
        assert!(StoreId::parse("a/-b").is_err());
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(StoreId::parse("a//b").is_err());
        assert!(StoreId::parse("/a").is_err());
        assert!(StoreId::parse("a/").is_err());
    }

    #[test]
    fn rejects_path_traversal_shapes() {
        assert!(StoreId::parse("..").is_err());
        assert!(StoreId::parse("a/../b").is_err());
        assert!(StoreId::parse("a/.b").is_err());
    }

    #[test]
    fn serde_round_trip() {
        let id = StoreId::parse("org/project-b").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"org/project-b\"");
        let back: StoreId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn serde_rejects_invalid() {
        let err = serde_json::from_str::<StoreId>("\"Bad/Id\"");
        assert!(err.is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn valid_segments_always_parse(
                segs in proptest::collection::vec("[a-z0-9]([a-z0-9-]{0,10}[a-z0-9])?", 1..=4)
            ) {
                let id = segs.join("/");
                prop_assume!(id.len() <= MAX_LENGTH);
                prop_assert!(StoreId::parse(&id).is_ok(), "{id:?} should parse");
            }

            #[test]
            fn parse_never_panics(raw in ".{0,160}") {
                let _ = StoreId::parse(&raw);
            }

            #[test]
            fn parsed_ids_round_trip_display(
                segs in proptest::collection::vec("[a-z0-9]([a-z0-9-]{0,10}[a-z0-9])?", 1..=4)
            ) {
                let id = segs.join("/");
                prop_assume!(id.len() <= MAX_LENGTH);
                if let Ok(parsed) = StoreId::parse(&id) {
                    prop_assert_eq!(parsed.to_string(), id);
                }
            }
        }
    }
}
