//! Version identifiers and kind classification

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Suffix marking a synthetic unobfuscated variant of a base version
pub const UNOBFUSCATED_SUFFIX: &str = "_unobfuscated";

const RELEASE_PATTERN: &str = r"\d+\.\d+(?:\.\d+)?";

fn release_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!("^{RELEASE_PATTERN}$")).unwrap())
}

fn snapshot_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            "^(?:{RELEASE_PATTERN}(?: Pre-Release |-rc-?|-pre-?|-snapshot-)\\d+|\\d{{2}}w\\d{{2}}[a-z])$"
        ))
        .unwrap()
    })
}

/// Kind of a version, inferred from the identifier's lexical form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionKind {
    Release,
    Snapshot,
    /// April-fools builds, combat tests, and other oddities
    Special,
}

impl VersionKind {
    pub fn is_special(&self) -> bool {
        matches!(self, VersionKind::Special)
    }
}

/// An opaque upstream version identifier.
///
/// Equality and hashing are over the raw string; the kind is derived from
/// the identifier's form with any `_unobfuscated` suffix stripped first.
#[derive(Debug, Clone)]
pub struct VersionId {
    raw: String,
    kind: VersionKind,
}

impl VersionId {
    pub fn from(raw: &str) -> Self {
        let base = raw.strip_suffix(UNOBFUSCATED_SUFFIX).unwrap_or(raw);
        let kind = if snapshot_re().is_match(base) {
            VersionKind::Snapshot
        } else if release_re().is_match(base) {
            VersionKind::Release
        } else {
            VersionKind::Special
        };
        Self {
            raw: raw.to_string(),
            kind,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> VersionKind {
        self.kind
    }

    /// Whether this id names a synthetic unobfuscated variant
    pub fn is_unobfuscated_variant(&self) -> bool {
        self.raw.ends_with(UNOBFUSCATED_SUFFIX)
    }

    /// The id with any `_unobfuscated` suffix stripped
    pub fn base(&self) -> VersionId {
        match self.raw.strip_suffix(UNOBFUSCATED_SUFFIX) {
            Some(base) => VersionId::from(base),
            None => self.clone(),
        }
    }
}

impl PartialEq for VersionId {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for VersionId {}

impl Hash for VersionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for VersionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for VersionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = VersionId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a version id string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<VersionId, E> {
                Ok(VersionId::from(v))
            }
        }

        deserializer.deserialize_str(IdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_kinds() {
        assert_eq!(VersionId::from("1.16").kind(), VersionKind::Release);
        assert_eq!(VersionId::from("1.14.4").kind(), VersionKind::Release);
        assert_eq!(VersionId::from("1.21.11").kind(), VersionKind::Release);
    }

    #[test]
    fn test_snapshot_kinds() {
        assert_eq!(VersionId::from("21w39a").kind(), VersionKind::Snapshot);
        assert_eq!(VersionId::from("1.16 Pre-Release 3").kind(), VersionKind::Snapshot);
        assert_eq!(VersionId::from("1.16-rc1").kind(), VersionKind::Snapshot);
        assert_eq!(VersionId::from("1.19-pre5").kind(), VersionKind::Snapshot);
        assert_eq!(VersionId::from("26.1-snapshot-1").kind(), VersionKind::Snapshot);
    }

    #[test]
    fn test_special_kinds() {
        assert_eq!(VersionId::from("3D Shareware v1.34").kind(), VersionKind::Special);
        assert_eq!(VersionId::from("1.RV-Pre1").kind(), VersionKind::Special);
        assert_eq!(VersionId::from("22w13oneblockatatime").kind(), VersionKind::Special);
    }

    #[test]
    fn test_unobfuscated_variant_inherits_base_kind() {
        let id = VersionId::from("1.21.11_unobfuscated");
        assert_eq!(id.kind(), VersionKind::Release);
        assert!(id.is_unobfuscated_variant());
        assert_eq!(id.base(), VersionId::from("1.21.11"));
        assert_ne!(id, VersionId::from("1.21.11"));
    }

    #[test]
    fn test_equality_over_raw_string() {
        assert_eq!(VersionId::from("1.17"), VersionId::from("1.17"));
        assert_ne!(VersionId::from("1.17"), VersionId::from("1.17.1"));
    }
}
