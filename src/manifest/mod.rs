//! Upstream version catalogue
//!
//! Fetches the catalogue descriptor, returns it ascending by release time,
//! and splices in the synthetic unobfuscated variants shipped in the
//! program image. Every other endpoint the pipeline touches is supplied by
//! the catalogue itself.

mod detail;
mod version;

pub use detail::{
    DetailError, Download, Library, LibraryDownloads, VersionDetail, DOWNLOAD_CLIENT,
    DOWNLOAD_CLIENT_MAPPINGS, DOWNLOAD_SERVER, DOWNLOAD_SERVER_MAPPINGS,
};
pub use version::{VersionId, VersionKind, UNOBFUSCATED_SUFFIX};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::sha1_bytes;

/// The one hard-coded endpoint: the catalogue root
pub const DEFAULT_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

/// Synthetic variant detail JSON files embedded in the program image
const EMBEDDED_VARIANTS: &[&str] =
    &[include_str!("../../resources/unobfuscated/1.21.11_unobfuscated.json")];

/// This variant stays in the default version list: versions after it are
/// unobfuscated upstream and keep original local-variable names, so diffs
/// against it are much cleaner than against its obfuscated base.
const KEPT_VARIANT: &str = "1.21.11_unobfuscated";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to fetch version manifest: {0}")]
    Http(String),

    #[error("version manifest is missing its versions listing")]
    MissingVersions,

    #[error("malformed version manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One catalogue entry for a published version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub id: VersionId,
    #[serde(rename = "type")]
    pub release_type: String,
    pub url: String,
    pub time: DateTime<Utc>,
    #[serde(rename = "releaseTime")]
    pub release_time: DateTime<Utc>,
    pub sha1: String,
    /// Disambiguates records with identical ids; synthetic variants carry 1
    #[serde(default)]
    pub priority: u32,
    /// Detail JSON for synthetic variants, resolved in-image instead of
    /// over the network
    #[serde(skip)]
    pub embedded: Option<&'static str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Latest {
    pub release: VersionId,
    pub snapshot: VersionId,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    latest: Option<Latest>,
    versions: Option<Vec<VersionInfo>>,
}

/// The resolved catalogue, ascending by release time, variants injected
#[derive(Debug)]
pub struct VersionManifest {
    pub latest: Option<Latest>,
    pub versions: Vec<VersionInfo>,
}

impl VersionManifest {
    /// Fetch and resolve the catalogue from `url`
    pub fn fetch(url: &str, variants: &UnobfuscatedVariants) -> Result<Self, ManifestError> {
        let body = ureq::get(url)
            .call()
            .map_err(|e| ManifestError::Http(e.to_string()))?
            .into_string()
            .map_err(|e| ManifestError::Http(e.to_string()))?;
        Self::parse(&body, variants)
    }

    pub fn parse(json: &str, variants: &UnobfuscatedVariants) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_str(json)?;
        let mut versions = raw.versions.ok_or(ManifestError::MissingVersions)?;

        // The catalogue lists newest first; the pipeline wants ascending
        versions.reverse();
        variants.inject(&mut versions);

        Ok(Self {
            latest: raw.latest,
            versions,
        })
    }

    /// Index of `id` in the resolved list
    pub fn index_of(&self, id: &VersionId) -> Option<usize> {
        self.versions.iter().position(|v| &v.id == id)
    }

    pub fn contains(&self, id: &VersionId) -> bool {
        self.index_of(id).is_some()
    }
}

/// The synthetic unobfuscated variants bundled with the binary.
///
/// Loaded once and threaded through the pipeline rather than held in a
/// process global.
#[derive(Debug)]
pub struct UnobfuscatedVariants {
    entries: Vec<VariantEntry>,
}

#[derive(Debug)]
struct VariantEntry {
    base: VersionId,
    info: VersionInfo,
}

impl UnobfuscatedVariants {
    /// Build the variant set from the embedded detail files
    pub fn embedded() -> Result<Self, ManifestError> {
        Self::from_details(EMBEDDED_VARIANTS)
    }

    fn from_details(details: &[&'static str]) -> Result<Self, ManifestError> {
        let mut entries = Vec::with_capacity(details.len());
        for json in details {
            let detail = VersionDetail::parse(json)?;
            let info = VersionInfo {
                id: detail.id.clone(),
                release_type: detail.release_type.clone(),
                url: format!("embedded:{}", detail.id),
                time: detail.release_time,
                release_time: detail.release_time,
                sha1: sha1_bytes(json.as_bytes()),
                priority: 1,
                embedded: Some(json),
            };
            entries.push(VariantEntry {
                base: detail.id.base(),
                info,
            });
        }
        Ok(Self { entries })
    }

    /// Insert each variant immediately after its base version, so the
    /// variant compares as newer than the base.
    pub fn inject(&self, versions: &mut Vec<VersionInfo>) {
        let mut i = 0;
        while i < versions.len() {
            if let Some(entry) = self.entries.iter().find(|e| e.base == versions[i].id) {
                versions.insert(i + 1, entry.info.clone());
                i += 1;
            }
            i += 1;
        }
    }

    /// Variant ids excluded from the default version list
    pub fn excluded_ids(&self) -> Vec<VersionId> {
        self.entries
            .iter()
            .map(|e| e.info.id.clone())
            .filter(|id| id.as_str() != KEPT_VARIANT)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn info(id: &str, release_time: &str) -> VersionInfo {
        VersionInfo {
            id: VersionId::from(id),
            release_type: "release".to_string(),
            url: format!("https://example.invalid/{id}.json"),
            time: release_time.parse().unwrap(),
            release_time: release_time.parse().unwrap(),
            sha1: "0".repeat(40),
            priority: 0,
            embedded: None,
        }
    }

    #[test]
    fn test_parse_reverses_to_ascending() {
        let json = r#"{
            "latest": {"release": "1.15", "snapshot": "1.15"},
            "versions": [
                {"id": "1.15", "type": "release", "url": "u", "time": "2019-12-10T13:00:00+00:00",
                 "releaseTime": "2019-12-10T13:00:00+00:00", "sha1": "aa"},
                {"id": "1.14.4", "type": "release", "url": "u", "time": "2019-07-19T09:25:47+00:00",
                 "releaseTime": "2019-07-19T09:25:47+00:00", "sha1": "bb"}
            ]
        }"#;
        let manifest =
            VersionManifest::parse(json, &UnobfuscatedVariants::from_details(&[]).unwrap())
                .unwrap();
        assert_eq!(manifest.versions[0].id.as_str(), "1.14.4");
        assert_eq!(manifest.versions[1].id.as_str(), "1.15");
    }

    #[test]
    fn test_missing_versions_listing() {
        let err = VersionManifest::parse(
            r#"{"latest": {"release": "1.15", "snapshot": "1.15"}}"#,
            &UnobfuscatedVariants::from_details(&[]).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::MissingVersions));
    }

    #[test]
    fn test_variant_injected_after_base() {
        let variants = UnobfuscatedVariants::embedded().unwrap();
        let mut versions = vec![
            info("1.21.10", "2025-10-01T00:00:00+00:00"),
            info("1.21.11", "2025-11-01T00:00:00+00:00"),
            info("1.22", "2026-01-01T00:00:00+00:00"),
        ];
        variants.inject(&mut versions);

        assert_eq!(versions.len(), 4);
        assert_eq!(versions[1].id.as_str(), "1.21.11");
        assert_eq!(versions[2].id.as_str(), "1.21.11_unobfuscated");
        assert_eq!(versions[2].priority, 1);
        assert!(versions[2].embedded.is_some());
    }

    #[test]
    fn test_kept_variant_not_excluded() {
        let variants = UnobfuscatedVariants::embedded().unwrap();
        assert!(variants
            .excluded_ids()
            .iter()
            .all(|id| id.as_str() != KEPT_VARIANT));
    }
}
