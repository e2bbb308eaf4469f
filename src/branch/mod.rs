//! Branch policy
//!
//! A branch spec declares which slice of the catalogue a branch tracks.
//! Policy filtering turns the resolved catalogue plus a spec into the
//! filtered version list and the effective start/end versions.

use std::collections::{HashMap, HashSet};
use std::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::manifest::{VersionId, VersionInfo, VersionKind, VersionManifest};

#[derive(Debug, Error)]
pub enum BranchError {
    #[error("version \"{0}\" not found in version manifest")]
    UnknownVersion(VersionId),

    #[error("version \"{0}\" is not included by the current branch configuration")]
    PolicyExcluded(VersionId),

    #[error("start version \"{start}\" is newer than end version \"{end}\"")]
    Misordered { start: VersionId, end: VersionId },

    #[error("cannot determine a start or end version for this branch")]
    Underspecified,

    #[error("failed to load branch config {uri}: {message}")]
    Config { uri: String, message: String },
}

/// Branch type, restricting which version kinds the branch carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchType {
    Release,
    #[default]
    Dev,
    Custom,
}

/// Declarative description of one branch's version set
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BranchSpec {
    #[serde(rename = "type", default)]
    pub branch_type: BranchType,
    #[serde(default)]
    pub start: Option<VersionId>,
    #[serde(default)]
    pub end: Option<VersionId>,
    /// Exhaustive allowlist; when set, include/exclude are ignored
    #[serde(default)]
    pub versions: Option<Vec<VersionId>>,
    /// Ids to re-admit past the default exclusions
    #[serde(default)]
    pub include: Option<Vec<VersionId>>,
    /// Ids to drop in addition to the default exclusions
    #[serde(default)]
    pub exclude: Option<Vec<VersionId>>,
}

impl BranchSpec {
    /// Apply command-line start/end overrides on top of a configured spec
    pub fn with_overrides(mut self, start: Option<VersionId>, end: Option<VersionId>) -> Self {
        if start.is_some() {
            self.start = start;
        }
        if end.is_some() {
            self.end = end;
        }
        self
    }

    /// Force the release-only restriction regardless of configured type
    pub fn releases_only(mut self) -> Self {
        self.branch_type = BranchType::Release;
        self
    }
}

/// A branch config file: `{"branches": {"<name>": <spec>}}`
#[derive(Debug, Default, Deserialize)]
pub struct BranchConfig {
    #[serde(default)]
    pub branches: HashMap<String, BranchSpec>,
}

impl BranchConfig {
    /// Load a config from a `file://` path, a bare path, or an `https://` URL
    pub fn load(uri: &str) -> Result<Self, BranchError> {
        let config_err = |message: String| BranchError::Config {
            uri: uri.to_string(),
            message,
        };

        let body = if let Some(rest) = uri.strip_prefix("file://") {
            fs::read_to_string(rest).map_err(|e| config_err(e.to_string()))?
        } else if uri.starts_with("https://") || uri.starts_with("http://") {
            ureq::get(uri)
                .call()
                .map_err(|e| config_err(e.to_string()))?
                .into_string()
                .map_err(|e| config_err(e.to_string()))?
        } else {
            fs::read_to_string(uri).map_err(|e| config_err(e.to_string()))?
        };

        serde_json::from_str(&body).map_err(|e| config_err(e.to_string()))
    }

    /// Compose several configs, last-wins per branch name
    pub fn load_all(uris: &[String]) -> Result<Self, BranchError> {
        let mut merged = Self::default();
        for uri in uris {
            let config = Self::load(uri)?;
            merged.branches.extend(config.branches);
        }
        Ok(merged)
    }
}

/// The outcome of policy filtering: the filtered catalogue slice and the
/// effective range within it.
#[derive(Debug)]
pub struct Plan {
    pub filtered: Vec<VersionInfo>,
    pub start_index: usize,
    pub end_index: usize,
}

impl Plan {
    pub fn start(&self) -> &VersionId {
        &self.filtered[self.start_index].id
    }

    pub fn end(&self) -> &VersionId {
        &self.filtered[self.end_index].id
    }

    /// The inclusive sublist this run generates
    pub fn to_generate(&self) -> &[VersionInfo] {
        &self.filtered[self.start_index..=self.end_index]
    }
}

/// Filter the catalogue under `spec` and derive the effective range.
///
/// `default_excluded` carries the synthetic-variant ids dropped from every
/// branch unless re-admitted via the spec's include list.
pub fn filter(
    manifest: &VersionManifest,
    spec: &BranchSpec,
    default_excluded: &[VersionId],
) -> Result<Plan, BranchError> {
    let mut filtered: Vec<VersionInfo> = manifest.versions.clone();

    if let Some(allowlist) = &spec.versions {
        let allowed: HashSet<&VersionId> = allowlist.iter().collect();
        filtered.retain(|v| allowed.contains(&v.id));
    } else {
        let mut excluded: HashSet<VersionId> = filtered
            .iter()
            .filter(|v| v.id.kind().is_special())
            .map(|v| v.id.clone())
            .collect();
        excluded.extend(default_excluded.iter().cloned());
        if let Some(extra) = &spec.exclude {
            excluded.extend(extra.iter().cloned());
        }
        if let Some(include) = &spec.include {
            for id in include {
                excluded.remove(id);
            }
        }
        filtered.retain(|v| !excluded.contains(&v.id));
    }

    if spec.branch_type == BranchType::Release {
        filtered.retain(|v| v.id.kind() == VersionKind::Release);
    }

    let start = match &spec.start {
        Some(id) => id.clone(),
        None => filtered
            .first()
            .map(|v| v.id.clone())
            .ok_or(BranchError::Underspecified)?,
    };

    let end = match &spec.end {
        Some(id) => id.clone(),
        None => derive_latest(manifest, spec, &filtered)?,
    };

    let start_index = locate(manifest, &filtered, &start)?;
    let end_index = locate(manifest, &filtered, &end)?;
    if start_index > end_index {
        return Err(BranchError::Misordered { start, end });
    }

    Ok(Plan {
        filtered,
        start_index,
        end_index,
    })
}

/// Effective end when the spec leaves it open: the catalogue's latest
/// release for release branches, else whichever of latest release/snapshot
/// is newer among those still present after filtering.
fn derive_latest(
    manifest: &VersionManifest,
    spec: &BranchSpec,
    filtered: &[VersionInfo],
) -> Result<VersionId, BranchError> {
    let latest = manifest.latest.as_ref().ok_or(BranchError::Underspecified)?;

    if spec.branch_type == BranchType::Release {
        return Ok(latest.release.clone());
    }

    let release = filtered.iter().find(|v| v.id == latest.release);
    let snapshot = filtered.iter().find(|v| v.id == latest.snapshot);
    match (release, snapshot) {
        (Some(r), Some(s)) => Ok(if s.release_time > r.release_time {
            s.id.clone()
        } else {
            r.id.clone()
        }),
        (Some(r), None) => Ok(r.id.clone()),
        (None, Some(s)) => Ok(s.id.clone()),
        (None, None) => Err(BranchError::Underspecified),
    }
}

fn locate(
    manifest: &VersionManifest,
    filtered: &[VersionInfo],
    id: &VersionId,
) -> Result<usize, BranchError> {
    match filtered.iter().position(|v| &v.id == id) {
        Some(index) => Ok(index),
        None if manifest.contains(id) => Err(BranchError::PolicyExcluded(id.clone())),
        None => Err(BranchError::UnknownVersion(id.clone())),
    }
}
