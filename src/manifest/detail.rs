//! Per-version detail records (the `version.json` shape)

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::version::VersionId;

/// Download keys every obfuscated version carries
pub const DOWNLOAD_CLIENT: &str = "client";
pub const DOWNLOAD_SERVER: &str = "server";
pub const DOWNLOAD_CLIENT_MAPPINGS: &str = "client_mappings";
pub const DOWNLOAD_SERVER_MAPPINGS: &str = "server_mappings";

/// A single download descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Download {
    pub url: String,
    pub sha1: String,
    #[serde(default)]
    pub size: u64,
    /// Cache-relative path, present on library artifacts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Library downloads, keyed sub-records of a library entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryDownloads {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Download>,
}

/// A library dependency of a version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads: Option<LibraryDownloads>,
}

/// The per-version JSON record: download descriptors, libraries, and the
/// unobfuscated flag carried by synthetic variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDetail {
    pub id: VersionId,
    #[serde(rename = "type")]
    pub release_type: String,
    #[serde(rename = "releaseTime")]
    pub release_time: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub downloads: HashMap<String, Download>,
    #[serde(default)]
    pub libraries: Vec<Library>,
    #[serde(default)]
    unobfuscated: bool,
}

impl VersionDetail {
    pub fn load(path: &Path) -> Result<Self, DetailError> {
        let file = fs::File::open(path).map_err(|source| DetailError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_reader(io::BufReader::new(file)).map_err(|source| DetailError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Whether this version ships with readable identifiers and therefore
    /// needs no mappings pipeline.
    pub fn is_unobfuscated(&self) -> bool {
        self.unobfuscated || self.id.is_unobfuscated_variant()
    }

    pub fn download(&self, kind: &str) -> Option<&Download> {
        self.downloads.get(kind)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetailError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: io::Error,
    },

    #[error("malformed version detail {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}
