//! Mapping engine
//!
//! Merges the client and server side mappings into the canonical
//! deobf → obf table consumed by the remap stage, after verifying the
//! client is a strict superset of the server. Versions that are obfuscated
//! but missing a side mapping are skipped, not failed.

mod file;
mod proguard;

pub use file::{is_superset, ClassMapping, MappingFile, MemberMapping};
pub use proguard::{parse as parse_proguard, ProguardError};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::fingerprint::{CacheKey, FingerprintError};
use crate::manifest::{VersionDetail, DOWNLOAD_CLIENT_MAPPINGS, DOWNLOAD_SERVER_MAPPINGS};

pub const MAPPINGS_FILENAME: &str = "moj_to_obf.tsrg";
pub const MAPPINGS_CACHE_FILENAME: &str = "moj_to_obf.tsrg.cache";

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("client mappings for {0} are not a strict superset of the server mappings")]
    Mismatch(String),

    #[error("malformed {side} mappings for {version}: {source}")]
    Parse {
        version: String,
        side: &'static str,
        source: ProguardError,
    },

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn stage_key(version_cache: &Path, detail: &VersionDetail) -> CacheKey {
    let client = version_cache.join("client_mappings.txt");
    let server = version_cache.join("server_mappings.txt");

    let mut key = CacheKey::new();
    if client.is_file() {
        key = key.put_file("client", &client);
    }
    if server.is_file() {
        key = key.put_file("server", &server);
    }
    if let Some(dl) = detail.download(DOWNLOAD_CLIENT_MAPPINGS) {
        key = key.put_hash("client-mappings", &dl.sha1);
    }
    if let Some(dl) = detail.download(DOWNLOAD_SERVER_MAPPINGS) {
        key = key.put_hash("server-mappings", &dl.sha1);
    }
    key
}

/// Whether the merged mapping output can be reused without its inputs
pub fn in_partial_cache(
    version_cache: &Path,
    detail: &VersionDetail,
) -> Result<bool, MappingError> {
    let merged = version_cache.join(MAPPINGS_FILENAME);
    if !merged.is_file() {
        // Unobfuscated versions never produce one, so nothing is missing
        return Ok(detail.is_unobfuscated());
    }
    let key = stage_key(version_cache, detail);
    Ok(key.is_valid(&version_cache.join(MAPPINGS_CACHE_FILENAME))?)
}

/// Produce the merged deobf → obf mapping file for a version.
///
/// Returns `None` to signal "skip this version" when it is obfuscated and
/// one or both side mappings are absent, and also for unobfuscated
/// versions with no mappings at all.
pub fn merged_mappings(
    version_cache: &Path,
    detail: &VersionDetail,
) -> Result<Option<PathBuf>, MappingError> {
    let unobfuscated = detail.is_unobfuscated();

    let client = load_side(version_cache, detail, "client")?;
    if !unobfuscated && client.is_none() {
        debug!(version = %detail.id, "client mappings not found, skipping version");
        return Ok(None);
    }

    let server = load_side(version_cache, detail, "server")?;
    if !unobfuscated && server.is_none() {
        debug!(version = %detail.id, "server mappings not found, skipping version");
        return Ok(None);
    }

    let (client, server) = match (client, server) {
        (None, None) => return Ok(None),
        pair => pair,
    };

    if let (Some(c), Some(s)) = (&client, &server) {
        if !is_superset(c, s) {
            return Err(MappingError::Mismatch(detail.id.to_string()));
        }
    }

    let key = stage_key(version_cache, detail);
    let key_file = version_cache.join(MAPPINGS_CACHE_FILENAME);
    let merged = version_cache.join(MAPPINGS_FILENAME);

    if !merged.is_file() || !key.is_valid(&key_file)? {
        // The client covers the joined jar; fall back to the server side
        // only when the client is absent (server-only special cases).
        let to_write = client.or(server).expect("one side present");
        fs::write(&merged, to_write.to_tsrg2())?;
        key.write(&key_file)?;
    }

    Ok(Some(merged))
}

/// Load the canonical deobf → obf mapping of one side, if its file exists
fn load_side(
    version_cache: &Path,
    detail: &VersionDetail,
    side: &'static str,
) -> Result<Option<MappingFile>, MappingError> {
    let path = version_cache.join(format!("{side}_mappings.txt"));
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path)?;
    let parsed = parse_proguard(&text).map_err(|source| MappingError::Parse {
        version: detail.id.to_string(),
        side,
        source,
    })?;
    Ok(Some(parsed.reverse()))
}

/// Load the merged mapping back from disk (bundler extraction needs the
/// obfuscated class-name set for non-bundled servers).
pub fn load_merged(path: &Path) -> Result<MappingFile, MappingError> {
    let text = fs::read_to_string(path)?;
    let mut file = MappingFile::default();
    let mut current: Option<ClassMapping> = None;

    for line in text.lines().skip(1) {
        if line.is_empty() {
            continue;
        }
        if let Some(member) = line.strip_prefix('\t') {
            let parts: Vec<&str> = member.split(' ').collect();
            if let Some(class) = current.as_mut() {
                match parts.as_slice() {
                    [name, mapped] => class.fields.push(MemberMapping {
                        original: name.to_string(),
                        descriptor: String::new(),
                        mapped: mapped.to_string(),
                        mapped_descriptor: String::new(),
                    }),
                    [name, desc, mapped] => class.methods.push(MemberMapping {
                        original: name.to_string(),
                        descriptor: desc.to_string(),
                        mapped: mapped.to_string(),
                        mapped_descriptor: String::new(),
                    }),
                    _ => {}
                }
            }
        } else if let Some((original, mapped)) = line.split_once(' ') {
            if let Some(done) = current.take() {
                file.insert(done);
            }
            current = Some(ClassMapping {
                original: original.to_string(),
                mapped: mapped.to_string(),
                fields: Vec::new(),
                methods: Vec::new(),
            });
        }
    }
    if let Some(done) = current.take() {
        file.insert(done);
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CLIENT: &str = "\
com.mojang.Foo -> a:
    void tick() -> a
    void render(float) -> b
com.mojang.ClientOnly -> b:
    void draw() -> a
";

    const SERVER: &str = "\
com.mojang.Foo -> a:
    void tick() -> a
";

    const SERVER_EXTRA: &str = "\
com.mojang.Foo -> a:
    void tick() -> a
    void serverOnly() -> z
";

    fn detail(id: &str) -> VersionDetail {
        VersionDetail::parse(&format!(
            r#"{{"id": "{id}", "type": "release",
                 "releaseTime": "2021-06-08T11:00:40+00:00",
                 "downloads": {{
                     "client_mappings": {{"url": "u", "sha1": "aa", "size": 1}},
                     "server_mappings": {{"url": "u", "sha1": "bb", "size": 1}}
                 }}}}"#
        ))
        .unwrap()
    }

    fn write_sides(dir: &Path, client: Option<&str>, server: Option<&str>) {
        if let Some(c) = client {
            fs::write(dir.join("client_mappings.txt"), c).unwrap();
        }
        if let Some(s) = server {
            fs::write(dir.join("server_mappings.txt"), s).unwrap();
        }
    }

    #[test]
    fn test_merged_mappings_written_and_cached() {
        let dir = TempDir::new().unwrap();
        write_sides(dir.path(), Some(CLIENT), Some(SERVER));

        let out = merged_mappings(dir.path(), &detail("1.17")).unwrap().unwrap();
        assert!(out.is_file());
        assert!(dir.path().join(MAPPINGS_CACHE_FILENAME).is_file());

        let text = fs::read_to_string(&out).unwrap();
        assert!(text.starts_with("tsrg2"));
        // The client side covers the joined jar
        assert!(text.contains("com/mojang/ClientOnly b"));

        assert!(in_partial_cache(dir.path(), &detail("1.17")).unwrap());
    }

    #[test]
    fn test_missing_side_skips_version() {
        let dir = TempDir::new().unwrap();
        write_sides(dir.path(), Some(CLIENT), None);
        assert!(merged_mappings(dir.path(), &detail("1.17"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_superset_violation_is_error() {
        let dir = TempDir::new().unwrap();
        write_sides(dir.path(), Some(CLIENT), Some(SERVER_EXTRA));
        let err = merged_mappings(dir.path(), &detail("1.17")).unwrap_err();
        assert!(matches!(err, MappingError::Mismatch(_)));
    }

    #[test]
    fn test_unobfuscated_without_mappings_skips_quietly() {
        let dir = TempDir::new().unwrap();
        let detail = VersionDetail::parse(
            r#"{"id": "1.22", "type": "release",
                "releaseTime": "2026-01-01T00:00:00+00:00", "unobfuscated": true}"#,
        )
        .unwrap();
        assert!(merged_mappings(dir.path(), &detail).unwrap().is_none());
        assert!(in_partial_cache(dir.path(), &detail).unwrap());
    }

    #[test]
    fn test_load_merged_round_trip() {
        let dir = TempDir::new().unwrap();
        write_sides(dir.path(), Some(CLIENT), Some(SERVER));
        let out = merged_mappings(dir.path(), &detail("1.17")).unwrap().unwrap();

        let loaded = load_merged(&out).unwrap();
        assert!(loaded.mapped_class_names().contains("a"));
        assert!(loaded.class("com/mojang/Foo").is_some());
    }
}
