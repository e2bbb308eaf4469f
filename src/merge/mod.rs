//! Merge-remap engine
//!
//! Produces one remapped `joined.jar` from the client and server archives.
//! Obfuscated versions are first merged by the merge tool, which annotates
//! every class member with its dist side (CLIENT, SERVER, BOTH), then
//! remapped; unobfuscated versions feed both jars straight to the remap
//! driver.
//!
//! Remap driver contract (installertools `process-jar` task):
//! `--input <jar>` (repeatable), `--output <jar>`, `--no-mod-manifest`,
//! optional `--input-mappings <tsrg>`, optional `--no-dist-annotations`
//! when the merge tool already injected them.

mod bundler;

pub use bundler::{extracted_server_jar, is_bundled, EXTRACTED_SERVER_FILENAME};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::acquire::{self, AcquireError};
use crate::fingerprint::{CacheKey, DependencyHashes, FingerprintError};
use crate::manifest::{VersionDetail, DOWNLOAD_CLIENT, DOWNLOAD_SERVER};
use crate::mappings::MappingError;
use crate::tools::{Tool, ToolError, ToolSet};

pub const JOINED_JAR_FILENAME: &str = "joined.jar";
pub const JOINED_JAR_CACHE_FILENAME: &str = "joined.jar.cache";
const JOINED_OBF_FILENAME: &str = "joined-obf.jar";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("version \"{version}\" has no \"{kind}\" download entry")]
    MissingDownload { version: String, kind: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn manifest_sha(detail: &VersionDetail, kind: &str) -> Result<String, MergeError> {
    detail
        .download(kind)
        .map(|d| d.sha1.clone())
        .ok_or_else(|| MergeError::MissingDownload {
            version: detail.id.to_string(),
            kind: kind.to_string(),
        })
}

fn stage_key(
    detail: &VersionDetail,
    mappings: Option<&Path>,
    deps: &DependencyHashes,
) -> Result<CacheKey, MergeError> {
    let mut key = CacheKey::new().put_dependency(Tool::Installertools.name(), deps)?;
    if let Some(map) = mappings {
        if map.is_file() {
            key = key.put_file("map", map);
        }
    }
    key = key
        .put_hash("client", &manifest_sha(detail, DOWNLOAD_CLIENT)?)
        .put_hash("server-full", &manifest_sha(detail, DOWNLOAD_SERVER)?);
    if !detail.is_unobfuscated() {
        key = key.put_dependency(Tool::Mergetool.name(), deps)?;
    }
    Ok(key)
}

/// Whether the joined jar can be reused after its inputs were discarded.
///
/// The `server` label records the extracted server jar, which partial-cache
/// mode deletes; validation skips it and relies on the manifest hashes.
pub fn in_partial_cache(
    version_cache: &Path,
    detail: &VersionDetail,
    deps: &DependencyHashes,
) -> Result<bool, MergeError> {
    if !version_cache.join(JOINED_JAR_FILENAME).is_file() {
        return Ok(false);
    }
    let mappings = version_cache.join(crate::mappings::MAPPINGS_FILENAME);
    let key = stage_key(detail, Some(&mappings), deps)?;
    Ok(key.is_valid_filtered(&version_cache.join(JOINED_JAR_CACHE_FILENAME), |l| {
        l != "server"
    })?)
}

/// Produce the remapped joined jar for a version.
///
/// `mappings` is `None` for unobfuscated versions. In partial-cache mode
/// the client/server/extracted archives are deleted once the joined jar is
/// safely fingerprinted.
pub fn joined_remapped_jar(
    version_cache: &Path,
    detail: &VersionDetail,
    mappings: Option<&Path>,
    deps: &DependencyHashes,
    tools: &ToolSet,
    partial_cache: bool,
) -> Result<PathBuf, MergeError> {
    let joined = version_cache.join(JOINED_JAR_FILENAME);

    if partial_cache && in_partial_cache(version_cache, detail, deps)? {
        debug!(version = %detail.id, "joined jar partial cache hit");
        return Ok(joined);
    }

    let key_file = version_cache.join(JOINED_JAR_CACHE_FILENAME);

    let client_jar = acquire::ensure_jar(version_cache, detail, DOWNLOAD_CLIENT)?;
    let server_full_jar = acquire::ensure_jar(version_cache, detail, DOWNLOAD_SERVER)?;
    let server_jar = extracted_server_jar(
        version_cache,
        detail,
        &server_full_jar,
        mappings,
        deps,
        tools,
    )?;

    let key = stage_key(detail, mappings, deps)?.put_file("server", &server_jar);

    if !joined.is_file() || !key.is_valid(&key_file)? {
        debug!(version = %detail.id, "merging client and server jars and remapping");
        run_merge_remap(
            version_cache,
            detail,
            &client_jar,
            &server_jar,
            &joined,
            mappings,
            tools,
        )?;
        key.write(&key_file)?;
    }

    if partial_cache {
        fs::remove_file(&client_jar)?;
        fs::remove_file(&server_full_jar)?;
        if server_jar != server_full_jar {
            fs::remove_file(&server_jar)?;
        }
    }

    Ok(joined)
}

fn run_merge_remap(
    version_cache: &Path,
    detail: &VersionDetail,
    client_jar: &Path,
    server_jar: &Path,
    joined: &Path,
    mappings: Option<&Path>,
    tools: &ToolSet,
) -> Result<(), MergeError> {
    let joined_obf = version_cache.join(JOINED_OBF_FILENAME);

    let result = (|| {
        let mut args = vec!["--task".to_string(), "process-jar".to_string()];

        if detail.is_unobfuscated() {
            args.extend([
                "--input".to_string(),
                client_jar.display().to_string(),
                "--input".to_string(),
                server_jar.display().to_string(),
            ]);
        } else {
            // The merge tool annotates dist sides on class members, which
            // older versions rely on; the remap driver alone only covers
            // whole classes.
            tools.run(
                Tool::Mergetool,
                &[
                    "--client".to_string(),
                    client_jar.display().to_string(),
                    "--server".to_string(),
                    server_jar.display().to_string(),
                    "--output".to_string(),
                    joined_obf.display().to_string(),
                    "--annotate".to_string(),
                    "--keep-data".to_string(),
                    "--skip-meta".to_string(),
                ],
            )?;

            args.extend([
                "--input".to_string(),
                joined_obf.display().to_string(),
                "--no-dist-annotations".to_string(),
            ]);
        }

        args.extend([
            "--output".to_string(),
            joined.display().to_string(),
            "--no-mod-manifest".to_string(),
        ]);
        if let Some(map) = mappings {
            args.extend(["--input-mappings".to_string(), map.display().to_string()]);
        }

        tools.run(Tool::Installertools, &args)?;
        Ok(())
    })();

    // The obfuscated intermediate goes away on success and on failure
    let _ = fs::remove_file(&joined_obf);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn detail(id: &str, unobfuscated: bool) -> VersionDetail {
        VersionDetail::parse(&format!(
            r#"{{"id": "{id}", "type": "release",
                 "releaseTime": "2021-06-08T11:00:40+00:00",
                 "unobfuscated": {unobfuscated},
                 "downloads": {{
                     "client": {{"url": "u", "sha1": "aa", "size": 1}},
                     "server": {{"url": "u", "sha1": "bb", "size": 1}}
                 }}}}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_stage_key_includes_merger_only_when_obfuscated() {
        let dir = TempDir::new().unwrap();
        let deps = DependencyHashes::embedded();

        let obf = stage_key(&detail("1.17", false), None, &deps)
            .unwrap()
            .serialize()
            .unwrap();
        assert!(obf.contains("mergetool="));

        let unobf = stage_key(&detail("1.22", true), None, &deps)
            .unwrap()
            .serialize()
            .unwrap();
        assert!(!unobf.contains("mergetool="));
        assert!(unobf.contains("installertools="));
    }

    #[test]
    fn test_partial_cache_requires_joined_jar() {
        let dir = TempDir::new().unwrap();
        let deps = DependencyHashes::embedded();
        assert!(!in_partial_cache(dir.path(), &detail("1.17", false), &deps).unwrap());
    }

    #[test]
    fn test_partial_cache_hit_ignores_deleted_server() {
        let dir = TempDir::new().unwrap();
        let deps = DependencyHashes::embedded();
        let detail = detail("1.17", false);

        fs::write(dir.path().join(JOINED_JAR_FILENAME), b"joined").unwrap();
        // Fingerprint as written at produce time, extracted server included
        let extracted = dir.path().join(EXTRACTED_SERVER_FILENAME);
        fs::write(&extracted, b"server bytes").unwrap();
        let key = stage_key(&detail, None, &deps)
            .unwrap()
            .put_file("server", &extracted);
        key.write(&dir.path().join(JOINED_JAR_CACHE_FILENAME)).unwrap();

        // Partial cache deleted the extracted jar; the hit must survive
        fs::remove_file(&extracted).unwrap();
        assert!(in_partial_cache(dir.path(), &detail, &deps).unwrap());
    }
}
