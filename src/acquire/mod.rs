//! Artifact acquisition
//!
//! Concurrent per-version downloader for version details, side mappings,
//! library jars, and (outside partial-cache mode) the client/server
//! archives. Downloads are validated against the manifest's SHA-1 and
//! written atomically via a temp file, so a killed run never leaves a
//! plausible-looking partial artifact behind.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, info};

use crate::fingerprint::CacheKey;
use crate::manifest::{
    DetailError, VersionDetail, VersionInfo, DOWNLOAD_CLIENT, DOWNLOAD_SERVER,
};

/// The whole acquisition phase must finish within this window
pub const ACQUIRE_DEADLINE: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("failed to download {url}: {message}")]
    Http { url: String, message: String },

    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("version \"{version}\" has no \"{kind}\" download entry")]
    MissingDownload { version: String, kind: String },

    #[error(
        "library path escapes the cache (possible traversal) for version \"{version}\": {path}"
    )]
    PathTraversal { version: String, path: String },

    #[error("failed to download all artifacts within {} seconds", ACQUIRE_DEADLINE.as_secs())]
    Timeout,

    #[error(transparent)]
    Detail(#[from] DetailError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Download `url` to `dest`, verifying against `expected_sha1` when given.
///
/// Streams through a temp file in the destination directory and renames
/// into place only after the hash checks out.
pub fn download_file(
    url: &str,
    dest: &Path,
    expected_sha1: Option<&str>,
) -> Result<(), AcquireError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    debug!(url, dest = %dest.display(), "downloading");
    let response = ureq::get(url).call().map_err(|e| AcquireError::Http {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let tmp = dest.with_extension("part");
    let result = (|| {
        let mut reader = response.into_reader();
        let mut out = fs::File::create(&tmp)?;
        let mut hasher = Sha1::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).map_err(|e| AcquireError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n])?;
        }
        out.flush()?;
        drop(out);

        if let Some(expected) = expected_sha1 {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(AcquireError::HashMismatch {
                    path: dest.display().to_string(),
                    expected: expected.to_ascii_lowercase(),
                    actual,
                });
            }
        }

        fs::rename(&tmp, dest)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Ensure `version.json` for `info` is present in `version_cache` and
/// matches the catalogue hash; re-fetch on mismatch. Synthetic variants
/// are materialized from their embedded detail.
pub fn ensure_version_json(version_cache: &Path, info: &VersionInfo) -> Result<PathBuf, AcquireError> {
    fs::create_dir_all(version_cache)?;
    let json = version_cache.join("version.json");

    let current = if json.is_file() {
        Some(crate::fingerprint::sha1_file(&json)?)
    } else {
        None
    };
    if current.as_deref().is_some_and(|h| h.eq_ignore_ascii_case(&info.sha1)) {
        return Ok(json);
    }

    match info.embedded {
        Some(content) => fs::write(&json, content)?,
        None => download_file(&info.url, &json, Some(&info.sha1))?,
    }
    Ok(json)
}

/// Ensure a client or server jar is present and fingerprint-valid.
///
/// The manifest hash is trusted over a recomputed one: upstream has
/// silently replaced artifacts before, and the string is cheaper than
/// rehashing a few hundred megabytes.
pub fn ensure_jar(
    version_cache: &Path,
    detail: &VersionDetail,
    kind: &str,
) -> Result<PathBuf, AcquireError> {
    let jar = version_cache.join(format!("{kind}.jar"));
    let key_file = version_cache.join(format!("{kind}.jar.cache"));
    let dl = detail
        .download(kind)
        .ok_or_else(|| AcquireError::MissingDownload {
            version: detail.id.to_string(),
            kind: kind.to_string(),
        })?;

    let key = CacheKey::new().put_hash(kind, &dl.sha1);
    if !jar.is_file() || !key.is_valid(&key_file).unwrap_or(false) {
        download_file(&dl.url, &jar, Some(&dl.sha1))?;
        key.write(&key_file)
            .map_err(|e| AcquireError::Io(io::Error::other(e.to_string())))?;
    }
    Ok(jar)
}

/// Shared state and settings for the acquisition phase.
///
/// Cloning is cheap and shares the in-progress set, which is how the
/// worker pool hands each thread a handle.
#[derive(Clone)]
pub struct Acquirer {
    cache: PathBuf,
    lib_cache: PathBuf,
    extra_mappings: Option<PathBuf>,
    partial_cache: bool,
    /// Library paths currently being written, to elide duplicate work
    /// across workers racing on a shared library.
    libs_in_progress: Arc<Mutex<HashSet<String>>>,
}

impl Acquirer {
    pub fn new(
        cache: &Path,
        lib_cache: &Path,
        extra_mappings: Option<&Path>,
        partial_cache: bool,
    ) -> Self {
        Self {
            cache: cache.to_path_buf(),
            lib_cache: lib_cache.to_path_buf(),
            extra_mappings: extra_mappings.map(Path::to_path_buf),
            partial_cache,
            libs_in_progress: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Download every planned version's artifact set with a bounded worker
    /// pool. Fails on the first worker error or when the deadline passes.
    pub fn acquire_all(&self, versions: &[VersionInfo]) -> Result<(), AcquireError> {
        if versions.is_empty() {
            return Ok(());
        }
        info!(count = versions.len(), "discovering and downloading artifacts");

        let queue: Arc<Mutex<VecDeque<VersionInfo>>> =
            Arc::new(Mutex::new(versions.iter().cloned().collect()));
        let (tx, rx) = mpsc::channel::<Result<(), AcquireError>>();

        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(versions.len());

        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let acquirer = self.clone();
            thread::spawn(move || loop {
                let next = queue.lock().expect("queue poisoned").pop_front();
                let Some(version) = next else { break };
                let result = acquirer.acquire_version(&version);
                if tx.send(result).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        let deadline = Instant::now() + ACQUIRE_DEADLINE;
        for _ in 0..versions.len() {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(AcquireError::Timeout)?;
            match rx.recv_timeout(remaining) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(AcquireError::Timeout),
            }
        }
        Ok(())
    }

    fn acquire_version(&self, info: &VersionInfo) -> Result<(), AcquireError> {
        let version_cache = self.cache.join(info.id.as_str());
        let detail = VersionDetail::load(&version_cache.join("version.json"))?;

        self.ensure_mappings(&version_cache, &detail, "client")?;
        self.ensure_mappings(&version_cache, &detail, "server")?;

        // With the partial cache on, the joined jar may already make the
        // client/server downloads unnecessary; they are fetched lazily then.
        if !self.partial_cache {
            ensure_jar(&version_cache, &detail, DOWNLOAD_CLIENT)?;
            ensure_jar(&version_cache, &detail, DOWNLOAD_SERVER)?;
        }

        self.ensure_libraries(&detail)?;
        Ok(())
    }

    fn ensure_mappings(
        &self,
        version_cache: &Path,
        detail: &VersionDetail,
        side: &str,
    ) -> Result<(), AcquireError> {
        let dest = version_cache.join(format!("{side}_mappings.txt"));
        if dest.is_file() {
            return Ok(());
        }

        if let Some(extra) = &self.extra_mappings {
            let candidate = extra
                .join(&detail.release_type)
                .join(detail.id.as_str())
                .join("maps")
                .join(format!("{side}.txt"));
            if candidate.is_file() {
                fs::copy(&candidate, &dest)?;
                return Ok(());
            }
        }

        if detail.is_unobfuscated() {
            return Ok(());
        }

        // Versions without upstream mappings are skipped later by the
        // mapping engine; absence here is not an error.
        if let Some(dl) = detail.download(&format!("{side}_mappings")) {
            download_file(&dl.url, &dest, Some(&dl.sha1))?;
        }
        Ok(())
    }

    fn ensure_libraries(&self, detail: &VersionDetail) -> Result<(), AcquireError> {
        for lib in &detail.libraries {
            let Some(dl) = lib.downloads.as_ref().and_then(|d| d.artifact.as_ref()) else {
                continue;
            };
            let Some(rel) = dl.path.as_deref() else {
                continue;
            };

            if rel.split(['/', '\\']).any(|seg| seg == "..") {
                return Err(AcquireError::PathTraversal {
                    version: detail.id.to_string(),
                    path: rel.to_string(),
                });
            }

            let target = self.lib_cache.join(rel);
            if target.is_file() {
                continue;
            }

            {
                let mut in_progress = self.libs_in_progress.lock().expect("lib set poisoned");
                if !in_progress.insert(rel.to_string()) {
                    // Another worker owns this library
                    continue;
                }
            }

            let result = download_file(&dl.url, &target, Some(&dl.sha1));
            self.libs_in_progress
                .lock()
                .expect("lib set poisoned")
                .remove(rel);
            result?;
        }
        Ok(())
    }
}

/// Resolve the library artifact paths of a version within the shared cache
pub fn library_paths(lib_cache: &Path, detail: &VersionDetail) -> Vec<PathBuf> {
    detail
        .libraries
        .iter()
        .filter_map(|lib| lib.downloads.as_ref()?.artifact.as_ref()?.path.as_deref())
        .map(|rel| lib_cache.join(rel))
        .collect()
}
