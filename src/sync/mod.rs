//! Working-tree synchronization
//!
//! Streams the decompiled archive into `src/main/{java,resources}`,
//! copying only entries whose content actually changed, deleting files no
//! longer produced, and reporting the add/remove sets for a minimal
//! commit. Content comparison by hash keeps decompiler non-determinism
//! from turning into gratuitous diffs.

mod enhance;

pub use enhance::enhance;

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;
use tracing::debug;

use crate::fingerprint::{sha1_bytes, sha1_file};
use crate::manifest::VersionDetail;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("bad filter pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Include/exclude globs over archive-relative paths
#[derive(Debug, Default)]
pub struct EntryFilters {
    includes: Option<GlobSet>,
    excludes: Option<GlobSet>,
}

impl EntryFilters {
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self, SyncError> {
        Ok(Self {
            includes: build_globset(includes)?,
            excludes: build_globset(excludes)?,
        })
    }

    /// Empty includes admit everything; excludes always veto
    pub fn matches(&self, path: &str) -> bool {
        if let Some(includes) = &self.includes {
            if !includes.is_match(path) {
                return false;
            }
        }
        if let Some(excludes) = &self.excludes {
            if excludes.is_match(path) {
                return false;
            }
        }
        true
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>, SyncError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(Some(builder.build()?))
}

/// The add/remove sets of one sync, repo-relative with forward slashes
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SyncOutcome {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Synchronize the working tree under `output` with the decompiled
/// archive, then apply the enhancement hook.
pub fn sync_version(
    output: &Path,
    detail: &VersionDetail,
    decompiled_jar: &Path,
    filters: &EntryFilters,
) -> Result<SyncOutcome, SyncError> {
    let src = output.join("src").join("main");
    let java = src.join("java");
    let resources = src.join("resources");

    // Everything currently on disk; whatever survives the walk is stale
    let mut existing: BTreeSet<PathBuf> = BTreeSet::new();
    if src.exists() {
        for entry in walkdir::WalkDir::new(&src) {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file() {
                existing.insert(entry.into_path());
            }
        }
    }

    let mut outcome = SyncOutcome::default();
    let rel = |path: &Path| -> String {
        path.strip_prefix(output)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    };

    let file = fs::File::open(decompiled_jar)?;
    let mut archive = zip::ZipArchive::new(io::BufReader::new(file))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if !entry.is_file() {
            continue;
        }
        let name = entry.name().trim_start_matches('/').to_string();
        if !filters.matches(&name) {
            continue;
        }

        let root = if name.ends_with(".java") { &java } else { &resources };
        let target = root.join(&name);

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;

        if existing.remove(&target) {
            if let Some(real) = case_mismatched_real_path(&target)? {
                // Same file under a differently-cased name on a
                // case-insensitive filesystem: replace it wholesale
                fs::remove_file(&real)?;
                outcome.removed.push(rel(&real));
                fs::write(&target, &bytes)?;
                outcome.added.push(rel(&target));
            } else if sha1_file(&target)? != sha1_bytes(&bytes) {
                fs::write(&target, &bytes)?;
                outcome.added.push(rel(&target));
            }
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &bytes)?;
            outcome.added.push(rel(&target));
        }
    }

    let enhanced = enhance(output, detail)?;
    for path in enhanced {
        existing.remove(&path);
        outcome.added.push(rel(&path));
    }

    // BTreeSet keeps the removal order stable
    for stale in &existing {
        debug!(path = %stale.display(), "removing stale file");
        fs::remove_file(stale)?;
        outcome.removed.push(rel(stale));
    }

    Ok(outcome)
}

/// Detect the on-disk name differing from the logical one in case only.
///
/// Returns the real path when it differs, `None` when the names agree or
/// the file is gone.
fn case_mismatched_real_path(target: &Path) -> Result<Option<PathBuf>, io::Error> {
    let Some(parent) = target.parent() else {
        return Ok(None);
    };
    let Some(file_name) = target.file_name() else {
        return Ok(None);
    };

    let canonical_parent = match parent.canonicalize() {
        Ok(p) => p,
        Err(_) => return Ok(None),
    };
    let expected = canonical_parent.join(file_name);
    let real = match target.canonicalize() {
        Ok(p) => p,
        Err(_) => return Ok(None),
    };

    if real == expected {
        Ok(None)
    } else {
        Ok(Some(real))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options: FileOptions =
            FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, bytes) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
    }

    fn detail() -> VersionDetail {
        VersionDetail::parse(
            r#"{"id": "1.17", "type": "release",
                "releaseTime": "2021-06-08T11:00:40+00:00"}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_fresh_sync_splits_java_and_resources() {
        let dir = TempDir::new().unwrap();
        let jar = dir.path().join("decompiled.jar");
        write_archive(
            &jar,
            &[
                ("net/minecraft/Foo.java", b"class Foo {}".as_slice()),
                ("assets/lang/en_us.json", b"{}".as_slice()),
            ],
        );

        let outcome =
            sync_version(dir.path(), &detail(), &jar, &EntryFilters::default()).unwrap();

        assert!(dir.path().join("src/main/java/net/minecraft/Foo.java").is_file());
        assert!(dir.path().join("src/main/resources/assets/lang/en_us.json").is_file());
        assert!(outcome.added.contains(&"src/main/java/net/minecraft/Foo.java".to_string()));
        assert!(outcome.removed.is_empty());
    }

    #[test]
    fn test_unchanged_entries_not_recorded() {
        let dir = TempDir::new().unwrap();
        let jar = dir.path().join("decompiled.jar");
        write_archive(&jar, &[("net/minecraft/Foo.java", b"class Foo {}".as_slice())]);

        sync_version(dir.path(), &detail(), &jar, &EntryFilters::default()).unwrap();
        let second =
            sync_version(dir.path(), &detail(), &jar, &EntryFilters::default()).unwrap();

        // Only the enhancement-owned files reappear in the added list
        assert!(second
            .added
            .iter()
            .all(|p| p == "build.gradle" || p == "settings.gradle"));
        assert!(second.removed.is_empty());
    }

    #[test]
    fn test_stale_files_removed() {
        let dir = TempDir::new().unwrap();
        let jar1 = dir.path().join("v1.jar");
        write_archive(
            &jar1,
            &[
                ("net/minecraft/Foo.java", b"class Foo {}".as_slice()),
                ("net/minecraft/Gone.java", b"class Gone {}".as_slice()),
            ],
        );
        sync_version(dir.path(), &detail(), &jar1, &EntryFilters::default()).unwrap();

        let jar2 = dir.path().join("v2.jar");
        write_archive(&jar2, &[("net/minecraft/Foo.java", b"class Foo {}".as_slice())]);
        let outcome =
            sync_version(dir.path(), &detail(), &jar2, &EntryFilters::default()).unwrap();

        assert!(outcome
            .removed
            .contains(&"src/main/java/net/minecraft/Gone.java".to_string()));
        assert!(!dir.path().join("src/main/java/net/minecraft/Gone.java").exists());
    }

    #[test]
    fn test_changed_entry_copied_and_recorded() {
        let dir = TempDir::new().unwrap();
        let jar1 = dir.path().join("v1.jar");
        write_archive(&jar1, &[("net/minecraft/Foo.java", b"class Foo { int a; }".as_slice())]);
        sync_version(dir.path(), &detail(), &jar1, &EntryFilters::default()).unwrap();

        let jar2 = dir.path().join("v2.jar");
        write_archive(&jar2, &[("net/minecraft/Foo.java", b"class Foo { int b; }".as_slice())]);
        let outcome =
            sync_version(dir.path(), &detail(), &jar2, &EntryFilters::default()).unwrap();

        assert!(outcome
            .added
            .contains(&"src/main/java/net/minecraft/Foo.java".to_string()));
        let content =
            fs::read_to_string(dir.path().join("src/main/java/net/minecraft/Foo.java")).unwrap();
        assert!(content.contains("int b"));
    }

    #[test]
    fn test_filters_skip_non_matching_entries() {
        let dir = TempDir::new().unwrap();
        let jar = dir.path().join("decompiled.jar");
        write_archive(
            &jar,
            &[
                ("net/minecraft/Foo.java", b"class Foo {}".as_slice()),
                ("com/mojang/Bar.java", b"class Bar {}".as_slice()),
            ],
        );

        let filters =
            EntryFilters::new(&["net/minecraft/**".to_string()], &[]).unwrap();
        sync_version(dir.path(), &detail(), &jar, &filters).unwrap();

        assert!(dir.path().join("src/main/java/net/minecraft/Foo.java").is_file());
        assert!(!dir.path().join("src/main/java/com/mojang/Bar.java").exists());
    }

    #[test]
    fn test_exclude_filter_vetoes() {
        let filters = EntryFilters::new(&[], &["assets/**".to_string()]).unwrap();
        assert!(filters.matches("net/minecraft/Foo.java"));
        assert!(!filters.matches("assets/lang/en_us.json"));
    }
}
