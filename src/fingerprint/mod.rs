//! Content-addressed fingerprints for pipeline stages
//!
//! Every expensive stage (mapping merge, jar merge/remap, decompile) writes
//! a sibling `*.cache` file describing the inputs that produced its output.
//! On the next run the stage recomputes the key from its current inputs and
//! short-circuits when the stored key still matches.

mod deps;

pub use deps::DependencyHashes;

use std::cell::OnceCell;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use thiserror::Error;

/// Errors from fingerprint computation and persistence
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("no declared hash for dependency \"{0}\"")]
    UnknownDependency(String),
}

/// A single fingerprint value.
///
/// Path values are hashed lazily and at most once per key; literal tokens
/// and pre-computed hashes are carried verbatim.
#[derive(Debug)]
enum CacheValue {
    /// A 40-char lowercase hex SHA-1, already known (e.g. from a manifest)
    Hash(String),
    /// An opaque literal token (argument strings, schema tags)
    Literal(String),
    /// A file whose bytes are hashed on first resolution
    File(PathBuf, OnceCell<String>),
}

impl CacheValue {
    fn resolve(&self) -> Result<&str, FingerprintError> {
        match self {
            CacheValue::Hash(h) => Ok(h),
            CacheValue::Literal(s) => Ok(s),
            CacheValue::File(path, cell) => {
                if let Some(hash) = cell.get() {
                    return Ok(hash);
                }
                let hash = sha1_file(path)?;
                Ok(cell.get_or_init(|| hash))
            }
        }
    }
}

/// An insertion-ordered fingerprint key.
///
/// Serializes to a line-oriented `label=value` form with `#` comment lines,
/// the same format used by the branch metadata file committed at the root
/// of every generated repository.
#[derive(Debug, Default)]
pub struct CacheKey {
    comments: Vec<String>,
    entries: Vec<(String, CacheValue)>,
}

impl CacheKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend comment lines to the serialized form
    pub fn comment(mut self, lines: &[&str]) -> Self {
        self.comments = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Record a pre-computed 40-char hex hash
    pub fn put_hash(self, label: &str, hash: &str) -> Self {
        self.put(label, CacheValue::Hash(hash.to_ascii_lowercase()))
    }

    /// Record a literal token
    pub fn put_literal(self, label: &str, value: &str) -> Self {
        self.put(label, CacheValue::Literal(value.to_string()))
    }

    /// Record a file whose content hash is computed lazily
    pub fn put_file(self, label: &str, path: &Path) -> Self {
        self.put(label, CacheValue::File(path.to_path_buf(), OnceCell::new()))
    }

    /// Record a bundled tool by its declared hash
    pub fn put_dependency(
        self,
        name: &str,
        deps: &DependencyHashes,
    ) -> Result<Self, FingerprintError> {
        let hash = deps
            .get(name)
            .ok_or_else(|| FingerprintError::UnknownDependency(name.to_string()))?;
        Ok(self.put(name, CacheValue::Hash(hash.to_string())))
    }

    fn put(mut self, label: &str, value: CacheValue) -> Self {
        // Labels are unique; a re-put overwrites in place
        if let Some(entry) = self.entries.iter_mut().find(|(l, _)| l == label) {
            entry.1 = value;
        } else {
            self.entries.push((label.to_string(), value));
        }
        self
    }

    /// Resolve every value to its final string form, hashing files as needed
    fn resolve(&self) -> Result<Vec<(&str, &str)>, FingerprintError> {
        let mut out = Vec::with_capacity(self.entries.len());
        for (label, value) in &self.entries {
            out.push((label.as_str(), value.resolve()?));
        }
        Ok(out)
    }

    /// Check the stored fingerprint at `stored` against the current key.
    ///
    /// Every label present in both the stored file and the current key must
    /// match. A missing or unparsable stored file invalidates the cache.
    pub fn is_valid(&self, stored: &Path) -> Result<bool, FingerprintError> {
        self.is_valid_filtered(stored, |_| true)
    }

    /// Like [`CacheKey::is_valid`], restricted to labels accepted by `filter`
    pub fn is_valid_filtered(
        &self,
        stored: &Path,
        filter: impl Fn(&str) -> bool,
    ) -> Result<bool, FingerprintError> {
        let content = match fs::read_to_string(stored) {
            Ok(c) => c,
            Err(_) => return Ok(false),
        };
        let old = match parse_stored(&content) {
            Some(entries) => entries,
            None => return Ok(false),
        };

        for (label, current) in self.resolve()? {
            if !filter(label) {
                continue;
            }
            match old.iter().find(|(l, _)| l == label) {
                Some((_, stored_value)) if stored_value == current => {}
                Some(_) => return Ok(false),
                None => continue,
            }
        }
        Ok(true)
    }

    /// Serialize to the line-oriented text form
    pub fn serialize(&self) -> Result<String, FingerprintError> {
        let mut out = String::new();
        for comment in &self.comments {
            out.push_str("# ");
            out.push_str(comment);
            out.push('\n');
        }
        for (label, value) in self.resolve()? {
            out.push_str(label);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        Ok(out)
    }

    /// Write the serialized key atomically.
    ///
    /// A fingerprint must only appear on disk after its artifact is fully
    /// materialized; callers write the artifact first, then this.
    pub fn write(&self, path: &Path) -> Result<(), FingerprintError> {
        let content = self.serialize()?;
        let tmp = path.with_extension("cache.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Validate an already-written file against this key without rehashing
    /// context: used for the branch metadata file, which is its own artifact.
    pub fn matches_file(&self, path: &Path) -> Result<bool, FingerprintError> {
        self.is_valid(path)
    }
}

/// Parse a stored fingerprint file into label/value pairs.
///
/// Returns `None` on any malformed non-comment line.
fn parse_stored(content: &str) -> Option<Vec<(String, String)>> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (label, value) = line.split_once('=')?;
        entries.push((label.trim().to_string(), value.trim().to_string()));
    }
    Some(entries)
}

/// SHA-1 of a file's bytes as lowercase hex
pub fn sha1_file(path: &Path) -> Result<String, io::Error> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-1 of an in-memory byte slice as lowercase hex
pub fn sha1_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}
