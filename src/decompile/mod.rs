//! Decompiler driver
//!
//! Runs the decompiler over `joined.jar` with the version's library
//! classpath. The argument list is part of the fingerprint, as is every
//! library file, labelled by its path relative to the shared library cache
//! so keys stay comparable across hosts.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::fingerprint::{CacheKey, DependencyHashes, FingerprintError};
use crate::manifest::VersionDetail;
use crate::tools::{Tool, ToolError, ToolSet};

pub const DECOMP_JAR_FILENAME: &str = "joined-decompiled.jar";
pub const DECOMP_JAR_CACHE_FILENAME: &str = "joined-decompiled.jar.cache";
const LIBRARIES_CFG_FILENAME: &str = "joined-libraries.cfg";

/// Flags applied to every version
const DECOMPILE_ARGS: &[&str] = &[
    "--decompile-inner",
    "--remove-bridge",
    "--decompile-generics",
    "--ascii-strings",
    "--remove-synthetic",
    "--include-classpath",
    "--ignore-invalid-bytecode",
    "--bytecode-source-mapping",
    "--indent-string=    ",
    "--dump-code-lines",
    // Dist annotations come from the merge stage; the decompiler plugin's
    // own injection misses interfaces without concrete methods and nested
    // classes, so it stays off.
    "--add-onlyin=0",
];

/// Extra flags for obfuscated versions: stable synthesized names instead of
/// whatever single letters survived remapping.
const DECOMPILE_ARGS_OBF: &[&str] = &[
    "--use-method-parameters=0",
    "--variable-renaming=jad",
    "--rename-parameters",
];

#[derive(Debug, Error)]
pub enum DecompileError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// The decompiler argument list for a version
pub fn decompile_args(detail: &VersionDetail) -> Vec<String> {
    let mut args: Vec<String> = DECOMPILE_ARGS.iter().map(|s| s.to_string()).collect();
    if !detail.is_unobfuscated() {
        args.extend(DECOMPILE_ARGS_OBF.iter().map(|s| s.to_string()));
    }
    args
}

fn stage_key(
    detail: &VersionDetail,
    joined: &Path,
    deps: &DependencyHashes,
) -> Result<CacheKey, DecompileError> {
    Ok(CacheKey::new()
        .put_dependency(Tool::Vineflower.name(), deps)?
        .put_dependency(Tool::VineflowerPlugins.name(), deps)?
        .put_file("joined", joined)
        .put_literal("decompileArgs", &decompile_args(detail).join(" ")))
}

/// Whether the decompiled jar for this stage alone is reusable
pub fn in_partial_cache(
    version_cache: &Path,
    detail: &VersionDetail,
    deps: &DependencyHashes,
) -> Result<bool, DecompileError> {
    let decompiled = version_cache.join(DECOMP_JAR_FILENAME);
    let joined = version_cache.join(crate::merge::JOINED_JAR_FILENAME);
    if !decompiled.is_file() || !joined.is_file() {
        return Ok(false);
    }
    let key = stage_key(detail, &joined, deps)?;
    Ok(key.is_valid(&version_cache.join(DECOMP_JAR_CACHE_FILENAME))?)
}

/// Decompile `joined` into `joined-decompiled.jar`, reusing a valid one.
pub fn decompiled_jar(
    version_cache: &Path,
    detail: &VersionDetail,
    joined: &Path,
    lib_cache: &Path,
    libs: &[PathBuf],
    deps: &DependencyHashes,
    tools: &ToolSet,
) -> Result<PathBuf, DecompileError> {
    let mut key = stage_key(detail, joined, deps)?;
    for lib in libs {
        let label = lib
            .strip_prefix(lib_cache)
            .unwrap_or(lib)
            .to_string_lossy()
            .replace('\\', "/");
        key = key.put_file(&label, lib);
    }

    let out = version_cache.join(DECOMP_JAR_FILENAME);
    let key_file = version_cache.join(DECOMP_JAR_CACHE_FILENAME);

    if !out.is_file() || !key.is_valid(&key_file)? {
        debug!(version = %detail.id, "decompiling joined.jar");

        let cfg = version_cache.join(LIBRARIES_CFG_FILENAME);
        write_classpath_cfg(&cfg, libs)?;

        let mut args = decompile_args(detail);
        args.extend([
            "-log=ERROR".to_string(),
            "-cfg".to_string(),
            cfg.display().to_string(),
            joined.display().to_string(),
            out.display().to_string(),
        ]);
        tools.run(Tool::Vineflower, &args)?;

        key.write(&key_file)?;
    }
    Ok(out)
}

/// One `-e=<path>` line per library
fn write_classpath_cfg(path: &Path, libs: &[PathBuf]) -> Result<(), io::Error> {
    let mut out = fs::File::create(path)?;
    for lib in libs {
        writeln!(out, "-e={}", lib.display())?;
    }
    Ok(())
}
