//! Snowblower - a git history of decompiled game versions
//!
//! This crate builds a version-control repository whose commits are
//! successive fully-decompiled snapshots of the upstream client/server
//! pair: each published version is resolved, downloaded, merged, remapped
//! from obfuscated names, decompiled, and committed on a branch, so the
//! log exposes inter-version source diffs.

pub mod acquire;
pub mod branch;
pub mod decompile;
pub mod fingerprint;
pub mod manifest;
pub mod mappings;
pub mod merge;
pub mod pipeline;
pub mod plan;
pub mod repo;
pub mod sync;
pub mod tools;

pub use acquire::{download_file, Acquirer, AcquireError, ACQUIRE_DEADLINE};
pub use branch::{BranchConfig, BranchError, BranchSpec, BranchType, Plan};
pub use decompile::{decompiled_jar, DecompileError, DECOMP_JAR_FILENAME};
pub use fingerprint::{sha1_bytes, sha1_file, CacheKey, DependencyHashes, FingerprintError};
pub use manifest::{
    Latest, ManifestError, UnobfuscatedVariants, VersionDetail, VersionId, VersionInfo,
    VersionKind, VersionManifest, DEFAULT_MANIFEST_URL,
};
pub use mappings::{
    is_superset, merged_mappings, MappingError, MappingFile, MAPPINGS_FILENAME,
};
pub use merge::{joined_remapped_jar, MergeError, JOINED_JAR_FILENAME};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, PipelineResult};
pub use plan::{classify, RestartReason, Resume};
pub use repo::{
    PushOutcome, RepoDriver, RepoError, COMMITTER_EMAIL, COMMITTER_NAME, COMMIT_BATCH_SIZE,
    METADATA_FILENAME, SCHEMA_VERSION,
};
pub use sync::{sync_version, EntryFilters, SyncError, SyncOutcome};
pub use tools::{Tool, ToolError, ToolSet};
