//! Pipeline orchestration
//!
//! Drives the full run: resolve the catalogue, apply branch policy,
//! validate or create the branch metadata, classify the resume point,
//! acquire artifacts, then generate one version at a time — mappings,
//! merge/remap, decompile, working-tree sync, commit — pushing every few
//! commits. Versions are strictly sequential; commit order is the product.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, info_span, warn};

use crate::acquire::{self, Acquirer, AcquireError};
use crate::branch::{self, BranchConfig, BranchError, BranchSpec};
use crate::decompile::{self, DecompileError};
use crate::fingerprint::{DependencyHashes, FingerprintError};
use crate::manifest::{
    DetailError, ManifestError, UnobfuscatedVariants, VersionDetail, VersionId, VersionInfo,
    VersionManifest, DOWNLOAD_CLIENT_MAPPINGS, DOWNLOAD_SERVER_MAPPINGS,
};
use crate::mappings::{self, MappingError};
use crate::merge::{self, MergeError};
use crate::plan::{self, RestartReason, Resume};
use crate::repo::{RepoDriver, RepoError, COMMIT_BATCH_SIZE};
use crate::sync::{self, EntryFilters, SyncError};
use crate::tools::{ToolError, ToolSet};

/// Pipeline errors, each mapped to a process exit code
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Branch(#[from] BranchError),

    #[error("cannot resume generation: {0}")]
    Resume(RestartReason),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Decompile(#[from] DecompileError),

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Detail(#[from] DetailError),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
}

impl PipelineError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Manifest(_) => 2,
            PipelineError::Branch(BranchError::UnknownVersion(_)) => 4,
            PipelineError::Branch(_) => 3,
            PipelineError::Resume(_) => 5,
            PipelineError::Mapping(MappingError::Mismatch(_)) => 6,
            PipelineError::Mapping(_) => 1,
            PipelineError::Merge(MergeError::Tool(_)) => 7,
            PipelineError::Merge(MergeError::Mapping(MappingError::Mismatch(_))) => 6,
            PipelineError::Merge(_) => 1,
            PipelineError::Decompile(DecompileError::Tool(_)) => 7,
            PipelineError::Decompile(_) => 1,
            PipelineError::Acquire(_) => 1,
            PipelineError::Repo(RepoError::PushFailed { .. }) => 8,
            PipelineError::Repo(_) => 1,
            PipelineError::Sync(_) => 1,
            PipelineError::Detail(_) => 1,
            PipelineError::Fingerprint(_) => 1,
        }
    }
}

impl From<ToolError> for PipelineError {
    fn from(e: ToolError) -> Self {
        PipelineError::Merge(MergeError::Tool(e))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Everything a run needs, resolved from the CLI
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output: PathBuf,
    pub cache: PathBuf,
    pub extra_mappings: Option<PathBuf>,
    pub branch: Option<String>,
    pub remote: Option<String>,
    pub checkout: bool,
    pub push: bool,
    pub start_over: bool,
    pub start_over_if_required: bool,
    pub partial_cache: bool,
    pub releases_only: bool,
    pub start: Option<VersionId>,
    /// `None` targets the catalogue's latest
    pub end: Option<VersionId>,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub configs: Vec<String>,
    pub manifest_url: String,
}

pub struct Pipeline {
    config: PipelineConfig,
    deps: DependencyHashes,
    tools: ToolSet,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            deps: DependencyHashes::embedded(),
            tools: ToolSet::locate(),
        }
    }

    /// Use an explicit tool directory instead of the bundled location
    pub fn with_tools(config: PipelineConfig, tools: ToolSet) -> Self {
        Self {
            config,
            deps: DependencyHashes::embedded(),
            tools,
        }
    }

    /// Execute the full run
    pub fn run(&self) -> PipelineResult<()> {
        let variants = UnobfuscatedVariants::embedded()?;
        let manifest = VersionManifest::fetch(&self.config.manifest_url, &variants)?;
        self.run_with_manifest(&manifest, &variants)
    }

    /// Entry point with a pre-resolved catalogue (tests use this to avoid
    /// the network).
    pub fn run_with_manifest(
        &self,
        manifest: &VersionManifest,
        variants: &UnobfuscatedVariants,
    ) -> PipelineResult<()> {
        let mut repo =
            RepoDriver::open_or_init(&self.config.output, self.config.branch.as_deref())?;
        repo.setup_remote(self.config.remote.as_deref())?;

        let result = self.run_inner(&mut repo, manifest, variants);
        // A remote added by this run goes away on every exit path
        let teardown = repo.remove_added_remote();
        result?;
        teardown?;
        Ok(())
    }

    fn run_inner(
        &self,
        repo: &mut RepoDriver,
        manifest: &VersionManifest,
        variants: &UnobfuscatedVariants,
    ) -> PipelineResult<()> {
        let branch_name = repo.setup_branch(
            self.config.branch.as_deref(),
            self.config.start_over,
            self.config.checkout,
        )?;
        info!(branch = %branch_name, "branch selected");

        let spec = self.effective_spec(&branch_name)?;
        let plan = branch::filter(manifest, &spec, &variants.excluded_ids())?;
        info!(start = %plan.start(), end = %plan.end(), "version range resolved");

        let start = plan.start().clone();
        if !repo.validate_or_init(&start)? {
            self.restart_or_fail(repo, RestartReason::MetadataMismatch, &start)?;
        }

        let last = if repo.created_new_branch() {
            None
        } else {
            repo.last_generated_version()?
        };
        if let Some(last) = &last {
            info!(version = %last, "found version of latest commit");
        }

        let skip = match plan::classify(last.as_deref(), manifest, &plan) {
            Resume::Skip(n) => n,
            Resume::Restart(reason) => {
                self.restart_or_fail(repo, reason, &start)?;
                0
            }
        };

        let to_generate = plan.to_generate()[skip..].to_vec();
        let to_generate = self.versions_with_mappings(to_generate)?;

        // Catch the remote up with anything an earlier run left unpushed
        if self.config.push {
            repo.push_remaining()?;
        }

        info!(
            count = to_generate.len(),
            versions = ?to_generate.iter().map(|v| v.id.to_string()).collect::<Vec<_>>(),
            "generating versions"
        );

        let lib_cache = self.config.cache.join("libraries");
        let acquirer = Acquirer::new(
            &self.config.cache,
            &lib_cache,
            self.config.extra_mappings.as_deref(),
            self.config.partial_cache,
        );
        acquirer.acquire_all(&to_generate)?;

        let filters = EntryFilters::new(&self.config.includes, &self.config.excludes)?;

        let generated_any = !to_generate.is_empty();
        for (i, version) in to_generate.iter().enumerate() {
            let span = info_span!("version", id = %version.id);
            let _guard = span.enter();
            info!("[{}/{}] generating {}", i + 1, to_generate.len(), version.id);

            let version_cache = self.config.cache.join(version.id.as_str());
            let detail = VersionDetail::load(&version_cache.join("version.json"))?;
            self.generate(repo, &version_cache, &lib_cache, &detail, &filters)?;

            if self.config.push && i % COMMIT_BATCH_SIZE == COMMIT_BATCH_SIZE - 1 {
                repo.attempt_push(&format!("Pushing {COMMIT_BATCH_SIZE} versions to remote."))?;
            }
        }

        if self.config.push {
            repo.attempt_push(if generated_any {
                "Pushing remaining versions to remote."
            } else {
                "Pushing versions to remote."
            })?;
        }
        if !generated_any {
            info!("no versions to process");
        }
        Ok(())
    }

    /// Resolve the branch spec: configured spec for this branch name, CLI
    /// start/end layered on top, release restriction when asked.
    fn effective_spec(&self, branch_name: &str) -> PipelineResult<BranchSpec> {
        let config = BranchConfig::load_all(&self.config.configs)?;
        let base = config.branches.get(branch_name).cloned();

        if base.is_none() && self.config.start.is_none() && self.config.end.is_none() {
            return Err(BranchError::Underspecified.into());
        }

        let mut spec = base
            .unwrap_or_default()
            .with_overrides(self.config.start.clone(), self.config.end.clone());
        if self.config.releases_only {
            spec = spec.releases_only();
        }
        Ok(spec)
    }

    /// Recreate the branch when the restart policy allows it, otherwise
    /// surface the mismatch.
    fn restart_or_fail(
        &self,
        repo: &mut RepoDriver,
        reason: RestartReason,
        start: &VersionId,
    ) -> PipelineResult<()> {
        if !self.config.start_over_if_required {
            return Err(PipelineError::Resume(reason));
        }

        warn!(%reason, "detected incompatible history, starting branch over");
        repo.restart_branch()?;
        if !repo.validate_or_init(start)? {
            // A freshly created branch must always validate
            return Err(PipelineError::Resume(RestartReason::MetadataMismatch));
        }
        Ok(())
    }

    /// Ensure each version's detail is cached, keeping only versions with
    /// both side mappings, an extra-mappings override, or no obfuscation.
    fn versions_with_mappings(
        &self,
        versions: Vec<VersionInfo>,
    ) -> PipelineResult<Vec<VersionInfo>> {
        info!("downloading version manifests");
        let mut kept = Vec::with_capacity(versions.len());

        for version in versions {
            let version_cache = self.config.cache.join(version.id.as_str());
            let json = acquire::ensure_version_json(&version_cache, &version)?;
            let detail = VersionDetail::load(&json)?;

            let has_upstream = detail.download(DOWNLOAD_CLIENT_MAPPINGS).is_some()
                && detail.download(DOWNLOAD_SERVER_MAPPINGS).is_some();
            let has_extra = self.config.extra_mappings.as_deref().is_some_and(|extra| {
                let root = extra
                    .join(&detail.release_type)
                    .join(detail.id.as_str())
                    .join("maps");
                root.join("client.txt").is_file() && root.join("server.txt").is_file()
            });

            if has_upstream || has_extra || detail.is_unobfuscated() {
                kept.push(version);
            } else {
                info!(version = %detail.id, "no mappings available, dropping from plan");
            }
        }
        Ok(kept)
    }

    /// Run one version through mappings → merge/remap → decompile → sync,
    /// committing when the tree changed.
    fn generate(
        &self,
        repo: &RepoDriver,
        version_cache: &Path,
        lib_cache: &Path,
        detail: &VersionDetail,
        filters: &EntryFilters,
    ) -> PipelineResult<()> {
        let decompiled = match self.partial_cache_hit(version_cache, detail)? {
            Some(decompiled) => decompiled,
            None => {
                let mappings = mappings::merged_mappings(version_cache, detail)?;
                if !detail.is_unobfuscated() && mappings.is_none() {
                    info!(version = %detail.id, "mappings missing, skipping version");
                    return Ok(());
                }

                let joined = merge::joined_remapped_jar(
                    version_cache,
                    detail,
                    mappings.as_deref(),
                    &self.deps,
                    &self.tools,
                    self.config.partial_cache,
                )?;

                let libs = acquire::library_paths(lib_cache, detail);
                decompile::decompiled_jar(
                    version_cache,
                    detail,
                    &joined,
                    lib_cache,
                    &libs,
                    &self.deps,
                    &self.tools,
                )?
            }
        };

        let outcome = sync::sync_version(repo.output(), detail, &decompiled, filters)?;
        if !outcome.is_empty() {
            repo.stage(&outcome.added, &outcome.removed)?;
            repo.commit(detail.id.as_str(), detail.release_time)?;
        }
        Ok(())
    }

    /// All stage fingerprints valid at once: jump straight to the
    /// decompiled jar without touching the deleted intermediates.
    fn partial_cache_hit(
        &self,
        version_cache: &Path,
        detail: &VersionDetail,
    ) -> PipelineResult<Option<PathBuf>> {
        if !self.config.partial_cache {
            return Ok(None);
        }
        let hit = mappings::in_partial_cache(version_cache, detail)?
            && merge::in_partial_cache(version_cache, detail, &self.deps)?
            && decompile::in_partial_cache(version_cache, detail, &self.deps)?;
        if hit {
            info!(version = %detail.id, "decompiled jar partial cache hit");
            Ok(Some(version_cache.join(decompile::DECOMP_JAR_FILENAME)))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig {
            output: PathBuf::from("/tmp/out"),
            cache: PathBuf::from("/tmp/cache"),
            extra_mappings: None,
            branch: None,
            remote: None,
            checkout: false,
            push: false,
            start_over: false,
            start_over_if_required: false,
            partial_cache: false,
            releases_only: false,
            start: None,
            end: None,
            includes: vec![],
            excludes: vec![],
            configs: vec![],
            manifest_url: crate::manifest::DEFAULT_MANIFEST_URL.to_string(),
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            PipelineError::Manifest(ManifestError::MissingVersions).exit_code(),
            2
        );
        assert_eq!(
            PipelineError::Branch(BranchError::UnknownVersion(VersionId::from("1.99"))).exit_code(),
            4
        );
        assert_eq!(
            PipelineError::Branch(BranchError::Underspecified).exit_code(),
            3
        );
        assert_eq!(
            PipelineError::Resume(RestartReason::MetadataMismatch).exit_code(),
            5
        );
        assert_eq!(
            PipelineError::Mapping(MappingError::Mismatch("1.17".to_string())).exit_code(),
            6
        );
        assert_eq!(
            PipelineError::Repo(RepoError::PushFailed {
                status: "rejected".to_string()
            })
            .exit_code(),
            8
        );
    }

    #[test]
    fn test_spec_underspecified_without_config_or_range() {
        let pipeline = Pipeline::new(config());
        let err = pipeline.effective_spec("release").unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_cli_range_without_config_is_enough() {
        let mut c = config();
        c.start = Some(VersionId::from("1.14.4"));
        let pipeline = Pipeline::new(c);
        let spec = pipeline.effective_spec("release").unwrap();
        assert_eq!(spec.start, Some(VersionId::from("1.14.4")));
        assert_eq!(spec.end, None);
    }
}
