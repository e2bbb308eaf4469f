//! Repository driver
//!
//! Owns the output repository: branch lifecycle (including the orphan
//! two-step used to recreate a checked-out branch), remote provisioning
//! with eager fetch, staging and dated commits under the fixed generator
//! identity, and the batched force-push protocol.

mod init;

pub use init::{
    init_commit_date, is_init_commit, metadata_key, INIT_COMMIT_MESSAGE, METADATA_FILENAME,
    SCHEMA_VERSION,
};

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::build::CheckoutBuilder;
use git2::{
    BranchType, ErrorCode, FetchOptions, Oid, PushOptions, RemoteCallbacks, Repository,
    RepositoryInitOptions, ResetType, Signature, StatusOptions, Time,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::fingerprint::FingerprintError;
use crate::manifest::VersionId;

/// Fixed identity for every generated commit
pub const COMMITTER_NAME: &str = "Snowblower";
pub const COMMITTER_EMAIL: &str = "snow@blower.com";

/// Push granularity during and after the generation loop
pub const COMMIT_BATCH_SIZE: usize = 10;

const ORPHAN_TEMP: &str = "orphan_temp";
const DEFAULT_BRANCH: &str = "release";

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("could not push to remote: {status}")]
    PushFailed { status: String },

    #[error("git repository has no HEAD reference and no branch was given")]
    NoBranch,

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result of one push attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The remote already had our tip; a no-op success
    UpToDate,
}

pub struct RepoDriver {
    repo: Repository,
    output: PathBuf,
    branch: String,
    remote_name: Option<String>,
    remove_remote: bool,
    created_new_branch: bool,
}

impl RepoDriver {
    /// Open the repository at `output`, or wipe and initialize a new one
    /// with `branch_hint` (default `release`) as the initial branch.
    pub fn open_or_init(output: &Path, branch_hint: Option<&str>) -> Result<Self, RepoError> {
        let output = output.to_path_buf();
        let repo = match Repository::open(&output) {
            Ok(repo) => repo,
            Err(_) => {
                if output.exists() {
                    fs::remove_dir_all(&output)?;
                }
                fs::create_dir_all(&output)?;
                let mut opts = RepositoryInitOptions::new();
                opts.initial_head(branch_hint.unwrap_or(DEFAULT_BRANCH));
                Repository::init_opts(&output, &opts)?
            }
        };

        Ok(Self {
            repo,
            output,
            branch: String::new(),
            remote_name: None,
            remove_remote: false,
            created_new_branch: false,
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn created_new_branch(&self) -> bool {
        self.created_new_branch
    }

    /// Reuse a remote with an equal URL or add one under the first unused
    /// of `origin`, `origin1`, …; then fetch eagerly.
    pub fn setup_remote(&mut self, url: Option<&str>) -> Result<(), RepoError> {
        let Some(url) = url else {
            return Ok(());
        };

        let mut found: Option<String> = None;
        let mut names: HashSet<String> = HashSet::new();
        for name in self.repo.remotes()?.iter().flatten() {
            names.insert(name.to_string());
            if found.is_none() {
                if let Ok(remote) = self.repo.find_remote(name) {
                    if remote.url() == Some(url) {
                        found = Some(name.to_string());
                    }
                }
            }
        }

        let name = match found {
            Some(name) => name,
            None => {
                let mut candidate = "origin".to_string();
                let mut i = 0;
                while names.contains(&candidate) {
                    i += 1;
                    candidate = format!("origin{i}");
                }
                self.repo.remote(&candidate, url)?;
                self.remove_remote = true;
                candidate
            }
        };

        info!(remote = %name, url, "fetching remote");
        let mut callbacks = RemoteCallbacks::new();
        callbacks.transfer_progress(|progress| {
            debug!(
                received = progress.received_objects(),
                total = progress.total_objects(),
                "fetch progress"
            );
            true
        });
        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);
        self.repo
            .find_remote(&name)?
            .fetch(&[] as &[&str], Some(&mut options), None)?;

        self.remote_name = Some(name);
        Ok(())
    }

    /// Remove a remote this run added; no-op otherwise. Called on teardown.
    pub fn remove_added_remote(&mut self) -> Result<(), RepoError> {
        if self.remove_remote {
            if let Some(name) = self.remote_name.take() {
                self.repo.remote_delete(&name)?;
            }
        }
        Ok(())
    }

    fn current_branch(&self) -> Result<Option<String>, RepoError> {
        match self.repo.head() {
            Ok(head) => Ok(head.shorthand().map(str::to_string)),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                let head = self.repo.find_reference("HEAD")?;
                Ok(head
                    .symbolic_target()
                    .and_then(|t| t.strip_prefix("refs/heads/"))
                    .map(str::to_string))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn branch_exists(&self, name: &str) -> bool {
        self.repo.find_branch(name, BranchType::Local).is_ok()
    }

    fn remote_branch_oid(&self, branch: &str) -> Option<Oid> {
        let remote = self.remote_name.as_deref()?;
        self.repo
            .revparse_single(&format!("refs/remotes/{remote}/{branch}"))
            .ok()
            .map(|obj| obj.id())
    }

    /// Move onto the target branch, creating, recreating, or tracking it
    /// as the flags dictate, and discard any stale working state.
    pub fn setup_branch(
        &mut self,
        branch: Option<&str>,
        fresh: bool,
        checkout: bool,
    ) -> Result<String, RepoError> {
        let current = self.current_branch()?;
        let name = match branch.map(str::to_string).or_else(|| current.clone()) {
            Some(name) => name,
            None => return Err(RepoError::NoBranch),
        };

        let exists = self.branch_exists(&name);
        let mut delete_temp = false;

        if fresh && exists {
            self.created_new_branch = true;
            info!(branch = %name, "starting over existing branch");
            delete_temp = self.delete_branch(&name, current.as_deref())?;
            self.checkout_orphan(&name)?;
        } else if !fresh && checkout && self.remote_branch_oid(&name).is_some() {
            if exists {
                delete_temp = self.delete_branch(&name, current.as_deref())?;
            }

            let remote = self.remote_name.clone().expect("remote checked above");
            info!(branch = %name, remote = %remote, "checking out remote branch");
            let oid = self.remote_branch_oid(&name).expect("checked above");
            let commit = self.repo.find_commit(oid)?;
            let mut new_branch = self.repo.branch(&name, &commit, true)?;
            if !self.remove_remote {
                new_branch.set_upstream(Some(&format!("{remote}/{name}")))?;
            }
            self.repo.set_head(&format!("refs/heads/{name}"))?;
            self.repo
                .checkout_head(Some(CheckoutBuilder::new().force()))?;
        } else if current.as_deref() != Some(name.as_str()) {
            self.created_new_branch = !exists;
            info!(
                branch = %name,
                existing = exists,
                "checking out local branch"
            );
            if exists {
                self.repo.set_head(&format!("refs/heads/{name}"))?;
                self.repo
                    .checkout_head(Some(CheckoutBuilder::new().force()))?;
            } else {
                self.checkout_orphan(&name)?;
            }
        }

        self.hard_reset()?;
        self.clean_working_tree()?;

        if delete_temp {
            // The temp ref only materializes if something committed on it
            if let Ok(mut temp) = self.repo.find_branch(ORPHAN_TEMP, BranchType::Local) {
                temp.delete()?;
            }
        }

        self.branch = name.clone();
        Ok(name)
    }

    /// Recreate the current branch from scratch (restart path)
    pub fn restart_branch(&mut self) -> Result<(), RepoError> {
        let name = self.branch.clone();
        self.setup_branch(Some(&name), true, false)?;
        Ok(())
    }

    fn delete_branch(&mut self, name: &str, current: Option<&str>) -> Result<bool, RepoError> {
        let mut delete_temp = false;
        if current == Some(name) {
            // Move off the branch so it can be deleted
            self.checkout_orphan(ORPHAN_TEMP)?;
            delete_temp = true;
        }
        self.repo.find_branch(name, BranchType::Local)?.delete()?;
        Ok(delete_temp)
    }

    /// Point HEAD at a not-yet-existing branch (unborn) and clear the
    /// index so the stale tree shows as untracked and gets cleaned.
    fn checkout_orphan(&self, name: &str) -> Result<(), RepoError> {
        self.repo.set_head(&format!("refs/heads/{name}"))?;
        let mut index = self.repo.index()?;
        index.clear()?;
        index.write()?;
        Ok(())
    }

    fn hard_reset(&self) -> Result<(), RepoError> {
        match self.repo.head() {
            Ok(head) => {
                let obj = head.peel(git2::ObjectType::Commit)?;
                self.repo.reset(&obj, ResetType::Hard, None)?;
                Ok(())
            }
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete untracked files and prune the directories they leave behind
    fn clean_working_tree(&self) -> Result<(), RepoError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = self.repo.statuses(Some(&mut opts))?;

        for entry in statuses.iter() {
            if entry.status().contains(git2::Status::WT_NEW) {
                if let Some(path) = entry.path() {
                    let full = self.output.join(path);
                    if full.is_file() {
                        fs::remove_file(&full)?;
                    }
                }
            }
        }

        prune_empty_dirs(&self.output)?;
        Ok(())
    }

    /// Validate or create the initial metadata commit.
    ///
    /// Returns false when existing metadata disagrees with the current
    /// schema tag or start version.
    pub fn validate_or_init(&mut self, start: &VersionId) -> Result<bool, RepoError> {
        match init::validate_or_materialize(&self.output, start)? {
            None => Ok(false),
            Some(staged) if staged.is_empty() => Ok(true),
            Some(staged) => {
                let paths: Vec<String> = staged
                    .iter()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .collect();
                self.stage(&paths, &[])?;
                self.commit(INIT_COMMIT_MESSAGE, init_commit_date())?;
                Ok(true)
            }
        }
    }

    /// The short message of the newest commit authored by the generator
    /// identity, excluding the initial metadata commit.
    pub fn last_generated_version(&self) -> Result<Option<String>, RepoError> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        let Some(tip) = head.target() else {
            return Ok(None);
        };

        let mut walk = self.repo.revwalk()?;
        walk.push(tip)?;
        for oid in walk {
            let commit = self.repo.find_commit(oid?)?;
            if commit.committer().name() == Some(COMMITTER_NAME) {
                let message = commit.summary().unwrap_or("").to_string();
                if is_init_commit(&message) {
                    return Ok(None);
                }
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    /// Stage adds and removes; paths are repo-relative with forward slashes
    pub fn stage(&self, added: &[String], removed: &[String]) -> Result<(), RepoError> {
        let mut index = self.repo.index()?;
        for path in added {
            index.add_path(Path::new(path))?;
        }
        for path in removed {
            index.remove_path(Path::new(path))?;
        }
        index.write()?;
        Ok(())
    }

    /// Commit the index with the generator identity, dated `when` for both
    /// author and committer.
    pub fn commit(&self, message: &str, when: DateTime<Utc>) -> Result<Oid, RepoError> {
        let signature = Signature::new(
            COMMITTER_NAME,
            COMMITTER_EMAIL,
            &Time::new(when.timestamp(), 0),
        )?;

        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let parent = match self.repo.head() {
            Ok(head) => Some(self.repo.find_commit(head.target().expect("resolved head"))?),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                None
            }
            Err(e) => return Err(e.into()),
        };
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        Ok(self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?)
    }

    /// Force-push the branch tip to the remote
    pub fn attempt_push(&self, context: &str) -> Result<PushOutcome, RepoError> {
        let Some(tip) = self.repo.head().ok().and_then(|h| h.target()) else {
            return Ok(PushOutcome::UpToDate);
        };
        self.push_commit(context, tip)
    }

    fn push_commit(&self, context: &str, src: Oid) -> Result<PushOutcome, RepoError> {
        let Some(remote_name) = self.remote_name.as_deref() else {
            return Ok(PushOutcome::UpToDate);
        };

        if self.remote_branch_oid(&self.branch) == Some(src) {
            info!("attempted to push to remote, but local branch was up-to-date");
            return Ok(PushOutcome::UpToDate);
        }

        info!("{context}");
        let refspec = format!("+{}:refs/heads/{}", src, self.branch);

        let failed: RefCell<Option<String>> = RefCell::new(None);
        let mut callbacks = RemoteCallbacks::new();
        callbacks.push_update_reference(|_refname, status| {
            if let Some(message) = status {
                *failed.borrow_mut() = Some(message.to_string());
            }
            Ok(())
        });
        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        self.repo
            .find_remote(remote_name)?
            .push(&[&refspec], Some(&mut options))?;

        if let Some(status) = failed.take() {
            return Err(RepoError::PushFailed { status });
        }

        // Keep the tracking ref current so the next batch's up-to-date
        // check sees this push.
        self.repo.reference(
            &format!("refs/remotes/{remote_name}/{}", self.branch),
            src,
            true,
            "update tracking ref after push",
        )?;

        info!("  successfully pushed to remote");
        Ok(PushOutcome::Pushed)
    }

    /// Catch the remote up with any commits an earlier run never pushed.
    ///
    /// Walks the remote branch newest to oldest looking for a common
    /// ancestor in the local history, then pushes everything newer than it
    /// in oldest-first chunks; with no common ancestor, everything goes.
    pub fn push_remaining(&self) -> Result<(), RepoError> {
        if self.remote_name.is_none() || self.created_new_branch {
            return Ok(());
        }
        let Some(remote_oid) = self.remote_branch_oid(&self.branch) else {
            return Ok(());
        };
        let Some(tip) = self.repo.head().ok().and_then(|h| h.target()) else {
            return Ok(());
        };

        // Newest first: index 0 is the local tip
        let mut ours: Vec<Oid> = Vec::new();
        let mut walk = self.repo.revwalk()?;
        walk.push(tip)?;
        for oid in walk {
            ours.push(oid?);
        }

        let push_chunks = |end: usize| -> Result<(), RepoError> {
            let starts: Vec<usize> = (0..end).step_by(COMMIT_BATCH_SIZE).collect();
            for &start in starts.iter().rev() {
                let size = (end - start).min(COMMIT_BATCH_SIZE);
                self.push_commit(&format!("Pushed {size} old commits."), ours[start])?;
            }
            Ok(())
        };

        let mut remote_walk = self.repo.revwalk()?;
        remote_walk.push(remote_oid)?;
        for oid in remote_walk {
            let oid = oid?;
            if let Some(index) = ours.iter().position(|&o| o == oid) {
                if index == 0 {
                    // Remote is at our tip already
                    return Ok(());
                }
                return push_chunks(index);
            }
        }

        // No common ancestor: force the whole history over
        push_chunks(ours.len())
    }
}

/// Remove now-empty directories below `root`, leaving `.git` alone
fn prune_empty_dirs(root: &Path) -> Result<(), io::Error> {
    let mut dirs: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();

    // Deepest first so parents empty out as children go
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        let _ = fs::remove_dir(&dir);
    }
    Ok(())
}
