//! Resume planning
//!
//! Classifies a run against the branch's existing commit history: how many
//! planned versions are already committed, or whether the history is
//! inconsistent with the plan and the branch must be recreated.

use std::fmt;

use crate::branch::Plan;
use crate::manifest::VersionManifest;

/// Why the existing history cannot be resumed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    /// The last committed id no longer exists in the catalogue
    NotInManifest(String),
    /// The last committed id is filtered out by the branch configuration
    FilteredOut(String),
    /// The last committed id predates the configured start version
    OlderThanStart(String),
    /// The branch metadata commit disagrees with the current schema/start
    MetadataMismatch,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::NotInManifest(id) => {
                write!(f, "version of latest commit is \"{id}\", but it is not in the version manifest")
            }
            RestartReason::FilteredOut(id) => {
                write!(f, "version of latest commit is \"{id}\", but it is not included by the current branch configuration")
            }
            RestartReason::OlderThanStart(id) => {
                write!(f, "version of latest commit is \"{id}\", which is older than the start version")
            }
            RestartReason::MetadataMismatch => {
                write!(f, "the starting commit on this branch does not have matching metadata")
            }
        }
    }
}

/// Outcome of resume classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume {
    /// Skip the first `n` entries of the generation list
    Skip(usize),
    /// History and plan disagree; recreate the branch or fail
    Restart(RestartReason),
}

/// Classify the run given the last generator-authored commit message.
///
/// `last_committed` is `None` when the branch was just created, has no
/// commits by the configured identity, or only the initial metadata commit.
pub fn classify(
    last_committed: Option<&str>,
    manifest: &VersionManifest,
    plan: &Plan,
) -> Resume {
    let last = match last_committed {
        Some(id) => id,
        None => return Resume::Skip(0),
    };

    let to_generate = plan.to_generate();
    if let Some(i) = to_generate.iter().position(|v| v.id.as_str() == last) {
        return Resume::Skip(i + 1);
    }

    if !manifest.versions.iter().any(|v| v.id.as_str() == last) {
        return Resume::Restart(RestartReason::NotInManifest(last.to_string()));
    }

    match plan.filtered.iter().position(|v| v.id.as_str() == last) {
        None => Resume::Restart(RestartReason::FilteredOut(last.to_string())),
        Some(i) if i < plan.start_index => {
            Resume::Restart(RestartReason::OlderThanStart(last.to_string()))
        }
        // In the filtered list but not in the generation window, and not
        // older than start: it is newer than the end, nothing left to do.
        Some(_) => Resume::Skip(to_generate.len()),
    }
}
