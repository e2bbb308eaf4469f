//! Initial-commit metadata
//!
//! The first commit on every branch carries `Snowblower.txt`, recording the
//! generator schema tag and the branch's start version, plus the git
//! housekeeping files and the Gradle bootstrap so the generated tree loads
//! as a project. A branch is compatible with the current run iff the
//! metadata file matches verbatim.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};

use crate::fingerprint::CacheKey;
use crate::manifest::VersionId;

use super::RepoError;

pub const METADATA_FILENAME: &str = "Snowblower.txt";
pub const INIT_COMMIT_MESSAGE: &str = "Initial commit";

/// Bump whenever output generation changes shape (decompiler upgrades,
/// argument changes); `--start-over-if-required` keys off the mismatch.
pub const SCHEMA_VERSION: u32 = 1;

/// Oldest release timestamp in the upstream catalogue, used as the fixed
/// date of the metadata commit so re-created branches are byte-stable.
const INIT_COMMIT_EPOCH: i64 = 1_242_245_460;

const GITATTRIBUTES: &str = "\
* text eol=lf
*.java text eol=lf
*.json text eol=lf
*.xml text eol=lf
*.bin binary
*.png binary
*.gif binary
*.nbt binary
*.ogg binary
# In GitHub, hide resources by default
src/main/resources/** linguist-generated
";

const GITIGNORE: &str = "\
.gradle
build

# Eclipse
.settings
.metadata
.classpath
.project
bin

# IntelliJ
out
*.idea
*.iml
";

const GRADLEW: &str = include_str!("../../resources/bootstrap/gradlew");
const GRADLEW_BAT: &str = include_str!("../../resources/bootstrap/gradlew.bat");
const WRAPPER_PROPERTIES: &str =
    include_str!("../../resources/bootstrap/gradle/wrapper/gradle-wrapper.properties");

pub fn init_commit_date() -> DateTime<Utc> {
    Utc.timestamp_opt(INIT_COMMIT_EPOCH, 0).unwrap()
}

/// The metadata key the initial commit must carry for this run
pub fn metadata_key(start: &VersionId) -> CacheKey {
    CacheKey::new()
        .comment(&[
            "Source files created by Snowblower",
            "https://github.com/neoforged/snowblower",
        ])
        .put_literal("VersionId", &SCHEMA_VERSION.to_string())
        .put_literal("Start", start.as_str())
}

/// Validate existing metadata, or materialize the initial file set.
///
/// Returns `Ok(None)` when an existing metadata file disagrees with the
/// current schema/start. Returns the list of files to stage (relative to
/// the output root) when the branch is fresh; an empty list when the
/// existing metadata validates.
pub fn validate_or_materialize(
    output: &Path,
    start: &VersionId,
) -> Result<Option<Vec<PathBuf>>, RepoError> {
    let meta = metadata_key(start);
    let meta_path = output.join(METADATA_FILENAME);

    if meta_path.is_file() {
        if !meta.matches_file(&meta_path)? {
            return Ok(None);
        }
        return Ok(Some(Vec::new()));
    }

    let mut staged = Vec::new();

    meta.write(&meta_path)?;
    staged.push(PathBuf::from(METADATA_FILENAME));

    fs::write(output.join(".gitattributes"), GITATTRIBUTES)?;
    staged.push(PathBuf::from(".gitattributes"));

    fs::write(output.join(".gitignore"), GITIGNORE)?;
    staged.push(PathBuf::from(".gitignore"));

    fs::write(output.join("gradlew"), GRADLEW)?;
    set_executable(&output.join("gradlew"))?;
    staged.push(PathBuf::from("gradlew"));

    fs::write(output.join("gradlew.bat"), GRADLEW_BAT)?;
    staged.push(PathBuf::from("gradlew.bat"));

    let wrapper_dir = output.join("gradle").join("wrapper");
    fs::create_dir_all(&wrapper_dir)?;
    fs::write(wrapper_dir.join("gradle-wrapper.properties"), WRAPPER_PROPERTIES)?;
    staged.push(PathBuf::from("gradle/wrapper/gradle-wrapper.properties"));

    Ok(Some(staged))
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

pub fn is_init_commit(message: &str) -> bool {
    message == INIT_COMMIT_MESSAGE
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fresh_output_materializes_file_set() {
        let dir = TempDir::new().unwrap();
        let staged = validate_or_materialize(dir.path(), &VersionId::from("1.14.4"))
            .unwrap()
            .unwrap();

        assert!(staged.contains(&PathBuf::from(METADATA_FILENAME)));
        assert!(dir.path().join("gradlew").is_file());
        assert!(dir
            .path()
            .join("gradle/wrapper/gradle-wrapper.properties")
            .is_file());

        let meta = fs::read_to_string(dir.path().join(METADATA_FILENAME)).unwrap();
        assert!(meta.contains("VersionId=1"));
        assert!(meta.contains("Start=1.14.4"));
    }

    #[test]
    fn test_matching_metadata_validates_without_staging() {
        let dir = TempDir::new().unwrap();
        let start = VersionId::from("1.14.4");
        validate_or_materialize(dir.path(), &start).unwrap().unwrap();

        let staged = validate_or_materialize(dir.path(), &start).unwrap().unwrap();
        assert!(staged.is_empty());
    }

    #[test]
    fn test_start_mismatch_invalidates() {
        let dir = TempDir::new().unwrap();
        validate_or_materialize(dir.path(), &VersionId::from("1.14.4"))
            .unwrap()
            .unwrap();

        let result = validate_or_materialize(dir.path(), &VersionId::from("1.15")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_schema_bump_invalidates() {
        let dir = TempDir::new().unwrap();
        let start = VersionId::from("1.14.4");
        // A branch written by an older generator schema
        CacheKey::new()
            .put_literal("VersionId", "0")
            .put_literal("Start", start.as_str())
            .write(&dir.path().join(METADATA_FILENAME))
            .unwrap();

        let result = validate_or_materialize(dir.path(), &start).unwrap();
        assert!(result.is_none());
    }
}
