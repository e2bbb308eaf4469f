//! Post-sync enhancement
//!
//! After the decompiled sources land, the working tree gets per-version
//! Gradle project metadata so the generated repository loads in an IDE:
//! a `build.gradle` declaring the version's library dependencies and a
//! `settings.gradle` naming the project. The returned paths belong to the
//! enhancement, whether or not their content changed this version.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::manifest::VersionDetail;

/// Write the per-version project files, returning every owned path
pub fn enhance(output: &Path, detail: &VersionDetail) -> Result<Vec<PathBuf>, io::Error> {
    let build_gradle = output.join("build.gradle");
    write_if_changed(&build_gradle, &render_build_gradle(detail))?;

    let settings_gradle = output.join("settings.gradle");
    write_if_changed(&settings_gradle, &render_settings_gradle(detail))?;

    Ok(vec![build_gradle, settings_gradle])
}

fn render_build_gradle(detail: &VersionDetail) -> String {
    let mut out = String::from(
        "plugins {\n    id 'java'\n}\n\njava {\n    toolchain {\n        languageVersion = JavaLanguageVersion.of(21)\n    }\n}\n\nrepositories {\n    mavenCentral()\n    maven { url = 'https://libraries.minecraft.net/' }\n}\n\ndependencies {\n",
    );
    for lib in &detail.libraries {
        out.push_str("    implementation '");
        out.push_str(&lib.name);
        out.push_str("'\n");
    }
    out.push_str("}\n");
    out
}

fn render_settings_gradle(detail: &VersionDetail) -> String {
    format!("rootProject.name = 'minecraft-{}'\n", detail.id)
}

fn write_if_changed(path: &Path, content: &str) -> Result<(), io::Error> {
    if let Ok(existing) = fs::read_to_string(path) {
        if existing == content {
            return Ok(());
        }
    }
    fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn detail() -> VersionDetail {
        VersionDetail::parse(
            r#"{"id": "1.17", "type": "release",
                "releaseTime": "2021-06-08T11:00:40+00:00",
                "libraries": [{"name": "com.mojang:brigadier:1.0.18"}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_enhance_writes_project_files() {
        let dir = TempDir::new().unwrap();
        let owned = enhance(dir.path(), &detail()).unwrap();
        assert_eq!(owned.len(), 2);

        let build = fs::read_to_string(dir.path().join("build.gradle")).unwrap();
        assert!(build.contains("implementation 'com.mojang:brigadier:1.0.18'"));
        let settings = fs::read_to_string(dir.path().join("settings.gradle")).unwrap();
        assert!(settings.contains("minecraft-1.17"));
    }

    #[test]
    fn test_unchanged_files_still_owned() {
        let dir = TempDir::new().unwrap();
        enhance(dir.path(), &detail()).unwrap();
        let owned = enhance(dir.path(), &detail()).unwrap();
        // Ownership keeps the stale-file sweep from deleting them
        assert_eq!(owned.len(), 2);
    }
}
