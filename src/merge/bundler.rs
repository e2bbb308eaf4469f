//! Server archive extraction
//!
//! Modern server archives are "bundler" launchers (a `Bundler-Format`
//! manifest attribute) whose real server jar is unpacked by the
//! installertools `extract-bundler` task. Older servers ship the classes
//! directly with shaded libraries mixed in; those are filtered down to
//! mapped classes only, since any shared resource also exists in the
//! client jar.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::fingerprint::CacheKey;
use crate::fingerprint::DependencyHashes;
use crate::manifest::VersionDetail;
use crate::mappings;
use crate::tools::{Tool, ToolSet};

use super::MergeError;

pub const EXTRACTED_SERVER_FILENAME: &str = "server-extracted.jar";
pub const EXTRACTED_SERVER_CACHE_FILENAME: &str = "server-extracted.jar.cache";

const BUNDLER_FORMAT_ATTRIBUTE: &str = "Bundler-Format:";

/// Whether the archive's manifest marks it as a bundler launcher
pub fn is_bundled(server_jar: &Path) -> Result<bool, MergeError> {
    let file = fs::File::open(server_jar)?;
    let mut archive = ZipArchive::new(io::BufReader::new(file))?;

    let mut manifest = match archive.by_name("META-INF/MANIFEST.MF") {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let mut text = String::new();
    manifest.read_to_string(&mut text)?;

    Ok(text.lines().any(|l| l.starts_with(BUNDLER_FORMAT_ATTRIBUTE)))
}

/// Produce the extracted (or filtered) server jar for merging.
///
/// Returns the original jar unchanged for non-bundled unobfuscated
/// servers, where there is no mapping to filter by.
pub fn extracted_server_jar(
    version_cache: &Path,
    detail: &VersionDetail,
    server_jar: &Path,
    mappings_path: Option<&Path>,
    deps: &DependencyHashes,
    tools: &ToolSet,
) -> Result<PathBuf, MergeError> {
    let bundled = is_bundled(server_jar)?;

    let key = CacheKey::new()
        .put_dependency(Tool::Installertools.name(), deps)?
        .put_file("server", server_jar);
    let key_file = version_cache.join(EXTRACTED_SERVER_CACHE_FILENAME);
    let extracted = version_cache.join(EXTRACTED_SERVER_FILENAME);

    if extracted.is_file() && key.is_valid(&key_file)? {
        return Ok(extracted);
    }

    if bundled {
        tools.run(
            Tool::Installertools,
            &[
                "--task".to_string(),
                "extract-bundler".to_string(),
                "--input".to_string(),
                server_jar.display().to_string(),
                "--output".to_string(),
                extracted.display().to_string(),
                "--jar-only".to_string(),
            ],
        )?;
    } else {
        let Some(mappings_path) = mappings_path else {
            return Ok(server_jar.to_path_buf());
        };
        filter_to_mapped_classes(server_jar, &extracted, mappings_path)?;
    }

    key.write(&key_file)?;
    Ok(extracted)
}

/// Copy only `.class` entries present in the obfuscated mapping side.
///
/// Pre-bundler servers are obfuscated, so entry names are obfuscated class
/// names; anything absent from the mappings is a shaded library.
fn filter_to_mapped_classes(
    server_jar: &Path,
    extracted: &Path,
    mappings_path: &Path,
) -> Result<(), MergeError> {
    let _ = fs::remove_file(extracted);

    let merged = mappings::load_merged(mappings_path)?;
    let obf_names = merged.mapped_class_names();

    let input = fs::File::open(server_jar)?;
    let mut archive = ZipArchive::new(io::BufReader::new(input))?;
    let output = fs::File::create(extracted)?;
    let mut writer = ZipWriter::new(io::BufWriter::new(output));
    let options: FileOptions = FileOptions::default().compression_method(CompressionMethod::Stored);

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if !entry.is_file() {
            continue;
        }
        let name = entry.name().to_string();
        let Some(class_name) = name.strip_suffix(".class") else {
            continue;
        };
        if !obf_names.contains(class_name) {
            continue;
        }

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        writer.start_file(name, options)?;
        writer.write_all(&bytes)?;
    }

    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_jar(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        let options: FileOptions =
            FileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, bytes) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_bundler_detection() {
        let dir = TempDir::new().unwrap();

        let bundled = dir.path().join("bundled.jar");
        write_jar(
            &bundled,
            &[(
                "META-INF/MANIFEST.MF",
                b"Manifest-Version: 1.0\nBundler-Format: 1.0\n".as_slice(),
            )],
        );
        assert!(is_bundled(&bundled).unwrap());

        let plain = dir.path().join("plain.jar");
        write_jar(
            &plain,
            &[("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n".as_slice())],
        );
        assert!(!is_bundled(&plain).unwrap());

        let no_manifest = dir.path().join("none.jar");
        write_jar(&no_manifest, &[("a.class", b"x".as_slice())]);
        assert!(!is_bundled(&no_manifest).unwrap());
    }

    #[test]
    fn test_filter_drops_shaded_classes_and_resources() {
        let dir = TempDir::new().unwrap();
        let server = dir.path().join("server.jar");
        write_jar(
            &server,
            &[
                ("a.class", b"mapped".as_slice()),
                ("com/shaded/Lib.class", b"shaded".as_slice()),
                ("assets/icon.png", b"png".as_slice()),
            ],
        );

        let tsrg = dir.path().join("moj_to_obf.tsrg");
        fs::write(&tsrg, "tsrg2 left right\ncom/mojang/Foo a\n\ttick ()V a\n").unwrap();

        let extracted = dir.path().join("server-extracted.jar");
        filter_to_mapped_classes(&server, &extracted, &tsrg).unwrap();

        assert_eq!(entry_names(&extracted), vec!["a.class".to_string()]);
    }
}
