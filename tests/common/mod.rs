//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use snowblower::fingerprint::{sha1_bytes, CacheKey, DependencyHashes};
use snowblower::manifest::{Latest, VersionDetail, VersionId, VersionInfo, VersionManifest};
use snowblower::repo::RepoDriver;

/// A catalogue entry with the given id and release time
pub fn version_info(id: &str, release_time: &str) -> VersionInfo {
    VersionInfo {
        id: VersionId::from(id),
        release_type: "release".to_string(),
        url: format!("https://example.invalid/{id}.json"),
        time: release_time.parse().unwrap(),
        release_time: release_time.parse().unwrap(),
        sha1: "0".repeat(40),
        priority: 0,
        embedded: None,
    }
}

/// A small five-version catalogue in ascending release order
pub fn sample_manifest() -> VersionManifest {
    VersionManifest {
        latest: Some(Latest {
            release: VersionId::from("1.17"),
            snapshot: VersionId::from("1.17"),
        }),
        versions: vec![
            version_info("1.14.4", "2019-07-19T09:25:47+00:00"),
            version_info("1.15", "2019-12-10T13:00:00+00:00"),
            version_info("1.16", "2020-06-23T16:20:52+00:00"),
            version_info("1.16.5", "2021-01-14T16:05:32+00:00"),
            version_info("1.17", "2021-06-08T11:00:40+00:00"),
        ],
    }
}

/// Write a stored-format zip archive with the given entries
pub fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options: zip::write::FileOptions =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();
}

/// An initialized working repository on `release` with the metadata commit
pub fn init_repo(root: &Path) -> RepoDriver {
    let mut driver = RepoDriver::open_or_init(&root.join("repo"), Some("release")).unwrap();
    driver.setup_branch(Some("release"), false, false).unwrap();
    driver
        .validate_or_init(&VersionId::from("1.14.4"))
        .unwrap();
    driver
}

/// A bare repository usable as a `file://` remote
pub fn init_bare_remote(root: &Path) -> PathBuf {
    let bare = root.join("remote.git");
    git2::Repository::init_bare(&bare).unwrap();
    bare
}

const SAMPLE_CLIENT_MAPPINGS: &str = "\
com.mojang.Foo -> a:
    void tick() -> a
    void render(float) -> b
";

const SAMPLE_SERVER_MAPPINGS: &str = "\
com.mojang.Foo -> a:
    void tick() -> a
";

/// Seed a version cache so the partial-cache fast path validates: detail
/// JSON, side mappings, merged mappings, joined jar, and a decompiled jar
/// holding `sources`. Returns the catalogue entry matching the seeded
/// detail file.
pub fn seed_partial_cache(
    cache_root: &Path,
    id: &str,
    release_time: &str,
    sources: &[(&str, &[u8])],
) -> VersionInfo {
    let version_cache = cache_root.join(id);
    fs::create_dir_all(&version_cache).unwrap();

    let json = format!(
        r#"{{"id": "{id}", "type": "release", "releaseTime": "{release_time}",
            "downloads": {{
                "client": {{"url": "https://example.invalid/c.jar", "sha1": "1111111111111111111111111111111111111111", "size": 1}},
                "server": {{"url": "https://example.invalid/s.jar", "sha1": "2222222222222222222222222222222222222222", "size": 1}},
                "client_mappings": {{"url": "https://example.invalid/cm.txt", "sha1": "3333333333333333333333333333333333333333", "size": 1}},
                "server_mappings": {{"url": "https://example.invalid/sm.txt", "sha1": "4444444444444444444444444444444444444444", "size": 1}}
            }}}}"#
    );
    fs::write(version_cache.join("version.json"), &json).unwrap();
    let detail = VersionDetail::parse(&json).unwrap();

    fs::write(
        version_cache.join("client_mappings.txt"),
        SAMPLE_CLIENT_MAPPINGS,
    )
    .unwrap();
    fs::write(
        version_cache.join("server_mappings.txt"),
        SAMPLE_SERVER_MAPPINGS,
    )
    .unwrap();
    snowblower::mappings::merged_mappings(&version_cache, &detail)
        .unwrap()
        .unwrap();

    let deps = DependencyHashes::embedded();

    // Joined jar with the fingerprint the merge stage would have written
    let joined = version_cache.join("joined.jar");
    write_archive(&joined, &[("a.class", b"class bytes".as_slice())]);
    let extracted = version_cache.join("server-extracted.jar");
    write_archive(&extracted, &[("a.class", b"class bytes".as_slice())]);
    CacheKey::new()
        .put_dependency("installertools", &deps)
        .unwrap()
        .put_file("map", &version_cache.join("moj_to_obf.tsrg"))
        .put_hash("client", "1111111111111111111111111111111111111111")
        .put_hash("server-full", "2222222222222222222222222222222222222222")
        .put_dependency("mergetool", &deps)
        .unwrap()
        .put_file("server", &extracted)
        .write(&version_cache.join("joined.jar.cache"))
        .unwrap();

    // Decompiled jar with the fingerprint the decompile stage writes
    let decompiled = version_cache.join("joined-decompiled.jar");
    write_archive(&decompiled, sources);
    CacheKey::new()
        .put_dependency("vineflower", &deps)
        .unwrap()
        .put_dependency("vineflower-plugins", &deps)
        .unwrap()
        .put_file("joined", &joined)
        .put_literal(
            "decompileArgs",
            &snowblower::decompile::decompile_args(&detail).join(" "),
        )
        .write(&version_cache.join("joined-decompiled.jar.cache"))
        .unwrap();

    VersionInfo {
        id: VersionId::from(id),
        release_type: "release".to_string(),
        url: format!("https://example.invalid/{id}.json"),
        time: release_time.parse().unwrap(),
        release_time: release_time.parse().unwrap(),
        sha1: sha1_bytes(json.as_bytes()),
        priority: 0,
        embedded: None,
    }
}

/// The tip commit messages of a branch in a repository, newest first
pub fn commit_messages(repo_path: &Path, branch: &str) -> Vec<String> {
    let repo = git2::Repository::open(repo_path).unwrap();
    let oid = repo
        .revparse_single(&format!("refs/heads/{branch}"))
        .unwrap()
        .id();
    let mut walk = repo.revwalk().unwrap();
    walk.push(oid).unwrap();
    walk.map(|oid| {
        repo.find_commit(oid.unwrap())
            .unwrap()
            .summary()
            .unwrap_or("")
            .to_string()
    })
    .collect()
}
