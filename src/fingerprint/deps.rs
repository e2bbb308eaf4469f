//! Declared hashes of the bundled external tools
//!
//! The fingerprint of any stage that shells out to a tool includes the
//! tool's declared hash, so upgrading a bundled tool invalidates every
//! artifact it produced. Declared (rather than recomputed) hashes keep
//! cache keys stable across hosts.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

/// Contents shipped with the binary; one `<name> <sha1>` pair per line.
const EMBEDDED: &str = include_str!("../../resources/dependency_hashes.txt");

/// Frozen table of tool name → declared SHA-1
#[derive(Debug, Clone)]
pub struct DependencyHashes {
    hashes: HashMap<String, String>,
}

impl DependencyHashes {
    /// Load the table embedded in the program image
    pub fn embedded() -> Self {
        // The embedded table is validated by tests; a malformed line here is
        // a packaging defect, not a runtime condition.
        Self::parse(EMBEDDED)
    }

    /// Load from an external file, for overriding the bundled tool set
    pub fn load(path: &Path) -> Result<Self, io::Error> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    fn parse(content: &str) -> Self {
        let mut hashes = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((name, hash)) = line.split_once(char::is_whitespace) {
                hashes.insert(name.trim().to_string(), hash.trim().to_ascii_lowercase());
            }
        }
        Self { hashes }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.hashes.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;

    #[test]
    fn test_embedded_table_covers_every_tool() {
        let deps = DependencyHashes::embedded();
        for tool in Tool::ALL {
            assert!(
                deps.get(tool.name()).is_some(),
                "missing declared hash for {}",
                tool.name()
            );
        }
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let deps = DependencyHashes::parse("# header\n\nfoo abc123\n");
        assert_eq!(deps.get("foo"), Some("abc123"));
        assert_eq!(deps.get("# header"), None);
    }
}
