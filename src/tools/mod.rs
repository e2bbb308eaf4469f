//! External tool contracts
//!
//! Four collaborators do the heavy jar lifting: the class merger (dist-side
//! annotations), the remapper/bundler-extractor (one jar, two entry
//! points), and the decompiler with its plugin pack. Each is a black-box
//! process with a documented command line; its argument list and declared
//! hash are part of the calling stage's fingerprint.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

/// Environment override for the tool jar directory
pub const TOOLS_DIR_ENV: &str = "SNOWBLOWER_TOOLS_DIR";

/// Errors from locating or running an external tool
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool jar not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: &'static str,
        source: io::Error,
    },

    #[error("{tool} exited with status {status}")]
    Failed { tool: &'static str, status: i32 },
}

/// The bundled tools, named by their jar basenames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// Remap driver and server-bundler extractor
    Installertools,
    /// Client/server class merger producing dist-side annotations
    Mergetool,
    /// Java decompiler
    Vineflower,
    /// Decompiler plugin pack
    VineflowerPlugins,
}

impl Tool {
    pub const ALL: [Tool; 4] = [
        Tool::Installertools,
        Tool::Mergetool,
        Tool::Vineflower,
        Tool::VineflowerPlugins,
    ];

    /// Name used both for the jar file and the declared-hash table
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Installertools => "installertools",
            Tool::Mergetool => "mergetool",
            Tool::Vineflower => "vineflower",
            Tool::VineflowerPlugins => "vineflower-plugins",
        }
    }
}

/// Resolves tool jars and runs them with stdout silenced.
///
/// The tools chatter on stdout; the driver's own log stream stays clean by
/// pointing their stdout at a sink. stderr is passed through so genuine
/// tool failures remain diagnosable.
#[derive(Debug, Clone)]
pub struct ToolSet {
    dir: PathBuf,
}

impl ToolSet {
    /// Locate the tool directory: `$SNOWBLOWER_TOOLS_DIR`, else `tools/`
    /// next to the running executable.
    pub fn locate() -> Self {
        let dir = env::var_os(TOOLS_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| {
                env::current_exe()
                    .ok()
                    .and_then(|exe| exe.parent().map(|p| p.join("tools")))
            })
            .unwrap_or_else(|| PathBuf::from("tools"));
        Self { dir }
    }

    /// Use an explicit tool directory (tests)
    pub fn at(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Path of a tool's jar, verifying it exists
    pub fn jar(&self, tool: Tool) -> Result<PathBuf, ToolError> {
        let path = self.dir.join(format!("{}.jar", tool.name()));
        if !path.is_file() {
            return Err(ToolError::NotFound(path));
        }
        Ok(path)
    }

    /// Run a tool to completion. Non-zero exit is an error.
    pub fn run(&self, tool: Tool, args: &[String]) -> Result<(), ToolError> {
        let jar = self.jar(tool)?;
        let status = Command::new("java")
            .arg("-jar")
            .arg(&jar)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| ToolError::Spawn {
                tool: tool.name(),
                source,
            })?;

        if !status.success() {
            return Err(ToolError::Failed {
                tool: tool.name(),
                status: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}
