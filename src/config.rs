//! Compiler configuration: protocol search path and compilation limits.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Directories searched, in order, for relative protocol file names.
    /// Empty means "open the name as given".
    pub search_path: Vec<PathBuf>,

    /// Nesting limit for variable expansion inside one string.
    pub max_recursion_depth: usize,

    /// Fail on handlers no protocol uses and report unused variables.
    pub check_unused: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            search_path: Vec::new(),
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            check_unused: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CompilerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Split a `:` or `;` separated directory list. Empty entries stand for
    /// the current directory.
    pub fn parse_search_path(path: &str) -> Vec<PathBuf> {
        if path.is_empty() {
            return Vec::new();
        }
        let mut dirs = Vec::new();
        let bytes = path.as_bytes();
        let mut start = 0;
        let mut i = 0;
        while i <= bytes.len() {
            let at_end = i == bytes.len();
            if at_end || bytes[i] == b':' || bytes[i] == b';' {
                // keep `C:` drive letters together with their path
                if !at_end
                    && bytes[i] == b':'
                    && i - start == 1
                    && bytes[start].is_ascii_alphabetic()
                    && cfg!(windows)
                {
                    i += 1;
                    continue;
                }
                let dir = &path[start..i];
                dirs.push(if dir.is_empty() {
                    PathBuf::from(".")
                } else {
                    PathBuf::from(dir)
                });
                start = i + 1;
            }
            i += 1;
        }
        dirs
    }

    pub fn with_search_path(mut self, path: &str) -> Self {
        self.search_path = Self::parse_search_path(path);
        self
    }
}
