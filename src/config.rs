//! Converter settings.
//!
//! Loaded from an optional TOML file; every key has a default so an empty
//! file (or no file at all) is valid. CLI flags are applied on top.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root under which canonical (root-prefixed) include paths live.
    pub script_root: PathBuf,
    /// Active version string substituted for the placeholder.
    pub version: String,
    pub version_placeholder: String,
    /// First segment of canonical logical paths, stripped when resolving
    /// under `script_root`.
    pub root_prefix: String,
    pub registry_path: PathBuf,
    /// Name prefix for top-level procedures.
    pub procedure_prefix: String,
    /// Re-convert includes even when the registry says they are current.
    pub force: bool,
    /// Turn unparsable guards into parse errors instead of always-true branches.
    pub strict_conditions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            script_root: PathBuf::from("."),
            version: "latest".to_string(),
            version_placeholder: "GLOBAL:VERSION".to_string(),
            root_prefix: "testcase".to_string(),
            registry_path: PathBuf::from("conversion_registry.json"),
            procedure_prefix: "test_".to_string(),
            force: false,
            strict_conditions: false,
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Parsing converter config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Loading {}", path.display()))
    }
}
