//! Error types shared by the conversion pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed control structure in one script. Fails that script only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message} (`{text}`)")]
pub struct ParseError {
    pub line: usize,
    pub text: String,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, text: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            line,
            text: text.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read registry {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write registry {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse registry {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize registry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Registry version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("{path}: {source}")]
    Structural { path: PathBuf, source: ParseError },

    #[error("Failed to read script {path}: {source}")]
    ScriptRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type Result<T, E = ConvertError> = std::result::Result<T, E>;
