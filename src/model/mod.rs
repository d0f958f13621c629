use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What the registry knows about one converted include.
///
/// The canonical logical path is the registry key, so it is carried
/// alongside rather than serialized into the record body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRecord {
    #[serde(skip)]
    pub canonical_path: String,
    pub procedure_name: String,
    pub physical_source_path: PathBuf,
    /// `sha256:<hex>` over the source bytes.
    pub content_hash: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub consumers: Vec<String>,
    /// Sorted argument names of the generated procedure.
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Include references left out of the procedure because they could not
    /// be resolved or converted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_includes: Vec<String>,
}

impl ConversionRecord {
    /// Stand-in for an include that is still being converted further up
    /// the stack. Its procedure name is the one that conversion will write.
    pub fn placeholder(canonical_path: &str, procedure_name: &str, physical: PathBuf) -> Self {
        Self {
            canonical_path: canonical_path.to_string(),
            procedure_name: procedure_name.to_string(),
            physical_source_path: physical,
            content_hash: String::new(),
            dependencies: Vec::new(),
            consumers: Vec::new(),
            parameters: Vec::new(),
            dropped_includes: Vec::new(),
        }
    }
}

/// A resolved include as seen by the emitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeTarget {
    pub procedure_name: String,
    pub parameters: Vec<String>,
}

impl From<&ConversionRecord> for IncludeTarget {
    fn from(record: &ConversionRecord) -> Self {
        Self {
            procedure_name: record.procedure_name.clone(),
            parameters: record.parameters.clone(),
        }
    }
}

/// Recoverable problems. Recorded in the summary, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    UnresolvedInclude {
        logical_path: String,
        includer: PathBuf,
    },
    CyclicInclude {
        canonical_path: String,
        chain: Vec<String>,
    },
    UnparsableCondition {
        script: PathBuf,
        line: usize,
        text: String,
    },
    /// An include failed to parse; the reference to it was dropped.
    BrokenInclude {
        logical_path: String,
        includer: PathBuf,
        reason: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::UnresolvedInclude {
                logical_path,
                includer,
            } => write!(
                f,
                "unresolved include `{logical_path}` in {}",
                includer.display()
            ),
            Warning::CyclicInclude {
                canonical_path,
                chain,
            } => write!(
                f,
                "cyclic include `{canonical_path}` via {}",
                chain.join(" -> ")
            ),
            Warning::UnparsableCondition { script, line, text } => write!(
                f,
                "{}:{line}: unparsable condition `{text}` treated as always true",
                script.display()
            ),
            Warning::BrokenInclude {
                logical_path,
                includer,
                reason,
            } => write!(
                f,
                "include `{logical_path}` in {} dropped: {reason}",
                includer.display()
            ),
        }
    }
}

/// Result of converting one top-level script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// Procedures written during this run, top-level one included.
    pub generated_procedure_count: usize,
    /// Distinct includes reached from the top-level script.
    pub include_count: usize,
    pub warnings: Vec<Warning>,
    pub output_path: PathBuf,
}

impl Summary {
    pub fn unresolved_includes(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, Warning::UnresolvedInclude { .. }))
            .count()
    }
}
