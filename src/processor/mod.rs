//! The conversion pipeline.
//!
//! parse → resolve includes (recursively converting them) → emit → register,
//! for one top-level script at a time.
pub mod ast;
pub mod block_parser;
pub mod classifier;
pub mod lexer;
pub mod resolver;

pub use ast::Script;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ConvertError, Result};
use crate::model::{ConversionRecord, IncludeTarget, Summary, Warning};
use crate::registry::Registry;
use crate::writer::{self, python};
use ast::{Guard, Node};

/// Outcome of converting (or reusing) one include.
#[derive(Debug, Clone)]
pub struct Converted {
    pub record: ConversionRecord,
    /// The procedure was (re)generated during this run.
    pub fresh: bool,
}

/// What converting the includes of one script produced.
#[derive(Debug, Default)]
struct Children {
    /// Logical path → procedure, for the emitter.
    includes: BTreeMap<String, IncludeTarget>,
    /// Canonical paths of the converted includes, in first-reference order.
    dependencies: Vec<String>,
    /// Logical paths that were unresolved or failed to convert.
    dropped: Vec<String>,
}

/// An include whose conversion is in progress further up the call chain.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub canonical_path: String,
    pub procedure_name: String,
}

/// Drives conversion of top-level scripts against one registry.
pub struct Converter<'r> {
    config: Config,
    registry: &'r mut Registry,
    output_dir: PathBuf,
    /// Id recorded as consumer on every include reached.
    consumer: String,
    warnings: Vec<Warning>,
    /// Includes already settled during the current top-level conversion.
    visited: HashMap<String, Converted>,
    /// Insertion order of `visited`, so a cycle pass can be rolled back.
    visit_log: Vec<String>,
    /// Parameters handed out for includes met again while still on the stack.
    handed_out: HashMap<String, Vec<Vec<String>>>,
    reached: BTreeSet<String>,
    /// Module files written, so cycle passes rewriting one count once.
    written: BTreeSet<PathBuf>,
}

impl<'r> Converter<'r> {
    pub fn new(config: Config, registry: &'r mut Registry) -> Self {
        Self {
            config,
            registry,
            output_dir: PathBuf::new(),
            consumer: String::new(),
            warnings: Vec::new(),
            visited: HashMap::new(),
            visit_log: Vec::new(),
            handed_out: HashMap::new(),
            reached: BTreeSet::new(),
            written: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// Load `path` and convert it; its logical path is the path as given.
    pub fn convert_file(&mut self, path: &Path, output_dir: &Path) -> Result<Summary> {
        let script =
            Script::load(path.display().to_string(), path).map_err(|source| {
                ConvertError::ScriptRead {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        self.convert_script(&script, output_dir)
    }

    /// Convert one top-level script into `<output_dir>/<procedure>.py`,
    /// converting every include it reaches into the `procedures` package.
    pub fn convert_script(&mut self, script: &Script, output_dir: &Path) -> Result<Summary> {
        self.output_dir = output_dir.to_path_buf();
        self.consumer = script.logical_path.clone();
        self.warnings.clear();
        self.visited.clear();
        self.visit_log.clear();
        self.handed_out.clear();
        self.reached.clear();
        self.written.clear();

        info!("Converting {}", script.physical_path.display());

        let nodes = block_parser::parse_with(&script.text, self.config.strict_conditions)
            .map_err(|source| ConvertError::Structural {
                path: script.physical_path.clone(),
                source,
            })?;
        self.note_unparsable_guards(&nodes, &script.physical_path);

        writer::ensure_package(&self.output_dir).map_err(|source| ConvertError::Output {
            path: writer::package_dir(&self.output_dir),
            source,
        })?;

        let mut stack = Vec::new();
        let children = self.convert_children(&nodes, &script.physical_path, &mut stack)?;

        let classes = classifier::classify(&script.text);
        let name = self.top_level_name(&script.physical_path);
        let procedure = python::emit(&name, &nodes, &classes, &children.includes);
        let output_path = writer::top_level_path(&self.output_dir, &name);
        self.write_procedure(&procedure, &script.logical_path, &output_path)?;

        let summary = Summary {
            generated_procedure_count: self.written.len(),
            include_count: self.reached.len(),
            warnings: std::mem::take(&mut self.warnings),
            output_path,
        };
        info!(
            "{}: {} procedures generated, {} includes, {} warnings",
            script.logical_path,
            summary.generated_procedure_count,
            summary.include_count,
            summary.warnings.len()
        );
        Ok(summary)
    }

    /// Resolve and convert every include in `nodes`.
    ///
    /// Includes that cannot be resolved or parsed are dropped with a warning.
    fn convert_children(
        &mut self,
        nodes: &[Node],
        includer: &Path,
        stack: &mut Vec<StackFrame>,
    ) -> Result<Children> {
        let mut children = Children::default();

        for logical in Node::include_refs(nodes) {
            if children.includes.contains_key(logical)
                || children.dropped.iter().any(|d| d == logical)
            {
                continue;
            }
            let Some(physical) = self.resolve(logical, includer) else {
                let warning = Warning::UnresolvedInclude {
                    logical_path: logical.to_string(),
                    includer: includer.to_path_buf(),
                };
                if self.push_warning(warning) {
                    warn!(
                        "include `{logical}` in {} not found, dropping it",
                        includer.display()
                    );
                }
                children.dropped.push(logical.to_string());
                continue;
            };

            match self.convert_include(logical, &physical, stack) {
                Ok(converted) => {
                    let canonical = converted.record.canonical_path.clone();
                    children
                        .includes
                        .insert(logical.to_string(), IncludeTarget::from(&converted.record));
                    if !children.dependencies.contains(&canonical) {
                        children.dependencies.push(canonical);
                    }
                }
                Err(e @ (ConvertError::Structural { .. } | ConvertError::ScriptRead { .. })) => {
                    let warning = Warning::BrokenInclude {
                        logical_path: logical.to_string(),
                        includer: includer.to_path_buf(),
                        reason: e.to_string(),
                    };
                    if self.push_warning(warning) {
                        warn!("include `{logical}` in {} dropped: {e}", includer.display());
                    }
                    children.dropped.push(logical.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(children)
    }

    /// Record a warning once; returns whether it was new.
    fn push_warning(&mut self, warning: Warning) -> bool {
        if self.warnings.contains(&warning) {
            return false;
        }
        self.warnings.push(warning);
        true
    }

    fn note_unparsable_guards(&mut self, nodes: &[Node], script: &Path) {
        for (guard, line) in Node::guards(nodes) {
            if let Guard::Unparsable(text) = guard {
                let warning = Warning::UnparsableCondition {
                    script: script.to_path_buf(),
                    line,
                    text: text.clone(),
                };
                if self.push_warning(warning) {
                    warn!(
                        "{}:{line}: unparsable condition `{text}`, branch is always taken",
                        script.display()
                    );
                }
            }
        }
    }

    fn top_level_name(&self, physical: &Path) -> String {
        let stem = physical
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}{}", self.config.procedure_prefix, sanitize(&stem))
    }

    fn write_procedure(
        &mut self,
        procedure: &python::Procedure,
        origin: &str,
        path: &Path,
    ) -> Result<()> {
        writer::write_if_changed(path, &procedure.render_module(origin)).map_err(|source| {
            ConvertError::Output {
                path: path.to_path_buf(),
                source,
            }
        })?;
        self.written.insert(path.to_path_buf());
        Ok(())
    }
}

/// Lower-case identifier fragment: runs of anything but `[a-z0-9]` become `_`.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        let test_cases = vec![
            ("7.4/common/setup", "7_4_common_setup"),
            ("My-Test  Case", "my_test_case"),
            ("__x__", "x"),
            ("", ""),
        ];
        for (input, expected) in test_cases {
            assert_eq!(sanitize(input), expected);
        }
    }

    #[test]
    fn test_structural_error_fails_only_that_script() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::in_memory();
        let mut conv = Converter::new(Config::default(), &mut registry);

        let bad = Script {
            text: "show\n<fi>\n".into(),
            logical_path: "bad.txt".into(),
            physical_path: dir.path().join("bad.txt"),
        };
        let err = conv.convert_script(&bad, dir.path()).unwrap_err();
        match err {
            ConvertError::Structural { source, .. } => assert_eq!(source.line, 2),
            other => panic!("expected structural error, got {other:?}"),
        }

        let good = Script {
            text: "show\n".into(),
            logical_path: "good.txt".into(),
            physical_path: dir.path().join("good.txt"),
        };
        let summary = conv.convert_script(&good, dir.path()).unwrap();
        assert_eq!(summary.generated_procedure_count, 1);
        assert!(dir.path().join("test_good.py").is_file());
    }

    #[test]
    fn test_unparsable_guard_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::in_memory();
        let mut conv = Converter::new(Config::default(), &mut registry);

        let script = Script {
            text: "<if oops>\nshow\n<fi>\n".into(),
            logical_path: "s.txt".into(),
            physical_path: dir.path().join("s.txt"),
        };
        let summary = conv.convert_script(&script, dir.path()).unwrap();

        assert_eq!(summary.warnings.len(), 1);
        assert!(matches!(
            &summary.warnings[0],
            Warning::UnparsableCondition { line: 1, text, .. } if text == "oops"
        ));
        let out = std::fs::read_to_string(summary.output_path).unwrap();
        assert!(out.contains("    if True:\n"));
    }
}
