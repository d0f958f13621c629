//! Include resolution and recursive include conversion.
//!
//! A logical path is turned into a physical file by trying, in order:
//!
//! 1. the path as written, relative to the includer's directory;
//! 2. just its file name, relative to the includer's directory;
//! 3. root prefix stripped and version placeholder substituted, under the
//!    script root;
//! 4. as 3 but with the version segment dropped.
//!
//! Converted includes are keyed by their *canonical* path (placeholder
//! substituted, `.`/`..` folded) so different spellings share one record.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{Converted, Converter, StackFrame, block_parser, classifier, sanitize};
use crate::config::Config;
use crate::error::{ConvertError, Result};
use crate::model::{ConversionRecord, Warning};
use crate::registry::content_hash;
use crate::writer::{self, python};

/// Fold `.`/`..`, unify separators, drop empty segments.
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for seg in unified.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

pub fn substitute_version(logical: &str, config: &Config) -> String {
    logical.replace(&config.version_placeholder, &config.version)
}

/// `path` without its leading root-prefix segment, if it has one.
pub fn strip_root_prefix<'p>(path: &'p str, config: &Config) -> Option<&'p str> {
    path.strip_prefix(config.root_prefix.as_str())?
        .strip_prefix('/')
}

/// Logical path with the placeholder (or already-substituted version) segment removed.
pub fn without_version_segment(logical: &str, config: &Config) -> String {
    logical
        .replace('\\', "/")
        .split('/')
        .filter(|seg| *seg != config.version_placeholder && *seg != config.version)
        .collect::<Vec<_>>()
        .join("/")
}

/// Candidate files for `logical` in resolution order.
pub fn candidates(logical: &str, includer: &Path, config: &Config) -> Vec<PathBuf> {
    let base = includer.parent().unwrap_or_else(|| Path::new(""));
    let mut out = vec![base.join(logical)];

    if let Some(file_name) = Path::new(&logical.replace('\\', "/")).file_name() {
        out.push(base.join(file_name));
    }

    out.extend(rooted_candidates(logical, config));
    out
}

/// The script-root candidates (3 and 4) for `logical`.
fn rooted_candidates(logical: &str, config: &Config) -> [PathBuf; 2] {
    let substituted = normalize(&substitute_version(logical, config));
    let versioned = strip_root_prefix(&substituted, config).unwrap_or(&substituted);

    let unversioned = normalize(&without_version_segment(logical, config));
    let plain = strip_root_prefix(&unversioned, config).unwrap_or(&unversioned);

    [
        config.script_root.join(versioned),
        config.script_root.join(plain),
    ]
}

/// Upper bound on re-conversion passes for one include cycle.
const MAX_CYCLE_PASSES: usize = 8;

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn short_hash(text: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(text.as_bytes()));
    digest[..8].to_string()
}

impl Converter<'_> {
    /// First existing file among the candidates for `logical`.
    pub fn resolve(&self, logical: &str, includer: &Path) -> Option<PathBuf> {
        let found = candidates(logical, includer, &self.config)
            .into_iter()
            .enumerate()
            .find(|(_, candidate)| candidate.is_file());
        match found {
            Some((attempt, path)) => {
                debug!(
                    "include `{logical}` resolved by attempt {} to {}",
                    attempt + 1,
                    path.display()
                );
                Some(path)
            }
            None => None,
        }
    }

    /// Registry key for an include.
    ///
    /// A path rooted at the root prefix uses the substituted logical path,
    /// but only when it resolved to its file under the script root. Any
    /// other file is keyed by where it sits under the script root, falling
    /// back to its normalized physical path.
    pub fn canonical_path(&self, logical: &str, physical: &Path) -> String {
        let file = absolute(physical);
        let substituted = normalize(&substitute_version(logical, &self.config));
        if strip_root_prefix(&substituted, &self.config).is_some()
            && rooted_candidates(logical, &self.config)
                .iter()
                .any(|candidate| absolute(candidate) == file)
        {
            return substituted;
        }

        let root = absolute(&self.config.script_root);
        match file.strip_prefix(&root) {
            Ok(rel) => normalize(&format!(
                "{}/{}",
                self.config.root_prefix,
                rel.to_string_lossy()
            )),
            Err(_) => normalize(&file.to_string_lossy()),
        }
    }

    /// Procedure name for `canonical`: stable across runs, unique across
    /// the registry and the in-progress stack.
    fn procedure_name_for(&self, canonical: &str, stack: &[StackFrame]) -> String {
        if let Some(record) = self.registry.get(canonical) {
            return record.procedure_name.clone();
        }

        let trimmed = strip_root_prefix(canonical, &self.config).unwrap_or(canonical);
        let without_ext = match trimmed.rsplit_once('.') {
            Some((head, ext)) if !ext.contains('/') && !head.is_empty() => head,
            _ => trimmed,
        };
        let base = format!("{}{}", python::INCLUDE_PREFIX, sanitize(without_ext));

        let taken = self
            .registry
            .find_by_procedure(&base)
            .is_some_and(|r| r.canonical_path != canonical)
            || stack
                .iter()
                .any(|f| f.procedure_name == base && f.canonical_path != canonical);
        if taken {
            format!("{base}_{}", short_hash(canonical))
        } else {
            base
        }
    }

    /// Convert the include at `physical`, or reuse the registry record when
    /// it is current. `stack` holds the includes being converted further up;
    /// meeting one of them again is a cycle and ends the recursion.
    pub fn convert_include(
        &mut self,
        logical: &str,
        physical: &Path,
        stack: &mut Vec<StackFrame>,
    ) -> Result<Converted> {
        let canonical = self.canonical_path(logical, physical);

        if let Some(pos) = stack.iter().position(|f| f.canonical_path == canonical) {
            let mut chain: Vec<String> =
                stack[pos..].iter().map(|f| f.canonical_path.clone()).collect();
            chain.push(canonical.clone());
            let joined = chain.join(" -> ");
            if self.push_warning(Warning::CyclicInclude {
                canonical_path: canonical.clone(),
                chain,
            }) {
                warn!("cyclic include: {joined}");
            }

            let record = match self.registry.get(&canonical) {
                Some(existing) => existing.clone(),
                None => ConversionRecord::placeholder(
                    &canonical,
                    &stack[pos].procedure_name,
                    physical.to_path_buf(),
                ),
            };
            self.handed_out
                .entry(canonical)
                .or_default()
                .push(record.parameters.clone());
            return Ok(Converted {
                record,
                fresh: false,
            });
        }

        if let Some(done) = self.visited.get(&canonical) {
            return Ok(done.clone());
        }

        let bytes = fs::read(physical).map_err(|source| ConvertError::ScriptRead {
            path: physical.to_path_buf(),
            source,
        })?;
        let hash = content_hash(&bytes);
        let procedure_name = self.procedure_name_for(&canonical, stack);

        // Includes that reach back into this one were given the record as it
        // stood then. If the finished conversion's parameters differ, the
        // cycle is converted again so the callers forward the right arguments.
        let mark = self.visit_log.len();
        let mut passes = 0;
        let converted = loop {
            stack.push(StackFrame {
                canonical_path: canonical.clone(),
                procedure_name: procedure_name.clone(),
            });
            let result =
                self.convert_include_framed(&canonical, &procedure_name, physical, &bytes, &hash, stack);
            stack.pop();
            let converted = result?;
            passes += 1;

            let stale = self
                .handed_out
                .remove(&canonical)
                .is_some_and(|handed| handed.iter().any(|p| *p != converted.record.parameters));
            if !stale {
                break converted;
            }
            if passes >= MAX_CYCLE_PASSES {
                warn!("{canonical}: include cycle did not settle after {passes} passes");
                break converted;
            }
            debug!("{canonical}: re-converting cycle with settled parameters");
            for key in self.visit_log.drain(mark..) {
                self.visited.remove(&key);
            }
        };

        self.reached.insert(canonical.clone());
        self.visit_log.push(canonical.clone());
        self.visited.insert(canonical, converted.clone());
        Ok(converted)
    }

    fn convert_include_framed(
        &mut self,
        canonical: &str,
        procedure_name: &str,
        physical: &Path,
        bytes: &[u8],
        hash: &str,
        stack: &mut Vec<StackFrame>,
    ) -> Result<Converted> {
        if let Some(record) = self.reusable_record(canonical, physical, hash, stack)? {
            debug!("{canonical} is up to date as {}", record.procedure_name);
            self.registry.mark_consumer(canonical, &self.consumer)?;
            let record = self.registry.get(canonical).cloned().unwrap_or(record);
            return Ok(Converted {
                record,
                fresh: false,
            });
        }

        info!("Converting include {canonical} -> {procedure_name}");
        let text = String::from_utf8_lossy(bytes);
        let nodes = block_parser::parse_with(&text, self.config.strict_conditions).map_err(
            |source| ConvertError::Structural {
                path: physical.to_path_buf(),
                source,
            },
        )?;
        self.note_unparsable_guards(&nodes, physical);

        let children = self.convert_children(&nodes, physical, stack)?;
        let classes = classifier::classify(&text);
        let procedure = python::emit(procedure_name, &nodes, &classes, &children.includes);
        let path = writer::procedure_path(&self.output_dir, procedure_name);
        self.write_procedure(&procedure, canonical, &path)?;

        let mut consumers = self
            .registry
            .get(canonical)
            .map(|r| r.consumers.clone())
            .unwrap_or_default();
        if !consumers.contains(&self.consumer) {
            consumers.push(self.consumer.clone());
        }

        let record = ConversionRecord {
            canonical_path: canonical.to_string(),
            procedure_name: procedure_name.to_string(),
            physical_source_path: physical.to_path_buf(),
            content_hash: hash.to_string(),
            dependencies: children.dependencies,
            consumers,
            parameters: procedure.parameters,
            dropped_includes: children.dropped,
        };
        self.registry.put(record.clone())?;

        Ok(Converted {
            record,
            fresh: true,
        })
    }

    /// The registry record for `canonical` if it can be used as is: same
    /// source hash, procedure file present, force off, no dropped includes,
    /// and none of its dependencies re-converted or changed signature.
    fn reusable_record(
        &mut self,
        canonical: &str,
        physical: &Path,
        hash: &str,
        stack: &mut Vec<StackFrame>,
    ) -> Result<Option<ConversionRecord>> {
        if self.config.force {
            return Ok(None);
        }
        let Some(existing) = self.registry.get(canonical).cloned() else {
            return Ok(None);
        };
        if existing.content_hash != hash
            || absolute(&existing.physical_source_path) != absolute(physical)
            || !writer::procedure_path(&self.output_dir, &existing.procedure_name).is_file()
        {
            return Ok(None);
        }
        // a dropped include may resolve now, and must be reported again if not
        if !existing.dropped_includes.is_empty() {
            debug!(
                "{canonical} dropped {} include(s) last time, re-converting",
                existing.dropped_includes.len()
            );
            return Ok(None);
        }

        for dep in &existing.dependencies {
            let Some(dep_record) = self.registry.get(dep).cloned() else {
                return Ok(None);
            };
            let converted =
                match self.convert_include(dep, &dep_record.physical_source_path, stack) {
                    Ok(converted) => converted,
                    Err(ConvertError::Structural { .. } | ConvertError::ScriptRead { .. }) => {
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                };
            // the emitted call forwards the dependency's parameters, so they
            // must all be among ours
            let forwarded = converted
                .record
                .parameters
                .iter()
                .all(|p| existing.parameters.contains(p));
            if converted.fresh || !forwarded {
                return Ok(None);
            }
        }

        Ok(Some(existing))
    }
}
