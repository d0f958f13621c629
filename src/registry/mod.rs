//! Conversion registry
//!
//! Records which includes have already been converted, to which procedure,
//! from which source bytes, and which top-level scripts consume them. The
//! whole registry is one JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "created": "2026-01-15T10:30:00Z",
//!   "updated": "2026-01-15T10:31:12Z",
//!   "records": {
//!     "testcase/7.4/common/setup.txt": {
//!       "procedure_name": "inc_7_4_common_setup",
//!       "physical_source_path": "scripts/7.4/common/setup.txt",
//!       "content_hash": "sha256:9f86d0…",
//!       "dependencies": [],
//!       "consumers": ["scripts/7.4/ips/basic.txt"],
//!       "parameters": ["port"]
//!     }
//!   }
//! }
//! ```
//!
//! One process owns a registry file at a time. Every mutation is saved
//! straight away; concurrent writers are not coordinated and the last
//! writer wins.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::model::ConversionRecord;

/// Current registry format version
pub const REGISTRY_VERSION: u32 = 1;

type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryDocument {
    version: u32,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    #[serde(default)]
    records: BTreeMap<String, ConversionRecord>,
}

impl RegistryDocument {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            version: REGISTRY_VERSION,
            created: now,
            updated: now,
            records: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
pub struct Registry {
    /// `None` keeps everything in memory.
    path: Option<PathBuf>,
    doc: RegistryDocument,
}

/// `sha256:<hex>` of a script's source bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

impl Registry {
    /// Load the registry at `path`. A missing file is an empty registry;
    /// nothing is written until the first mutation.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match fs::read_to_string(&path) {
            Ok(text) => {
                let mut doc: RegistryDocument =
                    serde_json::from_str(&text).map_err(|source| RegistryError::Parse {
                        path: path.clone(),
                        source,
                    })?;
                if doc.version != REGISTRY_VERSION {
                    return Err(RegistryError::VersionMismatch {
                        expected: REGISTRY_VERSION,
                        found: doc.version,
                    });
                }
                for (key, record) in doc.records.iter_mut() {
                    record.canonical_path = key.clone();
                }
                info!(
                    "Loaded {} conversion records from {}",
                    doc.records.len(),
                    path.display()
                );
                doc
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No registry at {}, starting empty", path.display());
                RegistryDocument::new()
            }
            Err(source) => return Err(RegistryError::Read { path, source }),
        };
        Ok(Self {
            path: Some(path),
            doc,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: RegistryDocument::new(),
        }
    }

    pub fn get(&self, canonical_path: &str) -> Option<&ConversionRecord> {
        self.doc.records.get(canonical_path)
    }

    pub fn records(&self) -> impl Iterator<Item = &ConversionRecord> {
        self.doc.records.values()
    }

    pub fn len(&self) -> usize {
        self.doc.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.records.is_empty()
    }

    /// The record (if any) already using `procedure_name`.
    pub fn find_by_procedure(&self, procedure_name: &str) -> Option<&ConversionRecord> {
        self.records().find(|r| r.procedure_name == procedure_name)
    }

    /// Insert or overwrite the record under its canonical path, then save.
    pub fn put(&mut self, record: ConversionRecord) -> Result<()> {
        debug!(
            "registry: {} -> {}",
            record.canonical_path, record.procedure_name
        );
        self.doc
            .records
            .insert(record.canonical_path.clone(), record);
        self.save()
    }

    /// Append `consumer` to the record's consumers unless already present.
    /// Returns whether anything changed; saves only on change.
    pub fn mark_consumer(&mut self, canonical_path: &str, consumer: &str) -> Result<bool> {
        let Some(record) = self.doc.records.get_mut(canonical_path) else {
            return Ok(false);
        };
        if record.consumers.iter().any(|c| c == consumer) {
            return Ok(false);
        }
        record.consumers.push(consumer.to_string());
        self.save()?;
        Ok(true)
    }

    /// Persist the whole document: write a temp file, then rename it over
    /// the registry so readers never see a half-written file.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        self.doc.updated = Utc::now();
        let json = serde_json::to_string_pretty(&self.doc)?;

        let write = |path: &Path| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let temp_path = path.with_extension("json.tmp");
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&temp_path, path)
        };
        write(&path).map_err(|source| RegistryError::Write {
            path: path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, proc: &str) -> ConversionRecord {
        ConversionRecord {
            canonical_path: key.into(),
            procedure_name: proc.into(),
            physical_source_path: PathBuf::from(format!("scripts/{key}")),
            content_hash: content_hash(key.as_bytes()),
            dependencies: vec![],
            consumers: vec![],
            parameters: vec!["port".into()],
            dropped_includes: vec![],
        }
    }

    #[test]
    fn test_content_hash_format() {
        assert_eq!(
            content_hash(b"test"),
            "sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn test_missing_file_is_empty_and_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let reg = Registry::load(&path).unwrap();
        assert!(reg.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_put_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/registry.json");

        let mut reg = Registry::load(&path).unwrap();
        reg.put(record("testcase/7.4/a.txt", "inc_7_4_a")).unwrap();
        assert!(path.is_file());
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = Registry::load(&path).unwrap();
        assert_eq!(
            reloaded.get("testcase/7.4/a.txt"),
            Some(&record("testcase/7.4/a.txt", "inc_7_4_a"))
        );
        assert_eq!(
            reloaded.find_by_procedure("inc_7_4_a").map(|r| r.canonical_path.as_str()),
            Some("testcase/7.4/a.txt")
        );
    }

    #[test]
    fn test_mark_consumer_is_idempotent() {
        let mut reg = Registry::in_memory();
        reg.put(record("a.txt", "inc_a")).unwrap();

        assert!(reg.mark_consumer("a.txt", "main.txt").unwrap());
        assert!(!reg.mark_consumer("a.txt", "main.txt").unwrap());
        assert!(reg.mark_consumer("a.txt", "other.txt").unwrap());
        assert!(!reg.mark_consumer("missing.txt", "main.txt").unwrap());

        assert_eq!(
            reg.get("a.txt").unwrap().consumers,
            vec!["main.txt".to_string(), "other.txt".to_string()]
        );
    }

    #[test]
    fn test_put_overwrites() {
        let mut reg = Registry::in_memory();
        reg.put(record("a.txt", "inc_a")).unwrap();
        let mut newer = record("a.txt", "inc_a");
        newer.content_hash = content_hash(b"changed");
        reg.put(newer.clone()).unwrap();

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("a.txt"), Some(&newer));
    }

    #[test]
    fn test_corrupt_and_future_documents_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Registry::load(&path),
            Err(RegistryError::Parse { .. })
        ));

        fs::write(
            &path,
            r#"{"version": 99, "created": "2026-01-01T00:00:00Z", "updated": "2026-01-01T00:00:00Z", "records": {}}"#,
        )
        .unwrap();
        assert!(matches!(
            Registry::load(&path),
            Err(RegistryError::VersionMismatch {
                expected: 1,
                found: 99
            })
        ));
    }
}
