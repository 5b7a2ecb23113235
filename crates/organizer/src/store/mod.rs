mod error;

pub use error::StoreError;

use std::path::{Path, PathBuf};

use blocklist_core::{buffer_checksum, RuleGroup, RULES_FOLDER_NAME};
use serde_json::Value;
use tracing::{debug, warn};

use crate::compiled::{CompiledRuleTree, CompiledRules, INTERMEDIATE_REPRESENTATION_VERSION};
use crate::metadata::{OrganizedMetadata, LEGACY_ORGANIZED_RULES_KEY, ORGANIZED_RULES_VERSION};

/// Fixed name of the organized-rules metadata file.
pub const ORGANIZED_RULES_FILE_NAME: &str = "Organized";

/// Outcome of loading the organized-rules metadata at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedMetadata {
    /// No checksum was published, or the file failed validation.
    Missing,
    /// A file in the old format that embedded the rules themselves.
    Legacy,
    Current(OrganizedMetadata),
}

/// Filesystem layout of one rule group.
///
/// ```text
/// <data_dir>/AdBlockRules/<GroupFolder>/
///   1                  <- compiled rules of source 1
///   2                  <- compiled rules of source 2
///   Organized          <- metadata of the last organized build
/// ```
///
/// Every method does blocking I/O and is meant to run on the background
/// runner. Checksums are computed over raw file bytes and compared against
/// a value held by the caller; they are never stored inside the file.
#[derive(Debug, Clone)]
pub struct RulesStore {
    group_dir: PathBuf,
}

impl RulesStore {
    pub fn new(data_dir: impl AsRef<Path>, group: RuleGroup) -> Self {
        Self {
            group_dir: data_dir
                .as_ref()
                .join(RULES_FOLDER_NAME)
                .join(group.folder_name()),
        }
    }

    pub fn compiled_rules_path(&self, source_id: u32) -> PathBuf {
        self.group_dir.join(source_id.to_string())
    }

    pub fn organized_rules_path(&self) -> PathBuf {
        self.group_dir.join(ORGANIZED_RULES_FILE_NAME)
    }

    // ── Compiled rules (per source) ─────────────────────────────

    /// Load and validate a source's compiled rules.
    pub fn read_compiled_rules(
        &self,
        source_id: u32,
        checksum: &str,
    ) -> Result<CompiledRules, StoreError> {
        let json = read_checked_json(
            &self.compiled_rules_path(source_id),
            checksum,
            INTERMEDIATE_REPRESENTATION_VERSION,
        )?;
        let tree: CompiledRuleTree = serde_json::from_value(json)?;
        debug!(
            source_id,
            block = tree.block_count(),
            allow = tree.allow_count(),
            "compiled rules validated"
        );
        Ok(CompiledRules::new(tree, checksum))
    }

    /// Like [`read_compiled_rules`](Self::read_compiled_rules), but every
    /// failure collapses to `None` after being logged.
    pub fn try_read_compiled_rules(&self, source_id: u32, checksum: &str) -> Option<CompiledRules> {
        match self.read_compiled_rules(source_id, checksum) {
            Ok(rules) => Some(rules),
            Err(e) => {
                warn!(
                    path = %self.compiled_rules_path(source_id).display(),
                    source_id,
                    error = %e,
                    "compiled rules rejected"
                );
                None
            }
        }
    }

    /// Write a source's compiled rules and return the checksum of the
    /// written bytes. This is the producer side of the cache.
    pub fn write_compiled_rules(
        &self,
        source_id: u32,
        tree: &CompiledRuleTree,
    ) -> Result<String, StoreError> {
        let json = serde_json::to_string(tree)?;
        write_file(&self.compiled_rules_path(source_id), &json)?;
        Ok(buffer_checksum(&json))
    }

    // ── Organized metadata ──────────────────────────────────────

    /// Load the metadata file published under `checksum`.
    pub fn load_organized_metadata(&self, checksum: &str) -> LoadedMetadata {
        if checksum.is_empty() {
            return LoadedMetadata::Missing;
        }

        let path = self.organized_rules_path();
        let loaded = read_checked_bytes(&path, checksum)
            .and_then(|bytes| Ok(serde_json::from_slice::<Value>(&bytes)?));
        match loaded {
            Ok(json) => classify_metadata(json),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "organized metadata unusable");
                LoadedMetadata::Missing
            }
        }
    }

    /// Persist `metadata` and return the checksum of the written bytes, or
    /// an empty string if the write failed.
    pub fn write_organized_metadata(&self, metadata: &OrganizedMetadata) -> String {
        let path = self.organized_rules_path();
        let result = serde_json::to_string(metadata)
            .map_err(StoreError::from)
            .and_then(|json| {
                write_file(&path, &json)?;
                Ok(buffer_checksum(&json))
            });
        match result {
            Ok(checksum) => checksum,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to write organized metadata");
                String::new()
            }
        }
    }
}

fn classify_metadata(json: Value) -> LoadedMetadata {
    let Some(object) = json.as_object() else {
        debug!("organized metadata is not an object");
        return LoadedMetadata::Missing;
    };

    // Checked before the version so old files are always recognized.
    if object.contains_key(LEGACY_ORGANIZED_RULES_KEY) {
        return LoadedMetadata::Legacy;
    }

    if let Err(e) = check_version(&json, ORGANIZED_RULES_VERSION) {
        debug!(error = %e, "organized metadata rejected");
        return LoadedMetadata::Missing;
    }

    match serde_json::from_value::<OrganizedMetadata>(json) {
        Ok(metadata) => LoadedMetadata::Current(metadata),
        Err(e) => {
            debug!(error = %e, "organized metadata malformed");
            LoadedMetadata::Missing
        }
    }
}

fn read_checked_bytes(path: &Path, checksum: &str) -> Result<Vec<u8>, StoreError> {
    let bytes = std::fs::read(path)?;
    let actual = buffer_checksum(&bytes);
    if actual != checksum {
        return Err(StoreError::ChecksumMismatch {
            expected: checksum.to_string(),
            actual,
        });
    }
    Ok(bytes)
}

fn read_checked_json(path: &Path, checksum: &str, expected_version: u32) -> Result<Value, StoreError> {
    let bytes = read_checked_bytes(path, checksum)?;
    let json: Value = serde_json::from_slice(&bytes)?;
    check_version(&json, expected_version)?;
    Ok(json)
}

fn check_version(json: &Value, expected: u32) -> Result<(), StoreError> {
    if !json.is_object() {
        return Err(StoreError::Malformed("expected a JSON object".into()));
    }
    let found = json.get("version").and_then(Value::as_u64);
    if found != Some(u64::from(expected)) {
        return Err(StoreError::VersionMismatch { expected, found });
    }
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}
