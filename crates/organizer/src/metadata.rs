use std::collections::BTreeMap;
use std::sync::Arc;

use blocklist_core::buffer_checksum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compiled::CompiledRules;

/// Schema version of the organized-rules metadata file.
pub const ORGANIZED_RULES_VERSION: u32 = 1;

/// Key only present in files written before metadata was split from the
/// rules themselves.
pub const LEGACY_ORGANIZED_RULES_KEY: &str = "organized_rules";

/// Describes which inputs an organized artifact was built from.
///
/// Persisted next to the compiled rules. The checksum of the written bytes
/// is what gets published; on startup the file is only trusted if it still
/// describes the current inputs exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizedMetadata {
    pub version: u32,
    /// Source id → checksum of the compiled rules that went into the build.
    pub list_checksums: BTreeMap<u32, String>,
    /// Checksum of the serialized exception rule, if there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_rule: Option<String>,
}

impl OrganizedMetadata {
    pub fn new(
        compiled_rules: &BTreeMap<u32, Arc<CompiledRules>>,
        exception_rule: Option<&Value>,
    ) -> Self {
        Self {
            version: ORGANIZED_RULES_VERSION,
            list_checksums: list_checksums(compiled_rules),
            exception_rule: exception_rule.map(exception_rule_checksum),
        }
    }

    /// Whether an artifact built from this metadata is still valid for the
    /// given inputs: same version, same source ids with the same checksums,
    /// and the same exception rule (or lack of one).
    pub fn matches(
        &self,
        compiled_rules: &BTreeMap<u32, Arc<CompiledRules>>,
        exception_rule: Option<&Value>,
    ) -> bool {
        if self.version != ORGANIZED_RULES_VERSION {
            return false;
        }

        if self.list_checksums.len() != compiled_rules.len() {
            return false;
        }
        let lists_match = self.list_checksums.iter().all(|(id, checksum)| {
            compiled_rules
                .get(id)
                .is_some_and(|rules| rules.checksum() == checksum)
        });
        if !lists_match {
            return false;
        }

        match (&self.exception_rule, exception_rule) {
            (None, None) => true,
            (Some(stored), Some(current)) => *stored == exception_rule_checksum(current),
            _ => false,
        }
    }
}

fn list_checksums(compiled_rules: &BTreeMap<u32, Arc<CompiledRules>>) -> BTreeMap<u32, String> {
    compiled_rules
        .iter()
        .map(|(id, rules)| (*id, rules.checksum().to_string()))
        .collect()
}

/// Checksum of the compact JSON form of an exception rule.
pub fn exception_rule_checksum(rule: &Value) -> String {
    buffer_checksum(rule.to_string())
}
