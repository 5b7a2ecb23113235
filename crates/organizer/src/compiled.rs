use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version of per-source compiled-rule files.
///
/// Files carrying any other version are treated as missing.
pub const INTERMEDIATE_REPRESENTATION_VERSION: u32 = 1;

/// Network rules of one source, split by action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkRules {
    #[serde(default)]
    pub block: Vec<Value>,
    #[serde(default)]
    pub allow: Vec<Value>,
}

/// Intermediate representation of one rule source, as written by the
/// external compiler.
///
/// Individual rules are opaque content-blocker JSON objects; the organizer
/// only cares whether they block or allow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledRuleTree {
    pub version: u32,
    #[serde(default)]
    pub network: NetworkRules,
    /// Element-hiding rules. They never allow anything, so they are
    /// organized alongside network block rules.
    #[serde(default)]
    pub cosmetic: Vec<Value>,
}

impl CompiledRuleTree {
    pub fn new(block: Vec<Value>, allow: Vec<Value>) -> Self {
        Self {
            version: INTERMEDIATE_REPRESENTATION_VERSION,
            network: NetworkRules { block, allow },
            cosmetic: Vec::new(),
        }
    }

    pub fn with_cosmetic(mut self, cosmetic: Vec<Value>) -> Self {
        self.cosmetic = cosmetic;
        self
    }

    pub fn block_count(&self) -> usize {
        self.network.block.len() + self.cosmetic.len()
    }

    pub fn allow_count(&self) -> usize {
        self.network.allow.len()
    }
}

/// A validated, immutable copy of one source's compiled rules.
///
/// Shared through `Arc` between the cache and background snapshots.
#[derive(Debug, PartialEq)]
pub struct CompiledRules {
    content: CompiledRuleTree,
    checksum: String,
}

impl CompiledRules {
    pub fn new(content: CompiledRuleTree, checksum: impl Into<String>) -> Self {
        Self {
            content,
            checksum: checksum.into(),
        }
    }

    pub fn content(&self) -> &CompiledRuleTree {
        &self.content
    }

    /// Checksum of the file bytes this value was loaded from.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}
