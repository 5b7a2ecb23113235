//! Merges every source's compiled rules and the exception rule into the
//! content rule lists handed to the installer.
//!
//! WebKit evaluates each list independently and an allow
//! (`ignore-previous-rules`) rule only affects rules that precede it in the
//! same list. Every list therefore carries its share of block rules followed
//! by *all* allow rules and finally the exception rule. The allow rules are
//! repeated per list, which is why their total is capped.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use blocklist_core::config::OrganizerConfig;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::compiled::CompiledRules;
use crate::metadata::OrganizedMetadata;

/// Why an organize pass produced no artifact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrganizeError {
    #[error("too many allow rules: {count} exceeds limit of {limit}")]
    TooManyAllowRules { count: usize, limit: usize },

    /// Every list would be filled by the repeated allow rules alone.
    #[error("{allow_count} allow rules leave no room for block rules in lists of {max_rules_per_list}")]
    NoRoomForBlockRules {
        allow_count: usize,
        max_rules_per_list: usize,
    },
}

/// Output of a successful organize pass.
#[derive(Debug, Clone, PartialEq)]
pub struct OrganizedRules {
    /// Installable lists, each a JSON array of content-blocker rules.
    pub rule_lists: Vec<Value>,
    pub metadata: OrganizedMetadata,
}

/// Merge strategy used by the organizer.
///
/// Runs on the background runner. Implementations must be deterministic
/// and must never return partial output.
pub trait Organizer: Send + Sync {
    fn organize(
        &self,
        compiled_rules: &BTreeMap<u32, Arc<CompiledRules>>,
        exception_rule: Option<&Value>,
    ) -> Result<OrganizedRules, OrganizeError>;
}

/// Default [`Organizer`] targeting WebKit content rule lists.
#[derive(Debug, Clone, Default)]
pub struct RulesOrganizer {
    limits: OrganizerConfig,
}

impl RulesOrganizer {
    pub fn new(limits: OrganizerConfig) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &OrganizerConfig {
        &self.limits
    }
}

impl Organizer for RulesOrganizer {
    fn organize(
        &self,
        compiled_rules: &BTreeMap<u32, Arc<CompiledRules>>,
        exception_rule: Option<&Value>,
    ) -> Result<OrganizedRules, OrganizeError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut block_rules: Vec<&Value> = Vec::new();
        let mut allow_rules: Vec<&Value> = Vec::new();

        // BTreeMap iteration keeps source order stable across runs.
        for rules in compiled_rules.values() {
            let tree = rules.content();
            for rule in tree.network.block.iter().chain(tree.cosmetic.iter()) {
                if seen.insert(rule.to_string()) {
                    block_rules.push(rule);
                }
            }
            for rule in &tree.network.allow {
                if seen.insert(rule.to_string()) {
                    allow_rules.push(rule);
                }
            }
        }

        let allow_count = allow_rules.len() + usize::from(exception_rule.is_some());
        if allow_count > self.limits.max_allow_rules {
            return Err(OrganizeError::TooManyAllowRules {
                count: allow_count,
                limit: self.limits.max_allow_rules,
            });
        }

        let block_capacity = self.limits.max_rules_per_list.saturating_sub(allow_count);
        if block_capacity == 0 {
            return Err(OrganizeError::NoRoomForBlockRules {
                allow_count,
                max_rules_per_list: self.limits.max_rules_per_list,
            });
        }

        let rule_lists: Vec<Value> = block_rules
            .chunks(block_capacity)
            .map(|chunk| {
                let mut list: Vec<Value> = Vec::with_capacity(chunk.len() + allow_count);
                list.extend(chunk.iter().map(|rule| (*rule).clone()));
                list.extend(allow_rules.iter().map(|rule| (*rule).clone()));
                if let Some(exception) = exception_rule {
                    list.push(exception.clone());
                }
                Value::Array(list)
            })
            .collect();

        debug!(
            sources = compiled_rules.len(),
            block = block_rules.len(),
            allow = allow_count,
            lists = rule_lists.len(),
            "organized rules"
        );

        Ok(OrganizedRules {
            rule_lists,
            metadata: OrganizedMetadata::new(compiled_rules, exception_rule),
        })
    }
}
