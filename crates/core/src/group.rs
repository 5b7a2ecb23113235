use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Name of the directory holding every group's rule files.
pub const RULES_FOLDER_NAME: &str = "AdBlockRules";

/// Independent partition of the filtering pipeline.
///
/// Each group has its own sources, compiled-rule cache and organized
/// artifact; nothing is shared between groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleGroup {
    Tracking,
    AdBlocking,
}

impl RuleGroup {
    pub const ALL: [RuleGroup; 2] = [RuleGroup::Tracking, RuleGroup::AdBlocking];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleGroup::Tracking => "tracking",
            RuleGroup::AdBlocking => "ad_blocking",
        }
    }

    /// Per-group directory name under [`RULES_FOLDER_NAME`].
    pub fn folder_name(&self) -> &'static str {
        match self {
            RuleGroup::Tracking => "TrackerBlocking",
            RuleGroup::AdBlocking => "AdBlocking",
        }
    }
}

impl fmt::Display for RuleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleGroup {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tracking" => Ok(RuleGroup::Tracking),
            "ad_blocking" | "adblocking" => Ok(RuleGroup::AdBlocking),
            other => Err(CoreError::UnknownRuleGroup(other.to_string())),
        }
    }
}
