use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::group::RuleGroup;

/// One independently-updatable origin of filter rules.
///
/// Owned by the upstream rule manager; the organizer only mirrors it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSource {
    /// Unique within `group`; also the compiled-rules file name.
    pub id: u32,
    pub group: RuleGroup,
    /// A fetch is running; the compiled file may be mid-rewrite.
    #[serde(default)]
    pub is_fetching: bool,
    /// Checksum of the compiled-rules file produced by the last fetch.
    #[serde(default)]
    pub rules_list_checksum: String,
}

impl RuleSource {
    pub fn new(id: u32, group: RuleGroup, rules_list_checksum: impl Into<String>) -> Self {
        Self {
            id,
            group,
            is_fetching: false,
            rules_list_checksum: rules_list_checksum.into(),
        }
    }
}

/// Which user exception list is active for a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionsList {
    /// Allow-list: filtering runs everywhere except on the listed sites.
    #[default]
    ExemptList,
    /// Allow-only: filtering runs only on the listed sites.
    ProcessList,
}

impl ExceptionsList {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionsList::ExemptList => "exempt_list",
            ExceptionsList::ProcessList => "process_list",
        }
    }
}

impl fmt::Display for ExceptionsList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExceptionsList {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exempt_list" | "exempt" => Ok(ExceptionsList::ExemptList),
            "process_list" | "process" => Ok(ExceptionsList::ProcessList),
            other => Err(CoreError::UnknownExceptionsList(other.to_string())),
        }
    }
}

/// Outcome of the latest organize pass, reported to observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildResult {
    #[default]
    Success,
    TooManyAllowRules,
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildResult::Success => f.write_str("success"),
            BuildResult::TooManyAllowRules => f.write_str("too_many_allow_rules"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_source_defaults_when_fields_missing() {
        let source: RuleSource = serde_json::from_str(r#"{"id": 7, "group": "tracking"}"#).unwrap();
        assert_eq!(source.id, 7);
        assert!(!source.is_fetching);
        assert!(source.rules_list_checksum.is_empty());
    }

    #[test]
    fn exceptions_list_parses_short_names() {
        assert_eq!("process".parse::<ExceptionsList>().unwrap(), ExceptionsList::ProcessList);
        assert!("everything".parse::<ExceptionsList>().is_err());
    }
}
