//! Seams between the organizer and its collaborators.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use blocklist_core::{BuildResult, ExceptionsList, RuleGroup, RuleSource};
use serde_json::Value;

/// Token returned by [`RuleManager::add_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Change notifications published by the upstream rule manager.
///
/// All methods default to no-ops so observers only implement what they use.
pub trait RuleManagerObserver: Send + Sync {
    /// A source was added or its fetch state/checksum changed.
    fn on_rule_source_updated(&self, _source: &RuleSource) {}

    fn on_rule_source_deleted(&self, _source_id: u32, _group: RuleGroup) {}

    /// The active exception list of `group` was switched.
    fn on_exception_list_state_changed(&self, _group: RuleGroup) {}

    /// The contents of one exception list of `group` changed.
    fn on_exception_list_changed(&self, _group: RuleGroup, _list: ExceptionsList) {}
}

/// Upstream owner of rule sources and user exceptions.
pub trait RuleManager: Send + Sync {
    fn rule_sources(&self, group: RuleGroup) -> BTreeMap<u32, RuleSource>;

    fn active_exception_list(&self, group: RuleGroup) -> ExceptionsList;

    fn exceptions(&self, group: RuleGroup, list: ExceptionsList) -> BTreeSet<String>;

    fn add_observer(&self, observer: Arc<dyn RuleManagerObserver>) -> ObserverId;

    fn remove_observer(&self, id: ObserverId);
}

/// Receives the organized rule lists of one group.
pub trait ContentRuleListInstaller: Send {
    /// Replace every installed list with `lists`. An empty vector disables
    /// filtering for the group.
    fn install_content_rule_lists(&mut self, lists: Vec<Value>);

    /// Activate the lists that were installed before the last restart.
    fn apply_loaded_rules(&mut self);
}

/// Outbound notifications of an organizer, typically wired to the state
/// store.
pub trait OrganizedRulesObserver: Send + Sync {
    /// Fired after every completed, skipped or rejected rebuild.
    /// `checksum` is the currently published artifact checksum.
    fn on_organized_rules_changed(&self, group: RuleGroup, build_result: BuildResult, checksum: &str);

    /// A source's compiled rules failed validation; the source likely needs
    /// recompiling.
    fn on_compiled_rules_read_failed(&self, group: RuleGroup, source_id: u32);
}
