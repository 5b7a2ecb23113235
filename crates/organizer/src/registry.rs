//! In-memory [`RuleManager`] that owns rule sources and exception lists and
//! broadcasts every change to its observers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use blocklist_core::{ExceptionsList, RuleGroup, RuleSource};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::traits::{ObserverId, RuleManager, RuleManagerObserver};

/// Exception lists of one group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupExceptions {
    #[serde(default)]
    pub active: ExceptionsList,
    #[serde(default)]
    pub exempt_list: BTreeSet<String>,
    #[serde(default)]
    pub process_list: BTreeSet<String>,
}

impl GroupExceptions {
    fn list(&self, list: ExceptionsList) -> &BTreeSet<String> {
        match list {
            ExceptionsList::ExemptList => &self.exempt_list,
            ExceptionsList::ProcessList => &self.process_list,
        }
    }

    fn list_mut(&mut self, list: ExceptionsList) -> &mut BTreeSet<String> {
        match list {
            ExceptionsList::ExemptList => &mut self.exempt_list,
            ExceptionsList::ProcessList => &mut self.process_list,
        }
    }
}

/// Serializable state of a [`RuleRegistry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub sources: Vec<RuleSource>,
    #[serde(default)]
    pub exceptions: BTreeMap<RuleGroup, GroupExceptions>,
}

#[derive(Default)]
struct RegistryState {
    sources: BTreeMap<RuleGroup, BTreeMap<u32, RuleSource>>,
    exceptions: BTreeMap<RuleGroup, GroupExceptions>,
}

type ObserverList = Vec<(ObserverId, Arc<dyn RuleManagerObserver>)>;

/// Upstream registry of rule sources and user exceptions.
///
/// Observers are always called after the internal lock is released, so an
/// observer may query the registry from its callback.
#[derive(Default)]
pub struct RuleRegistry {
    state: Mutex<RegistryState>,
    observers: Mutex<ObserverList>,
    next_observer_id: Mutex<u64>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        let mut state = RegistryState {
            exceptions: snapshot.exceptions,
            ..RegistryState::default()
        };
        for source in snapshot.sources {
            state
                .sources
                .entry(source.group)
                .or_default()
                .insert(source.id, source);
        }
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.lock().expect("registry lock poisoned");
        RegistrySnapshot {
            sources: state
                .sources
                .values()
                .flat_map(|sources| sources.values().cloned())
                .collect(),
            exceptions: state.exceptions.clone(),
        }
    }

    /// Insert or replace a source and notify observers.
    pub fn upsert_source(&self, source: RuleSource) {
        {
            let mut state = self.state.lock().expect("registry lock poisoned");
            state
                .sources
                .entry(source.group)
                .or_default()
                .insert(source.id, source.clone());
        }
        debug!(group = %source.group, source_id = source.id, fetching = source.is_fetching, "rule source updated");
        self.notify(|observer| observer.on_rule_source_updated(&source));
    }

    /// Remove a source. Returns `false` if it was unknown.
    pub fn delete_source(&self, group: RuleGroup, source_id: u32) -> bool {
        let removed = {
            let mut state = self.state.lock().expect("registry lock poisoned");
            state
                .sources
                .get_mut(&group)
                .and_then(|sources| sources.remove(&source_id))
                .is_some()
        };
        if removed {
            info!(group = %group, source_id, "rule source deleted");
            self.notify(|observer| observer.on_rule_source_deleted(source_id, group));
        }
        removed
    }

    /// Switch the active exception list of `group`.
    pub fn set_active_exception_list(&self, group: RuleGroup, list: ExceptionsList) {
        {
            let mut state = self.state.lock().expect("registry lock poisoned");
            let exceptions = state.exceptions.entry(group).or_default();
            if exceptions.active == list {
                return;
            }
            exceptions.active = list;
        }
        info!(group = %group, list = %list, "active exception list changed");
        self.notify(|observer| observer.on_exception_list_state_changed(group));
    }

    /// Replace the contents of one exception list.
    pub fn set_exceptions(&self, group: RuleGroup, list: ExceptionsList, domains: BTreeSet<String>) {
        {
            let mut state = self.state.lock().expect("registry lock poisoned");
            *state.exceptions.entry(group).or_default().list_mut(list) = domains;
        }
        self.notify(|observer| observer.on_exception_list_changed(group, list));
    }

    pub fn add_exception(&self, group: RuleGroup, list: ExceptionsList, domain: impl Into<String>) {
        let inserted = {
            let mut state = self.state.lock().expect("registry lock poisoned");
            state
                .exceptions
                .entry(group)
                .or_default()
                .list_mut(list)
                .insert(domain.into())
        };
        if inserted {
            self.notify(|observer| observer.on_exception_list_changed(group, list));
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().expect("observers lock poisoned").len()
    }

    fn notify(&self, f: impl Fn(&dyn RuleManagerObserver)) {
        let observers: Vec<Arc<dyn RuleManagerObserver>> = self
            .observers
            .lock()
            .expect("observers lock poisoned")
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            f(observer.as_ref());
        }
    }
}

impl RuleManager for RuleRegistry {
    fn rule_sources(&self, group: RuleGroup) -> BTreeMap<u32, RuleSource> {
        let state = self.state.lock().expect("registry lock poisoned");
        state.sources.get(&group).cloned().unwrap_or_default()
    }

    fn active_exception_list(&self, group: RuleGroup) -> ExceptionsList {
        let state = self.state.lock().expect("registry lock poisoned");
        state
            .exceptions
            .get(&group)
            .map(|exceptions| exceptions.active)
            .unwrap_or_default()
    }

    fn exceptions(&self, group: RuleGroup, list: ExceptionsList) -> BTreeSet<String> {
        let state = self.state.lock().expect("registry lock poisoned");
        state
            .exceptions
            .get(&group)
            .map(|exceptions| exceptions.list(list).clone())
            .unwrap_or_default()
    }

    fn add_observer(&self, observer: Arc<dyn RuleManagerObserver>) -> ObserverId {
        let id = {
            let mut next = self.next_observer_id.lock().expect("observer id lock poisoned");
            *next += 1;
            ObserverId(*next)
        };
        self.observers
            .lock()
            .expect("observers lock poisoned")
            .push((id, observer));
        id
    }

    fn remove_observer(&self, id: ObserverId) {
        self.observers
            .lock()
            .expect("observers lock poisoned")
            .retain(|(existing, _)| *existing != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl RuleManagerObserver for Recorder {
        fn on_rule_source_updated(&self, source: &RuleSource) {
            self.events.lock().unwrap().push(format!("updated {}", source.id));
        }
        fn on_rule_source_deleted(&self, source_id: u32, group: RuleGroup) {
            self.events.lock().unwrap().push(format!("deleted {group} {source_id}"));
        }
        fn on_exception_list_state_changed(&self, group: RuleGroup) {
            self.events.lock().unwrap().push(format!("state {group}"));
        }
        fn on_exception_list_changed(&self, group: RuleGroup, list: ExceptionsList) {
            self.events.lock().unwrap().push(format!("list {group} {list}"));
        }
    }

    #[test]
    fn changes_are_broadcast_to_observers() {
        let registry = RuleRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add_observer(recorder.clone());

        registry.upsert_source(RuleSource::new(1, RuleGroup::Tracking, "c"));
        registry.delete_source(RuleGroup::Tracking, 1);
        registry.delete_source(RuleGroup::Tracking, 1);
        registry.set_active_exception_list(RuleGroup::Tracking, ExceptionsList::ProcessList);
        registry.set_active_exception_list(RuleGroup::Tracking, ExceptionsList::ProcessList);
        registry.add_exception(RuleGroup::Tracking, ExceptionsList::ProcessList, "a.com");
        registry.add_exception(RuleGroup::Tracking, ExceptionsList::ProcessList, "a.com");

        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![
                "updated 1",
                "deleted tracking 1",
                "state tracking",
                "list tracking process_list",
            ]
        );
    }

    #[test]
    fn removed_observer_stops_receiving() {
        let registry = RuleRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let id = registry.add_observer(recorder.clone());
        registry.remove_observer(id);
        assert_eq!(registry.observer_count(), 0);

        registry.upsert_source(RuleSource::new(1, RuleGroup::Tracking, "c"));
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[test]
    fn queries_are_scoped_by_group() {
        let registry = RuleRegistry::new();
        registry.upsert_source(RuleSource::new(1, RuleGroup::Tracking, "t"));
        registry.upsert_source(RuleSource::new(1, RuleGroup::AdBlocking, "a"));
        registry.add_exception(RuleGroup::AdBlocking, ExceptionsList::ExemptList, "x.org");

        assert_eq!(registry.rule_sources(RuleGroup::Tracking)[&1].rules_list_checksum, "t");
        assert_eq!(registry.rule_sources(RuleGroup::AdBlocking)[&1].rules_list_checksum, "a");
        assert!(registry
            .exceptions(RuleGroup::Tracking, ExceptionsList::ExemptList)
            .is_empty());
        assert_eq!(
            registry.active_exception_list(RuleGroup::AdBlocking),
            ExceptionsList::ExemptList
        );
    }

    #[test]
    fn snapshot_round_trips() {
        let registry = RuleRegistry::new();
        registry.upsert_source(RuleSource::new(4, RuleGroup::AdBlocking, "x"));
        registry.add_exception(RuleGroup::AdBlocking, ExceptionsList::ProcessList, "b.com");

        let snapshot = registry.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored = RuleRegistry::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.snapshot(), snapshot);
    }
}
