//! Shared fixture for organizer integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use blocklist_core::config::OrganizerConfig;
use blocklist_core::{BuildResult, RuleGroup, RuleSource};
use blocklist_organizer::{
    CompiledRuleTree, CompiledRules, ContentRuleListInstaller, ManagerContext, OrganizeError,
    OrganizedRules, OrganizedRulesManager, OrganizedRulesObserver, Organizer, RuleRegistry,
    RulesOrganizer, RulesStore, TaskRunner,
};
use serde_json::{json, Value};

pub const GROUP: RuleGroup = RuleGroup::Tracking;

pub fn block_rule(filter: &str) -> Value {
    json!({"action": {"type": "block"}, "trigger": {"url-filter": filter}})
}

pub fn allow_rule(filter: &str) -> Value {
    json!({"action": {"type": "ignore-previous-rules"}, "trigger": {"url-filter": filter}})
}

// ── Recorders ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Install {
    Lists(Vec<Value>),
    ApplyLoaded,
}

#[derive(Default)]
pub struct InstallLog(Mutex<Vec<Install>>);

impl InstallLog {
    pub fn all(&self) -> Vec<Install> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<Install> {
        self.0.lock().unwrap().last().cloned()
    }

    pub fn last_lists(&self) -> Option<Vec<Value>> {
        self.0.lock().unwrap().iter().rev().find_map(|install| match install {
            Install::Lists(lists) => Some(lists.clone()),
            Install::ApplyLoaded => None,
        })
    }
}

pub struct RecordingInstaller(pub Arc<InstallLog>);

impl ContentRuleListInstaller for RecordingInstaller {
    fn install_content_rule_lists(&mut self, lists: Vec<Value>) {
        self.0 .0.lock().unwrap().push(Install::Lists(lists));
    }

    fn apply_loaded_rules(&mut self) {
        self.0 .0.lock().unwrap().push(Install::ApplyLoaded);
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub changes: Mutex<Vec<(RuleGroup, BuildResult, String)>>,
    pub read_failures: Mutex<Vec<(RuleGroup, u32)>>,
}

impl RecordingObserver {
    pub fn last_change(&self) -> Option<(RuleGroup, BuildResult, String)> {
        self.changes.lock().unwrap().last().cloned()
    }
}

impl OrganizedRulesObserver for RecordingObserver {
    fn on_organized_rules_changed(&self, group: RuleGroup, build_result: BuildResult, checksum: &str) {
        self.changes
            .lock()
            .unwrap()
            .push((group, build_result, checksum.to_string()));
    }

    fn on_compiled_rules_read_failed(&self, group: RuleGroup, source_id: u32) {
        self.read_failures.lock().unwrap().push((group, source_id));
    }
}

/// Counts merges and delegates to [`RulesOrganizer`].
pub struct CountingOrganizer {
    inner: RulesOrganizer,
    calls: AtomicUsize,
}

impl CountingOrganizer {
    pub fn new(limits: OrganizerConfig) -> Self {
        Self {
            inner: RulesOrganizer::new(limits),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Organizer for CountingOrganizer {
    fn organize(
        &self,
        compiled_rules: &BTreeMap<u32, Arc<CompiledRules>>,
        exception_rule: Option<&Value>,
    ) -> Result<OrganizedRules, OrganizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.organize(compiled_rules, exception_rule)
    }
}

// ── Fixture ─────────────────────────────────────────────────────────

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub registry: Arc<RuleRegistry>,
    pub organizer: Arc<CountingOrganizer>,
    pub observer: Arc<RecordingObserver>,
    pub installs: Arc<InstallLog>,
    pub context: ManagerContext,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_limits(OrganizerConfig::default())
    }

    /// Must be called from within a tokio runtime.
    pub fn with_limits(limits: OrganizerConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(RuleRegistry::new());
        let organizer = Arc::new(CountingOrganizer::new(limits));
        let observer = Arc::new(RecordingObserver::default());
        let context = ManagerContext {
            rule_manager: registry.clone(),
            organizer: organizer.clone(),
            observer: observer.clone(),
            runner: TaskRunner::spawn(),
            data_dir: dir.path().to_path_buf(),
        };
        Self {
            dir,
            registry,
            organizer,
            observer,
            installs: Arc::new(InstallLog::default()),
            context,
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn store(&self) -> RulesStore {
        RulesStore::new(self.data_dir(), GROUP)
    }

    /// Write compiled rules for `id` without telling the registry.
    pub fn write_rules(&self, id: u32, block: &[&str], allow: &[&str]) -> RuleSource {
        let tree = CompiledRuleTree::new(
            block.iter().map(|f| block_rule(f)).collect(),
            allow.iter().map(|f| allow_rule(f)).collect(),
        );
        let checksum = self.store().write_compiled_rules(id, &tree).unwrap();
        RuleSource::new(id, GROUP, checksum)
    }

    /// Write compiled rules for `id` and publish the source.
    pub fn add_source(&self, id: u32, block: &[&str], allow: &[&str]) -> RuleSource {
        let source = self.write_rules(id, block, allow);
        self.registry.upsert_source(source.clone());
        source
    }

    pub fn manager(&self, published_checksum: &str) -> OrganizedRulesManager {
        OrganizedRulesManager::new(
            &self.context,
            GROUP,
            Box::new(RecordingInstaller(self.installs.clone())),
            published_checksum,
        )
    }

    /// Build a manager and let it settle.
    pub async fn started_manager(&self, published_checksum: &str) -> OrganizedRulesManager {
        let mut manager = self.manager(published_checksum);
        manager.run_until_idle().await;
        manager
    }

    pub fn organize_calls(&self) -> usize {
        self.organizer.calls()
    }
}

/// Whether any list in `lists` contains `rule`.
pub fn lists_contain(lists: &[Value], rule: &Value) -> bool {
    lists
        .iter()
        .filter_map(Value::as_array)
        .any(|list| list.contains(rule))
}
