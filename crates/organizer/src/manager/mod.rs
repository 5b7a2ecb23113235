//! [`OrganizedRulesManager`]: keeps one group's organized rules in sync with
//! its rule sources and exception list.
//!
//! The manager is a single-owner state machine. Upstream notifications and
//! the replies of background jobs arrive on one queue and are applied in
//! order by [`run`](OrganizedRulesManager::run) or
//! [`run_until_idle`](OrganizedRulesManager::run_until_idle). Background
//! jobs only ever see snapshots of the manager's state.
//!
//! Rebuilds are coalesced with a generation counter: every call to
//! [`reorganize_rules`](OrganizedRulesManager::reorganize_rules) bumps it, a
//! queued rebuild that sees a newer generation when it starts skips the
//! merge, and a result that comes back stale is dropped.

mod events;

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use blocklist_core::{BuildResult, ExceptionsList, RuleGroup, RuleSource};
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::compiled::CompiledRules;
use crate::exceptions::compile_exceptions_rule;
use crate::organize::{OrganizeError, OrganizedRules, Organizer};
use crate::runner::TaskRunner;
use crate::store::{LoadedMetadata, RulesStore};
use crate::traits::{ContentRuleListInstaller, ObserverId, OrganizedRulesObserver, RuleManager};

pub(crate) use events::ManagerEvent;
use events::ChannelObserver;

/// Collaborators shared by the managers of every group.
#[derive(Clone)]
pub struct ManagerContext {
    pub rule_manager: Arc<dyn RuleManager>,
    pub organizer: Arc<dyn Organizer>,
    pub observer: Arc<dyn OrganizedRulesObserver>,
    pub runner: TaskRunner,
    /// Root under which `AdBlockRules/<group>/` lives.
    pub data_dir: PathBuf,
}

/// Owns the organized rules of one [`RuleGroup`].
pub struct OrganizedRulesManager {
    group: RuleGroup,
    rule_manager: Arc<dyn RuleManager>,
    observer_id: ObserverId,
    installer: Box<dyn ContentRuleListInstaller>,
    observer: Arc<dyn OrganizedRulesObserver>,
    organizer: Arc<dyn Organizer>,
    runner: TaskRunner,
    store: RulesStore,

    is_loaded: bool,
    build_result: BuildResult,
    rule_sources: BTreeMap<u32, RuleSource>,
    compiled_rules: BTreeMap<u32, Arc<CompiledRules>>,
    exception_rule: Option<Arc<Value>>,
    organized_rules_checksum: String,

    generation: Arc<AtomicU64>,
    pending_replies: usize,
    events_tx: mpsc::UnboundedSender<ManagerEvent>,
    events_rx: mpsc::UnboundedReceiver<ManagerEvent>,
}

impl OrganizedRulesManager {
    /// Create the manager for `group` and start loading.
    ///
    /// `organized_rules_checksum` is the checksum published by the previous
    /// run (empty if none). Every source's compiled rules are read, then the
    /// metadata file is checked against them; a match re-activates the
    /// previously installed lists without rebuilding.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        context: &ManagerContext,
        group: RuleGroup,
        installer: Box<dyn ContentRuleListInstaller>,
        organized_rules_checksum: &str,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let observer_id = context.rule_manager.add_observer(Arc::new(ChannelObserver {
            tx: events_tx.clone(),
        }));
        let rule_sources = context.rule_manager.rule_sources(group);

        let mut manager = Self {
            group,
            rule_manager: context.rule_manager.clone(),
            observer_id,
            installer,
            observer: context.observer.clone(),
            organizer: context.organizer.clone(),
            runner: context.runner.clone(),
            store: RulesStore::new(&context.data_dir, group),
            is_loaded: false,
            build_result: BuildResult::Success,
            rule_sources,
            compiled_rules: BTreeMap::new(),
            exception_rule: None,
            organized_rules_checksum: String::new(),
            generation: Arc::new(AtomicU64::new(0)),
            pending_replies: 0,
            events_tx,
            events_rx,
        };

        manager.update_exceptions();

        let sources: Vec<RuleSource> = manager.rule_sources.values().cloned().collect();
        for source in &sources {
            manager.read_compiled_rules(source);
        }

        // Queued behind the reads above, so it is handled once they are.
        let store = manager.store.clone();
        let checksum = organized_rules_checksum.to_string();
        let fallback = ManagerEvent::OrganizedRulesLoaded {
            checksum: checksum.clone(),
            metadata: LoadedMetadata::Missing,
        };
        manager.post(fallback, move || {
            let metadata = store.load_organized_metadata(&checksum);
            ManagerEvent::OrganizedRulesLoaded { checksum, metadata }
        });

        info!(group = %group, sources = sources.len(), "organized rules manager created");
        manager
    }

    pub fn group(&self) -> RuleGroup {
        self.group
    }

    /// Checksum of the last organized build that was durably written.
    /// Empty until one has been, and after the group gets disabled.
    pub fn organized_rules_checksum(&self) -> &str {
        &self.organized_rules_checksum
    }

    pub fn build_result(&self) -> BuildResult {
        self.build_result
    }

    /// Whether the startup load has completed.
    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    /// Checksum of the cached compiled rules of `source_id`, if any.
    pub fn compiled_rules_checksum(&self, source_id: u32) -> Option<&str> {
        self.compiled_rules.get(&source_id).map(|rules| rules.checksum())
    }

    pub fn compiled_rules_count(&self) -> usize {
        self.compiled_rules.len()
    }

    pub fn exception_rule(&self) -> Option<&Value> {
        self.exception_rule.as_deref()
    }

    // ── Event loop ──────────────────────────────────────────────

    /// Apply queued events until `shutdown` is notified.
    pub async fn run(&mut self, shutdown: &Notify) {
        let shutdown = shutdown.notified();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                _ = &mut shutdown => break,
            }
        }
        debug!(group = %self.group, "organized rules manager stopped");
    }

    /// Apply queued events until no background job is outstanding and the
    /// queue is empty.
    pub async fn run_until_idle(&mut self) {
        loop {
            while let Ok(event) = self.events_rx.try_recv() {
                self.handle_event(event);
            }
            if self.pending_replies == 0 {
                break;
            }
            match self.events_rx.recv().await {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
    }

    /// Number of posted background jobs whose reply has not been applied.
    pub fn pending_replies(&self) -> usize {
        self.pending_replies
    }

    pub(crate) fn handle_event(&mut self, event: ManagerEvent) {
        if event.is_background_reply() {
            self.pending_replies = self.pending_replies.saturating_sub(1);
        }

        match event {
            ManagerEvent::RuleSourceUpdated(source) => self.on_rule_source_updated(source),
            ManagerEvent::RuleSourceDeleted { source_id, group } => {
                self.on_rule_source_deleted(source_id, group)
            }
            ManagerEvent::ExceptionListStateChanged(group) => {
                self.on_exception_list_state_changed(group)
            }
            ManagerEvent::ExceptionListChanged { group, list } => {
                self.on_exception_list_changed(group, list)
            }
            ManagerEvent::RulesRead { source_id, rules } => self.on_rules_read(source_id, rules),
            ManagerEvent::OrganizedRulesLoaded { checksum, metadata } => {
                self.on_organized_rules_loaded(checksum, metadata)
            }
            ManagerEvent::OrganizedRulesReady { generation, result } => {
                self.on_organized_rules_ready(generation, result)
            }
            ManagerEvent::MetadataWritten {
                generation,
                checksum,
            } => self.on_metadata_written(generation, checksum),
        }
    }

    /// Run `job` on the background runner. Its reply is always delivered:
    /// if the job panics, `fallback` is sent in its place.
    fn post(&mut self, fallback: ManagerEvent, job: impl FnOnce() -> ManagerEvent + Send + 'static) {
        let tx = self.events_tx.clone();
        let group = self.group;
        let posted = self.runner.post(move || {
            let reply = panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|_| {
                error!(group = %group, "background job panicked, sending failure reply");
                fallback
            });
            let _ = tx.send(reply);
        });
        if posted {
            self.pending_replies += 1;
        } else {
            warn!(group = %self.group, "task runner unavailable, job dropped");
        }
    }

    // ── Upstream notifications ──────────────────────────────────

    fn on_rule_source_updated(&mut self, source: RuleSource) {
        if source.group != self.group || source.is_fetching {
            return;
        }
        self.read_compiled_rules(&source);
        self.rule_sources.insert(source.id, source);
    }

    fn on_rule_source_deleted(&mut self, source_id: u32, group: RuleGroup) {
        if group != self.group {
            return;
        }
        self.rule_sources.remove(&source_id);
        self.compiled_rules.remove(&source_id);
        debug!(group = %self.group, source_id, "rule source removed");
        self.reorganize_rules();
    }

    fn on_exception_list_state_changed(&mut self, group: RuleGroup) {
        if group != self.group {
            return;
        }
        self.update_exceptions();
    }

    fn on_exception_list_changed(&mut self, group: RuleGroup, list: ExceptionsList) {
        if group != self.group {
            return;
        }
        if self.rule_manager.active_exception_list(self.group) == list {
            self.update_exceptions();
        }
    }

    // ── Compiled-rule cache ─────────────────────────────────────

    fn read_compiled_rules(&mut self, source: &RuleSource) {
        if self.compiled_rules_checksum(source.id) == Some(source.rules_list_checksum.as_str()) {
            // Checksum unchanged, nothing to reload.
            return;
        }

        let store = self.store.clone();
        let source_id = source.id;
        let checksum = source.rules_list_checksum.clone();
        let fallback = ManagerEvent::RulesRead {
            source_id,
            rules: None,
        };
        self.post(fallback, move || ManagerEvent::RulesRead {
            source_id,
            rules: store.try_read_compiled_rules(source_id, &checksum),
        });
    }

    fn on_rules_read(&mut self, source_id: u32, rules: Option<CompiledRules>) {
        if !self.rule_sources.contains_key(&source_id) {
            debug!(group = %self.group, source_id, "source removed while its rules were read");
            return;
        }

        let Some(rules) = rules else {
            // Keep serving the previous rules, if any, until a recompile lands.
            self.observer.on_compiled_rules_read_failed(self.group, source_id);
            return;
        };

        debug!(group = %self.group, source_id, checksum = %rules.checksum(), "compiled rules loaded");
        self.compiled_rules.insert(source_id, Arc::new(rules));
        self.reorganize_rules();
    }

    // ── Exceptions ──────────────────────────────────────────────

    fn update_exceptions(&mut self) {
        let active_list = self.rule_manager.active_exception_list(self.group);
        let exceptions = self.rule_manager.exceptions(self.group, active_list);
        self.exception_rule = compile_exceptions_rule(&exceptions, active_list).map(Arc::new);
        debug!(
            group = %self.group,
            list = %active_list,
            exceptions = exceptions.len(),
            "exception rule updated"
        );
        self.reorganize_rules();
    }

    // ── Rebuild ─────────────────────────────────────────────────

    /// Request a rebuild from the current sources, compiled rules and
    /// exception rule, replacing any rebuild that has not started yet.
    pub fn reorganize_rules(&mut self) {
        if !self.is_loaded {
            // The first build happens once loading completes.
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if self.rule_sources.is_empty() {
            self.disable();
            return;
        }

        if self.rule_manager.active_exception_list(self.group) == ExceptionsList::ProcessList
            && self.exception_rule.is_none()
        {
            info!(group = %self.group, "process list is empty, disabling filtering");
            self.disable();
            return;
        }

        let compiled_rules = self.compiled_rules.clone();
        let exception_rule = self.exception_rule.clone();
        let organizer = self.organizer.clone();
        let current_generation = self.generation.clone();
        let fallback = ManagerEvent::OrganizedRulesReady {
            generation,
            result: None,
        };
        self.post(fallback, move || {
            if current_generation.load(Ordering::SeqCst) != generation {
                return ManagerEvent::OrganizedRulesReady {
                    generation,
                    result: None,
                };
            }
            let result = organizer.organize(&compiled_rules, exception_rule.as_deref());
            ManagerEvent::OrganizedRulesReady {
                generation,
                result: Some(result),
            }
        });
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn on_organized_rules_ready(
        &mut self,
        generation: u64,
        result: Option<Result<OrganizedRules, OrganizeError>>,
    ) {
        if generation != self.current_generation() {
            debug!(group = %self.group, generation, "discarding stale rebuild");
            return;
        }
        let Some(result) = result else {
            // A current rebuild never skips, so the merge itself failed.
            warn!(group = %self.group, generation, "rebuild produced no result, keeping installed rules");
            return;
        };

        let organized = match result {
            Ok(organized) => organized,
            Err(e) => {
                // Both variants mean the allow rules do not fit.
                warn!(group = %self.group, error = %e, "organized rules rejected, keeping installed rules");
                self.build_result = BuildResult::TooManyAllowRules;
                self.notify_changed();
                return;
            }
        };

        self.build_result = BuildResult::Success;
        info!(
            group = %self.group,
            lists = organized.rule_lists.len(),
            sources = organized.metadata.list_checksums.len(),
            "installing organized rules"
        );
        self.installer.install_content_rule_lists(organized.rule_lists);

        let store = self.store.clone();
        let metadata = organized.metadata;
        let fallback = ManagerEvent::MetadataWritten {
            generation,
            checksum: String::new(),
        };
        self.post(fallback, move || ManagerEvent::MetadataWritten {
            generation,
            checksum: store.write_organized_metadata(&metadata),
        });
    }

    fn on_metadata_written(&mut self, generation: u64, checksum: String) {
        if checksum.is_empty() {
            // Installed rules stay; the stale published checksum makes the
            // next start rebuild.
            warn!(group = %self.group, "organized metadata not saved");
            return;
        }
        if generation != self.current_generation() {
            debug!(group = %self.group, generation, "discarding stale metadata checksum");
            return;
        }

        info!(group = %self.group, checksum = %checksum, "organized rules saved");
        self.organized_rules_checksum = checksum;
        self.notify_changed();
    }

    // ── Startup reconciliation ──────────────────────────────────

    fn on_organized_rules_loaded(&mut self, checksum: String, metadata: LoadedMetadata) {
        self.is_loaded = true;

        if self.rule_sources.is_empty() {
            self.disable();
            return;
        }

        let metadata = match metadata {
            LoadedMetadata::Missing => {
                debug!(group = %self.group, "no usable organized metadata, rebuilding");
                self.reorganize_rules();
                return;
            }
            LoadedMetadata::Legacy => {
                // Rules installed by that format can't be trusted.
                info!(group = %self.group, "legacy organized rules found, starting fresh");
                self.installer.install_content_rule_lists(Vec::new());
                self.reorganize_rules();
                return;
            }
            LoadedMetadata::Current(metadata) => metadata,
        };

        if !metadata.matches(&self.compiled_rules, self.exception_rule.as_deref()) {
            info!(group = %self.group, "organized rules out of date, rebuilding");
            self.reorganize_rules();
            return;
        }

        info!(group = %self.group, checksum = %checksum, "reusing organized rules from previous run");
        self.installer.apply_loaded_rules();
        self.build_result = BuildResult::Success;
        self.organized_rules_checksum = checksum;
        self.notify_changed();
    }

    fn disable(&mut self) {
        debug!(group = %self.group, "installing empty rule list");
        self.installer.install_content_rule_lists(Vec::new());
        self.build_result = BuildResult::Success;
        self.organized_rules_checksum.clear();
        self.notify_changed();
    }

    fn notify_changed(&self) {
        self.observer.on_organized_rules_changed(
            self.group,
            self.build_result,
            &self.organized_rules_checksum,
        );
    }
}

impl Drop for OrganizedRulesManager {
    fn drop(&mut self) {
        self.rule_manager.remove_observer(self.observer_id);
    }
}
