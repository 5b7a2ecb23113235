//! [`RuleService`]: one [`OrganizedRulesManager`] per rule group, sharing a
//! task runner, an organizer and a state observer.

use std::sync::Arc;

use blocklist_core::{BuildResult, Config, RuleGroup};
use tokio::sync::Notify;
use tracing::info;

use crate::manager::{ManagerContext, OrganizedRulesManager};
use crate::organize::RulesOrganizer;
use crate::runner::TaskRunner;
use crate::state::FileStateStore;
use crate::traits::{ContentRuleListInstaller, RuleManager};

pub struct RuleService {
    tracking: OrganizedRulesManager,
    ad_blocking: OrganizedRulesManager,
}

impl RuleService {
    /// Start both managers. `initial_checksum` returns the checksum each
    /// group published in the previous run.
    pub fn new(
        context: &ManagerContext,
        initial_checksum: impl Fn(RuleGroup) -> String,
        mut installer_for: impl FnMut(RuleGroup) -> Box<dyn ContentRuleListInstaller>,
    ) -> Self {
        let mut start = |group: RuleGroup| {
            OrganizedRulesManager::new(context, group, installer_for(group), &initial_checksum(group))
        };
        let tracking = start(RuleGroup::Tracking);
        let ad_blocking = start(RuleGroup::AdBlocking);
        Self {
            tracking,
            ad_blocking,
        }
    }

    /// Wire the default organizer and a fresh runner from `config`, with
    /// `state` both seeding the initial checksums and receiving updates.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(
        config: &Config,
        rule_manager: Arc<dyn RuleManager>,
        state: Arc<FileStateStore>,
        installer_for: impl FnMut(RuleGroup) -> Box<dyn ContentRuleListInstaller>,
    ) -> Self {
        let context = ManagerContext {
            rule_manager,
            organizer: Arc::new(RulesOrganizer::new(config.organizer)),
            observer: state.clone(),
            runner: TaskRunner::spawn(),
            data_dir: config.storage.data_dir.clone(),
        };
        info!(
            data_dir = %config.storage.data_dir.display(),
            max_rules_per_list = config.organizer.max_rules_per_list,
            max_allow_rules = config.organizer.max_allow_rules,
            "starting rule service"
        );
        Self::new(&context, |group| state.index_checksum(group), installer_for)
    }

    pub fn manager(&self, group: RuleGroup) -> &OrganizedRulesManager {
        match group {
            RuleGroup::Tracking => &self.tracking,
            RuleGroup::AdBlocking => &self.ad_blocking,
        }
    }

    pub fn rules_checksum(&self, group: RuleGroup) -> &str {
        self.manager(group).organized_rules_checksum()
    }

    pub fn build_result(&self, group: RuleGroup) -> BuildResult {
        self.manager(group).build_result()
    }

    pub fn is_loaded(&self) -> bool {
        self.tracking.is_loaded() && self.ad_blocking.is_loaded()
    }

    /// Drive both managers until neither has outstanding work.
    pub async fn run_until_idle(&mut self) {
        tokio::join!(self.tracking.run_until_idle(), self.ad_blocking.run_until_idle());
    }

    /// Drive both managers until `shutdown` is notified.
    pub async fn run(&mut self, shutdown: &Notify) {
        tokio::join!(self.tracking.run(shutdown), self.ad_blocking.run(shutdown));
        info!("rule service stopped");
    }
}
