use blocklist_core::{ExceptionsList, RuleGroup, RuleSource};
use tokio::sync::mpsc;

use crate::compiled::CompiledRules;
use crate::organize::{OrganizeError, OrganizedRules};
use crate::store::LoadedMetadata;
use crate::traits::RuleManagerObserver;

/// Everything the manager reacts to, applied one at a time in arrival order.
#[derive(Debug)]
pub(crate) enum ManagerEvent {
    // Upstream notifications.
    RuleSourceUpdated(RuleSource),
    RuleSourceDeleted {
        source_id: u32,
        group: RuleGroup,
    },
    ExceptionListStateChanged(RuleGroup),
    ExceptionListChanged {
        group: RuleGroup,
        list: ExceptionsList,
    },

    // Background replies. Each posted job produces exactly one.
    RulesRead {
        source_id: u32,
        rules: Option<CompiledRules>,
    },
    OrganizedRulesLoaded {
        checksum: String,
        metadata: LoadedMetadata,
    },
    OrganizedRulesReady {
        generation: u64,
        /// `None` when the job saw a newer generation and skipped the merge.
        result: Option<Result<OrganizedRules, OrganizeError>>,
    },
    MetadataWritten {
        generation: u64,
        checksum: String,
    },
}

impl ManagerEvent {
    pub(crate) fn is_background_reply(&self) -> bool {
        matches!(
            self,
            ManagerEvent::RulesRead { .. }
                | ManagerEvent::OrganizedRulesLoaded { .. }
                | ManagerEvent::OrganizedRulesReady { .. }
                | ManagerEvent::MetadataWritten { .. }
        )
    }
}

/// Forwards upstream notifications into a manager's event queue.
pub(crate) struct ChannelObserver {
    pub(crate) tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl ChannelObserver {
    fn forward(&self, event: ManagerEvent) {
        // The manager may already be gone; nothing left to notify.
        let _ = self.tx.send(event);
    }
}

impl RuleManagerObserver for ChannelObserver {
    fn on_rule_source_updated(&self, source: &RuleSource) {
        self.forward(ManagerEvent::RuleSourceUpdated(source.clone()));
    }

    fn on_rule_source_deleted(&self, source_id: u32, group: RuleGroup) {
        self.forward(ManagerEvent::RuleSourceDeleted { source_id, group });
    }

    fn on_exception_list_state_changed(&self, group: RuleGroup) {
        self.forward(ManagerEvent::ExceptionListStateChanged(group));
    }

    fn on_exception_list_changed(&self, group: RuleGroup, list: ExceptionsList) {
        self.forward(ManagerEvent::ExceptionListChanged { group, list });
    }
}
