//! Organizes per-source compiled content-blocker rules into installable
//! rule lists and keeps them in sync with their sources.
//!
//! The entry point is [`OrganizedRulesManager`], one per [`RuleGroup`]
//! (see [`RuleService`] for both). It mirrors the sources of an upstream
//! [`RuleManager`], caches each source's validated compiled rules, compiles
//! the user's exception list into one rule, and rebuilds the organized
//! lists whenever any of those inputs change. Published builds are
//! recorded in a metadata file so an unchanged setup is reused on the next
//! start instead of being rebuilt.
//!
//! [`RuleGroup`]: blocklist_core::RuleGroup

pub mod compiled;
pub mod exceptions;
pub mod manager;
pub mod metadata;
pub mod organize;
pub mod registry;
pub mod runner;
pub mod service;
pub mod state;
pub mod store;
pub mod traits;

pub use compiled::{CompiledRuleTree, CompiledRules, NetworkRules};
pub use exceptions::compile_exceptions_rule;
pub use manager::{ManagerContext, OrganizedRulesManager};
pub use metadata::OrganizedMetadata;
pub use organize::{OrganizeError, OrganizedRules, Organizer, RulesOrganizer};
pub use registry::{GroupExceptions, RegistrySnapshot, RuleRegistry};
pub use runner::TaskRunner;
pub use service::RuleService;
pub use state::{FileStateStore, OrganizerState, StateStoreError};
pub use store::{LoadedMetadata, RulesStore, StoreError};
pub use traits::{
    ContentRuleListInstaller, ObserverId, OrganizedRulesObserver, RuleManager, RuleManagerObserver,
};
