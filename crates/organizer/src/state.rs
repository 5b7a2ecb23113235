//! Persisted organizer state: the last published organized-rules checksum
//! per group. Fed back into the managers on the next start so they can
//! reuse the installed lists.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use blocklist_core::{BuildResult, RuleGroup};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::traits::OrganizedRulesObserver;

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported state version {found}, expected {STATE_VERSION}")]
    UnsupportedVersion { found: u32 },
}

/// On-disk shape of the state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizerState {
    pub version: u32,
    /// Published organized-rules checksum per group.
    #[serde(default)]
    pub index_checksums: BTreeMap<RuleGroup, String>,
    #[serde(default)]
    pub build_results: BTreeMap<RuleGroup, BuildResult>,
    /// RFC 3339 timestamp of the last write.
    pub updated_at: String,
}

impl Default for OrganizerState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            index_checksums: BTreeMap::new(),
            build_results: BTreeMap::new(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }
}

/// JSON-file backed [`OrganizedRulesObserver`].
///
/// Every reported change is written through immediately. Source ids whose
/// compiled rules failed to load are kept in memory for the caller to
/// schedule recompiles.
pub struct FileStateStore {
    path: PathBuf,
    state: Mutex<OrganizerState>,
    read_failures: Mutex<Vec<(RuleGroup, u32)>>,
}

impl FileStateStore {
    /// Open the state file at `path`. A missing file yields empty state.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateStoreError> {
        let path = path.into();
        let state = if path.exists() {
            load_state(&path)?
        } else {
            debug!(path = %path.display(), "no organizer state yet");
            OrganizerState::default()
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
            read_failures: Mutex::new(Vec::new()),
        })
    }

    /// Like [`open`](Self::open), but an unreadable file is logged and
    /// replaced by empty state. Losing it only costs a rebuild.
    pub fn open_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::open(&path) {
            Ok(store) => store,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable organizer state");
                Self {
                    path,
                    state: Mutex::new(OrganizerState::default()),
                    read_failures: Mutex::new(Vec::new()),
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Published checksum for `group`, empty if none.
    pub fn index_checksum(&self, group: RuleGroup) -> String {
        self.state
            .lock()
            .expect("state lock poisoned")
            .index_checksums
            .get(&group)
            .cloned()
            .unwrap_or_default()
    }

    pub fn build_result(&self, group: RuleGroup) -> Option<BuildResult> {
        self.state
            .lock()
            .expect("state lock poisoned")
            .build_results
            .get(&group)
            .copied()
    }

    pub fn state(&self) -> OrganizerState {
        self.state.lock().expect("state lock poisoned").clone()
    }

    /// Sources reported as unreadable since the store was opened.
    pub fn read_failures(&self) -> Vec<(RuleGroup, u32)> {
        self.read_failures
            .lock()
            .expect("read failures lock poisoned")
            .clone()
    }

    pub fn save(&self) -> Result<(), StateStoreError> {
        let state = self.state.lock().expect("state lock poisoned");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&*state)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

fn load_state(path: &Path) -> Result<OrganizerState, StateStoreError> {
    let bytes = std::fs::read(path)?;
    let state: OrganizerState = serde_json::from_slice(&bytes)?;
    if state.version != STATE_VERSION {
        return Err(StateStoreError::UnsupportedVersion {
            found: state.version,
        });
    }
    Ok(state)
}

impl OrganizedRulesObserver for FileStateStore {
    fn on_organized_rules_changed(&self, group: RuleGroup, build_result: BuildResult, checksum: &str) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if checksum.is_empty() {
                state.index_checksums.remove(&group);
            } else {
                state.index_checksums.insert(group, checksum.to_string());
            }
            state.build_results.insert(group, build_result);
            state.updated_at = Utc::now().to_rfc3339();
        }
        if let Err(e) = self.save() {
            warn!(path = %self.path.display(), group = %group, error = %e, "failed to save organizer state");
        }
    }

    fn on_compiled_rules_read_failed(&self, group: RuleGroup, source_id: u32) {
        warn!(group = %group, source_id, "compiled rules unreadable, source needs recompiling");
        self.read_failures
            .lock()
            .expect("read failures lock poisoned")
            .push((group, source_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path().join("state.json")).unwrap();
        assert_eq!(store.index_checksum(RuleGroup::Tracking), "");
        assert!(store.build_result(RuleGroup::Tracking).is_none());
    }

    #[test]
    fn changes_are_written_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = FileStateStore::open(&path).unwrap();

        store.on_organized_rules_changed(RuleGroup::AdBlocking, BuildResult::Success, "00ff00ff00ff00ff");

        let reopened = FileStateStore::open(&path).unwrap();
        assert_eq!(reopened.index_checksum(RuleGroup::AdBlocking), "00ff00ff00ff00ff");
        assert_eq!(
            reopened.build_result(RuleGroup::AdBlocking),
            Some(BuildResult::Success)
        );
        assert_eq!(reopened.index_checksum(RuleGroup::Tracking), "");
    }

    #[test]
    fn empty_checksum_clears_group() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path().join("state.json")).unwrap();
        store.on_organized_rules_changed(RuleGroup::Tracking, BuildResult::Success, "abc");
        store.on_organized_rules_changed(RuleGroup::Tracking, BuildResult::Success, "");
        assert!(store.state().index_checksums.is_empty());
    }

    #[test]
    fn other_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"version": 9, "updated_at": "x"}"#).unwrap();

        assert!(matches!(
            FileStateStore::open(&path),
            Err(StateStoreError::UnsupportedVersion { found: 9 })
        ));
        let store = FileStateStore::open_or_default(&path);
        assert_eq!(store.state().version, STATE_VERSION);
    }

    #[test]
    fn read_failures_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path().join("state.json")).unwrap();
        store.on_compiled_rules_read_failed(RuleGroup::Tracking, 3);
        assert_eq!(store.read_failures(), vec![(RuleGroup::Tracking, 3)]);
    }
}
