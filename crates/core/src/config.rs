use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub storage: StorageConfig,
    pub organizer: OrganizerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `BLOCKLIST_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("BLOCKLIST_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            storage: StorageConfig::from_env_profiled(p),
            organizer: OrganizerConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  storage:     data_dir={}", self.storage.data_dir.display());
        tracing::info!(
            "  organizer:   max_rules_per_list={}, max_allow_rules={}",
            self.organizer.max_rules_per_list,
            self.organizer.max_allow_rules
        );
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory; per-group rule folders live under `AdBlockRules/`.
    pub data_dir: PathBuf,
    /// File the published organized-rules checksums are persisted to.
    pub state_file: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        let data_dir = PathBuf::from(profiled_env_or(p, "BLOCKLIST_DATA_DIR", "data"));
        let state_file = profiled_env_opt(p, "BLOCKLIST_STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("organizer-state.json"));
        Self {
            data_dir,
            state_file,
        }
    }
}

// ── Organizer ─────────────────────────────────────────────────

/// WebKit refuses content rule lists above this many rules.
pub const DEFAULT_MAX_RULES_PER_LIST: usize = 150_000;
pub const DEFAULT_MAX_ALLOW_RULES: usize = 50_000;

/// Limits applied while merging compiled rules into installable lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizerConfig {
    pub max_rules_per_list: usize,
    /// Allow rules are repeated in every list, so they must leave room for
    /// block rules.
    pub max_allow_rules: usize,
}

impl OrganizerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_rules_per_list: profiled_env_usize(
                p,
                "BLOCKLIST_MAX_RULES_PER_LIST",
                DEFAULT_MAX_RULES_PER_LIST,
            ),
            max_allow_rules: profiled_env_usize(
                p,
                "BLOCKLIST_MAX_ALLOW_RULES",
                DEFAULT_MAX_ALLOW_RULES,
            ),
        }
    }
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self {
            max_rules_per_list: DEFAULT_MAX_RULES_PER_LIST,
            max_allow_rules: DEFAULT_MAX_ALLOW_RULES,
        }
    }
}
