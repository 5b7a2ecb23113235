//! organizer-worker: organizes compiled rules for every rule group.
//!
//! Loads the upstream registry from a JSON snapshot, reconciles each group's
//! organized rules against the compiled rules on disk, and writes the
//! resulting content rule lists under `<output-dir>/<group>/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};

use blocklist_core::config::load_dotenv;
use blocklist_core::{Config, RuleGroup};
use blocklist_organizer::{
    ContentRuleListInstaller, FileStateStore, RegistrySnapshot, RuleRegistry, RuleService,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Organize compiled content-blocker rules into installable lists.
#[derive(Parser, Debug)]
#[command(name = "organizer-worker", version, about)]
struct Cli {
    /// Registry snapshot (JSON) describing rule sources and exceptions.
    #[arg(long, env = "BLOCKLIST_REGISTRY")]
    registry: Option<PathBuf>,

    /// Overrides BLOCKLIST_DATA_DIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Overrides BLOCKLIST_STATE_FILE.
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Where organized lists are written. Defaults to `<data-dir>/ContentRuleLists`.
    #[arg(long, env = "BLOCKLIST_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,
}

// ── Installer ───────────────────────────────────────────────────────

/// Writes each organized list to `<dir>/<index>.json`.
struct DirectoryInstaller {
    group: RuleGroup,
    dir: PathBuf,
}

impl DirectoryInstaller {
    fn replace_lists(&self, lists: &[Value]) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        for path in installed_lists(&self.dir)? {
            std::fs::remove_file(path)?;
        }
        for (index, list) in lists.iter().enumerate() {
            std::fs::write(self.dir.join(format!("{index}.json")), list.to_string())?;
        }
        Ok(())
    }
}

fn installed_lists(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    Ok(paths)
}

impl ContentRuleListInstaller for DirectoryInstaller {
    fn install_content_rule_lists(&mut self, lists: Vec<Value>) {
        match self.replace_lists(&lists) {
            Ok(()) => info!(group = %self.group, lists = lists.len(), dir = %self.dir.display(), "installed rule lists"),
            Err(e) => warn!(group = %self.group, dir = %self.dir.display(), error = %e, "failed to install rule lists"),
        }
    }

    fn apply_loaded_rules(&mut self) {
        match installed_lists(&self.dir) {
            Ok(paths) => info!(group = %self.group, lists = paths.len(), "previously installed lists still current"),
            Err(e) => warn!(group = %self.group, error = %e, "failed to inspect installed lists"),
        }
    }
}

// ── main ────────────────────────────────────────────────────────────

fn load_registry(path: Option<&Path>) -> anyhow::Result<RuleRegistry> {
    let Some(path) = path else {
        warn!("no registry snapshot given, starting with no rule sources");
        return Ok(RuleRegistry::new());
    };
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading registry snapshot {}", path.display()))?;
    let snapshot: RegistrySnapshot = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing registry snapshot {}", path.display()))?;
    info!(path = %path.display(), sources = snapshot.sources.len(), "loaded registry snapshot");
    Ok(RuleRegistry::from_snapshot(snapshot))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(data_dir) = cli.data_dir {
        if cli.state_file.is_none() {
            config.storage.state_file = data_dir.join("organizer-state.json");
        }
        config.storage.data_dir = data_dir;
    }
    if let Some(state_file) = cli.state_file {
        config.storage.state_file = state_file;
    }
    config.log_summary();

    let output_dir = cli
        .output_dir
        .unwrap_or_else(|| config.storage.data_dir.join("ContentRuleLists"));

    let registry = Arc::new(load_registry(cli.registry.as_deref())?);
    let state = Arc::new(FileStateStore::open_or_default(&config.storage.state_file));

    let mut service = RuleService::from_config(&config, registry, state.clone(), |group| {
        Box::new(DirectoryInstaller {
            group,
            dir: output_dir.join(group.folder_name()),
        }) as Box<dyn ContentRuleListInstaller>
    });

    info!("organizer-worker starting");
    service.run_until_idle().await;

    for group in RuleGroup::ALL {
        info!(
            group = %group,
            result = %service.build_result(group),
            checksum = %service.rules_checksum(group),
            "organize pass complete"
        );
    }
    for (group, source_id) in state.read_failures() {
        warn!(group = %group, source_id, "source needs recompiling");
    }

    info!("organizer-worker exited cleanly");
    Ok(())
}
