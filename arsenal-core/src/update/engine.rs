//! Tool state checks and update application
//!
//! State is always derived live from the filesystem, PATH, and upstream; it is
//! never cached across invocations, since tools can be modified externally
//! (e.g. an operator running `git pull` by hand).

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::ToolsConfig;
use crate::process::ProcessRunner;
use crate::registry::{self, Probe, Strategy, ToolDescriptor};
use crate::retry::is_transient_error;
use crate::update::github::GitHubChecker;
use crate::update::strategies::{self, clone_complete};
use crate::{Error, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const LS_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Derived state of one tool, recomputed on demand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolState {
    /// Not installed (or the install is incomplete)
    Absent,
    /// Installed, but the local version could not be determined
    Installed,
    /// Installed with a newer upstream version available
    UpdateAvailable { latest: String },
    /// Installed and matching the latest upstream version
    Current,
    /// The state probe itself failed
    Error { reason: String },
}

impl ToolState {
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::Absent)
    }
}

impl fmt::Display for ToolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Installed => write!(f, "installed"),
            Self::UpdateAvailable { latest } => write!(f, "update available ({latest})"),
            Self::Current => write!(f, "current"),
            Self::Error { reason } => write!(f, "error: {reason}"),
        }
    }
}

/// Whether an apply call installs a missing tool or updates a present one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Install,
    Update,
}

/// Immutable record of one apply operation on one tool
#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub id: String,
    pub previous: ToolState,
    pub new_state: ToolState,
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Outcome of a batch operation; failures never abort the rest of the batch
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Per-tool results in registration order
    pub results: Vec<UpdateResult>,
    /// Tools not attempted, with the reason (not installed)
    pub skipped: Vec<(String, String)>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &UpdateResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

enum BatchItem {
    Done(UpdateResult),
    Skipped(String, String),
}

/// State probing and strategy dispatch for one tool. The engine only ever
/// touches tools through this seam, so tests can script outcomes without
/// running git, go, or the network.
#[async_trait]
trait ToolOps: Send + Sync {
    async fn state(&self, desc: &ToolDescriptor, tools: &ToolsConfig) -> ToolState;
    async fn install(&self, desc: &ToolDescriptor, tools: &ToolsConfig) -> Result<()>;
    async fn update(&self, desc: &ToolDescriptor, tools: &ToolsConfig) -> Result<()>;
}

/// Checks tool state and applies per-strategy installs and updates
pub struct UpdateEngine {
    tools: ToolsConfig,
    ops: Box<dyn ToolOps>,
    /// Serializes apply operations per tool identifier; different tools still
    /// run in parallel during batches
    locks: std::sync::Mutex<HashMap<&'static str, Arc<Mutex<()>>>>,
}

impl UpdateEngine {
    pub fn new(tools: ToolsConfig) -> Self {
        Self::with_ops(tools, Box::new(LiveOps::new()))
    }

    fn with_ops(tools: ToolsConfig, ops: Box<dyn ToolOps>) -> Self {
        Self {
            tools,
            ops,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Compute the current state of one tool
    pub async fn check_state(&self, id: &str) -> Result<ToolState> {
        let desc = registry::describe(id)?;
        Ok(self.ops.state(desc, &self.tools).await)
    }

    /// Install or update one tool, reporting the outcome as data
    pub async fn apply(&self, id: &str, mode: ApplyMode) -> Result<UpdateResult> {
        let desc = registry::describe(id)?;
        let lock = self.lock_for(desc.id);
        let _guard = lock.lock().await;

        let start = Instant::now();
        let previous = self.ops.state(desc, &self.tools).await;
        debug!(tool = desc.id, ?mode, state = %previous, "applying");

        let op = match (mode, &previous) {
            // Already usable: installing again is a detected no-op
            (ApplyMode::Install, state) if state.is_present() => Ok(()),
            (ApplyMode::Install, _) => {
                self.with_transient_retry(|| self.ops.install(desc, &self.tools)).await
            }
            // Updating an absent tool falls back to a fresh install
            (ApplyMode::Update, ToolState::Absent) => {
                self.with_transient_retry(|| self.ops.install(desc, &self.tools)).await
            }
            // Already current: applying an update never mutates installed files
            (ApplyMode::Update, ToolState::Current) => Ok(()),
            (ApplyMode::Update, _) => {
                self.with_transient_retry(|| self.ops.update(desc, &self.tools)).await
            }
        };

        let new_state = self.ops.state(desc, &self.tools).await;
        let success = op.is_ok() && new_state.is_present();
        let error = match op {
            Err(err) => Some(err.to_string()),
            Ok(()) if !success => Some(format!("tool left in state: {new_state}")),
            Ok(()) => None,
        };

        Ok(UpdateResult {
            id: desc.id.to_string(),
            previous,
            new_state,
            success,
            error,
            duration: start.elapsed(),
        })
    }

    /// Install every registered tool. A tool whose prerequisites are missing
    /// (no Go toolchain, no git) fails with a descriptive error like any other
    /// install failure; it is never silently skipped.
    pub async fn install_all(&self) -> BatchReport {
        let items = stream::iter(registry::all())
            .map(|desc| async move {
                BatchItem::Done(self.apply_unchecked(desc.id, ApplyMode::Install).await)
            })
            .buffer_unordered(self.concurrency())
            .collect::<Vec<_>>()
            .await;
        Self::collect_report(items)
    }

    /// Update every installed tool; absent tools are reported as skipped
    pub async fn update_all(&self) -> BatchReport {
        let items = stream::iter(registry::all())
            .map(|desc| async move {
                if !self.ops.state(desc, &self.tools).await.is_present() {
                    return BatchItem::Skipped(desc.id.to_string(), "not installed".to_string());
                }
                BatchItem::Done(self.apply_unchecked(desc.id, ApplyMode::Update).await)
            })
            .buffer_unordered(self.concurrency())
            .collect::<Vec<_>>()
            .await;
        Self::collect_report(items)
    }

    /// Compute the state of every registered tool, in registration order
    pub async fn check_all(&self) -> Vec<(&'static ToolDescriptor, ToolState)> {
        let mut states = stream::iter(registry::all())
            .map(|desc| async move { (desc, self.ops.state(desc, &self.tools).await) })
            .buffer_unordered(self.concurrency())
            .collect::<Vec<_>>()
            .await;
        states.sort_by_key(|(desc, _)| registry::position(desc.id));
        states
    }

    async fn with_transient_retry<F, Fut>(&self, operation: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        match operation().await {
            Ok(()) => Ok(()),
            Err(err) if is_transient_error(&err.to_string()) => {
                warn!("transient failure, retrying once: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
                operation().await
            }
            Err(err) => Err(err),
        }
    }

    /// apply() for ids that came from the registry itself
    async fn apply_unchecked(&self, id: &str, mode: ApplyMode) -> UpdateResult {
        match self.apply(id, mode).await {
            Ok(result) => result,
            Err(err) => UpdateResult {
                id: id.to_string(),
                previous: ToolState::Error {
                    reason: err.to_string(),
                },
                new_state: ToolState::Error {
                    reason: err.to_string(),
                },
                success: false,
                error: Some(err.to_string()),
                duration: Duration::ZERO,
            },
        }
    }

    fn collect_report(items: Vec<BatchItem>) -> BatchReport {
        let mut report = BatchReport::default();
        for item in items {
            match item {
                BatchItem::Done(result) => report.results.push(result),
                BatchItem::Skipped(id, reason) => report.skipped.push((id, reason)),
            }
        }
        report
            .results
            .sort_by_key(|r| registry::position(&r.id));
        report.skipped.sort_by_key(|(id, _)| registry::position(id));
        report
    }

    fn concurrency(&self) -> usize {
        self.tools.concurrency.max(1)
    }

    fn lock_for(&self, id: &'static str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(id).or_default().clone()
    }
}

/// Production [`ToolOps`]: probes the filesystem, PATH, and upstream, and
/// dispatches to the per-strategy handlers.
struct LiveOps {
    github: GitHubChecker,
}

impl LiveOps {
    fn new() -> Self {
        Self {
            github: GitHubChecker::new(),
        }
    }

    /// True when the tool is usable as installed right now
    fn is_available(&self, desc: &ToolDescriptor, tools: &ToolsConfig) -> bool {
        match desc.install {
            Strategy::GitRepo | Strategy::ExternalDb => {
                clone_complete(desc, &desc.install_dir(&tools.dir))
            }
            Strategy::LanguagePackage | Strategy::ReleaseBinary => {
                self.binary_path(desc, tools).is_some()
            }
        }
    }

    async fn local_version(&self, desc: &ToolDescriptor, tools: &ToolsConfig) -> LocalVersion {
        match desc.probe {
            Probe::GitHead => {
                let dir = desc.install_dir(&tools.dir);
                let result = ProcessRunner::run(
                    "git",
                    ["-C", &dir.display().to_string(), "rev-parse", "--short=7", "HEAD"],
                    PROBE_TIMEOUT,
                    None,
                )
                .await;
                if result.success() {
                    LocalVersion::Known(result.stdout.trim().to_string())
                } else {
                    LocalVersion::Failed(result.error_text())
                }
            }
            Probe::Command { program, args } => {
                // Prefer the arsenal-managed binary when it is not on PATH
                let program = self
                    .binary_path(desc, tools)
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| program.to_string());
                let result =
                    ProcessRunner::run(&program, args.iter(), PROBE_TIMEOUT, None).await;
                if result.spawn_error.is_some() || result.timed_out {
                    return LocalVersion::Failed(result.error_text());
                }
                let combined = format!("{}\n{}", result.stdout, result.stderr);
                match extract_version(&combined) {
                    Some(version) => LocalVersion::Known(version),
                    None if result.exit_code == 0 => LocalVersion::Unknown,
                    None => LocalVersion::Failed(result.error_text()),
                }
            }
        }
    }

    async fn upstream_version(&self, desc: &ToolDescriptor) -> Result<String> {
        if matches!(desc.probe, Probe::GitHead) {
            self.ls_remote_head(desc.repo).await
        } else {
            self.github.latest_version(desc.repo).await
        }
    }

    /// `git ls-remote <url> HEAD`, retried once on transient network failure
    async fn ls_remote_head(&self, repo: &str) -> Result<String> {
        let url = format!("https://github.com/{repo}.git");
        let mut result =
            ProcessRunner::run("git", ["ls-remote", &url, "HEAD"], LS_REMOTE_TIMEOUT, None).await;
        if !result.success() && is_transient_error(&result.error_text()) {
            warn!(repo, "ls-remote failed transiently, retrying once");
            tokio::time::sleep(Duration::from_secs(2)).await;
            result =
                ProcessRunner::run("git", ["ls-remote", &url, "HEAD"], LS_REMOTE_TIMEOUT, None)
                    .await;
        }
        if !result.success() {
            return Err(Error::Network(format!(
                "ls-remote for {repo}: {}",
                result.error_text()
            )));
        }
        result
            .stdout
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| Error::Network(format!("ls-remote for {repo} returned no head")))
    }

    fn binary_path(&self, desc: &ToolDescriptor, tools: &ToolsConfig) -> Option<PathBuf> {
        desc.resolve_binary(&tools.dir)
    }
}

#[async_trait]
impl ToolOps for LiveOps {
    async fn state(&self, desc: &ToolDescriptor, tools: &ToolsConfig) -> ToolState {
        if !self.is_available(desc, tools) {
            return ToolState::Absent;
        }
        let local = match self.local_version(desc, tools).await {
            LocalVersion::Known(version) => version,
            LocalVersion::Unknown => return ToolState::Installed,
            LocalVersion::Failed(reason) => return ToolState::Error { reason },
        };
        match self.upstream_version(desc).await {
            Ok(upstream) => {
                if versions_match(&local, &upstream) {
                    ToolState::Current
                } else {
                    ToolState::UpdateAvailable { latest: upstream }
                }
            }
            Err(err) => ToolState::Error {
                reason: err.to_string(),
            },
        }
    }

    async fn install(&self, desc: &ToolDescriptor, tools: &ToolsConfig) -> Result<()> {
        strategies::install(desc, tools, &self.github).await
    }

    async fn update(&self, desc: &ToolDescriptor, tools: &ToolsConfig) -> Result<()> {
        strategies::update(desc, tools, &self.github).await
    }
}

enum LocalVersion {
    Known(String),
    Unknown,
    Failed(String),
}

static VERSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"v?(\d+\.\d+\.\d+)").expect("semver pattern"),
        Regex::new(r"(?i)version[:\s]+(\S+)").expect("labelled pattern"),
        Regex::new(r"(?m)^([a-f0-9]{7,40})\s*$").expect("hash pattern"),
    ]
});

/// Extract a comparable version (semver or git hash) from probe output
fn extract_version(output: &str) -> Option<String> {
    for pattern in VERSION_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(output) {
            let version = captures.get(1)?.as_str();
            // Long git hashes compare by short prefix
            if version.len() > 7 && version.chars().all(|c| c.is_ascii_hexdigit()) {
                return Some(version.chars().take(7).collect());
            }
            return Some(version.trim_start_matches('v').to_string());
        }
    }
    None
}

/// Versions match exactly, or by hash-prefix for git heads. The prefix rule
/// only applies when both sides look like commit hashes, so "3.1.0" never
/// matches "3.1.0-dev" or "3.1.0.1".
fn versions_match(local: &str, upstream: &str) -> bool {
    if local.is_empty() || upstream.is_empty() {
        return false;
    }
    if local == upstream {
        return true;
    }
    is_hex_hash(local)
        && is_hex_hash(upstream)
        && (upstream.starts_with(local) || local.starts_with(upstream))
}

fn is_hex_hash(version: &str) -> bool {
    version.len() >= 7 && version.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn engine_with_dir(temp: &TempDir) -> UpdateEngine {
        UpdateEngine::new(test_config(temp))
    }

    fn test_config(temp: &TempDir) -> ToolsConfig {
        ToolsConfig {
            dir: temp.path().to_path_buf(),
            concurrency: 2,
            install_timeout_secs: 60,
        }
    }

    /// Scripted [`ToolOps`]: installs succeed in memory except for one
    /// designated tool, and every mutation is counted
    #[derive(Default)]
    struct ScriptedOps {
        failing: Option<&'static str>,
        fixed_state: Option<ToolState>,
        installed: std::sync::Mutex<HashSet<String>>,
        mutations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolOps for ScriptedOps {
        async fn state(&self, desc: &ToolDescriptor, _tools: &ToolsConfig) -> ToolState {
            if let Some(state) = &self.fixed_state {
                return state.clone();
            }
            if self.installed.lock().unwrap().contains(desc.id) {
                ToolState::Installed
            } else {
                ToolState::Absent
            }
        }

        async fn install(&self, desc: &ToolDescriptor, _tools: &ToolsConfig) -> Result<()> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            if self.failing == Some(desc.id) {
                return Err(Error::Tool(format!("{}: install script crashed", desc.id)));
            }
            self.installed.lock().unwrap().insert(desc.id.to_string());
            Ok(())
        }

        async fn update(&self, desc: &ToolDescriptor, tools: &ToolsConfig) -> Result<()> {
            self.install(desc, tools).await
        }
    }

    fn scripted_engine(temp: &TempDir, ops: ScriptedOps) -> UpdateEngine {
        UpdateEngine::with_ops(test_config(temp), Box::new(ops))
    }

    #[tokio::test]
    async fn test_check_state_absent_without_install() {
        let temp = TempDir::new().unwrap();
        let engine = engine_with_dir(&temp);
        // sqlmap has no PATH alias, so absence needs no network access
        let state = engine.check_state("sqlmap").await.unwrap();
        assert_eq!(state, ToolState::Absent);
    }

    #[tokio::test]
    async fn test_check_state_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let engine = engine_with_dir(&temp);
        let first = engine.check_state("xsstrike").await.unwrap();
        let second = engine.check_state("xsstrike").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_check_state_unknown_tool() {
        let temp = TempDir::new().unwrap();
        let engine = engine_with_dir(&temp);
        let err = engine.check_state("metasploit").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_apply_unknown_tool() {
        let temp = TempDir::new().unwrap();
        let engine = engine_with_dir(&temp);
        let err = engine.apply("metasploit", ApplyMode::Update).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_extract_semver() {
        assert_eq!(extract_version("nuclei v3.1.0 ready"), Some("3.1.0".into()));
        assert_eq!(
            extract_version("Current Version: 3.2.8"),
            Some("3.2.8".into())
        );
    }

    #[test]
    fn test_extract_git_hash_is_shortened() {
        let output = "0123abc0123abc0123abc0123abc0123abc01234\n";
        assert_eq!(extract_version(output), Some("0123abc".into()));
        assert_eq!(extract_version("abc1234\n"), Some("abc1234".into()));
    }

    #[test]
    fn test_extract_version_none() {
        assert_eq!(extract_version("usage: tool [options]"), None);
    }

    #[tokio::test]
    async fn test_install_all_surfaces_partial_failure() {
        let temp = TempDir::new().unwrap();
        let engine = scripted_engine(
            &temp,
            ScriptedOps {
                failing: Some("nuclei"),
                ..ScriptedOps::default()
            },
        );

        let report = engine.install_all().await;
        assert_eq!(report.results.len(), registry::all().len());
        assert!(report.skipped.is_empty());
        assert!(!report.all_succeeded());

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "nuclei");
        assert!(failures[0]
            .error
            .as_deref()
            .unwrap()
            .contains("install script crashed"));
    }

    #[tokio::test]
    async fn test_install_all_attempts_every_registered_tool() {
        let temp = TempDir::new().unwrap();
        let engine = scripted_engine(&temp, ScriptedOps::default());

        let report = engine.install_all().await;
        assert!(report.skipped.is_empty());
        assert!(report.all_succeeded());
        let ids: Vec<_> = report.results.iter().map(|r| r.id.as_str()).collect();
        // Go-based tools are attempted like any other
        assert!(ids.contains(&"nuclei"));
        assert!(ids.contains(&"httpx"));
        assert_eq!(ids.len(), registry::all().len());
    }

    #[tokio::test]
    async fn test_apply_on_current_mutates_nothing() {
        let temp = TempDir::new().unwrap();
        let mutations = Arc::new(AtomicUsize::new(0));
        let engine = scripted_engine(
            &temp,
            ScriptedOps {
                fixed_state: Some(ToolState::Current),
                mutations: mutations.clone(),
                ..ScriptedOps::default()
            },
        );

        let update = engine.apply("sqlmap", ApplyMode::Update).await.unwrap();
        assert!(update.success);
        assert_eq!(update.previous, ToolState::Current);
        assert_eq!(update.new_state, ToolState::Current);

        let install = engine.apply("sqlmap", ApplyMode::Install).await.unwrap();
        assert!(install.success);

        assert_eq!(mutations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_all_skips_absent_tools() {
        let temp = TempDir::new().unwrap();
        let mutations = Arc::new(AtomicUsize::new(0));
        let engine = scripted_engine(
            &temp,
            ScriptedOps {
                mutations: mutations.clone(),
                ..ScriptedOps::default()
            },
        );

        let report = engine.update_all().await;
        assert!(report.results.is_empty());
        assert_eq!(report.skipped.len(), registry::all().len());
        assert!(report.skipped.iter().all(|(_, reason)| reason == "not installed"));
        assert_eq!(mutations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_versions_match_by_hash_prefix() {
        assert!(versions_match("abc1234", "abc1234def5678abc1234def5678abc1234def56"));
        assert!(versions_match("3.1.0", "3.1.0"));
        assert!(!versions_match("3.1.0", "3.2.0"));
        assert!(!versions_match("", "3.2.0"));
    }

    #[test]
    fn test_versions_match_rejects_semver_prefixes() {
        assert!(!versions_match("3.1.0", "3.1.0-dev"));
        assert!(!versions_match("3.1.0", "3.1.0.1"));
        assert!(!versions_match("3.1", "3.1.0"));
        // Short hex that is not hash-length stays exact-only
        assert!(!versions_match("abc12", "abc123"));
    }

    #[test]
    fn test_tool_state_display() {
        assert_eq!(ToolState::Absent.to_string(), "absent");
        assert_eq!(
            ToolState::UpdateAvailable {
                latest: "3.2.0".into()
            }
            .to_string(),
            "update available (3.2.0)"
        );
    }

    #[test]
    fn test_per_tool_locks_are_reused() {
        let temp = TempDir::new().unwrap();
        let engine = engine_with_dir(&temp);
        let first = engine.lock_for("sqlmap");
        let second = engine.lock_for("sqlmap");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
