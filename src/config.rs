use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use glob::Pattern;
use serde::Deserialize;

use crate::feature_flags::{FeatureFlags, FileFeatureFlags};
use crate::utils::BackoffPolicy;

pub const DEFAULT_STORE_DIR: &str = ".ai-context";
pub const DEFAULT_BRANCH_PREFIX: &str = "ai-context-";
pub const DEFAULT_IGNORED_SEGMENTS: &[&str] = &["node_modules", ".git", DEFAULT_STORE_DIR];

/// Centralized configuration for the application
pub struct Config {
    git_path: String,
    git_timeout: Duration,
    poll_interval: Duration,
    debounce: Duration,
    after_window: Duration,
    retention: Duration,
    follow_up_interval: Duration,
    follow_up_duration: Duration,
    store_dir: String,
    branch_prefix: String,
    ignored_segments: Vec<String>,
    ignore_patterns: Vec<Pattern>,
    cursor_db_path: Option<PathBuf>,
    scope_to_workspace: bool,
    source_backoff: BackoffPolicy,
    feature_flags: FeatureFlags,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    git_path: Option<String>,
    #[serde(default)]
    git_timeout: Option<String>,
    #[serde(default)]
    poll_interval: Option<String>,
    #[serde(default)]
    debounce: Option<String>,
    #[serde(default)]
    after_window: Option<String>,
    #[serde(default)]
    retention: Option<String>,
    #[serde(default)]
    follow_up_interval: Option<String>,
    #[serde(default)]
    follow_up_duration: Option<String>,
    #[serde(default)]
    store_dir: Option<String>,
    #[serde(default)]
    branch_prefix: Option<String>,
    #[serde(default)]
    ignored_segments: Option<Vec<String>>,
    #[serde(default)]
    ignore_patterns: Option<Vec<String>>,
    #[serde(default)]
    cursor_db_path: Option<String>,
    #[serde(default)]
    scope_to_workspace: Option<bool>,
    #[serde(default)]
    source_retry_attempts: Option<u32>,
    #[serde(default)]
    source_retry_delay: Option<String>,
    #[serde(default)]
    feature_flags: Option<serde_json::Value>,
}

/// `AI_CONTEXT_*` environment overrides. Values win over the config file.
#[derive(Deserialize, Default)]
struct EnvConfig {
    #[serde(default)]
    git_path: Option<String>,
    #[serde(default)]
    git_timeout: Option<String>,
    #[serde(default)]
    poll_interval: Option<String>,
    #[serde(default)]
    after_window: Option<String>,
    #[serde(default)]
    store_dir: Option<String>,
    #[serde(default)]
    cursor_db_path: Option<String>,
}

static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    /// Access the global configuration. Lazily initializes if not already initialized.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(build_config)
    }

    /// Returns the command to invoke git.
    pub fn git_cmd(&self) -> &str {
        &self.git_path
    }

    pub fn git_timeout(&self) -> Duration {
        self.git_timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Length of the "after" window used to correlate file changes with a response.
    pub fn after_window(&self) -> Duration {
        self.after_window
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn follow_up_interval(&self) -> Duration {
        self.follow_up_interval
    }

    pub fn follow_up_duration(&self) -> Duration {
        self.follow_up_duration
    }

    /// Name of the provenance directory, relative to the workspace root.
    pub fn store_dir(&self) -> &str {
        &self.store_dir
    }

    pub fn branch_prefix(&self) -> &str {
        &self.branch_prefix
    }

    /// Ignored path segments; always contains the store directory.
    pub fn ignored_segments(&self) -> &[String] {
        &self.ignored_segments
    }

    pub fn ignore_patterns(&self) -> &[Pattern] {
        &self.ignore_patterns
    }

    pub fn cursor_db_path(&self) -> Option<&Path> {
        self.cursor_db_path.as_deref()
    }

    pub fn scope_to_workspace(&self) -> bool {
        self.scope_to_workspace
    }

    pub fn source_backoff(&self) -> BackoffPolicy {
        self.source_backoff
    }

    pub fn feature_flags(&self) -> &FeatureFlags {
        &self.feature_flags
    }
}

fn build_config() -> Config {
    let file_cfg = load_file_config().unwrap_or_default();
    let env_cfg = load_env_config();
    build_config_from(file_cfg, env_cfg)
}

fn build_config_from(file_cfg: FileConfig, env_cfg: EnvConfig) -> Config {
    let git_path = resolve_git_path(env_cfg.git_path.as_deref().or(file_cfg.git_path.as_deref()));

    let duration = |env_value: Option<&str>, file_value: Option<&str>, name: &str, default_ms: u64| {
        env_value
            .or(file_value)
            .and_then(|raw| parse_duration_setting(name, raw))
            .unwrap_or(Duration::from_millis(default_ms))
    };

    let store_dir = env_cfg
        .store_dir
        .or(file_cfg.store_dir)
        .map(|s| s.trim().trim_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_STORE_DIR.to_string());

    let mut ignored_segments: Vec<String> = file_cfg.ignored_segments.unwrap_or_else(|| {
        DEFAULT_IGNORED_SEGMENTS
            .iter()
            .map(|s| s.to_string())
            .collect()
    });
    if !ignored_segments.iter().any(|s| s == &store_dir) {
        ignored_segments.push(store_dir.clone());
    }

    let ignore_patterns = file_cfg
        .ignore_patterns
        .unwrap_or_default()
        .into_iter()
        .filter_map(|pattern_str| {
            Pattern::new(&pattern_str)
                .map_err(|e| {
                    eprintln!(
                        "Warning: Invalid glob pattern in ignore_patterns '{}': {}",
                        pattern_str, e
                    );
                })
                .ok()
        })
        .collect();

    let cursor_db_path = env_cfg
        .cursor_db_path
        .or(file_cfg.cursor_db_path)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);

    let defaults = BackoffPolicy::default();
    let source_backoff = BackoffPolicy {
        max_attempts: file_cfg
            .source_retry_attempts
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_attempts),
        base_delay: file_cfg
            .source_retry_delay
            .as_deref()
            .and_then(|raw| parse_duration_setting("source_retry_delay", raw))
            .unwrap_or(defaults.base_delay),
    };

    let feature_flags = build_feature_flags(file_cfg.feature_flags.as_ref());

    Config {
        git_path,
        git_timeout: duration(
            env_cfg.git_timeout.as_deref(),
            file_cfg.git_timeout.as_deref(),
            "git_timeout",
            30_000,
        ),
        poll_interval: duration(
            env_cfg.poll_interval.as_deref(),
            file_cfg.poll_interval.as_deref(),
            "poll_interval",
            5_000,
        ),
        debounce: duration(None, file_cfg.debounce.as_deref(), "debounce", 500),
        after_window: duration(
            env_cfg.after_window.as_deref(),
            file_cfg.after_window.as_deref(),
            "after_window",
            10 * 60 * 1000,
        ),
        retention: duration(None, file_cfg.retention.as_deref(), "retention", 10 * 60 * 1000),
        follow_up_interval: duration(
            None,
            file_cfg.follow_up_interval.as_deref(),
            "follow_up_interval",
            30_000,
        ),
        follow_up_duration: duration(
            None,
            file_cfg.follow_up_duration.as_deref(),
            "follow_up_duration",
            10 * 60 * 1000,
        ),
        store_dir,
        branch_prefix: file_cfg
            .branch_prefix
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BRANCH_PREFIX.to_string()),
        ignored_segments,
        ignore_patterns,
        cursor_db_path,
        scope_to_workspace: file_cfg.scope_to_workspace.unwrap_or(true),
        source_backoff,
        feature_flags,
    }
}

fn parse_duration_setting(name: &str, raw: &str) -> Option<Duration> {
    match humantime::parse_duration(raw.trim()) {
        Ok(d) if !d.is_zero() => Some(d),
        Ok(_) => {
            eprintln!("Warning: {} must be greater than zero, using default", name);
            None
        }
        Err(e) => {
            eprintln!("Warning: Invalid duration for {} '{}': {}", name, raw, e);
            None
        }
    }
}

fn build_feature_flags(value: Option<&serde_json::Value>) -> FeatureFlags {
    // Unknown or malformed flags fall back to defaults
    let file_flags = value.and_then(|v| serde_json::from_value::<FileFeatureFlags>(v.clone()).ok());
    FeatureFlags::from_file_config(file_flags)
}

fn resolve_git_path(configured: Option<&str>) -> String {
    // 1) From config file or environment
    if let Some(path) = configured {
        let trimmed = path.trim();
        if !trimmed.is_empty() && is_executable(Path::new(trimmed)) {
            return trimmed.to_string();
        }
    }

    // 2) Probe common locations across platforms
    let candidates: &[&str] = &[
        "/opt/homebrew/bin/git",
        "/usr/local/bin/git",
        "/usr/bin/git",
        "/bin/git",
        r"C:\\Program Files\\Git\\bin\\git.exe",
        r"C:\\Program Files (x86)\\Git\\bin\\git.exe",
    ];

    if let Some(found) = candidates.iter().map(Path::new).find(|p| is_executable(p)) {
        return found.to_string_lossy().to_string();
    }

    // 3) Let the OS resolve it from PATH
    "git".to_string()
}

fn load_file_config() -> Option<FileConfig> {
    let path = config_file_path()?;
    let data = fs::read(&path).ok()?;
    match serde_json::from_slice::<FileConfig>(&data) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            eprintln!(
                "Warning: Ignoring malformed config file {}: {}",
                path.display(),
                e
            );
            None
        }
    }
}

fn load_env_config() -> EnvConfig {
    envy::prefixed("AI_CONTEXT_")
        .from_env::<EnvConfig>()
        .unwrap_or_default()
}

pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(explicit) = env::var("AI_CONTEXT_CONFIG") {
        if !explicit.trim().is_empty() {
            return Some(PathBuf::from(explicit));
        }
    }
    dirs::home_dir().map(|home| home.join(".ai-context").join("config.json"))
}

fn is_executable(path: &Path) -> bool {
    // Existence is enough; the OS enforces exec permissions on spawn.
    path.exists() && path.is_file()
}
