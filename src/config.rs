//! Configuration management for beacon
//!
//! Handles loading, saving, and resolving the daemon configuration.

use anyhow::{Context, Result};
use beacon_core::CandidateKind;
use directories::{BaseDirs, ProjectDirs};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Statically configured actions (lock screen, suspend, ...)
    #[serde(default = "default_actions")]
    pub actions: Vec<ActionConfig>,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub ranking: RankingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub usage: UsageConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Path to usage database file (not serialized)
    #[serde(skip)]
    pub db_path: PathBuf,
}

/// What gets indexed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Directories holding `.desktop` files. Empty means the XDG defaults.
    #[serde(default)]
    pub application_dirs: Vec<String>,

    /// Roots scanned for file candidates (`~/` is expanded)
    #[serde(default = "default_file_roots")]
    pub file_roots: Vec<String>,

    /// Maximum directory depth below each file root
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Index directories as well as regular files
    #[serde(default = "default_true")]
    pub index_directories: bool,

    /// Include hidden files/directories
    #[serde(default)]
    pub include_hidden: bool,

    /// Pattern-based exclusions (glob patterns)
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

/// A user-defined action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Fuzzy tolerance and fallback behaviour of the index lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Query tokens up to this length require an exact prefix match
    #[serde(default = "default_prefix_only_max_len")]
    pub prefix_only_max_len: usize,

    /// Edit distance allowed for longer query tokens
    #[serde(default = "default_max_edit_distance")]
    pub max_edit_distance: usize,

    /// Below this many primary matches the substring fallback runs
    #[serde(default = "default_min_results")]
    pub min_results: usize,
}

/// Weights of the ranking model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_text_weight")]
    pub text_weight: f64,

    #[serde(default = "default_frequency_weight")]
    pub frequency_weight: f64,

    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,

    /// Hours after which the recency signal has halved
    #[serde(default = "default_half_life_hours")]
    pub recency_half_life_hours: f64,

    #[serde(default)]
    pub quality: QualityWeights,

    /// Tie-break order between kinds, highest priority first
    #[serde(default = "default_kind_priority")]
    pub kind_priority: Vec<CandidateKind>,
}

/// Numeric value of each textual match quality
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityWeights {
    #[serde(default = "default_exact")]
    pub exact: f64,
    #[serde(default = "default_prefix")]
    pub prefix: f64,
    #[serde(default = "default_fuzzy")]
    pub fuzzy: f64,
    #[serde(default = "default_substring")]
    pub substring: f64,
}

/// Query engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Budget after which a search returns what it has
    #[serde(default = "default_latency_budget_ms")]
    pub latency_budget_ms: u64,

    /// Result count when a client does not ask for one
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

/// Change watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Debounce delay in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// A burst is flushed after at most `debounce_ms * max_wait_factor`
    #[serde(default = "default_max_wait_factor")]
    pub max_wait_factor: u32,

    /// Capacity of the mutation queue into the coordinator
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Usage table persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Usage of candidates absent from the index this long is dropped
    #[serde(default = "default_evict_after_days")]
    pub evict_after_days: u32,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Custom socket path (optional)
    #[serde(default)]
    pub socket_path: Option<String>,
}

/// Performance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Mutations applied per write-lock acquisition during batch indexing
    #[serde(default = "default_batch_chunk_size")]
    pub batch_chunk_size: usize,

    /// Seconds between index consistency checks (0 disables)
    #[serde(default = "default_consistency_check_secs")]
    pub consistency_check_secs: u64,
}

// Default value functions
fn default_file_roots() -> Vec<String> {
    vec![
        "~/Desktop".to_string(),
        "~/Documents".to_string(),
        "~/Downloads".to_string(),
    ]
}

fn default_max_depth() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/node_modules".to_string(),
        "**/.git".to_string(),
        "**/target".to_string(),
        "**/__pycache__".to_string(),
        "**/.venv".to_string(),
        "**/*.tmp".to_string(),
        "**/*.swp".to_string(),
        "**/*.part".to_string(),
        "**/*.crdownload".to_string(),
    ]
}

fn default_actions() -> Vec<ActionConfig> {
    vec![
        ActionConfig {
            name: "Lock Screen".to_string(),
            command: "loginctl lock-session".to_string(),
            keywords: vec!["lock".to_string()],
        },
        ActionConfig {
            name: "Suspend".to_string(),
            command: "systemctl suspend".to_string(),
            keywords: vec!["sleep".to_string()],
        },
        ActionConfig {
            name: "Log Out".to_string(),
            command: "loginctl terminate-session self".to_string(),
            keywords: vec!["logout".to_string(), "sign out".to_string()],
        },
    ]
}

fn default_prefix_only_max_len() -> usize {
    2
}

fn default_max_edit_distance() -> usize {
    1
}

fn default_min_results() -> usize {
    5
}

fn default_text_weight() -> f64 {
    1.0
}

fn default_frequency_weight() -> f64 {
    0.15
}

fn default_recency_weight() -> f64 {
    0.1
}

fn default_half_life_hours() -> f64 {
    72.0
}

fn default_exact() -> f64 {
    1.0
}

fn default_prefix() -> f64 {
    0.8
}

fn default_fuzzy() -> f64 {
    0.5
}

fn default_substring() -> f64 {
    0.2
}

fn default_kind_priority() -> Vec<CandidateKind> {
    CandidateKind::ALL.to_vec()
}

fn default_latency_budget_ms() -> u64 {
    50
}

fn default_limit() -> usize {
    20
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_max_wait_factor() -> u32 {
    5
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_evict_after_days() -> u32 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_batch_chunk_size() -> usize {
    256
}

fn default_consistency_check_secs() -> u64 {
    300
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            application_dirs: Vec::new(),
            file_roots: default_file_roots(),
            max_depth: default_max_depth(),
            index_directories: true,
            include_hidden: false,
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            prefix_only_max_len: default_prefix_only_max_len(),
            max_edit_distance: default_max_edit_distance(),
            min_results: default_min_results(),
        }
    }
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            exact: default_exact(),
            prefix: default_prefix(),
            fuzzy: default_fuzzy(),
            substring: default_substring(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            text_weight: default_text_weight(),
            frequency_weight: default_frequency_weight(),
            recency_weight: default_recency_weight(),
            recency_half_life_hours: default_half_life_hours(),
            quality: QualityWeights::default(),
            kind_priority: default_kind_priority(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            latency_budget_ms: default_latency_budget_ms(),
            default_limit: default_limit(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: default_debounce_ms(),
            max_wait_factor: default_max_wait_factor(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_wait(&self) -> Duration {
        self.debounce() * self.max_wait_factor.max(1)
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
            evict_after_days: default_evict_after_days(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            socket_path: None,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            batch_chunk_size: default_batch_chunk_size(),
            consistency_check_secs: default_consistency_check_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let (config_path, db_path) = Self::get_default_paths();
        Self {
            indexing: IndexingConfig::default(),
            actions: default_actions(),
            matching: MatchingConfig::default(),
            ranking: RankingConfig::default(),
            search: SearchConfig::default(),
            watcher: WatcherConfig::default(),
            usage: UsageConfig::default(),
            service: ServiceConfig::default(),
            performance: PerformanceConfig::default(),
            config_path,
            db_path,
        }
    }
}

impl Config {
    /// Get default paths for config and usage database
    fn get_default_paths() -> (PathBuf, PathBuf) {
        if let Some(proj_dirs) = ProjectDirs::from("org", "beacon", "beacon") {
            (
                proj_dirs.config_dir().join("config.toml"),
                proj_dirs.data_dir().join("usage.db"),
            )
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            (
                PathBuf::from(&home).join(".config/beacon/config.toml"),
                PathBuf::from(&home).join(".local/share/beacon/usage.db"),
            )
        }
    }

    /// Load configuration from the default location, or create it if missing
    pub fn load() -> Result<Self> {
        let (config_path, db_path) = Self::get_default_paths();
        let mut config = Self::load_from(&config_path)?;
        config.db_path = db_path;
        Ok(config)
    }

    /// Load configuration from an explicit file, writing defaults if it does not exist
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            let mut config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;
            config.config_path = config_path.to_path_buf();
            Ok(config)
        } else {
            info!("Config file not found, creating default at {:?}", config_path);
            let config = Config {
                config_path: config_path.to_path_buf(),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        fs::write(&self.config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", self.config_path))?;

        info!("Configuration saved to {:?}", self.config_path);
        Ok(())
    }

    /// Get socket path for IPC
    pub fn get_socket_path(&self) -> PathBuf {
        if let Some(custom_path) = &self.service.socket_path {
            PathBuf::from(custom_path)
        } else if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            PathBuf::from(runtime_dir).join("beacon.sock")
        } else {
            PathBuf::from("/tmp/beacon.sock")
        }
    }

    /// Directories scanned and watched for desktop entries, in precedence order
    pub fn application_dirs(&self) -> Vec<PathBuf> {
        if self.indexing.application_dirs.is_empty() {
            crate::platform::xdg_application_dirs()
        } else {
            self.indexing
                .application_dirs
                .iter()
                .map(|dir| expand_home(dir))
                .collect()
        }
    }

    /// File roots with `~/` expanded
    pub fn file_roots(&self) -> Vec<PathBuf> {
        self.indexing
            .file_roots
            .iter()
            .map(|root| expand_home(root))
            .collect()
    }

    /// Compile the exclusion rules into a reusable filter
    pub fn path_filter(&self) -> Result<PathFilter> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.indexing.exclude_patterns {
            let glob = Glob::new(pattern)
                .with_context(|| format!("Invalid exclude pattern: {}", pattern))?;
            builder.add(glob);
        }
        Ok(PathFilter {
            excluded: builder.build().context("Failed to build exclude patterns")?,
            include_hidden: self.indexing.include_hidden,
        })
    }
}

/// Compiled exclusion rules for file candidates
#[derive(Debug, Clone)]
pub struct PathFilter {
    excluded: GlobSet,
    include_hidden: bool,
}

impl PathFilter {
    /// Check if a path should be excluded
    pub fn should_exclude(&self, path: &Path) -> bool {
        if self.excluded.is_match(path) {
            return true;
        }

        if !self.include_hidden {
            if let Some(name) = path.file_name() {
                if name.to_string_lossy().starts_with('.') {
                    return true;
                }
            }
        }

        false
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}
