//! Configuration for the `flowreplay` binary
//!
//! YAML file with `browser`, `replay`, `recovery` and `logging` sections. Every
//! field is optional; missing values fall back to the engine defaults.

use std::env;
use std::fs as stdfs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use action_flow::FailureStrategy;
use action_locator::RecoveryClientConfig;
use action_primitives::ReplaySettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

pub const ENV_WS_URL: &str = "FLOWREPLAY_WS_URL";
pub const ENV_RECOVERY_URL: &str = "FLOWREPLAY_RECOVERY_URL";
pub const ENV_RECOVERY_API_KEY: &str = "FLOWREPLAY_RECOVERY_API_KEY";

const LOCAL_CONFIG: &str = "config/flowreplay.yaml";
const LOCAL_ENV: &str = "config/local.env";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub browser: BrowserConfig,
    pub replay: ReplayConfig,
    pub recovery: RecoveryConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// DevTools websocket of a running browser
    pub ws_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub pacing_ms: u64,
    pub readiness_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub discovery_attempts: u32,
    pub discovery_interval_ms: u64,
    pub row_wait_ms: u64,
    pub bbox_threshold: f64,
    pub strict_ambiguity: bool,
    pub on_step_failure: FailureStrategy,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        let defaults = ReplaySettings::default();
        Self {
            pacing_ms: millis(defaults.pacing),
            readiness_timeout_ms: millis(defaults.readiness_timeout),
            poll_interval_ms: millis(defaults.poll_interval),
            discovery_attempts: defaults.discovery_attempts,
            discovery_interval_ms: millis(defaults.discovery_interval),
            row_wait_ms: millis(defaults.row_wait),
            bbox_threshold: defaults.bbox_threshold,
            strict_ambiguity: defaults.strict_ambiguity,
            on_step_failure: FailureStrategy::default(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl ReplayConfig {
    pub fn to_settings(&self) -> ReplaySettings {
        ReplaySettings {
            pacing: Duration::from_millis(self.pacing_ms),
            readiness_timeout: Duration::from_millis(self.readiness_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            discovery_attempts: self.discovery_attempts.max(1),
            discovery_interval: Duration::from_millis(self.discovery_interval_ms),
            row_wait: Duration::from_millis(self.row_wait_ms),
            bbox_threshold: self.bbox_threshold.clamp(0.0, 1.0),
            strict_ambiguity: self.strict_ambiguity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            api_key: None,
            timeout_ms: 10_000,
        }
    }
}

impl RecoveryConfig {
    /// Client settings when the remote service is enabled and has an address.
    pub fn client_config(&self) -> Option<RecoveryClientConfig> {
        if !self.enabled {
            return None;
        }
        let base_url = self.base_url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
        let mut config = RecoveryClientConfig::new(base_url);
        config.api_key = self.api_key.clone().filter(|k| !k.is_empty());
        config.timeout = Duration::from_millis(self.timeout_ms);
        Some(config)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for the daily rolling log file; none disables file output
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl Config {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).context("Failed to parse config file")
    }

    pub fn replay_settings(&self) -> ReplaySettings {
        self.replay.to_settings()
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    /// Override fields from `lookup`; empty values are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(ws_url) = get(ENV_WS_URL) {
            self.browser.ws_url = Some(ws_url);
        }
        if let Some(base_url) = get(ENV_RECOVERY_URL) {
            self.recovery.base_url = Some(base_url);
            self.recovery.enabled = true;
        }
        if let Some(api_key) = get(ENV_RECOVERY_API_KEY) {
            self.recovery.api_key = Some(api_key);
        }
    }
}

pub struct LoadedConfig {
    pub config: Config,
    /// File the config came from; none when defaults were used
    pub path: Option<PathBuf>,
}

/// Candidate config files in lookup order.
pub fn config_candidates(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }
    let mut out = vec![PathBuf::from(LOCAL_CONFIG)];
    if let Some(mut dir) = dirs::config_dir() {
        dir.push("flowreplay");
        dir.push("config.yaml");
        out.push(dir);
    }
    out
}

/// Load the first existing config file, then apply environment overrides.
///
/// An explicit path that does not exist is an error; the implicit locations
/// silently fall through to defaults.
pub async fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
    }

    let mut loaded = LoadedConfig {
        config: Config::default(),
        path: None,
    };
    for candidate in config_candidates(explicit) {
        if !candidate.exists() {
            continue;
        }
        let content = fs::read_to_string(&candidate)
            .await
            .with_context(|| format!("Failed to read config file {}", candidate.display()))?;
        loaded.config = Config::from_yaml(&content)?;
        info!("Loaded configuration from: {}", candidate.display());
        loaded.path = Some(candidate);
        break;
    }
    if loaded.path.is_none() {
        info!("No config file found, using defaults");
    }

    loaded.config.apply_env_overrides();
    Ok(loaded)
}

/// Export `KEY=value` lines from `config/local.env` for keys not already set.
pub fn load_local_env_overrides() {
    load_env_file(Path::new(LOCAL_ENV));
}

pub fn load_env_file(path: &Path) {
    if !path.exists() {
        return;
    }

    match stdfs::read_to_string(path) {
        Ok(contents) => {
            for (key, value) in parse_env_lines(&contents) {
                if env::var(&key).is_ok() {
                    continue;
                }
                env::set_var(key, value);
            }
            info!(path = %path.display(), "Loaded environment overrides from local.env");
        }
        Err(err) => {
            warn!(path = %path.display(), ?err, "failed to read local.env overrides");
        }
    }
}

/// `KEY=value` pairs; blank lines and `#` comments are skipped.
pub fn parse_env_lines(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(line = idx + 1, "invalid local.env entry; skipping");
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        out.push((key.to_string(), unescape_value(value.trim())));
    }
    out
}

fn unescape_value(value: &str) -> String {
    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        let inner = &value[1..value.len() - 1];
        inner
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\t", "\t")
    } else {
        value.to_string()
    }
}
