//! Configuration for the taskboard client.
//!
//! Settings live in `taskboard.toml` inside the user's config directory (or
//! the file passed with `--config`). Every section is optional.
//!
//! # Configuration File Format
//!
//! ```toml
//! [backend]
//! url = "https://abcdefgh.supabase.co"
//! anon_key = "eyJhbGciOi..."
//! site_url = "http://localhost:3000"
//!
//! [realtime]
//! heartbeat_secs = 30
//! reconnect_initial_ms = 500
//! reconnect_max_ms = 30000
//! reconnect_multiplier = 2.0
//! jitter_ms = 250
//!
//! [board]
//! reconcile_on_failure = false
//! chat_history = 50
//! chat_capacity = 100
//!
//! [logging]
//! level = "info"
//! json = false
//! file = "/tmp/taskboard.log"
//! ```
//!
//! Layering is file, then environment (`SUPABASE_URL`, `SUPABASE_KEY`,
//! `TASKBOARD_SITE_URL`), then CLI flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::board::chat::{DEFAULT_CAPACITY, DEFAULT_HISTORY};

pub const CONFIG_FILE: &str = "taskboard.toml";
pub const SESSION_FILE: &str = "session.json";
pub const PREFERENCES_FILE: &str = "preferences.json";

pub const ENV_URL: &str = "SUPABASE_URL";
pub const ENV_KEY: &str = "SUPABASE_KEY";
pub const ENV_SITE_URL: &str = "TASKBOARD_SITE_URL";

/// Hosted project connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSection {
    /// Project URL, e.g. `https://<ref>.supabase.co`
    #[serde(default)]
    pub url: String,
    /// Public anon key
    #[serde(default)]
    pub anon_key: String,
    /// Where magic links and OAuth redirects land
    #[serde(default)]
    pub site_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSection {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_reconnect_multiplier")]
    pub reconnect_multiplier: f64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_reconnect_multiplier() -> f64 {
    2.0
}

fn default_jitter_ms() -> u64 {
    250
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            reconnect_multiplier: default_reconnect_multiplier(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// Board behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSection {
    /// Refetch the board when persisting a drag fails
    #[serde(default)]
    pub reconcile_on_failure: bool,
    /// Messages loaded when a chat opens
    #[serde(default = "default_chat_history")]
    pub chat_history: usize,
    /// Messages kept in a live chat feed
    #[serde(default = "default_chat_capacity")]
    pub chat_capacity: usize,
}

fn default_chat_history() -> usize {
    DEFAULT_HISTORY
}

fn default_chat_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Default for BoardSection {
    fn default() -> Self {
        Self {
            reconcile_on_failure: false,
            chat_history: default_chat_history(),
            chat_capacity: default_chat_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Also write logs to this file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file: None,
        }
    }
}

/// Contents of `taskboard.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskboardToml {
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub realtime: RealtimeSection,
    #[serde(default)]
    pub board: BoardSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TaskboardToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse taskboard.toml")
    }

    /// Returns default configuration if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content =
            toml::to_string_pretty(self).context("Failed to serialize taskboard.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply environment overrides through `lookup`. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(ENV_URL) {
            self.backend.url = url;
        }
        if let Some(key) = get(ENV_KEY) {
            self.backend.anon_key = key;
        }
        if let Some(site) = get(ENV_SITE_URL) {
            self.backend.site_url = Some(site);
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.backend.url.trim().is_empty() {
            warnings.push(format!(
                "backend.url is not set (or set {} in the environment)",
                ENV_URL
            ));
        } else if !self.backend.url.starts_with("http://")
            && !self.backend.url.starts_with("https://")
        {
            warnings.push(format!(
                "backend.url '{}' should start with http:// or https://",
                self.backend.url
            ));
        }
        if self.backend.anon_key.trim().is_empty() {
            warnings.push(format!(
                "backend.anon_key is not set (or set {} in the environment)",
                ENV_KEY
            ));
        }
        if self.realtime.heartbeat_secs == 0 {
            warnings.push("realtime.heartbeat_secs must be at least 1".to_string());
        }
        if self.realtime.reconnect_multiplier < 1.0 {
            warnings.push(format!(
                "realtime.reconnect_multiplier {} is below 1.0; backoff would shrink",
                self.realtime.reconnect_multiplier
            ));
        }
        if self.realtime.reconnect_initial_ms > self.realtime.reconnect_max_ms {
            warnings.push(
                "realtime.reconnect_initial_ms is larger than reconnect_max_ms".to_string(),
            );
        }
        if self.board.chat_capacity == 0 {
            warnings.push("board.chat_capacity must be at least 1".to_string());
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!(
                "logging.level '{}' is not a valid filter directive",
                self.logging.level
            ));
        }

        warnings
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub file: TaskboardToml,
    pub config_path: PathBuf,
    pub config_dir: PathBuf,
}

impl Config {
    /// Load from `path` (or the default location) and apply environment
    /// overrides.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path,
            None => default_config_path()?,
        };
        let mut file = TaskboardToml::load_or_default(&config_path)?;
        file.apply_env();
        Ok(Self::from_parts(file, config_path))
    }

    pub fn from_parts(file: TaskboardToml, config_path: PathBuf) -> Self {
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            file,
            config_path,
            config_dir,
        }
    }

    pub fn session_path(&self) -> PathBuf {
        self.config_dir.join(SESSION_FILE)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.config_dir.join(PREFERENCES_FILE)
    }

    /// Redirect target for magic links and OAuth.
    pub fn site_url(&self) -> Option<&str> {
        self.file.backend.site_url.as_deref()
    }

    /// Fail unless both the project URL and anon key are present.
    pub fn require_backend(&self) -> Result<()> {
        if self.file.backend.url.trim().is_empty() || self.file.backend.anon_key.trim().is_empty()
        {
            anyhow::bail!(
                "Backend not configured. Set backend.url and backend.anon_key in {} or {}/{}.",
                self.config_path.display(),
                ENV_URL,
                ENV_KEY
            );
        }
        Ok(())
    }

    pub fn validate(&self) -> Vec<String> {
        self.file.validate()
    }
}

/// `<user config dir>/taskboard/taskboard.toml`
pub fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine the user config directory")?;
    Ok(base.join("taskboard").join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = TaskboardToml::parse("").unwrap();
        assert_eq!(toml.realtime.heartbeat_secs, 30);
        assert_eq!(toml.board.chat_history, 50);
        assert_eq!(toml.board.chat_capacity, 100);
        assert!(!toml.board.reconcile_on_failure);
        assert_eq!(toml.logging.level, "info");
        assert!(toml.backend.url.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let content = r#"
[backend]
url = "https://abc.supabase.co"
anon_key = "anon"
site_url = "http://localhost:3000"

[realtime]
heartbeat_secs = 15

[board]
reconcile_on_failure = true

[logging]
level = "debug"
json = true
"#;
        let toml = TaskboardToml::parse(content).unwrap();
        assert_eq!(toml.backend.url, "https://abc.supabase.co");
        assert_eq!(toml.backend.site_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(toml.realtime.heartbeat_secs, 15);
        assert_eq!(toml.realtime.reconnect_max_ms, 30_000);
        assert!(toml.board.reconcile_on_failure);
        assert!(toml.logging.json);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(TaskboardToml::parse("[backend\nurl = ").is_err());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut toml = TaskboardToml::parse(
            r#"
[backend]
url = "https://file.supabase.co"
anon_key = "file-key"
"#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_URL, "https://env.supabase.co"),
            (ENV_KEY, ""),
            (ENV_SITE_URL, "https://board.example.com"),
        ]
        .into_iter()
        .collect();
        toml.apply_env_from(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(toml.backend.url, "https://env.supabase.co");
        assert_eq!(toml.backend.anon_key, "file-key");
        assert_eq!(
            toml.backend.site_url.as_deref(),
            Some("https://board.example.com")
        );
    }

    #[test]
    fn test_validate_reports_missing_backend_and_bad_values() {
        let mut toml = TaskboardToml::default();
        toml.realtime.reconnect_multiplier = 0.5;
        toml.board.chat_capacity = 0;
        let warnings = toml.validate();
        assert!(warnings.iter().any(|w| w.contains("backend.url")));
        assert!(warnings.iter().any(|w| w.contains("backend.anon_key")));
        assert!(warnings.iter().any(|w| w.contains("reconnect_multiplier")));
        assert!(warnings.iter().any(|w| w.contains("chat_capacity")));
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let mut toml = TaskboardToml::default();
        toml.backend.url = "abc.supabase.co".into();
        toml.backend.anon_key = "k".into();
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("http://"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut toml = TaskboardToml::default();
        toml.backend.url = "https://abc.supabase.co".into();
        toml.board.chat_history = 20;
        toml.save(&path).unwrap();

        let loaded = TaskboardToml::load(&path).unwrap();
        assert_eq!(loaded.backend.url, "https://abc.supabase.co");
        assert_eq!(loaded.board.chat_history, 20);
    }

    #[test]
    fn test_config_paths_follow_config_file() {
        let dir = tempdir().unwrap();
        let config = Config::from_parts(TaskboardToml::default(), dir.path().join(CONFIG_FILE));
        assert_eq!(config.session_path(), dir.path().join(SESSION_FILE));
        assert_eq!(config.preferences_path(), dir.path().join(PREFERENCES_FILE));
        assert!(config.require_backend().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let toml = TaskboardToml::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(toml.board.chat_capacity, 100);
    }
}
