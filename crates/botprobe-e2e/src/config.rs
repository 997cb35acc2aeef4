//! Harness configuration.
//!
//! Everything that identifies the system under test (webhook base URL, bot
//! token, log location, database access, the impersonated user) and every pass
//! threshold lives here. Nothing is hardcoded in scenarios; they receive the
//! loaded configuration when they are built.
//!
//! Configuration is read from YAML; every section is optional:
//!
//! ```yaml
//! target:
//!   base_url: http://localhost
//!   token: "123456:ABC"
//!   timeout_seconds: 45
//! log:
//!   path: /var/log/bot/info.log
//!   tail_lines: 200
//!   poll_interval_ms: 500
//! store:
//!   enabled: true
//!   command: [docker, exec, mongo, mongosh]
//!   database: bot_db
//! user:
//!   chat_id: 830403309
//!   username: alex_probe
//!   first_name: Alex
//! thresholds:
//!   delivery: 80
//!   signal: 70
//!   keyword: 60
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use botprobe_telegram::{BotIdentity, UserIdentity};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::report::Thresholds;

/// Environment variable overriding `target.base_url`.
pub const ENV_BASE_URL: &str = "BOTPROBE_BASE_URL";
/// Environment variable overriding `target.token`.
pub const ENV_TOKEN: &str = "BOTPROBE_TOKEN";
/// Environment variable overriding `log.path`.
pub const ENV_LOG_PATH: &str = "BOTPROBE_LOG_PATH";

/// Top-level harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub target: TargetConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// The user every probe impersonates unless a step overrides it.
    #[serde(default = "default_user")]
    pub user: UserIdentity,

    /// The bot account shown as author of messages carrying buttons.
    #[serde(default)]
    pub bot: BotIdentity,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub timing: TimingConfig,
}

fn default_user() -> UserIdentity {
    UserIdentity::new(0, "probe_user", "Probe")
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            log: LogConfig::default(),
            store: StoreConfig::default(),
            user: default_user(),
            bot: BotIdentity::default(),
            thresholds: Thresholds::default(),
            timing: TimingConfig::default(),
        }
    }
}

/// Webhook endpoint of the system under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Scheme and host, e.g. `http://localhost`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bot token; forms the last path segment of the webhook route.
    #[serde(default)]
    pub token: String,

    /// Client-side request timeout.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "http://localhost".to_string()
}

fn default_timeout_seconds() -> u64 {
    45
}

fn default_user_agent() -> String {
    "TelegramBot (like TwitterBot)".to_string()
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: String::new(),
            timeout_seconds: default_timeout_seconds(),
            user_agent: default_user_agent(),
        }
    }
}

impl TargetConfig {
    /// Full webhook URL: `<base_url>/webhook/<token>`.
    pub fn webhook_url(&self) -> String {
        format!("{}/webhook/{}", self.base_url.trim_end_matches('/'), self.token)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Log file of the system under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_path")]
    pub path: PathBuf,

    /// Maximum number of recent lines inspected per poll.
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_log_path() -> PathBuf {
    PathBuf::from("log/info.log")
}

fn default_tail_lines() -> usize {
    200
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            tail_lines: default_tail_lines(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl LogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Document store access through the database shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// When false, store signals stay unmatched and fixtures are skipped.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Command prefix used to reach the shell; the database name, `--quiet`,
    /// `--eval` and the script are appended.
    #[serde(default = "default_store_command")]
    pub command: Vec<String>,

    /// Extra arguments placed after the database name (credentials, TLS flags).
    #[serde(default)]
    pub extra_args: Vec<String>,

    #[serde(default = "default_database")]
    pub database: String,

    /// Collection holding one document per user, keyed by `chatId`.
    #[serde(default = "default_users_collection")]
    pub users_collection: String,

    /// Collections reported by `botprobe store-stats`.
    #[serde(default = "default_collections")]
    pub collections: Vec<String>,

    #[serde(default = "default_store_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_store_command() -> Vec<String> {
    ["docker", "exec", "mongo", "mongosh"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_database() -> String {
    "bot_db".to_string()
}

fn default_users_collection() -> String {
    "Users".to_string()
}

fn default_collections() -> Vec<String> {
    ["Users", "History", "Cache", "Queue"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_store_timeout_seconds() -> u64 {
    15
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_store_command(),
            extra_args: Vec::new(),
            database: default_database(),
            users_collection: default_users_collection(),
            collections: default_collections(),
            timeout_seconds: default_store_timeout_seconds(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Pacing between and within steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause between consecutive steps.
    #[serde(default = "default_step_gap_ms")]
    pub step_gap_ms: u64,

    /// Multiplier applied to every step's settle wait and signal budget.
    /// Slow environments raise it; local dry runs against a stub lower it.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_step_gap_ms() -> u64 {
    3_000
}

fn default_scale() -> f64 {
    1.0
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            step_gap_ms: default_step_gap_ms(),
            scale: default_scale(),
        }
    }
}

impl TimingConfig {
    pub fn step_gap(&self) -> Duration {
        Duration::from_millis(self.step_gap_ms)
    }

    /// Scales a scenario-declared duration.
    pub fn scaled(&self, duration: Duration) -> Duration {
        duration.mul_f64(self.scale.max(0.0))
    }
}

/// A non-fatal configuration issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `user.chat_id` is zero; the bot will see an impossible user.
    UnsetChatId,
    /// The log file does not exist yet; log signals will stay unmatched.
    LogFileMissing(PathBuf),
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::UnsetChatId => write!(f, "user.chat_id is not set"),
            ConfigWarning::LogFileMissing(path) => {
                write!(f, "log file {} does not exist", path.display())
            }
        }
    }
}

impl HarnessConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        Self::parse_yaml(&content)
    }

    /// Parses configuration from a YAML string.
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        debug!(
            base_url = %config.target.base_url,
            log = %config.log.path.display(),
            store_enabled = config.store.enabled,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Applies environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.target.base_url = base_url;
        }
        if let Some(token) = lookup(ENV_TOKEN) {
            self.target.token = token;
        }
        if let Some(path) = lookup(ENV_LOG_PATH) {
            self.log.path = PathBuf::from(path);
        }
    }

    /// Checks the configuration before a run.
    ///
    /// Returns warnings for issues the run can survive and an error for
    /// anything that would make every step meaningless.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        if self.target.base_url.trim().is_empty() {
            return Err(ConfigError::MissingField("target.base_url"));
        }
        if !self.target.base_url.starts_with("http://")
            && !self.target.base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidBaseUrl(self.target.base_url.clone()));
        }
        if self.target.token.trim().is_empty() {
            return Err(ConfigError::MissingField("target.token"));
        }
        if self.target.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "target.timeout_seconds",
                reason: "must be positive".to_string(),
            });
        }
        if self.log.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "log.poll_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.log.tail_lines == 0 {
            return Err(ConfigError::InvalidValue {
                field: "log.tail_lines",
                reason: "must be positive".to_string(),
            });
        }
        if self.store.enabled && self.store.command.is_empty() {
            return Err(ConfigError::MissingField("store.command"));
        }
        if !self.timing.scale.is_finite() || self.timing.scale < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "timing.scale",
                reason: format!("{} is not a non-negative number", self.timing.scale),
            });
        }
        for (field, value) in [
            ("thresholds.delivery", self.thresholds.delivery),
            ("thresholds.signal", self.thresholds.signal),
            ("thresholds.keyword", self.thresholds.keyword),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("{value} is outside 0..=100"),
                });
            }
        }

        let mut warnings = Vec::new();
        if self.user.chat_id == 0 {
            warnings.push(ConfigWarning::UnsetChatId);
        }
        if !self.log.path.exists() {
            warnings.push(ConfigWarning::LogFileMissing(self.log.path.clone()));
        }
        Ok(warnings)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid base URL '{0}' - expected http:// or https://")]
    InvalidBaseUrl(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.target.token = "123:ABC".to_string();
        config.user = UserIdentity::new(42, "probe", "Probe");
        config
    }

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.target.base_url, "http://localhost");
        assert_eq!(config.target.timeout_seconds, 45);
        assert_eq!(config.log.poll_interval_ms, 500);
        assert_eq!(config.store.users_collection, "Users");
        assert_eq!(config.thresholds.delivery, 80.0);
        assert_eq!(config.thresholds.signal, 70.0);
        assert_eq!(config.thresholds.keyword, 60.0);
    }

    #[test]
    fn test_parse_yaml_partial_sections() {
        let yaml = r#"
target:
  base_url: http://bot.internal:8080/
  token: "6169:XYZ"
log:
  path: /tmp/bot.log
  poll_interval_ms: 250
user:
  chat_id: 830403309
  username: alex_probe
  first_name: Alex
thresholds:
  keyword: 50
"#;
        let config = HarnessConfig::parse_yaml(yaml).unwrap();
        assert_eq!(
            config.target.webhook_url(),
            "http://bot.internal:8080/webhook/6169:XYZ"
        );
        assert_eq!(config.target.timeout_seconds, 45);
        assert_eq!(config.log.path, PathBuf::from("/tmp/bot.log"));
        assert_eq!(config.log.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.log.tail_lines, 200);
        assert_eq!(config.user.chat_id, 830_403_309);
        assert_eq!(config.user.language_code, "en");
        assert_eq!(config.thresholds.keyword, 50.0);
        assert_eq!(config.thresholds.delivery, 80.0);
    }

    #[test]
    fn test_parse_yaml_rejects_garbage() {
        let err = HarnessConfig::parse_yaml("target: [1, 2").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = valid_config();
        let env: HashMap<&str, &str> = [
            (ENV_BASE_URL, "https://staging.example"),
            (ENV_TOKEN, "999:OVERRIDE"),
            (ENV_LOG_PATH, "/srv/bot/info.log"),
        ]
        .into_iter()
        .collect();

        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(
            config.target.webhook_url(),
            "https://staging.example/webhook/999:OVERRIDE"
        );
        assert_eq!(config.log.path, PathBuf::from("/srv/bot/info.log"));
    }

    #[test]
    fn test_validate_requires_token() {
        let mut config = valid_config();
        config.target.token.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField("target.token"))
        ));
    }

    #[test]
    fn test_validate_rejects_non_http_base_url() {
        let mut config = valid_config();
        config.target.base_url = "localhost".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn test_validate_rejects_threshold_over_100() {
        let mut config = valid_config();
        config.thresholds.signal = 120.0;
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { field, .. } if field == "thresholds.signal")
        );
    }

    #[test]
    fn test_validate_warns_on_missing_log_and_chat_id() {
        let mut config = valid_config();
        config.user.chat_id = 0;
        config.log.path = PathBuf::from("/nonexistent/botprobe/info.log");

        let warnings = config.validate().unwrap();
        assert!(warnings.contains(&ConfigWarning::UnsetChatId));
        assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::LogFileMissing(_))));
    }

    #[test]
    fn test_timing_scale() {
        let timing = TimingConfig {
            step_gap_ms: 0,
            scale: 0.5,
        };
        assert_eq!(timing.scaled(Duration::from_secs(10)), Duration::from_secs(5));
    }
}
