use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::duration::deserialize_duration;
use crate::error::BillError;

pub const DEFAULT_YNAB_BASE_URL: &str = "https://api.ynab.com/v1";

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_auth_dir() -> PathBuf {
    PathBuf::from(".auth")
}

fn default_screenshot_dir() -> PathBuf {
    PathBuf::from("screenshots")
}

fn default_true() -> bool {
    true
}

/// Per-step timeouts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Loading the login or dashboard page.
    #[serde(deserialize_with = "deserialize_duration")]
    pub navigation: Duration,

    /// Waiting for the dashboard after submitting credentials.
    #[serde(deserialize_with = "deserialize_duration")]
    pub login: Duration,

    /// Waiting for an element to render text.
    #[serde(deserialize_with = "deserialize_duration")]
    pub element: Duration,

    /// Closing each of page, context, and browser.
    #[serde(deserialize_with = "deserialize_duration")]
    pub close: Duration,

    /// Each request to the budgeting service.
    #[serde(deserialize_with = "deserialize_duration")]
    pub http: Duration,

    /// Each `op read` call to the vault.
    #[serde(deserialize_with = "deserialize_duration")]
    pub vault: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(10),
            login: Duration::from_secs(60),
            element: Duration::from_secs(10),
            close: Duration::from_secs(10),
            http: Duration::from_secs(30),
            vault: Duration::from_secs(30),
        }
    }
}

/// Secret references resolved through the vault.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub username: String,
    pub password: String,
    pub account_number: String,
    pub ynab_token: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            username: "op://dev/pge-credentials/username".to_string(),
            password: "op://dev/pge-credentials/password".to_string(),
            account_number: "op://dev/pge-credentials/account-number".to_string(),
            ynab_token: "op://dev/ynab-pat/credential".to_string(),
        }
    }
}

/// CSS selectors on the provider's pages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub consent_reject: String,
    pub username: String,
    pub password: String,
    pub submit: String,
    pub amount_due: String,
    pub due_date: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            consent_reject: "#onetrust-reject-all-handler".to_string(),
            username: "#usernameField".to_string(),
            password: "#passwordField".to_string(),
            submit: "#home_login_submit".to_string(),
            amount_due: "#spntotalAmountDueM".to_string(),
            due_date: "#spnDueDate".to_string(),
        }
    }
}

/// Tunables read from the optional TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    pub timeouts: TimeoutConfig,

    /// Pause between a failed attempt and the next one.
    #[serde(default = "default_retry_delay", deserialize_with = "deserialize_duration")]
    pub retry_delay: Duration,

    /// Browser binary; searched for on the PATH when unset.
    pub chrome_executable: Option<PathBuf>,

    /// Where session artifacts live. Relative paths resolve from the config
    /// file's directory.
    #[serde(default = "default_auth_dir")]
    pub auth_dir: PathBuf,

    /// Diagnostic screenshots, cleared at the start of every run.
    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: PathBuf,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// Skip creating a scheduled transaction that already exists with the
    /// same date, amount, payee and account.
    #[serde(default = "default_true")]
    pub skip_duplicates: bool,

    pub vault: VaultConfig,

    pub selectors: SelectorConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            timeouts: TimeoutConfig::default(),
            retry_delay: default_retry_delay(),
            chrome_executable: None,
            auth_dir: default_auth_dir(),
            screenshot_dir: default_screenshot_dir(),
            headless: true,
            skip_duplicates: true,
            vault: VaultConfig::default(),
            selectors: SelectorConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if settings.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }

        Ok(settings)
    }

    /// Load settings from a file, or return defaults if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Make relative directories absolute with respect to `config_dir`.
    pub fn resolve_dirs(mut self, config_dir: &Path) -> Self {
        self.auth_dir = resolve(config_dir, &self.auth_dir);
        self.screenshot_dir = resolve(config_dir, &self.screenshot_dir);
        self
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// How logs are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Human-readable logs on stderr.
    #[default]
    Development,
    /// JSON lines in a dated file under `logs/`.
    Production,
}

impl FromStr for RunMode {
    type Err = BillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(BillError::config(format!(
                "RUN_MODE must be development or production, got {other:?}"
            ))),
        }
    }
}

/// Values taken from the process environment.
#[derive(Debug, Clone)]
pub struct Environment {
    pub pge_base_url: String,
    pub ynab_base_url: String,
    pub budget_name: String,
    pub account_name: String,
    pub category_id: String,
    pub log_level: String,
    pub run_mode: RunMode,
}

impl Environment {
    pub fn from_env() -> Result<Self, BillError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BillError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| BillError::config(format!("environment variable {key} is not set")))
        };

        let run_mode = match get("RUN_MODE") {
            Some(value) => value.parse()?,
            None => RunMode::default(),
        };

        Ok(Self {
            pge_base_url: required("PGE_BASE_URL")?.trim_end_matches('/').to_string(),
            ynab_base_url: get("YNAB_BASE_URL")
                .unwrap_or_else(|| DEFAULT_YNAB_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            budget_name: required("YNAB_BUDGET_NAME")?,
            account_name: required("YNAB_ACCOUNT_NAME")?,
            category_id: required("YNAB_CATEGORY_ID")?,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            run_mode,
        })
    }
}

/// Environment plus file settings with directories resolved.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub env: Environment,
    pub settings: Settings,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./billsync.toml` if it exists in current directory
/// 2. `~/.config/billsync/billsync.toml`
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("billsync.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(config_dir) = dirs::config_dir() {
        let candidate = config_dir.join("billsync").join("billsync.toml");
        if candidate.exists() {
            return candidate;
        }
    }

    local_config
}

impl ResolvedConfig {
    /// Read the environment and the (optional) settings file.
    ///
    /// Relative directories resolve from the config file's directory, or from
    /// the current directory when the file doesn't exist.
    pub fn load(config_path: &Path, env: Environment) -> Result<Self> {
        let config_path = if config_path.is_relative() {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(config_path)
        } else {
            config_path.to_path_buf()
        };

        let config_dir = config_path
            .parent()
            .context("Config path has no parent directory")?;

        let settings = Settings::load_or_default(&config_path)?.resolve_dirs(config_dir);

        Ok(Self { env, settings })
    }
}
