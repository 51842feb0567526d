// src/config.rs

use std::time::Duration;
use std::{env, fmt, fs};

use serde::Deserialize;

use crate::fetchers::FetchConstraints;

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Config read failed: {msg}"),
            ConfigError::Parse(msg) => write!(f, "Config parse failed: {msg}"),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// One tracked wishlist as configured. `platform` stays a raw string here;
/// it is validated into a `Platform` when the scheduler picks the entry up,
/// so one bad entry can be skipped with a log instead of failing the file.
#[derive(Debug, Clone, Deserialize)]
pub struct WishlistConfig {
    pub platform: String,
    pub name: String,
    pub identifier: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub poll_minutes: Option<i64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct WatcherConfig {
    pub wishlists: Vec<WishlistConfig>,
}

pub fn load_config(path: &str) -> Result<WatcherConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("{path}: {e}")))?;
    let cfg: WatcherConfig =
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(format!("{path}: {e}")))?;
    if cfg.wishlists.is_empty() {
        return Err(ConfigError::Invalid(
            "'wishlists' must be a non-empty list".to_string(),
        ));
    }
    Ok(cfg)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Daemon,
    Once,
}

/// Tuning knobs from the environment, with the historical defaults.
/// Everything here is a plain value by the time the rest of the program
/// sees it.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: Mode,
    pub config_path: String,
    pub db_path: String,
    pub poll_minutes: u64,
    pub price_threshold_percent: f64,
    pub page_sleep_secs: u64,
    pub retry_sleep_secs: u64,
    pub fail_sleep_secs: u64,
    pub captcha_sleep_secs: u64,
    pub retry_count: u32,
    pub max_pages: usize,
    /// Minimum spacing between fetch attempts on one platform, shared by
    /// every wishlist of that platform.
    pub min_fetch_spacing_secs: u64,
    pub request_timeout_secs: u64,
    pub debug_dump_html: bool,
    pub debug_html_dir: String,
    pub global_recipients: Vec<String>,
    pub brevo_api_key: String,
    pub email_from: String,
    pub email_from_name: String,
}

impl Settings {
    pub fn from_env() -> Self {
        let mode = match env_string("MODE", "daemon").to_lowercase().as_str() {
            "once" => Mode::Once,
            _ => Mode::Daemon,
        };
        Self {
            mode,
            config_path: env_string("CONFIG_PATH", "config.json"),
            db_path: env_string("DB_PATH", "wishlist_state.sqlite3"),
            poll_minutes: env_u64("POLL_MINUTES", 10),
            price_threshold_percent: env_f64("PRICE_NOTIFY_THRESHOLD", 20.0),
            page_sleep_secs: env_u64("PAGE_SLEEP", 5),
            retry_sleep_secs: env_u64("RETRY_SLEEP", 60),
            fail_sleep_secs: env_u64("FAIL_SLEEP", 600),
            captcha_sleep_secs: env_u64("CAPTCHA_SLEEP", 600),
            retry_count: env_u64("RETRY_COUNT", 3) as u32,
            max_pages: env_u64("MAX_PAGES", 50) as usize,
            min_fetch_spacing_secs: env_u64("MIN_FETCH_SPACING", 30),
            request_timeout_secs: env_u64("REQUEST_TIMEOUT", 20),
            debug_dump_html: env_bool("DEBUG_DUMP_HTML", false),
            debug_html_dir: env_string("DEBUG_HTML_DIR", "debug_html"),
            global_recipients: parse_recipients(&env_string("EMAIL_TO", "")),
            brevo_api_key: env_string("BREVO_API_KEY", ""),
            email_from: env_string("EMAIL_FROM", ""),
            email_from_name: env_string("EMAIL_FROM_NAME", "Wishlist Watcher"),
        }
    }

    pub fn fetch_constraints(&self) -> FetchConstraints {
        FetchConstraints {
            max_pages: self.max_pages,
            retry_count: self.retry_count,
            page_sleep: Duration::from_secs(self.page_sleep_secs),
            retry_sleep: Duration::from_secs(self.retry_sleep_secs),
            fail_sleep: Duration::from_secs(self.fail_sleep_secs),
            captcha_sleep: Duration::from_secs(self.captcha_sleep_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            debug_dump_html: self.debug_dump_html,
            debug_html_dir: self.debug_html_dir.clone(),
        }
    }
}

/// Comma or semicolon separated address list.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.replace(';', ",")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(s) => matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}
