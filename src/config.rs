use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::models::DeliveryOrder;
use crate::source::SourceRule;

const APP_DIR: &str = "news-relay";
const LOCAL_CONFIG_FILE: &str = "news-relay.toml";

const MAX_SLEEP_MINUTES: u64 = 24 * 60;
const MAX_ATTEMPTS: u32 = 20;
const MAX_RETRY_BACKOFF_SECS: u64 = 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub telegram: TelegramConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default = "SourceRule::defaults")]
    pub sources: Vec<SourceRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: ChatId,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

/// Telegram accepts either a numeric chat id or an `@channelusername`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatId {
    Id(i64),
    Username(String),
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatId::Id(id) => write!(f, "{id}"),
            ChatId::Username(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_min_sleep")]
    pub min_sleep_minutes: u64,
    #[serde(default = "default_max_sleep")]
    pub max_sleep_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub order: DeliveryOrder,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
    /// Terminate the process when a message cannot be sent after all retries.
    #[serde(default)]
    pub exit_on_failure: bool,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("articles.db").to_string_lossy().to_string()
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_min_sleep() -> u64 {
    1
}

fn default_max_sleep() -> u64 {
    15
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_concurrency() -> usize {
    4
}

fn default_user_agent() -> String {
    format!("news-relay/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    5
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            min_sleep_minutes: default_min_sleep(),
            max_sleep_minutes: default_max_sleep(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            concurrency: default_concurrency(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            order: DeliveryOrder::default(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff(),
            exit_on_failure: false,
        }
    }
}

impl Config {
    /// Load from `explicit` when given, otherwise from the first config file
    /// found in the discovery order.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::discover().ok_or_else(|| {
                AppError::Config(format!(
                    "no config file found; create ./{} or {}",
                    LOCAL_CONFIG_FILE,
                    Self::config_path().display()
                ))
            })?,
        };

        tracing::info!(path = %config_path.display(), "Loading configuration");
        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            AppError::Config(format!("cannot read {}: {}", config_path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(AppError::Config("telegram.bot_token must not be empty".into()));
        }
        if let ChatId::Username(name) = &self.telegram.chat_id {
            if name.trim().is_empty() {
                return Err(AppError::Config("telegram.chat_id must not be empty".into()));
            }
        }
        if self.schedule.max_sleep_minutes == 0
            || self.schedule.max_sleep_minutes > MAX_SLEEP_MINUTES
            || self.schedule.min_sleep_minutes > self.schedule.max_sleep_minutes
        {
            return Err(AppError::Config(format!(
                "invalid sleep range {}..={} minutes",
                self.schedule.min_sleep_minutes, self.schedule.max_sleep_minutes
            )));
        }
        if self.fetch.concurrency == 0 {
            return Err(AppError::Config("fetch.concurrency must be at least 1".into()));
        }
        if self.delivery.max_attempts == 0 || self.delivery.max_attempts > MAX_ATTEMPTS {
            return Err(AppError::Config(format!(
                "delivery.max_attempts must be between 1 and {MAX_ATTEMPTS}"
            )));
        }
        if self.delivery.retry_backoff_secs > MAX_RETRY_BACKOFF_SECS {
            return Err(AppError::Config(format!(
                "delivery.retry_backoff_secs must be at most {MAX_RETRY_BACKOFF_SECS}"
            )));
        }
        Ok(())
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceRule> {
        self.sources.iter().filter(|s| s.enabled)
    }

    fn discover() -> Option<PathBuf> {
        [PathBuf::from(LOCAL_CONFIG_FILE), Self::config_path()]
            .into_iter()
            .find(|p| p.exists())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }
}
