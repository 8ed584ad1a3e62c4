use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Openrouter,
    Ollama,
    Openai,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Openrouter => write!(f, "openrouter"),
            LlmProvider::Ollama => write!(f, "ollama"),
            LlmProvider::Openai => write!(f, "openai"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on a single completion request, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured provider.
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return &self.base_url;
        }
        match self.provider {
            LlmProvider::Openrouter => "https://openrouter.ai/api/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
            LlmProvider::Openai => "https://api.openai.com/v1",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_server_config")]
    pub server: ServerConfig,
    #[serde(default)]
    pub router: RouterConfig,
    pub llm: Option<LlmConfig>,
    pub twilio: Option<TwilioConfig>,
    #[serde(default = "default_database_config")]
    pub database: DatabaseConfig,
    #[serde(default = "default_reminders_config")]
    pub reminders: RemindersConfig,
    #[serde(default)]
    pub tax: TaxConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RouterConfig {
    /// TOML file holding the ordered `[[patterns]]` table. The built-in
    /// table is used when unset.
    #[serde(default)]
    pub patterns_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender in Twilio's form, e.g. "whatsapp:+14155238886"
    pub from_number: String,
    #[serde(default = "default_twilio_base_url")]
    pub base_url: String,
    /// Public URL Twilio posts to, as configured in the Twilio console.
    /// Used to check `X-Twilio-Signature`; derived from the Host header
    /// when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemindersConfig {
    #[serde(default = "default_reminder_cron")]
    pub cron: String,
    #[serde(default = "default_days_ahead")]
    pub days_ahead: i64,
    /// How far ahead "what's due?" replies look
    #[serde(default = "default_list_window_days")]
    pub list_window_days: i64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TaxConfig {
    /// Jurisdiction named in prompts (e.g. "United States")
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub brackets: Vec<TaxBracket>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TaxBracket {
    pub min_income: f64,
    /// Open-ended when absent
    #[serde(default)]
    pub max_income: Option<f64>,
    pub rate: f64,
}

/// Upper bound for reminder windows, in days (ten years)
pub const MAX_WINDOW_DAYS: i64 = 3650;

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

fn default_twilio_base_url() -> String {
    "https://api.twilio.com/2010-04-01".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("finny.db")
}

fn default_reminder_cron() -> String {
    "0 0 9 * * *".to_string()
}

fn default_days_ahead() -> i64 {
    2
}

fn default_list_window_days() -> i64 {
    14
}

fn default_server_config() -> ServerConfig {
    ServerConfig {
        bind: default_bind(),
    }
}

fn default_database_config() -> DatabaseConfig {
    DatabaseConfig {
        path: default_db_path(),
    }
}

fn default_reminders_config() -> RemindersConfig {
    RemindersConfig {
        cron: default_reminder_cron(),
        days_ahead: default_days_ahead(),
        list_window_days: default_list_window_days(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if let Some(patterns_file) = &config.router.patterns_file {
            if !patterns_file.exists() {
                anyhow::bail!("Pattern file not found: {}", patterns_file.display());
            }
        }

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;

        for (name, days) in [
            ("days_ahead", config.reminders.days_ahead),
            ("list_window_days", config.reminders.list_window_days),
        ] {
            if !(0..=MAX_WINDOW_DAYS).contains(&days) {
                anyhow::bail!(
                    "reminders.{} = {} is outside 0..={}",
                    name,
                    days,
                    MAX_WINDOW_DAYS
                );
            }
        }
        for bracket in &config.tax.brackets {
            if !(0.0..=1.0).contains(&bracket.rate) {
                anyhow::bail!(
                    "tax bracket rate {} is outside 0.0..=1.0 (use 0.25 for 25%)",
                    bracket.rate
                );
            }
        }

        Ok(config)
    }
}
