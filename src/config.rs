//! Process configuration loading.
//!
//! Environment variables are the sole config source, following the same
//! raw-then-validate shape as the TOML loader this is adapted from: an
//! `Option`-everywhere raw struct, validated into a typed public config,
//! with a dedicated error enum for anything that should be fatal at startup.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiProvider {
    Local,
    OpenAi,
    Groq,
    Gemini,
    Claude,
}

impl AiProvider {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Some(AiProvider::Local),
            "openai" => Some(AiProvider::OpenAi),
            "groq" => Some(AiProvider::Groq),
            "gemini" => Some(AiProvider::Gemini),
            "claude" => Some(AiProvider::Claude),
            _ => None,
        }
    }

    /// Env-var prefix used for `<P>_API_KEY`/`<P>_MODEL`/`<P>_BASE_URL`.
    fn prefix(self) -> &'static str {
        match self {
            AiProvider::Local => "LOCAL",
            AiProvider::OpenAi => "OPENAI",
            AiProvider::Groq => "GROQ",
            AiProvider::Gemini => "GEMINI",
            AiProvider::Claude => "CLAUDE",
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            AiProvider::Local => "http://localhost:11434",
            AiProvider::OpenAi => "https://api.openai.com/v1",
            AiProvider::Groq => "https://api.groq.com/openai/v1",
            AiProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            AiProvider::Claude => "https://api.anthropic.com/v1",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            AiProvider::Local => "llama3",
            AiProvider::OpenAi => "gpt-4o-mini",
            AiProvider::Groq => "llama-3.1-70b-versatile",
            AiProvider::Gemini => "gemini-1.5-flash",
            AiProvider::Claude => "claude-3-5-sonnet-20241022",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: AiProvider,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Fully validated process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub signal_phone_number: String,
    pub signal_url: String,
    pub summarization_interval: Duration,
    pub provider: ProviderConfig,
    pub database_path: String,
    pub log_level: LogLevel,
    pub http_bind: String,
    pub ingestor_max_retries: u32,
    pub ingestor_retry_delay: Duration,
}

/// Field list mirrors the env vars in one place; populated from `std::env`
/// rather than deserialized, but kept Option-everywhere like the raw TOML
/// struct this is adapted from so validation stays in one downstream pass.
#[derive(Debug)]
struct RawConfig {
    signal_phone_number: Option<String>,
    signal_url: Option<String>,
    summarization_interval: Option<String>,
    ai_provider: Option<String>,
    database_path: Option<String>,
    log_level: Option<String>,
    http_bind: Option<String>,
    ingestor_max_retries: Option<String>,
    ingestor_retry_delay: Option<String>,
}

fn read_raw() -> RawConfig {
    RawConfig {
        signal_phone_number: std::env::var("SIGNAL_PHONE_NUMBER").ok(),
        signal_url: std::env::var("SIGNAL_URL").ok(),
        summarization_interval: std::env::var("SUMMARIZATION_INTERVAL").ok(),
        ai_provider: std::env::var("AI_PROVIDER").ok(),
        database_path: std::env::var("DATABASE_PATH").ok(),
        log_level: std::env::var("LOG_LEVEL").ok(),
        http_bind: std::env::var("HTTP_BIND").ok(),
        ingestor_max_retries: std::env::var("INGESTOR_MAX_RETRIES").ok(),
        ingestor_retry_delay: std::env::var("INGESTOR_RETRY_DELAY").ok(),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

/// Load and validate configuration from the process environment.
pub fn load_config() -> Result<Config, ConfigError> {
    let raw = read_raw();

    let signal_phone_number = raw
        .signal_phone_number
        .ok_or_else(|| ConfigError::MissingVar("SIGNAL_PHONE_NUMBER".to_owned()))?;

    let signal_url = raw.signal_url.unwrap_or_else(|| "localhost:8080".to_owned());

    let summarization_interval = match raw.summarization_interval {
        Some(s) => parse_duration("SUMMARIZATION_INTERVAL", &s)?,
        None => Duration::from_secs(12 * 3600),
    };
    if summarization_interval < Duration::from_secs(60) {
        return Err(ConfigError::InvalidValue {
            field: "SUMMARIZATION_INTERVAL".to_owned(),
            value: "must be at least 1m".to_owned(),
        });
    }

    let provider_name = raw.ai_provider.unwrap_or_else(|| "local".to_owned());
    let provider = AiProvider::parse(&provider_name).ok_or_else(|| ConfigError::InvalidValue {
        field: "AI_PROVIDER".to_owned(),
        value: provider_name.clone(),
    })?;

    let prefix = provider.prefix();
    let api_key = std::env::var(format!("{prefix}_API_KEY")).ok();
    let model = std::env::var(format!("{prefix}_MODEL")).unwrap_or_else(|_| provider.default_model().to_owned());
    let base_url =
        std::env::var(format!("{prefix}_BASE_URL")).unwrap_or_else(|_| provider.default_base_url().to_owned());

    let database_path = raw
        .database_path
        .unwrap_or_else(|| "./summarizarr.sqlite3".to_owned());

    let log_level = match raw.log_level.as_deref() {
        None => LogLevel::Info,
        Some(s) => match s.to_ascii_uppercase().as_str() {
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "WARN" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "LOG_LEVEL".to_owned(),
                    value: other.to_owned(),
                })
            }
        },
    };

    let http_bind = raw.http_bind.unwrap_or_else(|| "0.0.0.0:8081".to_owned());

    let ingestor_max_retries = match raw.ingestor_max_retries {
        Some(s) => s.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
            field: "INGESTOR_MAX_RETRIES".to_owned(),
            value: s,
        })?,
        None => 5,
    };

    let ingestor_retry_delay = match raw.ingestor_retry_delay {
        Some(s) => parse_duration("INGESTOR_RETRY_DELAY", &s)?,
        None => Duration::from_secs(5),
    };

    Ok(Config {
        signal_phone_number,
        signal_url,
        summarization_interval,
        provider: ProviderConfig {
            provider,
            api_key,
            model,
            base_url,
        },
        database_path,
        log_level,
        http_bind,
        ingestor_max_retries,
        ingestor_retry_delay,
    })
}

fn parse_duration(field: &str, s: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(s).map_err(|_| ConfigError::InvalidValue {
        field: field.to_owned(),
        value: s.to_owned(),
    })
}
