//! Configuration system for the QueryForge server
//!
//! Loads configuration from:
//! 1. config.yaml - operational settings (port, model, row limits, dialects, logging)
//! 2. .env file - secrets (API keys)
//!
//! Environment variables always override config.yaml values. A missing
//! config.yaml falls back to defaults.

use queryforge_core::{GeneratorSettings, DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT};
use queryforge_schema::Dialect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Model settings for the OpenAI adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Upper bound on one model call, in seconds
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_tokens: 1000,
            timeout_secs: 30,
        }
    }
}

/// Row bounds applied to generated reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub default_row_limit: u32,
    pub max_row_limit: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_row_limit: DEFAULT_ROW_LIMIT,
            max_row_limit: MAX_ROW_LIMIT,
        }
    }
}

/// Per-dialect enable flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialectsConfig {
    pub mysql: bool,
    pub postgres: bool,
    pub sqlserver: bool,
    pub sqlite: bool,
    pub oracle: bool,
    pub mongodb: bool,
}

impl Default for DialectsConfig {
    fn default() -> Self {
        Self {
            mysql: true,
            postgres: true,
            sqlserver: true,
            sqlite: true,
            oracle: true,
            mongodb: true,
        }
    }
}

impl DialectsConfig {
    pub fn is_enabled(&self, dialect: Dialect) -> bool {
        match dialect {
            Dialect::Mysql => self.mysql,
            Dialect::Postgres => self.postgres,
            Dialect::Sqlserver => self.sqlserver,
            Dialect::Sqlite => self.sqlite,
            Dialect::Oracle => self.oracle,
            Dialect::Mongodb => self.mongodb,
        }
    }

    pub fn enabled(&self) -> BTreeSet<Dialect> {
        Dialect::ALL.into_iter().filter(|d| self.is_enabled(*d)).collect()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub generation: GenerationConfig,
    pub limits: LimitsConfig,
    pub dialects: DialectsConfig,
    pub logging: LoggingConfig,
    /// Environment overrides that could not be parsed
    #[serde(skip)]
    env_errors: Vec<String>,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file means defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut config = Config::default();
                config.apply_env_overrides();
                Ok(config)
            }
            other => other,
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("QUERYFORGE_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("QUERYFORGE_SERVER_PORT") {
            self.parse_override("QUERYFORGE_SERVER_PORT", &port, |config, port| {
                config.server.port = port
            });
        }

        if let Some(model) = var("QUERYFORGE_MODEL") {
            self.generation.model = model;
        }
        if let Some(secs) = var("QUERYFORGE_GENERATION_TIMEOUT_SECS") {
            self.parse_override("QUERYFORGE_GENERATION_TIMEOUT_SECS", &secs, |config, secs| {
                config.generation.timeout_secs = secs
            });
        }
        if let Some(rows) = var("ROW_LIMIT_DEFAULT") {
            self.parse_override("ROW_LIMIT_DEFAULT", &rows, |config, rows| {
                config.limits.default_row_limit = rows
            });
        }

        if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(output) = var("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Some(dir) = var("LOG_DIR") {
            self.logging.directory = dir;
        }
    }

    /// Applies a numeric override, or records it for [`Config::issues`]
    fn parse_override<T: std::str::FromStr>(
        &mut self,
        name: &str,
        raw: &str,
        apply: impl FnOnce(&mut Self, T),
    ) {
        match raw.trim().parse() {
            Ok(value) => apply(self, value),
            Err(_) => self
                .env_errors
                .push(format!("{name} is not a valid number: '{raw}'")),
        }
    }

    /// Problems that make the configuration unusable; empty when it is fine
    pub fn issues(&self) -> Vec<String> {
        let mut issues = self.env_errors.clone();

        if self.limits.default_row_limit == 0 {
            issues.push("Row limit default must be positive".to_string());
        }
        if self.limits.default_row_limit > self.limits.max_row_limit {
            issues.push(format!(
                "Row limit default cannot exceed maximum ({})",
                self.limits.max_row_limit
            ));
        }
        if self.dialects.enabled().is_empty() {
            issues.push("At least one dialect must be enabled".to_string());
        }
        if self.generation.timeout_secs == 0 {
            issues.push("Generation timeout must be positive".to_string());
        }

        issues
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let issues = self.issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }

    /// Settings handed to the generation pipeline
    pub fn generator_settings(&self) -> GeneratorSettings {
        GeneratorSettings {
            default_row_limit: self.limits.default_row_limit,
            max_row_limit: self.limits.max_row_limit,
            enabled_dialects: self.dialects.enabled(),
            timeout: Duration::from_secs(self.generation.timeout_secs),
        }
    }

    /// Get OpenAI API key from environment (must be in .env)
    pub fn get_openai_api_key() -> Result<String, ConfigError> {
        std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))
    }
}
