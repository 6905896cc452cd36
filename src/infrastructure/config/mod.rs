//! Layered application configuration.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. `northwind.toml` (or the file named by `NORTHWIND_CONFIG`)
//! 3. `NORTHWIND_*` environment variables, nested with `__`
//!    (e.g. `NORTHWIND_RAG__TOP_K=3`)
//! 4. flat legacy variables: `MYSQL_*`, `DATABASE_URL`, `GROQ_*`,
//!    `FLASK_SECRET_KEY`, `FLASK_DEBUG`

use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;
use validator::Validate;

pub const DEFAULT_CONFIG_FILE: &str = "northwind.toml";
pub const CONFIG_PATH_ENV: &str = "NORTHWIND_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    pub debug: bool,
    #[validate(length(min = 8))]
    pub session_secret: String,
    #[validate(range(min = 1, max = 10080))]
    pub session_ttl_minutes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            debug: false,
            session_secret: "dev-secret-key-change-in-prod".to_string(),
            session_ttl_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// Full connection URL; when absent one is built from the MySQL fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(range(min = 1, max = 100))]
    pub max_connections: u32,
    #[validate(range(min = 1))]
    pub acquire_timeout_secs: u64,
    #[validate(range(min = 1))]
    pub query_timeout_secs: u64,
    #[validate(range(min = 1, max = 10000))]
    pub row_limit: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            name: "northwind".to_string(),
            max_connections: 5,
            acquire_timeout_secs: 10,
            query_timeout_secs: 30,
            row_limit: 50,
        }
    }
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> Result<String> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Ok(url.trim().to_string());
        }

        let mut url = Url::parse("mysql://localhost")
            .map_err(|e| AppError::ConfigError(format!("Invalid base URL: {}", e)))?;
        url.set_host(Some(&self.host))
            .map_err(|e| AppError::ConfigError(format!("Invalid database host: {}", e)))?;
        url.set_port(Some(self.port))
            .map_err(|_| AppError::ConfigError("Invalid database port".to_string()))?;
        url.set_username(&self.user)
            .map_err(|_| AppError::ConfigError("Invalid database user".to_string()))?;
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| AppError::ConfigError("Invalid database password".to_string()))?;
        }
        url.set_path(&self.name);
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// In-process ONNX model via fastembed.
    Local,
    OpenAI,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    #[validate(length(min = 1))]
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Local,
            model: "all-MiniLM-L6-v2".to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RagConfig {
    #[validate(range(min = 1, max = 50))]
    pub top_k: usize,
    #[validate(range(max = 5))]
    pub max_sql_retries: u32,
    #[validate(range(min = 2, max = 200))]
    pub history_limit: usize,
    #[validate(range(min = 1, max = 200))]
    pub answer_row_limit: usize,
    pub follow_ups: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_sql_retries: 1,
            history_limit: 20,
            answer_row_limit: 20,
            follow_ups: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub llm: LLMConfig,
    #[validate(nested)]
    pub embedding: EmbeddingConfig,
    #[validate(nested)]
    pub rag: RagConfig,
}

impl AppConfig {
    /// Loads from the default file location plus the process environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::from_figment(Self::figment(&path))
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("NORTHWIND_").split("__"))
            .merge(legacy_env())
            .merge(legacy_debug_flag())
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| AppError::ConfigError(format!("Failed to load configuration: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| AppError::ConfigError(format!("Invalid configuration: {}", e)))?;

        let has_key = self
            .llm
            .api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false);
        if self.llm.provider.requires_api_key() && !has_key {
            return Err(AppError::ConfigError(
                "LLM API key is not set (GROQ_API_KEY or NORTHWIND_LLM__API_KEY)".to_string(),
            ));
        }
        Ok(())
    }

    /// Tracing filter used when `RUST_LOG` is unset.
    pub fn default_log_filter(&self) -> &'static str {
        if self.server.debug {
            "debug"
        } else {
            "info"
        }
    }
}

fn legacy_env() -> Env {
    Env::raw().filter_map(|key| {
        let mapped = match key.as_str().to_ascii_uppercase().as_str() {
            "DATABASE_URL" => "database.url",
            "MYSQL_HOST" => "database.host",
            "MYSQL_PORT" => "database.port",
            "MYSQL_USER" => "database.user",
            "MYSQL_PASSWORD" => "database.password",
            "MYSQL_DATABASE" => "database.name",
            "GROQ_API_KEY" => "llm.api_key",
            "GROQ_MODEL" => "llm.model",
            "FLASK_SECRET_KEY" | "SESSION_SECRET" => "server.session_secret",
            _ => return None,
        };
        Some(mapped.into())
    })
}

fn legacy_debug_flag() -> Figment {
    let flag = std::env::var("FLASK_DEBUG")
        .or_else(|_| std::env::var("DEBUG"))
        .ok()
        .map(|v| parse_flag(&v));
    match flag {
        Some(debug) => Figment::from(Serialized::default("server.debug", debug)),
        None => Figment::new(),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
