use serde::{Deserialize, Serialize};
use validator::Validate;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LLMProvider {
    /// Any OpenAI-compatible chat completions endpoint (Groq, OpenAI, OpenRouter).
    #[serde(alias = "groq", alias = "openrouter")]
    OpenAI,
    #[serde(alias = "gemini")]
    Google,
    /// Self-hosted OpenAI-compatible server (LM Studio, llama.cpp, Ollama /v1).
    Local,
}

impl LLMProvider {
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, LLMProvider::Local)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    #[validate(url)]
    pub base_url: String,
    #[validate(length(min = 1))]
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl LLMConfig {
    /// Copy of this config with per-call sampling settings.
    pub fn with_sampling(&self, temperature: f64, max_tokens: u32) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
            ..self.clone()
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::OpenAI,
            base_url: GROQ_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            max_tokens: Some(1024),
            temperature: Some(0.1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_aliases() {
        let p: LLMProvider = serde_json::from_str("\"groq\"").unwrap();
        assert_eq!(p, LLMProvider::OpenAI);
        let p: LLMProvider = serde_json::from_str("\"gemini\"").unwrap();
        assert_eq!(p, LLMProvider::Google);
        assert!(!LLMProvider::Local.requires_api_key());
    }

    #[test]
    fn test_with_sampling_keeps_endpoint() {
        let config = LLMConfig::default().with_sampling(0.5, 512);
        assert_eq!(config.temperature, Some(0.5));
        assert_eq!(config.max_tokens, Some(512));
        assert_eq!(config.base_url, GROQ_BASE_URL);
    }
}
