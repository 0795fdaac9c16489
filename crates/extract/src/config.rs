use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub concurrency: ConcurrencyConfig,
    pub extraction: ExtractionConfig,
    pub identification: IdentificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(flatten)]
    pub mode: LlmMode,
    pub model: String,
    pub request_timeout_secs: u64,
    pub temperature: f32,
}

/// Where model calls go.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum LlmMode {
    /// Ollama-style server on the local network
    Local { base_url: String },
    /// OpenAI-compatible API
    Remote { api_base: String, api_key: String },
}

impl fmt::Debug for LlmMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmMode::Local { base_url } => f.debug_struct("Local").field("base_url", base_url).finish(),
            LlmMode::Remote { api_base, .. } => f
                .debug_struct("Remote")
                .field("api_base", api_base)
                .field("api_key", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_concurrent_llm_calls: usize,
    pub max_extraction_workers: usize,
    pub document_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// States per extraction prompt.
    pub max_batch_size: usize,
    /// Longer documents are shortened to head and tail before prompting.
    pub max_document_chars: usize,
    /// Answers per batch merged by majority vote. 1 disables voting.
    pub ensemble_runs: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IdentificationTechnique {
    Rules,
    Tagger,
    Llm,
}

impl IdentificationTechnique {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentificationTechnique::Rules => "rules",
            IdentificationTechnique::Tagger => "tagger",
            IdentificationTechnique::Llm => "llm",
        }
    }
}

impl FromStr for IdentificationTechnique {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rules" | "rule" => Ok(IdentificationTechnique::Rules),
            "tagger" | "model" => Ok(IdentificationTechnique::Tagger),
            "llm" => Ok(IdentificationTechnique::Llm),
            _ => Err(ConfigError::InvalidValue {
                key: "IDENTIFICATION_TECHNIQUE".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentificationConfig {
    pub technique: IdentificationTechnique,
    #[serde(default)]
    pub tagger_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            mode: LlmMode::Local {
                base_url: "http://127.0.0.1:11434".to_string(),
            },
            model: "qwen2.5".to_string(),
            request_timeout_secs: 120,
            temperature: 0.01,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 2000,
            max_backoff_ms: 20000,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_llm_calls: 3,
            max_extraction_workers: 4,
            document_timeout_secs: 600,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 8,
            max_document_chars: 12000,
            ensemble_runs: 1,
        }
    }
}

impl Default for IdentificationConfig {
    fn default() -> Self {
        Self {
            technique: IdentificationTechnique::Llm,
            tagger_url: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            retry: RetryConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            extraction: ExtractionConfig::default(),
            identification: IdentificationConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Cheap runs: rule-based identification, wide batches, short timeouts.
    pub fn fast_mode() -> Self {
        Self {
            llm: LlmConfig {
                request_timeout_secs: 60,
                ..LlmConfig::default()
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_llm_calls: 8,
                max_extraction_workers: 8,
                document_timeout_secs: 300,
            },
            extraction: ExtractionConfig {
                max_batch_size: 12,
                ..ExtractionConfig::default()
            },
            identification: IdentificationConfig {
                technique: IdentificationTechnique::Rules,
                tagger_url: None,
            },
        }
    }

    /// Small batches and three-way voting on every batch.
    pub fn accurate_mode() -> Self {
        Self {
            llm: LlmConfig {
                request_timeout_secs: 180,
                ..LlmConfig::default()
            },
            retry: RetryConfig {
                max_retries: 5,
                initial_backoff_ms: 2000,
                max_backoff_ms: 30000,
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_llm_calls: 2,
                max_extraction_workers: 3,
                document_timeout_secs: 1200,
            },
            extraction: ExtractionConfig {
                max_batch_size: 4,
                max_document_chars: 12000,
                ensemble_runs: 3,
            },
            identification: IdentificationConfig::default(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from environment-style key/value pairs. `PIPELINE_MODE`
    /// picks the preset the other keys override.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = match get("PIPELINE_MODE").as_deref() {
            None | Some("balanced") => Self::default(),
            Some("fast") => Self::fast_mode(),
            Some("accurate") => Self::accurate_mode(),
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "PIPELINE_MODE".to_string(),
                    value: other.to_string(),
                });
            }
        };

        let mode = get("LLM_MODE").unwrap_or_else(|| {
            let mode = if get("LLM_API_KEY").is_some() { "remote" } else { "local" };
            mode.to_string()
        });
        config.llm.mode = match mode.as_str() {
            "local" => LlmMode::Local {
                base_url: get("LLM_BASE_URL").unwrap_or_else(|| "http://127.0.0.1:11434".to_string()),
            },
            "remote" => LlmMode::Remote {
                api_base: get("LLM_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                api_key: get("LLM_API_KEY").unwrap_or_default(),
            },
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "LLM_MODE".to_string(),
                    value: other.to_string(),
                });
            }
        };

        if let Some(model) = get("LLM_MODEL") {
            config.llm.model = model;
        }
        if let Some(v) = get("LLM_TIMEOUT_SECS") {
            config.llm.request_timeout_secs = parse("LLM_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("LLM_MAX_RETRIES") {
            config.retry.max_retries = parse("LLM_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("LLM_MAX_CONCURRENT_CALLS") {
            config.concurrency.max_concurrent_llm_calls = parse("LLM_MAX_CONCURRENT_CALLS", &v)?;
        }
        if let Some(v) = get("EXTRACTION_WORKERS") {
            config.concurrency.max_extraction_workers = parse("EXTRACTION_WORKERS", &v)?;
        }
        if let Some(v) = get("EXTRACTION_BATCH_SIZE") {
            config.extraction.max_batch_size = parse("EXTRACTION_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("EXTRACTION_ENSEMBLE_RUNS") {
            config.extraction.ensemble_runs = parse("EXTRACTION_ENSEMBLE_RUNS", &v)?;
        }
        if let Some(v) = get("DOCUMENT_TIMEOUT_SECS") {
            config.concurrency.document_timeout_secs = parse("DOCUMENT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("IDENTIFICATION_TECHNIQUE") {
            config.identification.technique = v.parse()?;
        }
        if let Some(url) = get("TAGGER_URL") {
            config.identification.tagger_url = Some(url);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let LlmMode::Remote { api_key, .. } = &self.llm.mode {
            if api_key.trim().is_empty() {
                return Err(ConfigError::Invalid("remote LLM mode requires an API key".to_string()));
            }
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid("LLM model must not be empty".to_string()));
        }
        if self.concurrency.max_concurrent_llm_calls == 0 || self.concurrency.max_extraction_workers == 0 {
            return Err(ConfigError::Invalid("concurrency limits must be at least 1".to_string()));
        }
        if self.extraction.max_batch_size == 0 || self.extraction.ensemble_runs == 0 {
            return Err(ConfigError::Invalid(
                "batch size and ensemble runs must be at least 1".to_string(),
            ));
        }
        if self.identification.technique == IdentificationTechnique::Tagger
            && self.identification.tagger_url.is_none()
        {
            return Err(ConfigError::Invalid("tagger identification requires TAGGER_URL".to_string()));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
        PipelineConfig::fast_mode().validate().unwrap();
        PipelineConfig::accurate_mode().validate().unwrap();
    }

    #[test]
    fn test_remote_requires_key() {
        let err = PipelineConfig::from_lookup(lookup(&[("LLM_MODE", "remote")])).unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn test_api_key_selects_remote() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("LLM_API_KEY", "sk-test"),
            ("LLM_MODEL", "gpt-4o-mini"),
            ("EXTRACTION_WORKERS", "6"),
        ]))
        .unwrap();

        assert!(matches!(config.llm.mode, LlmMode::Remote { .. }));
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.concurrency.max_extraction_workers, 6);
        assert!(!format!("{:?}", config.llm.mode).contains("sk-test"));
    }

    #[test]
    fn test_preset_and_bad_number() {
        let config = PipelineConfig::from_lookup(lookup(&[("PIPELINE_MODE", "fast")])).unwrap();
        assert_eq!(config.identification.technique, IdentificationTechnique::Rules);

        let err = PipelineConfig::from_lookup(lookup(&[("DOCUMENT_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_tagger_requires_url() {
        let err = PipelineConfig::from_lookup(lookup(&[("IDENTIFICATION_TECHNIQUE", "tagger")])).unwrap_err();
        assert!(err.to_string().contains("TAGGER_URL"));
    }

    #[test]
    fn test_partial_json_config() {
        let raw = r#"{"llm": {"mode": "remote", "api_base": "https://example.test/v1", "api_key": "k"},
                      "extraction": {"max_batch_size": 5, "max_document_chars": 8000, "ensemble_runs": 1}}"#;
        let config: PipelineConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.extraction.max_batch_size, 5);
        assert_eq!(config.llm.model, "qwen2.5");
        config.validate().unwrap();
    }
}
