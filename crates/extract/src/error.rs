use thiserror::Error;

/// Failure of a single language-model call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LlmError {
    /// Timeouts, dropped connections, throttling, empty or garbled bodies.
    #[error("transient LLM failure: {0}")]
    Transient(String),
    /// Bad request, auth failure, unknown model. Retrying will not help.
    #[error("permanent LLM failure: {0}")]
    Permanent(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("{0}")]
    Invalid(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Error that ends a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} stage failed: {message}")]
    Stage { stage: &'static str, message: String },

    #[error("{stage} stage failed: {source}")]
    Llm {
        stage: &'static str,
        #[source]
        source: LlmError,
    },

    #[error("invalid pipeline transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    pub fn stage(stage: &'static str, message: impl Into<String>) -> Self {
        PipelineError::Stage {
            stage,
            message: message.into(),
        }
    }
}
