pub mod config;
pub mod coordinator;
pub mod error;
pub mod extraction;
pub mod identify;
pub mod json;
pub mod knowledge;
pub mod llm;
pub mod metrics;
pub mod normalizer;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod taxonomy;
pub mod validation;

pub use config::{IdentificationTechnique, LlmMode, PipelineConfig};
pub use coordinator::{Coordinator, PipelineOutput, RunState};
pub use error::{ConfigError, LlmError, PipelineError};
pub use extraction::{ExtractionOutput, ExtractionStage};
pub use identify::{Identification, RuleIdentifier};
pub use knowledge::{InMemoryKnowledgeBase, KnowledgeBase, PriorIndex, PriorValue};
pub use llm::{LlmClient, LlmGateway, OllamaClient, OpenAiClient};
pub use metrics::{GatewayStats, GatewayStatsSnapshot};
pub use schema::{ExtractedItem, ExtractionResult, GroupResult, IdentifiedState, IntegrityWarning, Restriction};
pub use taxonomy::Taxonomy;
pub use validation::{ValidationOutput, Validator};
