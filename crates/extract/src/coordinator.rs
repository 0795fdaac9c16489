//! Runs one document through identification, extraction and validation.

use ingest::DocumentText;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{IdentificationTechnique, PipelineConfig};
use crate::error::PipelineError;
use crate::extraction::ExtractionStage;
use crate::identify::{Identification, RuleIdentifier};
use crate::knowledge::{KnowledgeBase, PriorIndex};
use crate::llm::LlmGateway;
use crate::metrics::GatewayStatsSnapshot;
use crate::schema::{ExtractionResult, IdentifiedState, IntegrityWarning};
use crate::taxonomy::Taxonomy;
use crate::validation::Validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Started,
    Identified,
    Extracted,
    Validated,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Started => "started",
            RunState::Identified => "identified",
            RunState::Extracted => "extracted",
            RunState::Validated => "validated",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    /// Blank documents go straight from Started to Completed.
    pub fn can_advance_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Started, Identified)
            | (Started, Completed)
            | (Identified, Extracted)
            | (Extracted, Validated)
            | (Validated, Completed) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping for one run: id, current state and start time.
struct Run {
    id: Uuid,
    state: RunState,
    started: Instant,
}

impl Run {
    fn start(doc_id: &str) -> Self {
        let run = Self {
            id: Uuid::new_v4(),
            state: RunState::Started,
            started: Instant::now(),
        };
        info!(run_id = %run.id, doc_id, "Run started");
        run
    }

    fn advance(&mut self, next: RunState) -> Result<(), PipelineError> {
        if !self.state.can_advance_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        info!(
            run_id = %self.id,
            from = %self.state,
            to = %next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Run transition"
        );
        self.state = next;
        Ok(())
    }

    fn fail(&mut self, err: PipelineError) -> PipelineError {
        error!(run_id = %self.id, from = %self.state, error = %err, "Run failed");
        if let Err(transition) = self.advance(RunState::Failed) {
            warn!(run_id = %self.id, error = %transition, "Could not mark run failed");
        }
        err
    }
}

/// Everything a completed run reports.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub result: ExtractionResult,
    pub warnings: Vec<IntegrityWarning>,
    pub technique: IdentificationTechnique,
    pub stats: GatewayStatsSnapshot,
}

pub struct Coordinator {
    config: PipelineConfig,
    gateway: Arc<LlmGateway>,
    identification: Identification,
    fallback: RuleIdentifier,
    extraction: ExtractionStage,
    validator: Validator,
    knowledge: Option<Arc<dyn KnowledgeBase>>,
}

impl Coordinator {
    pub fn new(config: PipelineConfig, gateway: Arc<LlmGateway>) -> Result<Self, PipelineError> {
        Self::build(config, gateway, Taxonomy::builtin(), None)
    }

    /// Coordinator whose taxonomy also knows the knowledge base's states,
    /// and which cross-checks extracted values against its priors.
    pub async fn with_knowledge_base(
        config: PipelineConfig,
        gateway: Arc<LlmGateway>,
        knowledge: Arc<dyn KnowledgeBase>,
    ) -> Result<Self, PipelineError> {
        let mut taxonomy = Taxonomy::builtin();
        match knowledge.known_states().await {
            Ok(pairs) => taxonomy.merge_known(pairs),
            Err(e) => warn!(error = %e, "Could not list knowledge base states, using builtin taxonomy"),
        }
        Self::build(config, gateway, taxonomy, Some(knowledge))
    }

    fn build(
        config: PipelineConfig,
        gateway: Arc<LlmGateway>,
        taxonomy: Taxonomy,
        knowledge: Option<Arc<dyn KnowledgeBase>>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let taxonomy = Arc::new(taxonomy);
        let identification = Identification::from_config(&config, Arc::clone(&gateway), Arc::clone(&taxonomy))?;
        let extraction = ExtractionStage::new(Arc::clone(&gateway), &config);

        Ok(Self {
            identification,
            fallback: RuleIdentifier::new(taxonomy),
            extraction,
            validator: Validator::new(),
            knowledge,
            gateway,
            config,
        })
    }

    pub async fn process(&self, doc: &DocumentText) -> Result<PipelineOutput, PipelineError> {
        let mut run = Run::start(&doc.doc_id);
        let deadline = run.started + Duration::from_secs(self.config.concurrency.document_timeout_secs);
        let mut warnings = Vec::new();

        if doc.is_blank() {
            info!(run_id = %run.id, doc_id = %doc.doc_id, "Blank document, nothing to extract");
            run.advance(RunState::Completed)?;
            return Ok(self.output(run.id, ExtractionResult::default(), warnings, self.identification.technique()));
        }

        let (identified, technique) = self.identify(doc, &mut warnings).await;
        run.advance(RunState::Identified)?;

        let priors = self.prefetch_priors(&identified).await;

        let extracted = match self.extraction.extract(doc, &identified, deadline).await {
            Ok(extracted) => extracted,
            Err(e) => return Err(run.fail(e)),
        };
        warnings.extend(extracted.warnings);
        run.advance(RunState::Extracted)?;

        let validated = match self.validator.validate(doc, &identified, &extracted.groups, &priors) {
            Ok(validated) => validated,
            Err(e) => return Err(run.fail(e)),
        };
        warnings.extend(validated.warnings);
        run.advance(RunState::Validated)?;

        let result = ExtractionResult {
            groups: validated.groups,
        };
        run.advance(RunState::Completed)?;

        info!(
            run_id = %run.id,
            doc_id = %doc.doc_id,
            groups = result.groups.len(),
            items = result.item_count(),
            warnings = warnings.len(),
            elapsed_ms = run.started.elapsed().as_millis() as u64,
            "Run completed"
        );
        Ok(self.output(run.id, result, warnings, technique))
    }

    /// Configured identification, falling back to the rule identifier
    /// when it fails.
    async fn identify(
        &self,
        doc: &DocumentText,
        warnings: &mut Vec<IntegrityWarning>,
    ) -> (Vec<IdentifiedState>, IdentificationTechnique) {
        let technique = self.identification.technique();
        match self.identification.identify(doc).await {
            Ok(identified) => (identified, technique),
            Err(e) => {
                warn!(
                    doc_id = %doc.doc_id,
                    technique = technique.as_str(),
                    error = %e,
                    "Identification failed, falling back to rules"
                );
                warnings.push(IntegrityWarning::IdentificationFallback {
                    technique: technique.as_str().to_string(),
                    reason: e.to_string(),
                });
                (self.fallback.identify(doc), IdentificationTechnique::Rules)
            }
        }
    }

    async fn prefetch_priors(&self, identified: &[IdentifiedState]) -> PriorIndex {
        let Some(knowledge) = &self.knowledge else {
            return PriorIndex::default();
        };
        match PriorIndex::prefetch(knowledge.as_ref(), identified).await {
            Ok(priors) => priors,
            Err(e) => {
                warn!(error = %e, "Knowledge base lookup failed, validating without priors");
                PriorIndex::default()
            }
        }
    }

    fn output(
        &self,
        run_id: Uuid,
        result: ExtractionResult,
        warnings: Vec<IntegrityWarning>,
        technique: IdentificationTechnique,
    ) -> PipelineOutput {
        PipelineOutput {
            run_id,
            result,
            warnings,
            technique,
            stats: self.gateway.stats().snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::knowledge::{InMemoryKnowledgeBase, PriorValue};
    use crate::llm::mock::{MockLlmClient, gateway};

    const REPORT: &str = "1、标识\n采用激光打标，标识清晰。\n2、器件封装结构\n典型DIP金属陶瓷结构，未发现宇航禁限用工艺与材料。\n4、键合系统\n内引线采用硅铝丝，超声楔形键合。\n";

    fn item_json(group: &str, state: &str, value: &str, restriction: &str) -> String {
        format!(
            r#"{{"物理状态组": "{group}", "物理状态名称": "{state}", "典型物理状态值": "{value}", "禁限用信息": "{restriction}", "测试评语": "/", "试验项目": "/"}}"#
        )
    }

    /// Model stand-in: fixed identification answer, per-group extraction answers.
    fn respond(prompt: &str) -> Result<String, LlmError> {
        if prompt.contains("identified_states") {
            return Ok(r#"{"identified_states": [
                {"物理状态组": "封装结构", "物理状态": "封装形式"},
                {"物理状态组": "键合结构", "物理状态": "键合丝材料"},
                {"物理状态组": "键合结构", "物理状态": "丝径"}
            ]}"#
            .to_string());
        }
        if prompt.contains("物理状态组\"封装结构\"") {
            return Ok(format!(
                "[{}]",
                item_json("封装结构", "封装形式", "典型DIP金属陶瓷结构", "未发现宇航禁限用工艺与材料")
            ));
        }
        if prompt.contains("物理状态组\"键合结构\"") {
            return Ok(format!("[{}]", item_json("键合结构", "键合丝材料", "硅铝丝", "可用")));
        }
        Ok("[]".to_string())
    }

    fn doc(text: &str) -> DocumentText {
        DocumentText::from_text("report.txt", text)
    }

    #[test]
    fn test_transitions() {
        use RunState::*;
        assert!(Started.can_advance_to(Identified));
        assert!(Validated.can_advance_to(Completed));
        assert!(Extracted.can_advance_to(Failed));
        assert!(!Started.can_advance_to(Validated));
        assert!(!Completed.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Started));

        let mut run = Run::start("doc");
        run.advance(Identified).unwrap();
        let err = run.advance(Completed).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_blank_document_completes_empty() {
        let client = Arc::new(MockLlmClient::new(respond));
        let coordinator = Coordinator::new(PipelineConfig::default(), gateway(Arc::clone(&client))).unwrap();

        let out = coordinator.process(&doc("  \n ")).await.unwrap();
        assert!(out.result.is_empty());
        assert!(out.warnings.is_empty());
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_full_run() {
        let client = Arc::new(MockLlmClient::new(respond));
        let coordinator = Coordinator::new(PipelineConfig::default(), gateway(Arc::clone(&client))).unwrap();

        let out = coordinator.process(&doc(REPORT)).await.unwrap();
        assert_eq!(out.technique, IdentificationTechnique::Llm);

        let groups: Vec<&str> = out.result.groups.iter().map(|g| g.group.as_str()).collect();
        assert_eq!(groups, vec!["封装结构", "键合结构"]);

        let form = &out.result.group("封装结构").unwrap().items[0];
        assert!(form.typical_value.contains("DIP"));
        assert_eq!(form.restriction_info, "可用");

        let bonding = &out.result.group("键合结构").unwrap().items;
        assert_eq!(bonding.len(), 2);
        assert_eq!(bonding[0].typical_value, "硅铝丝");
        assert!(bonding[1].is_sentinel());
        assert!(out.warnings.iter().any(|w| matches!(w, IntegrityWarning::CountMismatch { .. })));

        let json = serde_json::to_value(&out.result).unwrap();
        let tree = json["元器件物理状态分析"].as_array().unwrap();
        assert_eq!(tree[0]["物理状态组"], "封装结构");
        assert_eq!(tree[0]["物理状态项"][0]["物理状态名称"], "封装形式");
        assert_eq!(out.stats.calls, client.calls());
    }

    #[tokio::test]
    async fn test_identification_falls_back_to_rules() {
        let client = Arc::new(MockLlmClient::new(|prompt| {
            if prompt.contains("identified_states") {
                Err(LlmError::Permanent("model not found".to_string()))
            } else {
                respond(prompt)
            }
        }));
        let coordinator = Coordinator::new(PipelineConfig::default(), gateway(client)).unwrap();

        let out = coordinator.process(&doc(REPORT)).await.unwrap();
        assert_eq!(out.technique, IdentificationTechnique::Rules);
        assert!(matches!(out.warnings[0], IntegrityWarning::IdentificationFallback { .. }));
        assert!(out.result.group("封装结构").is_some());
    }

    #[tokio::test]
    async fn test_extraction_failure_fails_run() {
        let client = Arc::new(MockLlmClient::new(|prompt| {
            if prompt.contains("identified_states") {
                respond(prompt)
            } else {
                Err(LlmError::Permanent("quota exhausted".to_string()))
            }
        }));
        let coordinator = Coordinator::new(PipelineConfig::default(), gateway(client)).unwrap();

        let err = coordinator.process(&doc(REPORT)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Llm { stage: "extraction", .. }));
    }

    #[tokio::test]
    async fn test_knowledge_base_fills_test_project() {
        let kb = InMemoryKnowledgeBase::new(vec![PriorValue {
            group: "键合结构".to_string(),
            state: "键合丝材料".to_string(),
            value: "硅铝丝".to_string(),
            restriction: "可用".to_string(),
            test_comment: String::new(),
            test_project: "内部目检".to_string(),
        }]);
        let client = Arc::new(MockLlmClient::new(respond));
        let coordinator = Coordinator::with_knowledge_base(PipelineConfig::default(), gateway(client), Arc::new(kb))
            .await
            .unwrap();

        let out = coordinator.process(&doc(REPORT)).await.unwrap();
        let wire = &out.result.group("键合结构").unwrap().items[0];
        assert_eq!(wire.test_project, "内部目检");
    }

    #[tokio::test]
    async fn test_deadline_gap_fills_every_state() {
        let client = Arc::new(MockLlmClient::new(respond).with_delay(Duration::from_secs(5)));
        let mut config = PipelineConfig::default();
        config.identification.technique = IdentificationTechnique::Rules;
        config.concurrency.document_timeout_secs = 1;
        let coordinator = Coordinator::new(config, gateway(client)).unwrap();
        let report = doc(REPORT);

        let out = coordinator.process(&report).await.unwrap();
        assert_eq!(out.technique, IdentificationTechnique::Rules);

        let identified = RuleIdentifier::new(Arc::new(Taxonomy::builtin())).identify(&report);
        assert!(!identified.is_empty());
        for id in &identified {
            let group = out.result.group(&id.group).unwrap();
            let item = group.items.iter().find(|i| i.state_name == id.state).unwrap();
            assert!(item.is_sentinel());
        }
        assert_eq!(out.result.item_count(), identified.len());

        let pending = out.warnings.iter().find_map(|w| match w {
            IntegrityWarning::ExtractionTimedOut { pending_groups } => Some(pending_groups),
            _ => None,
        });
        assert_eq!(pending.map(Vec::len), Some(out.result.groups.len()));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let client = Arc::new(MockLlmClient::new(respond));
        let mut config = PipelineConfig::default();
        config.extraction.max_batch_size = 0;
        assert!(matches!(
            Coordinator::new(config, gateway(client)),
            Err(PipelineError::Config(_))
        ));
    }
}
