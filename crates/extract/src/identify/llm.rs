use ingest::DocumentText;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::error::PipelineError;
use crate::json::extract_json_object;
use crate::llm::LlmGateway;
use crate::prompt::{identification_prompt, truncate_middle};
use crate::schema::IdentifiedState;
use crate::taxonomy::Taxonomy;

#[derive(Deserialize)]
struct IdentificationResponse {
    #[serde(alias = "identified_States")]
    identified_states: Vec<IdentifiedPair>,
}

#[derive(Deserialize)]
struct IdentifiedPair {
    #[serde(rename = "物理状态组")]
    group: String,
    #[serde(rename = "物理状态", alias = "物理状态名称")]
    state: String,
}

/// Asks the model which taxonomy states the document mentions.
pub struct LlmIdentifier {
    gateway: Arc<LlmGateway>,
    taxonomy: Arc<Taxonomy>,
    max_document_chars: usize,
}

impl LlmIdentifier {
    pub fn new(gateway: Arc<LlmGateway>, taxonomy: Arc<Taxonomy>, max_document_chars: usize) -> Self {
        Self {
            gateway,
            taxonomy,
            max_document_chars,
        }
    }

    pub async fn identify(&self, doc: &DocumentText) -> Result<Vec<IdentifiedState>, PipelineError> {
        if doc.is_blank() {
            return Ok(Vec::new());
        }

        let text = truncate_middle(&doc.body(), self.max_document_chars);
        let prompt = identification_prompt(&self.taxonomy.render(), &text);

        let response = self
            .gateway
            .complete(&prompt)
            .await
            .map_err(|source| PipelineError::Llm {
                stage: "identification",
                source,
            })?;

        let raw = parse_response(&response)?;
        Ok(super::finalize(raw, &self.taxonomy))
    }
}

fn parse_response(response: &str) -> Result<Vec<IdentifiedState>, PipelineError> {
    let object = extract_json_object(response).ok_or_else(|| {
        warn!(response_chars = response.chars().count(), "No JSON object in identification response");
        PipelineError::stage("identification", "response contained no JSON object")
    })?;

    let parsed: IdentificationResponse = serde_json::from_value(Value::Object(object))
        .map_err(|e| PipelineError::stage("identification", format!("unexpected response shape: {e}")))?;

    Ok(parsed
        .identified_states
        .into_iter()
        .map(|pair| IdentifiedState::new(pair.group, pair.state))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockLlmClient, gateway};

    fn identifier(reply: &'static str) -> (LlmIdentifier, Arc<MockLlmClient>) {
        let client = Arc::new(MockLlmClient::new(move |_| Ok(reply.to_string())));
        let identifier = LlmIdentifier::new(gateway(Arc::clone(&client)), Arc::new(Taxonomy::builtin()), 12000);
        (identifier, client)
    }

    #[tokio::test]
    async fn test_parses_and_finalizes() {
        let (identifier, client) = identifier(
            r#"```json
{"identified_states": [
  {"物理状态组": "封装结构", "物理状态": "封装形式"},
  {"物理状态组": "壳体", "物理状态": "镀层厚度"},
  {"物理状态组": "封装结构", "物理状态": "封装形式"}
]}
```"#,
        );
        let doc = DocumentText::from_text("r.txt", "2、器件封装结构\n典型DIP金属陶瓷结构。\n3、附图\n图1\n");

        let ids = identifier.identify(&doc).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids[1].novel);

        let prompt = &client.prompts()[0];
        assert!(prompt.contains("典型DIP金属陶瓷结构"));
        assert!(prompt.contains("[键合结构]"));
    }

    #[tokio::test]
    async fn test_accepts_legacy_key() {
        let (identifier, _) = identifier(r#"{"identified_States": [{"物理状态组": "标识", "物理状态": "标识工艺"}]}"#);
        let doc = DocumentText::from_text("r.txt", "激光打标");

        let ids = identifier.identify(&doc).await.unwrap();
        assert_eq!(ids[0].state, "标识工艺");
    }

    #[tokio::test]
    async fn test_unparseable_response_is_stage_failure() {
        let (identifier, _) = identifier("抱歉，我无法完成。");
        let doc = DocumentText::from_text("r.txt", "激光打标");

        let err = identifier.identify(&doc).await.unwrap_err();
        assert!(matches!(err, PipelineError::Stage { stage: "identification", .. }));
    }

    #[tokio::test]
    async fn test_blank_document_skips_model() {
        let (identifier, client) = identifier("{}");
        let doc = DocumentText::from_text("r.txt", "");

        assert!(identifier.identify(&doc).await.unwrap().is_empty());
        assert_eq!(client.calls(), 0);
    }
}
