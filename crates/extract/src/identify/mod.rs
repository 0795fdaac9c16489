//! Identification: which (group, state) pairs does a document talk about.

mod llm;
mod rules;
mod tagger;

pub use llm::LlmIdentifier;
pub use rules::RuleIdentifier;
pub use tagger::{HttpTagger, SequenceTagger, TaggedSpan, TaggerIdentifier, decode_bio};

use ingest::DocumentText;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::config::{IdentificationTechnique, PipelineConfig};
use crate::error::PipelineError;
use crate::llm::LlmGateway;
use crate::schema::IdentifiedState;
use crate::taxonomy::Taxonomy;

/// The configured identification technique. All variants share `identify`.
pub enum Identification {
    Rules(RuleIdentifier),
    Tagger(TaggerIdentifier),
    Llm(LlmIdentifier),
}

impl Identification {
    pub fn from_config(
        config: &PipelineConfig,
        gateway: Arc<LlmGateway>,
        taxonomy: Arc<Taxonomy>,
    ) -> Result<Self, PipelineError> {
        let identification = match config.identification.technique {
            IdentificationTechnique::Rules => Identification::Rules(RuleIdentifier::new(taxonomy)),
            IdentificationTechnique::Tagger => {
                let url = config.identification.tagger_url.as_deref().ok_or_else(|| {
                    PipelineError::stage("identification", "tagger technique needs a tagger URL")
                })?;
                let tagger = HttpTagger::new(url, config.llm.request_timeout_secs)
                    .map_err(|source| PipelineError::Llm {
                        stage: "identification",
                        source,
                    })?;
                Identification::Tagger(TaggerIdentifier::new(Arc::new(tagger), taxonomy))
            }
            IdentificationTechnique::Llm => Identification::Llm(LlmIdentifier::new(
                gateway,
                taxonomy,
                config.extraction.max_document_chars,
            )),
        };
        Ok(identification)
    }

    pub fn technique(&self) -> IdentificationTechnique {
        match self {
            Identification::Rules(_) => IdentificationTechnique::Rules,
            Identification::Tagger(_) => IdentificationTechnique::Tagger,
            Identification::Llm(_) => IdentificationTechnique::Llm,
        }
    }

    pub async fn identify(&self, doc: &DocumentText) -> Result<Vec<IdentifiedState>, PipelineError> {
        let identified = match self {
            Identification::Rules(rules) => rules.identify(doc),
            Identification::Tagger(tagger) => tagger.identify(doc).await?,
            Identification::Llm(llm) => llm.identify(doc).await?,
        };

        info!(
            doc_id = %doc.doc_id,
            technique = self.technique().as_str(),
            states = identified.len(),
            novel = identified.iter().filter(|s| s.novel).count(),
            "Identification finished"
        );
        Ok(identified)
    }
}

/// Trim names, drop empty pairs, merge duplicates keeping the first
/// occurrence, and tag pairs outside the taxonomy as novel.
pub(crate) fn finalize(raw: Vec<IdentifiedState>, taxonomy: &Taxonomy) -> Vec<IdentifiedState> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());

    for mut id in raw {
        id.group = id.group.trim().to_string();
        id.state = id.state.trim().to_string();
        if id.group.is_empty() || id.state.is_empty() {
            continue;
        }
        if !seen.insert((id.group.clone(), id.state.clone())) {
            continue;
        }
        id.novel = !taxonomy.contains(&id.group, &id.state);
        out.push(id);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_dedupes_and_tags_novel() {
        let taxonomy = Taxonomy::builtin();
        let raw = vec![
            IdentifiedState::new(" 封装结构 ", "封装形式"),
            IdentifiedState::new("壳体", "镀层厚度"),
            IdentifiedState::new("封装结构", "封装形式"),
            IdentifiedState::new("", "丝径"),
            IdentifiedState::new("标识", "标识工艺"),
        ];

        let out = finalize(raw, &taxonomy);
        let pairs: Vec<(&str, &str)> = out.iter().map(|s| (s.group.as_str(), s.state.as_str())).collect();
        assert_eq!(
            pairs,
            vec![("封装结构", "封装形式"), ("壳体", "镀层厚度"), ("标识", "标识工艺")]
        );
        assert!(!out[0].novel);
        assert!(out[1].novel);
    }

    #[test]
    fn test_from_config_selects_variant() {
        let mut config = PipelineConfig::fast_mode();
        let gateway = crate::llm::mock::gateway(Arc::new(crate::llm::mock::MockLlmClient::new(|_| {
            Ok("{}".to_string())
        })));
        let taxonomy = Arc::new(Taxonomy::builtin());

        let id = Identification::from_config(&config, Arc::clone(&gateway), Arc::clone(&taxonomy)).unwrap();
        assert_eq!(id.technique(), IdentificationTechnique::Rules);

        config.identification.technique = IdentificationTechnique::Tagger;
        config.identification.tagger_url = Some("http://127.0.0.1:9000".to_string());
        let id = Identification::from_config(&config, gateway, taxonomy).unwrap();
        assert_eq!(id.technique(), IdentificationTechnique::Tagger);
    }
}
