use async_trait::async_trait;
use ingest::{DocumentText, SectionKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{LlmError, PipelineError};
use crate::llm::classify_status;
use crate::schema::IdentifiedState;
use crate::taxonomy::Taxonomy;

/// A trained sequence-labeling model: one BIO label per character of the
/// input, labels shaped like `B-<group>/<state>`.
#[async_trait]
pub trait SequenceTagger: Send + Sync {
    async fn tag(&self, text: &str) -> Result<Vec<String>, LlmError>;
}

#[derive(Serialize)]
struct TagRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct TagResponse {
    labels: Vec<String>,
}

/// Tagger served over HTTP at `{base_url}/predict`.
pub struct HttpTagger {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTagger {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::Permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl SequenceTagger for HttpTagger {
    async fn tag(&self, text: &str) -> Result<Vec<String>, LlmError> {
        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .json(&TagRequest { text })
            .send()
            .await
            .map_err(|e| LlmError::Transient(format!("tagger request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: TagResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transient(format!("malformed tagger response: {e}")))?;
        Ok(parsed.labels)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedSpan {
    pub label: String,
    /// Byte offsets into the tagged text.
    pub start: usize,
    pub end: usize,
}

/// Collapse per-character BIO labels into spans. A stray `I-` tag opens a
/// new span.
pub fn decode_bio(text: &str, labels: &[String]) -> Vec<TaggedSpan> {
    let mut spans: Vec<TaggedSpan> = Vec::new();
    let mut current: Option<TaggedSpan> = None;

    for ((pos, c), label) in text.char_indices().zip(labels) {
        let end = pos + c.len_utf8();
        let (tag, name) = match label.split_once('-') {
            Some((tag, name)) if (tag == "B" || tag == "I") && !name.is_empty() => (tag, name),
            _ => {
                spans.extend(current.take());
                continue;
            }
        };

        match current.as_mut() {
            Some(span) if tag == "I" && span.label == name => span.end = end,
            _ => {
                spans.extend(current.take());
                current = Some(TaggedSpan {
                    label: name.to_string(),
                    start: pos,
                    end,
                });
            }
        }
    }

    spans.extend(current);
    spans
}

pub struct TaggerIdentifier {
    tagger: Arc<dyn SequenceTagger>,
    taxonomy: Arc<Taxonomy>,
}

impl TaggerIdentifier {
    pub fn new(tagger: Arc<dyn SequenceTagger>, taxonomy: Arc<Taxonomy>) -> Self {
        Self { tagger, taxonomy }
    }

    pub async fn identify(&self, doc: &DocumentText) -> Result<Vec<IdentifiedState>, PipelineError> {
        if doc.is_blank() {
            return Ok(Vec::new());
        }

        let scopes: Vec<(&str, usize)> = if doc.sections.is_empty() {
            vec![(doc.text.as_str(), 0)]
        } else {
            doc.sections
                .iter()
                .filter(|s| s.kind != SectionKind::Figures)
                .map(|s| (s.text.as_str(), s.offset.0))
                .collect()
        };

        let mut found = Vec::new();
        for (text, base) in scopes {
            let labels = self.tagger.tag(text).await.map_err(|source| PipelineError::Llm {
                stage: "identification",
                source,
            })?;
            let chars = text.chars().count();
            if labels.len() != chars {
                return Err(PipelineError::stage(
                    "identification",
                    format!("tagger returned {} labels for {} characters", labels.len(), chars),
                ));
            }

            for span in decode_bio(text, &labels) {
                match self.resolve(&span.label) {
                    Some((group, state)) => found.push(
                        IdentifiedState::new(group, state).with_span(base + span.start, base + span.end),
                    ),
                    None => debug!(label = %span.label, "Skipping unresolvable tagger label"),
                }
            }
        }

        Ok(super::finalize(found, &self.taxonomy))
    }

    fn resolve(&self, label: &str) -> Option<(String, String)> {
        match label.split_once('/') {
            Some((group, state)) if !group.is_empty() && !state.is_empty() => {
                Some((group.to_string(), state.to_string()))
            }
            Some(_) => None,
            None => self
                .taxonomy
                .group_of(label)
                .map(|group| (group.to_string(), label.to_string())),
        }
    }
}
