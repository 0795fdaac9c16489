use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::schema::IdentifiedState;

/// Minimum similarity for a prior value to count as the same answer.
pub const SIMILARITY_THRESHOLD: f64 = 0.6;

/// One previously reviewed extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorValue {
    #[serde(rename = "物理状态组")]
    pub group: String,
    #[serde(rename = "物理状态")]
    pub state: String,
    #[serde(rename = "物理状态值", default)]
    pub value: String,
    #[serde(rename = "风险评价", default)]
    pub restriction: String,
    #[serde(rename = "测试评语", alias = "详细分析", default)]
    pub test_comment: String,
    #[serde(rename = "试验项目", default)]
    pub test_project: String,
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn lookup(&self, group: &str, state: &str) -> Result<Vec<PriorValue>>;

    /// Every (group, state) pair the knowledge base has seen.
    async fn known_states(&self) -> Result<Vec<(String, String)>>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledgeBase {
    entries: Vec<PriorValue>,
}

impl InMemoryKnowledgeBase {
    pub fn new(entries: Vec<PriorValue>) -> Self {
        Self { entries }
    }

    /// Load a JSON array of entries.
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .context(format!("Failed to read knowledge base: {:?}", path))?;
        let entries: Vec<PriorValue> =
            serde_json::from_str(&raw).context("Failed to parse knowledge base entries")?;
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn lookup(&self, group: &str, state: &str) -> Result<Vec<PriorValue>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.group == group && e.state == state)
            .cloned()
            .collect())
    }

    async fn known_states(&self) -> Result<Vec<(String, String)>> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for entry in &self.entries {
            let pair = (entry.group.clone(), entry.state.clone());
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
        Ok(pairs)
    }
}

/// Prior values for the states of one document, fetched up front so that
/// validation never waits on I/O.
#[derive(Debug, Clone, Default)]
pub struct PriorIndex {
    entries: HashMap<(String, String), Vec<PriorValue>>,
}

impl PriorIndex {
    pub async fn prefetch(kb: &dyn KnowledgeBase, identified: &[IdentifiedState]) -> Result<Self> {
        let mut index = Self::default();
        for id in identified {
            let key = (id.group.clone(), id.state.clone());
            if index.entries.contains_key(&key) {
                continue;
            }
            let priors = kb.lookup(&id.group, &id.state).await?;
            if !priors.is_empty() {
                index.entries.insert(key, priors);
            }
        }
        Ok(index)
    }

    pub fn insert(&mut self, prior: PriorValue) {
        self.entries
            .entry((prior.group.clone(), prior.state.clone()))
            .or_default()
            .push(prior);
    }

    pub fn get(&self, group: &str, state: &str) -> &[PriorValue] {
        self.entries
            .get(&(group.to_string(), state.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Most similar prior value for `value`, if any clears the threshold.
    pub fn best_match(&self, group: &str, state: &str, value: &str) -> Option<&PriorValue> {
        self.get(group, state)
            .iter()
            .map(|p| (p, strsim::normalized_levenshtein(value, &p.value)))
            .filter(|(_, score)| *score >= SIMILARITY_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(p, _)| p)
    }
}
