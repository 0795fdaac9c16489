use dashmap::DashMap;
use ingest::DocumentText;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{info, warn};

use crate::config::{ExtractionConfig, PipelineConfig};
use crate::error::PipelineError;
use crate::json::extract_json_array;
use crate::llm::LlmGateway;
use crate::normalizer::name_key;
use crate::prompt::{extraction_prompt, tightened_extraction_prompt, truncate_middle};
use crate::schema::{ExtractedItem, GroupResult, IdentifiedState, IntegrityWarning, group_plan};

const STAGE: &str = "extraction";

/// Item as the model writes it. Field names vary between prompts and models.
#[derive(Deserialize)]
struct RawItem {
    #[serde(rename = "物理状态组", default, deserialize_with = "lenient_string")]
    group: String,
    #[serde(rename = "物理状态名称", alias = "物理状态", default, deserialize_with = "lenient_string")]
    state_name: String,
    #[serde(rename = "典型物理状态值", alias = "物理状态值", default, deserialize_with = "lenient_string")]
    typical_value: String,
    #[serde(rename = "禁限用信息", alias = "风险评价", default, deserialize_with = "lenient_string")]
    restriction_info: String,
    #[serde(rename = "测试评语", alias = "详细分析", default, deserialize_with = "lenient_string")]
    test_comment: String,
    #[serde(rename = "试验项目", default, deserialize_with = "lenient_string")]
    test_project: String,
}

/// Accept strings, numbers, null and lists of those. Lists are joined with
/// the full-width separator so validation can split them again.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    fn text(value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(text)
                .filter(|s| !s.trim().is_empty())
                .collect::<Vec<_>>()
                .join("；"),
            other => other.to_string(),
        }
    }
    Ok(text(&Value::deserialize(deserializer)?))
}

impl RawItem {
    fn into_item(self) -> ExtractedItem {
        ExtractedItem {
            state_name: self.state_name.trim().to_string(),
            typical_value: self.typical_value.trim().to_string(),
            restriction_info: self.restriction_info.trim().to_string(),
            test_comment: self.test_comment.trim().to_string(),
            test_project: self.test_project.trim().to_string(),
            origin_state: None,
        }
    }
}

/// Parse a batch response. `None` when no item array can be recovered.
/// Items naming a different group are discarded.
fn parse_items(response: &str, group: &str) -> Option<Vec<ExtractedItem>> {
    let values = extract_json_array(response)?;
    let mut items = Vec::with_capacity(values.len());

    for value in values {
        match serde_json::from_value::<RawItem>(value) {
            Ok(raw) if !raw.group.trim().is_empty() && raw.group.trim() != group => {
                warn!(expected = group, received = %raw.group, "Skipping item for another group");
            }
            Ok(raw) => items.push(raw.into_item()),
            Err(e) => warn!(group, error = %e, "Skipping malformed item"),
        }
    }

    Some(items)
}

/// Exactly the requested states, in order.
fn aligned(items: &[ExtractedItem], states: &[String]) -> bool {
    items.len() == states.len() && items.iter().zip(states).all(|(item, state)| &item.state_name == state)
}

/// Reorder items by state name and fill the gaps with sentinels.
fn salvage(items: &[ExtractedItem], states: &[String]) -> Vec<ExtractedItem> {
    let mut used = vec![false; items.len()];

    states
        .iter()
        .map(|state| {
            let key = name_key(state);
            let found = items
                .iter()
                .enumerate()
                .find(|(i, item)| !used[*i] && name_key(&item.state_name) == key);
            match found {
                Some((i, item)) => {
                    used[i] = true;
                    ExtractedItem {
                        state_name: state.clone(),
                        ..item.clone()
                    }
                }
                None => ExtractedItem::sentinel(state),
            }
        })
        .collect()
}

fn match_count(items: &[ExtractedItem], states: &[String]) -> usize {
    let keys: Vec<String> = states.iter().map(|s| name_key(s)).collect();
    items.iter().filter(|i| keys.contains(&name_key(&i.state_name))).count()
}

/// Per-field majority over aligned answers. Ties go to the value seen first.
pub fn merge_votes(answers: &[Vec<ExtractedItem>]) -> Vec<ExtractedItem> {
    let Some(first) = answers.first() else {
        return Vec::new();
    };

    fn majority<'a>(values: impl Iterator<Item = &'a str>) -> String {
        let mut order: Vec<&str> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for v in values {
            if !counts.contains_key(v) {
                order.push(v);
            }
            *counts.entry(v).or_default() += 1;
        }
        let best = order.iter().map(|v| counts[v]).max().unwrap_or(0);
        order
            .into_iter()
            .find(|v| counts[v] == best)
            .unwrap_or_default()
            .to_string()
    }

    (0..first.len())
        .map(|i| {
            let column: Vec<&ExtractedItem> = answers.iter().filter_map(|a| a.get(i)).collect();
            ExtractedItem {
                state_name: first[i].state_name.clone(),
                typical_value: majority(column.iter().map(|it| it.typical_value.as_str())),
                restriction_info: majority(column.iter().map(|it| it.restriction_info.as_str())),
                test_comment: majority(column.iter().map(|it| it.test_comment.as_str())),
                test_project: majority(column.iter().map(|it| it.test_project.as_str())),
                origin_state: None,
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    /// Groups in identification order. Groups cut off by the deadline are absent.
    pub groups: Vec<GroupResult>,
    pub warnings: Vec<IntegrityWarning>,
}

/// Fills in value, restriction, commentary and test project for every
/// identified state. One task per group on a bounded pool.
pub struct ExtractionStage {
    gateway: Arc<LlmGateway>,
    config: ExtractionConfig,
    max_workers: usize,
}

impl ExtractionStage {
    pub fn new(gateway: Arc<LlmGateway>, config: &PipelineConfig) -> Self {
        Self {
            gateway,
            config: config.extraction.clone(),
            max_workers: config.concurrency.max_extraction_workers.max(1),
        }
    }

    pub async fn extract(
        &self,
        doc: &DocumentText,
        identified: &[IdentifiedState],
        deadline: Instant,
    ) -> Result<ExtractionOutput, PipelineError> {
        let plan = group_plan(identified);
        if plan.is_empty() {
            return Ok(ExtractionOutput {
                groups: Vec::new(),
                warnings: Vec::new(),
            });
        }

        let text = Arc::new(truncate_middle(&doc.body(), self.config.max_document_chars));
        let results: Arc<DashMap<String, (GroupResult, Vec<IntegrityWarning>)>> = Arc::new(DashMap::new());
        let workers = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for (group, states) in &plan {
            let gateway = Arc::clone(&self.gateway);
            let text = Arc::clone(&text);
            let results = Arc::clone(&results);
            let workers = Arc::clone(&workers);
            let config = self.config.clone();
            let group = group.clone();
            let states = states.clone();

            tasks.spawn(async move {
                let _permit = workers
                    .acquire_owned()
                    .await
                    .map_err(|_| PipelineError::stage(STAGE, "worker pool closed"))?;
                let outcome = extract_group(&gateway, &config, &group, &states, &text).await?;
                results.insert(group, outcome);
                Ok::<(), PipelineError>(())
            });
        }

        let mut timed_out = false;
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(Ok(())))) => {}
                Ok(Some(Ok(Err(e)))) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Ok(Some(Err(join_err))) => {
                    tasks.abort_all();
                    return Err(PipelineError::stage(STAGE, format!("group task failed: {join_err}")));
                }
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    timed_out = true;
                    break;
                }
            }
        }

        let mut groups = Vec::with_capacity(plan.len());
        let mut warnings = Vec::new();
        let mut pending = Vec::new();
        for (group, _) in &plan {
            match results.remove(group) {
                Some((_, (result, group_warnings))) => {
                    groups.push(result);
                    warnings.extend(group_warnings);
                }
                None => pending.push(group.clone()),
            }
        }

        if timed_out {
            warn!(doc_id = %doc.doc_id, pending = ?pending, "Extraction deadline reached");
            warnings.push(IntegrityWarning::ExtractionTimedOut {
                pending_groups: pending,
            });
        }

        info!(
            doc_id = %doc.doc_id,
            groups = groups.len(),
            items = groups.iter().map(|g| g.items.len()).sum::<usize>(),
            warnings = warnings.len(),
            "Extraction finished"
        );
        Ok(ExtractionOutput { groups, warnings })
    }
}

async fn extract_group(
    gateway: &LlmGateway,
    config: &ExtractionConfig,
    group: &str,
    states: &[String],
    text: &str,
) -> Result<(GroupResult, Vec<IntegrityWarning>), PipelineError> {
    let mut items = Vec::with_capacity(states.len());
    let mut warnings = Vec::new();

    for batch in states.chunks(config.max_batch_size.max(1)) {
        let mut answers = Vec::with_capacity(config.ensemble_runs);
        for _ in 0..config.ensemble_runs.max(1) {
            let (answer, answer_warnings) = answer_batch(gateway, group, batch, text).await?;
            answers.push(answer);
            for w in answer_warnings {
                if !warnings.contains(&w) {
                    warnings.push(w);
                }
            }
        }

        if answers.len() == 1 {
            items.extend(answers.pop().unwrap_or_default());
        } else {
            items.extend(merge_votes(&answers));
        }
    }

    Ok((
        GroupResult {
            group: group.to_string(),
            items,
        },
        warnings,
    ))
}

/// One answer for one batch: ask, ask again with a stricter prompt if the
/// answer does not line up, then keep what matches.
async fn answer_batch(
    gateway: &LlmGateway,
    group: &str,
    states: &[String],
    text: &str,
) -> Result<(Vec<ExtractedItem>, Vec<IntegrityWarning>), PipelineError> {
    let ask = |prompt: String| async move {
        gateway
            .complete(&prompt)
            .await
            .map(|response| parse_items(&response, group))
            .map_err(|source| PipelineError::Llm { stage: STAGE, source })
    };

    let first = ask(extraction_prompt(group, states, text)).await?;
    if let Some(items) = &first {
        if aligned(items, states) {
            return Ok((items.clone(), Vec::new()));
        }
    }

    let received = first.as_ref().map_or(0, Vec::len);
    warn!(group, expected = states.len(), received, "Extraction answer misaligned, retrying");

    let second = ask(tightened_extraction_prompt(group, states, text, received)).await?;
    if let Some(items) = &second {
        if aligned(items, states) {
            return Ok((items.clone(), Vec::new()));
        }
    }

    let best = match (first, second) {
        (None, None) => {
            return Err(PipelineError::stage(
                STAGE,
                format!("unparseable model response for group {group}"),
            ));
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (Some(a), Some(b)) => {
            if match_count(&a, states) > match_count(&b, states) { a } else { b }
        }
    };

    let warning = IntegrityWarning::CountMismatch {
        group: group.to_string(),
        expected: states.len(),
        received: best.len(),
    };
    Ok((salvage(&best, states), vec![warning]))
}
