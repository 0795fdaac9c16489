use ingest::DocumentText;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::knowledge::PriorIndex;
use crate::normalizer::{NormalizeOutcome, RestrictionNormalizer, name_key};
use crate::schema::{
    ExtractedItem, GroupResult, IdentifiedState, IntegrityWarning, NOT_APPLICABLE, Restriction, group_plan,
};

const STAGE: &str = "validation";

/// Values models use to say "nothing found".
const EMPTY_PLACEHOLDERS: &[&str] = &["", "文中未提及", "未提及", "无相关描述", "null", "None"];

#[derive(Debug, Clone)]
pub struct ValidationOutput {
    pub groups: Vec<GroupResult>,
    pub warnings: Vec<IntegrityWarning>,
}

/// Completeness and consistency pass over extracted groups. Deterministic
/// and synchronous; validating its own output changes nothing.
pub struct Validator {
    normalizer: RestrictionNormalizer,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        Self {
            normalizer: RestrictionNormalizer::new(),
        }
    }

    pub fn validate(
        &self,
        doc: &DocumentText,
        identified: &[IdentifiedState],
        extracted: &[GroupResult],
        priors: &PriorIndex,
    ) -> Result<ValidationOutput, PipelineError> {
        let plan = group_plan(identified);
        let mut warnings = Vec::new();

        // extracted groups by name, merging repeats in order
        let mut by_group: HashMap<&str, Vec<&ExtractedItem>> = HashMap::new();
        let mut orphan_groups: Vec<&str> = Vec::new();
        for result in extracted {
            if plan.iter().any(|(g, _)| g == &result.group) {
                by_group.entry(&result.group).or_default().extend(result.items.iter());
            } else if !orphan_groups.contains(&result.group.as_str()) {
                orphan_groups.push(&result.group);
            }
        }
        for group in orphan_groups {
            debug!(group, "Dropping group that was never identified");
            warnings.push(IntegrityWarning::OrphanGroup {
                group: group.to_string(),
            });
        }

        let mut groups = Vec::with_capacity(plan.len());
        for (group, states) in &plan {
            let items = by_group.remove(group.as_str()).unwrap_or_default();
            let validated = self.validate_group(doc, group, states, &items, priors, &mut warnings);
            if validated.is_empty() {
                warnings.push(IntegrityWarning::EmptyGroupPruned { group: group.clone() });
                continue;
            }
            groups.push(GroupResult {
                group: group.clone(),
                items: validated,
            });
        }

        for id in identified.iter().filter(|id| id.novel) {
            warnings.push(IntegrityWarning::NovelState {
                group: id.group.clone(),
                state: id.state.clone(),
            });
        }

        check_coverage(&plan, &groups)?;

        info!(
            doc_id = %doc.doc_id,
            groups = groups.len(),
            items = groups.iter().map(|g| g.items.len()).sum::<usize>(),
            warnings = warnings.len(),
            "Validation finished"
        );
        Ok(ValidationOutput { groups, warnings })
    }

    fn validate_group(
        &self,
        doc: &DocumentText,
        group: &str,
        states: &[String],
        items: &[&ExtractedItem],
        priors: &PriorIndex,
        warnings: &mut Vec<IntegrityWarning>,
    ) -> Vec<ExtractedItem> {
        let mut buckets: HashMap<&str, Vec<ExtractedItem>> = HashMap::new();

        for item in items {
            let Some((origin, renamed)) = resolve_origin(item, states) else {
                warnings.push(IntegrityWarning::OrphanItem {
                    group: group.to_string(),
                    state: item.state_name.clone(),
                });
                continue;
            };

            let mut item = (*item).clone();
            if let Some(new_name) = renamed {
                warnings.push(IntegrityWarning::ReconciledItem {
                    group: group.to_string(),
                    from: item.state_name.clone(),
                    to: new_name.clone(),
                });
                item.state_name = new_name;
            }
            if item.state_name != origin {
                item.origin_state = Some(origin.to_string());
            }

            let bucket = buckets.entry(origin).or_default();
            if bucket.iter().any(|existing| existing.state_name == item.state_name) {
                warnings.push(IntegrityWarning::DuplicateItem {
                    group: group.to_string(),
                    state: item.state_name.clone(),
                });
                continue;
            }
            bucket.push(item);
        }

        let taken: HashSet<String> = states.iter().cloned().collect();
        let mut out = Vec::new();
        for state in states {
            let bucket = buckets.remove(state.as_str()).unwrap_or_default();
            if bucket.is_empty() {
                warnings.push(IntegrityWarning::MissingItem {
                    group: group.to_string(),
                    state: state.clone(),
                });
                out.push(ExtractedItem::sentinel(state));
                continue;
            }

            // a parent split can reproduce children that were already present
            let mut emitted: HashSet<String> = HashSet::new();
            for mut item in bucket {
                self.clean_fields(doc, group, state, &mut item, warnings);
                cross_check(group, state, &mut item, priors, &self.normalizer, warnings);
                for part in split_item(group, state, item, &taken, warnings) {
                    if !emitted.insert(part.state_name.clone()) {
                        warnings.push(IntegrityWarning::DuplicateItem {
                            group: group.to_string(),
                            state: part.state_name,
                        });
                        continue;
                    }
                    out.push(part);
                }
            }
        }
        out
    }

    fn clean_fields(
        &self,
        doc: &DocumentText,
        group: &str,
        state: &str,
        item: &mut ExtractedItem,
        warnings: &mut Vec<IntegrityWarning>,
    ) {
        if is_placeholder(&item.typical_value) {
            if !mentions(doc, state) {
                warnings.push(IntegrityWarning::UncorroboratedEmptyValue {
                    group: group.to_string(),
                    state: item.state_name.clone(),
                });
            }
            item.typical_value = NOT_APPLICABLE.to_string();
        }
        for field in [&mut item.test_comment, &mut item.test_project] {
            if is_placeholder(field) {
                *field = NOT_APPLICABLE.to_string();
            }
        }

        let (restriction, outcome) = self.normalizer.normalize(&item.restriction_info);
        match outcome {
            NormalizeOutcome::Exact => {}
            NormalizeOutcome::Fuzzy => warnings.push(IntegrityWarning::RestrictionNormalized {
                group: group.to_string(),
                state: item.state_name.clone(),
                from: item.restriction_info.clone(),
                to: restriction.as_str().to_string(),
            }),
            NormalizeOutcome::Unrecognized => warnings.push(IntegrityWarning::UnrecognizedRestriction {
                group: group.to_string(),
                state: item.state_name.clone(),
                value: item.restriction_info.clone(),
            }),
        }
        item.restriction_info = restriction.as_str().to_string();
    }
}

fn is_placeholder(value: &str) -> bool {
    EMPTY_PLACEHOLDERS.contains(&value.trim())
}

fn mentions(doc: &DocumentText, state: &str) -> bool {
    doc.text.contains(state) || name_key(&doc.text).contains(&name_key(state))
}

/// Which identified state an item answers for, and its new name when the
/// model's spelling had to be corrected.
fn resolve_origin<'a>(item: &ExtractedItem, states: &'a [String]) -> Option<(&'a str, Option<String>)> {
    if let Some(origin) = &item.origin_state {
        if let Some(state) = states.iter().find(|s| *s == origin) {
            return Some((state.as_str(), None));
        }
    }
    if let Some(state) = states.iter().find(|s| **s == item.state_name) {
        return Some((state.as_str(), None));
    }

    let key = name_key(&item.state_name);
    if let Some(state) = states.iter().find(|s| name_key(s) == key) {
        return Some((state.as_str(), Some(state.clone())));
    }

    // numbered children of an earlier split: 镀层1材料, 壳体材料2
    let unnumbered: String = item.state_name.chars().filter(|c| !c.is_ascii_digit()).collect();
    if unnumbered != item.state_name {
        if let Some(state) = states.iter().find(|s| **s == unnumbered) {
            return Some((state.as_str(), None));
        }
    }
    None
}

/// Compare against reviewed prior values: flag restriction disagreements
/// and fill a missing test project. Values are never overwritten.
fn cross_check(
    group: &str,
    state: &str,
    item: &mut ExtractedItem,
    priors: &PriorIndex,
    normalizer: &RestrictionNormalizer,
    warnings: &mut Vec<IntegrityWarning>,
) {
    if item.typical_value == NOT_APPLICABLE {
        return;
    }
    let Some(prior) = priors.best_match(group, state, &item.typical_value) else {
        return;
    };

    let (prior_restriction, _) = normalizer.normalize(&prior.restriction);
    if prior_restriction != Restriction::NotApplicable
        && item.restriction_info != NOT_APPLICABLE
        && item.restriction_info != prior_restriction.as_str()
    {
        warnings.push(IntegrityWarning::RestrictionConflict {
            group: group.to_string(),
            state: item.state_name.clone(),
            extracted: item.restriction_info.clone(),
            prior: prior_restriction.as_str().to_string(),
        });
    }

    if item.test_project == NOT_APPLICABLE && !prior.test_project.trim().is_empty() {
        item.test_project = prior.test_project.trim().to_string();
    }
}

fn split_parts(state: &str, value: &str) -> Vec<String> {
    let plating = state.contains("镀层");
    let mut parts: Vec<&str> = value
        .split(['；', ';'])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if plating && parts.len() == 1 {
        parts = value.split("再镀").map(str::trim).filter(|p| !p.is_empty()).collect();
    }
    if parts.len() < 2 {
        return Vec::new();
    }

    parts
        .into_iter()
        .map(|p| {
            if plating {
                p.strip_prefix('镀').unwrap_or(p).trim().to_string()
            } else {
                p.to_string()
            }
        })
        .collect()
}

fn numbered_name(state: &str, index: usize) -> String {
    if state.contains("镀层") {
        state.replacen("镀层", &format!("镀层{index}"), 1)
    } else {
        format!("{state}{index}")
    }
}

/// Split an item whose value lists several independent values into
/// numbered items. Commentary is split alongside when it has the same
/// number of parts; other fields are copied.
fn split_item(
    group: &str,
    state: &str,
    item: ExtractedItem,
    taken: &HashSet<String>,
    warnings: &mut Vec<IntegrityWarning>,
) -> Vec<ExtractedItem> {
    if item.origin_state.is_some() {
        return vec![item];
    }
    let parts = split_parts(state, &item.typical_value);
    if parts.is_empty() {
        return vec![item];
    }

    let names: Vec<String> = (1..=parts.len()).map(|i| numbered_name(state, i)).collect();
    if names.iter().any(|n| taken.contains(n)) {
        return vec![item];
    }

    let comments: Vec<&str> = item
        .test_comment
        .split(['；', ';'])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let zip_comments = comments.len() == parts.len();

    warnings.push(IntegrityWarning::ItemSplit {
        group: group.to_string(),
        state: state.to_string(),
        parts: parts.len(),
    });

    parts
        .into_iter()
        .zip(names)
        .enumerate()
        .map(|(i, (value, name))| ExtractedItem {
            state_name: name,
            typical_value: value,
            restriction_info: item.restriction_info.clone(),
            test_comment: if zip_comments {
                comments[i].to_string()
            } else {
                item.test_comment.clone()
            },
            test_project: item.test_project.clone(),
            origin_state: Some(state.to_string()),
        })
        .collect()
}

fn check_coverage(plan: &[(String, Vec<String>)], groups: &[GroupResult]) -> Result<(), PipelineError> {
    for (group, states) in plan {
        let Some(result) = groups.iter().find(|g| &g.group == group) else {
            return Err(PipelineError::stage(STAGE, format!("group {group} missing after validation")));
        };
        for state in states {
            if !result.items.iter().any(|i| i.origin() == state.as_str()) {
                return Err(PipelineError::stage(
                    STAGE,
                    format!("state {group}/{state} missing after validation"),
                ));
            }
        }
        if let Some(stray) = result.items.iter().find(|i| !states.iter().any(|s| s == i.origin())) {
            return Err(PipelineError::stage(
                STAGE,
                format!("item {} in {group} has no identified state", stray.state_name),
            ));
        }
    }
    Ok(())
}
