use serde::{Deserialize, Serialize};

/// Placeholder used for any field the document says nothing about.
pub const NOT_APPLICABLE: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

/// A (group, state) pair the document talks about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifiedState {
    pub group: String,
    pub state: String,
    /// Not part of the known taxonomy.
    #[serde(default)]
    pub novel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<SourceSpan>,
}

impl IdentifiedState {
    pub fn new(group: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            state: state.into(),
            novel: false,
            span: None,
        }
    }

    pub fn with_span(mut self, start: usize, end: usize) -> Self {
        self.span = Some(SourceSpan { start, end });
        self
    }
}

/// Group names with their states, both in first-appearance order.
pub fn group_plan(identified: &[IdentifiedState]) -> Vec<(String, Vec<String>)> {
    let mut plan: Vec<(String, Vec<String>)> = Vec::new();
    for id in identified {
        match plan.iter_mut().find(|(g, _)| g == &id.group) {
            Some((_, states)) => {
                if !states.contains(&id.state) {
                    states.push(id.state.clone());
                }
            }
            None => plan.push((id.group.clone(), vec![id.state.clone()])),
        }
    }
    plan
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedItem {
    #[serde(rename = "物理状态名称")]
    pub state_name: String,
    #[serde(rename = "典型物理状态值")]
    pub typical_value: String,
    #[serde(rename = "禁限用信息")]
    pub restriction_info: String,
    #[serde(rename = "测试评语")]
    pub test_comment: String,
    #[serde(rename = "试验项目")]
    pub test_project: String,
    /// Identified state this item was split from, when it was split.
    #[serde(skip)]
    pub origin_state: Option<String>,
}

impl ExtractedItem {
    /// Placeholder for a state the model did not answer for.
    pub fn sentinel(state: &str) -> Self {
        Self {
            state_name: state.to_string(),
            typical_value: NOT_APPLICABLE.to_string(),
            restriction_info: NOT_APPLICABLE.to_string(),
            test_comment: NOT_APPLICABLE.to_string(),
            test_project: NOT_APPLICABLE.to_string(),
            origin_state: None,
        }
    }

    /// The identified state this item answers for.
    pub fn origin(&self) -> &str {
        self.origin_state.as_deref().unwrap_or(&self.state_name)
    }

    pub fn is_sentinel(&self) -> bool {
        [
            &self.typical_value,
            &self.restriction_info,
            &self.test_comment,
            &self.test_project,
        ]
        .iter()
        .all(|v| v.as_str() == NOT_APPLICABLE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupResult {
    #[serde(rename = "物理状态组")]
    pub group: String,
    #[serde(rename = "物理状态项")]
    pub items: Vec<ExtractedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(rename = "元器件物理状态分析")]
    pub groups: Vec<GroupResult>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.groups.iter().map(|g| g.items.len()).sum()
    }

    pub fn group(&self, name: &str) -> Option<&GroupResult> {
        self.groups.iter().find(|g| g.group == name)
    }
}

/// Canonical restriction classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Restriction {
    #[serde(rename = "可用")]
    Usable,
    #[serde(rename = "限用")]
    Restricted,
    #[serde(rename = "禁用")]
    Forbidden,
    #[serde(rename = "/")]
    NotApplicable,
}

impl Restriction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Restriction::Usable => "可用",
            Restriction::Restricted => "限用",
            Restriction::Forbidden => "禁用",
            Restriction::NotApplicable => NOT_APPLICABLE,
        }
    }

    pub fn from_canonical(value: &str) -> Option<Self> {
        match value {
            "可用" => Some(Restriction::Usable),
            "限用" => Some(Restriction::Restricted),
            "禁用" => Some(Restriction::Forbidden),
            NOT_APPLICABLE => Some(Restriction::NotApplicable),
            _ => None,
        }
    }
}

/// Something the pipeline corrected or noticed. Reported with the
/// result, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityWarning {
    IdentificationFallback { technique: String, reason: String },
    NovelState { group: String, state: String },
    CountMismatch { group: String, expected: usize, received: usize },
    ExtractionTimedOut { pending_groups: Vec<String> },
    OrphanGroup { group: String },
    OrphanItem { group: String, state: String },
    ReconciledItem { group: String, from: String, to: String },
    DuplicateItem { group: String, state: String },
    MissingItem { group: String, state: String },
    RestrictionNormalized { group: String, state: String, from: String, to: String },
    UnrecognizedRestriction { group: String, state: String, value: String },
    UncorroboratedEmptyValue { group: String, state: String },
    ItemSplit { group: String, state: String, parts: usize },
    RestrictionConflict { group: String, state: String, extracted: String, prior: String },
    EmptyGroupPruned { group: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_serializes_with_chinese_keys() {
        let result = ExtractionResult {
            groups: vec![GroupResult {
                group: "封装结构".to_string(),
                items: vec![ExtractedItem::sentinel("封装形式")],
            }],
        };

        let json = serde_json::to_value(&result).unwrap();
        let item = &json["元器件物理状态分析"][0]["物理状态项"][0];
        assert_eq!(json["元器件物理状态分析"][0]["物理状态组"], "封装结构");
        assert_eq!(item["物理状态名称"], "封装形式");
        assert_eq!(item["禁限用信息"], "/");
        assert!(item.get("origin_state").is_none());
    }

    #[test]
    fn test_group_plan_keeps_first_appearance() {
        let identified = vec![
            IdentifiedState::new("键合结构", "丝径"),
            IdentifiedState::new("标识", "标识工艺"),
            IdentifiedState::new("键合结构", "键合工艺"),
            IdentifiedState::new("键合结构", "丝径"),
        ];
        let plan = group_plan(&identified);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].0, "键合结构");
        assert_eq!(plan[0].1, vec!["丝径".to_string(), "键合工艺".to_string()]);
        assert_eq!(plan[1].0, "标识");
    }

    #[test]
    fn test_sentinel() {
        let item = ExtractedItem::sentinel("标识工艺");
        assert!(item.is_sentinel());
        assert_eq!(item.origin(), "标识工艺");
    }

    #[test]
    fn test_warning_tagging() {
        let warning = IntegrityWarning::MissingItem {
            group: "标识".to_string(),
            state: "标识工艺".to_string(),
        };
        let json = serde_json::to_value(&warning).unwrap();
        assert_eq!(json["kind"], "missing_item");
    }
}
