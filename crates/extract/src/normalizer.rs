use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::schema::Restriction;

static NOISE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\p{P}\p{S}]+").unwrap());

/// Comparison key for names: lowercase, no whitespace, punctuation or symbols.
pub fn name_key(name: &str) -> String {
    NOISE.replace_all(&name.trim().to_lowercase(), "").to_string()
}

/// How a raw restriction value was mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// Already one of the canonical values.
    Exact,
    /// Mapped from an alias or a recognizable phrase.
    Fuzzy,
    /// Nothing recognizable; mapped to "/".
    Unrecognized,
}

/// Maps free-text restriction assessments onto 可用 / 限用 / 禁用 / "/".
pub struct RestrictionNormalizer {
    /// Cleaned alias -> canonical value
    aliases: HashMap<String, Restriction>,
}

impl Default for RestrictionNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RestrictionNormalizer {
    pub fn new() -> Self {
        let aliases = [
            ("限制使用", Restriction::Restricted),
            ("有条件使用", Restriction::Restricted),
            ("慎用", Restriction::Restricted),
            ("禁止使用", Restriction::Forbidden),
            ("禁止", Restriction::Forbidden),
            ("不可用", Restriction::Forbidden),
            ("允许使用", Restriction::Usable),
            ("可以使用", Restriction::Usable),
            ("可用", Restriction::Usable),
            ("合格", Restriction::Usable),
            ("无", Restriction::NotApplicable),
            ("不适用", Restriction::NotApplicable),
            ("na", Restriction::NotApplicable),
            ("none", Restriction::NotApplicable),
            ("文中未提及", Restriction::NotApplicable),
            ("未提及", Restriction::NotApplicable),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self { aliases }
    }

    pub fn normalize(&self, raw: &str) -> (Restriction, NormalizeOutcome) {
        let trimmed = raw.trim();
        if let Some(canonical) = Restriction::from_canonical(trimmed) {
            let outcome = if trimmed == raw {
                NormalizeOutcome::Exact
            } else {
                NormalizeOutcome::Fuzzy
            };
            return (canonical, outcome);
        }

        let cleaned = name_key(trimmed);
        if cleaned.is_empty() {
            return (Restriction::NotApplicable, NormalizeOutcome::Fuzzy);
        }
        if let Some(r) = self.aliases.get(&cleaned) {
            return (*r, NormalizeOutcome::Fuzzy);
        }

        match Self::classify_phrase(&cleaned) {
            Some(r) => (r, NormalizeOutcome::Fuzzy),
            None => (Restriction::NotApplicable, NormalizeOutcome::Unrecognized),
        }
    }

    fn classify_phrase(text: &str) -> Option<Restriction> {
        let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

        // negated findings read as usable before any keyword below fires
        if negates_prohibition(text) || has(&["非禁限用", "无可靠性隐患", "无限制", "不限"]) {
            return Some(Restriction::Usable);
        }
        if has(&["禁", "不可用", "不适合", "不满足", "有可靠性隐患", "超标"]) {
            return Some(Restriction::Forbidden);
        }
        if has(&["限", "谨慎", "评估后", "存在风险", "有条件"]) {
            return Some(Restriction::Restricted);
        }
        if has(&["可用", "可以使用", "允许", "满足", "良好", "常规"]) {
            return Some(Restriction::Usable);
        }
        if has(&["不适用", "未提及", "不涉及"]) || text == "无" || text == "na" {
            return Some(Restriction::NotApplicable);
        }
        None
    }
}

/// Words that negate a finding: "未见禁限用材料" says nothing forbidden was found.
const NEGATORS: &[&str] = &["未发现", "未见", "不存在", "没有", "未采用", "未使用", "无"];

/// Characters after a negator within which a prohibition keyword is negated.
const NEGATION_REACH: usize = 6;

fn negates_prohibition(text: &str) -> bool {
    NEGATORS.iter().any(|negator| {
        text.match_indices(negator)
            .any(|(i, _)| text[i + negator.len()..].chars().take(NEGATION_REACH).any(|c| c == '禁'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_key() {
        assert_eq!(name_key(" 镀层 材料 "), "镀层材料");
        assert_eq!(name_key("接触孔、通孔工艺"), "接触孔通孔工艺");
    }

    #[test]
    fn test_canonical_values() {
        let normalizer = RestrictionNormalizer::new();
        for value in ["可用", "限用", "禁用", "/"] {
            let (r, outcome) = normalizer.normalize(value);
            assert_eq!(r.as_str(), value);
            assert_eq!(outcome, NormalizeOutcome::Exact);
        }
        assert_eq!(normalizer.normalize(" 限用 ").1, NormalizeOutcome::Fuzzy);
    }

    #[test]
    fn test_restricted_use_maps_to_restricted() {
        let normalizer = RestrictionNormalizer::new();
        assert_eq!(
            normalizer.normalize("限制使用"),
            (Restriction::Restricted, NormalizeOutcome::Fuzzy)
        );
        assert_eq!(normalizer.normalize("建议评估后使用").0, Restriction::Restricted);
    }

    #[test]
    fn test_negated_findings() {
        let normalizer = RestrictionNormalizer::new();
        assert_eq!(normalizer.normalize("未发现宇航禁限用工艺与材料").0, Restriction::Usable);
        assert_eq!(normalizer.normalize("无可靠性隐患").0, Restriction::Usable);
        assert_eq!(normalizer.normalize("有可靠性隐患").0, Restriction::Forbidden);
        assert_eq!(normalizer.normalize("不可用").0, Restriction::Forbidden);
        for phrase in [
            "未见宇航禁限用工艺与材料",
            "不存在禁限用材料",
            "未采用禁用工艺",
            "没有禁限用工艺",
            "无禁限用工艺",
        ] {
            assert_eq!(normalizer.normalize(phrase), (Restriction::Usable, NormalizeOutcome::Fuzzy), "{phrase}");
        }
        assert_eq!(normalizer.normalize("采用禁用工艺").0, Restriction::Forbidden);
    }

    #[test]
    fn test_placeholders_and_garbage() {
        let normalizer = RestrictionNormalizer::new();
        assert_eq!(normalizer.normalize("N/A").0, Restriction::NotApplicable);
        assert_eq!(normalizer.normalize("banana").1, NormalizeOutcome::Unrecognized);
        assert_eq!(normalizer.normalize("").0, Restriction::NotApplicable);
        assert_eq!(
            normalizer.normalize("蓝色"),
            (Restriction::NotApplicable, NormalizeOutcome::Unrecognized)
        );
    }
}
