use ingest::{DocumentText, SectionKind};
use std::sync::Arc;

use crate::schema::IdentifiedState;
use crate::taxonomy::{GroupSpec, Taxonomy};

/// Keyword scan over the sections each group is usually described in.
pub struct RuleIdentifier {
    taxonomy: Arc<Taxonomy>,
}

impl RuleIdentifier {
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        Self { taxonomy }
    }

    pub fn identify(&self, doc: &DocumentText) -> Vec<IdentifiedState> {
        if doc.is_blank() {
            return Vec::new();
        }

        let mut found = Vec::new();
        for group in self.taxonomy.groups() {
            let scopes = scopes_for(doc, group);
            for state in &group.states {
                if let Some((start, end)) = first_hit(&scopes, group, &state.keywords) {
                    found.push(IdentifiedState::new(&group.name, &state.name).with_span(start, end));
                }
            }
        }

        super::finalize(found, &self.taxonomy)
    }
}

/// (text, byte offset into the document) pairs to scan for one group.
fn scopes_for<'a>(doc: &'a DocumentText, group: &'a GroupSpec) -> Vec<(&'a str, usize)> {
    if doc.sections.is_empty() {
        return vec![(doc.text.as_str(), 0)];
    }

    let preferred: Vec<(&str, usize)> = doc
        .sections_of(&group.sections)
        .map(|s| (s.text.as_str(), s.offset.0))
        .collect();
    if !preferred.is_empty() {
        return preferred;
    }

    doc.sections
        .iter()
        .filter(|s| s.kind != SectionKind::Figures)
        .map(|s| (s.text.as_str(), s.offset.0))
        .collect()
}

fn first_hit(scopes: &[(&str, usize)], group: &GroupSpec, keywords: &[String]) -> Option<(usize, usize)> {
    for (text, base) in scopes {
        for (offset, sentence) in sentences(text) {
            if !group.anchors.is_empty() && !group.anchors.iter().any(|a| sentence.contains(a.as_str())) {
                continue;
            }
            let hit = keywords
                .iter()
                .filter_map(|kw| find_keyword(sentence, kw).map(|pos| (pos, kw.len())))
                .min_by_key(|(pos, _)| *pos);
            if let Some((pos, len)) = hit {
                let start = base + offset + pos;
                return Some((start, start + len));
            }
        }
    }
    None
}

/// Split on sentence and clause terminators, keeping byte offsets.
fn sentences(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '。' | '；' | ';' | '\n') {
            if i > start {
                out.push((start, &text[start..i]));
            }
            start = i + c.len_utf8();
        }
    }
    if start < text.len() {
        out.push((start, &text[start..]));
    }
    out
}

/// Byte position of `keyword` in `sentence`. ASCII keywords only match on
/// alphanumeric boundaries, and "非<keyword>" does not count.
fn find_keyword(sentence: &str, keyword: &str) -> Option<usize> {
    let starts_alnum = keyword.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let ends_alnum = keyword.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());

    sentence.match_indices(keyword).map(|(pos, _)| pos).find(|&pos| {
        let before = sentence[..pos].chars().next_back();
        let after = sentence[pos + keyword.len()..].chars().next();

        if before == Some('非') && !keyword.starts_with('非') {
            return false;
        }
        if starts_alnum && before.is_some_and(|c| c.is_ascii_alphanumeric()) {
            return false;
        }
        if ends_alnum && after.is_some_and(|c| c.is_ascii_alphanumeric()) {
            return false;
        }
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identify(text: &str) -> Vec<IdentifiedState> {
        let doc = DocumentText::from_text("report.txt", text);
        RuleIdentifier::new(Arc::new(Taxonomy::builtin())).identify(&doc)
    }

    fn pairs(ids: &[IdentifiedState]) -> Vec<(String, String)> {
        ids.iter().map(|s| (s.group.clone(), s.state.clone())).collect()
    }

    #[test]
    fn test_package_structure_section() {
        let text = "1、标识\n采用激光打标，标识清晰。\n2、器件封装结构\n典型DIP金属陶瓷结构，未发现宇航禁限用工艺与材料。\n";
        let ids = identify(text);
        let found = pairs(&ids);

        assert!(found.contains(&("封装结构".to_string(), "封装形式".to_string())));
        assert!(found.contains(&("标识".to_string(), "标识工艺".to_string())));

        let form = ids.iter().find(|s| s.state == "封装形式").unwrap();
        let span = form.span.unwrap();
        assert_eq!(&text[span.start..span.end], "DIP");
    }

    #[test]
    fn test_anchors_required_for_part_groups() {
        // plating without mentioning the lid does not identify lid plating
        let ids = identify("2、器件封装结构\n外管脚材料为可伐镀Ni再镀Au。\n");
        let found = pairs(&ids);

        assert!(found.contains(&("引出端".to_string(), "镀层材料".to_string())));
        assert!(found.contains(&("引出端".to_string(), "引出端材料".to_string())));
        assert!(!found.contains(&("盖板".to_string(), "镀层材料".to_string())));
    }

    #[test]
    fn test_keyword_boundaries() {
        assert_eq!(find_keyword("盖板为Ni合金", "Ni"), Some("盖板为".len()));
        assert_eq!(find_keyword("Nickel", "Ni"), None);
        assert_eq!(find_keyword("非芯片端键合区", "芯片端"), None);
        assert!(find_keyword("非芯片端键合区", "非芯片端").is_some());
    }

    #[test]
    fn test_unstructured_text_scanned_whole() {
        let ids = identify("内引线采用硅铝丝，楔形键合。");
        let found = pairs(&ids);
        assert!(found.contains(&("键合结构".to_string(), "键合丝材料".to_string())));
        assert!(found.contains(&("键合结构".to_string(), "键合工艺".to_string())));
    }

    #[test]
    fn test_figures_ignored_and_blank() {
        assert!(identify("1、附图\n图1 键合丝照片\n").is_empty());
        assert!(identify("   ").is_empty());
    }
}
