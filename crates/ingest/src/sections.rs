use regex::Regex;

use crate::document::{Section, SectionKind};

pub struct SplitterConfig {
    /// Headings longer than this are treated as "title + inline content".
    pub max_title_chars: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self { max_title_chars: 20 }
    }
}

/// Splits report text into sections at numbered headings such as
/// `2、器件封装结构` or `三、芯片`.
pub struct SectionSplitter {
    config: SplitterConfig,
    heading: Regex,
}

impl Default for SectionSplitter {
    fn default() -> Self {
        Self::new(SplitterConfig::default())
    }
}

impl SectionSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self {
            config,
            heading: Regex::new(r"^\s*(?:[0-9]{1,2}|[一二三四五六七八九十]{1,3})\s*[、.．)）]\s*(\S.*?)\s*$")
                .expect("heading pattern is valid"),
        }
    }

    pub fn split(&self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut current: Option<(String, usize)> = None;
        let mut preamble_end = None;
        let mut offset = 0;

        for line in text.split_inclusive('\n') {
            if let Some(title) = self.heading_title(line) {
                match current.take() {
                    Some((prev_title, start)) => sections.push(self.section(text, prev_title, start, offset)),
                    None => preamble_end = Some(offset),
                }
                current = Some((title, offset));
            }
            offset += line.len();
        }

        match current {
            Some((title, start)) => sections.push(self.section(text, title, start, text.len())),
            None => preamble_end = Some(text.len()),
        }

        if let Some(end) = preamble_end {
            if !text[..end].trim().is_empty() {
                sections.insert(0, self.section(text, String::new(), 0, end));
            }
        }

        sections
    }

    fn heading_title(&self, line: &str) -> Option<String> {
        let caps = self.heading.captures(line)?;
        let rest = caps.get(1)?.as_str();

        // "1.5mm" style measurements are not headings
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }

        let title: String = rest
            .split(|c: char| "，,。：:；; \t".contains(c))
            .next()
            .unwrap_or(rest)
            .chars()
            .take(self.config.max_title_chars)
            .collect();

        Some(title)
    }

    fn section(&self, text: &str, title: String, start: usize, end: usize) -> Section {
        Section {
            kind: SectionKind::classify(&title),
            title,
            text: text[start..end].to_string(),
            offset: (start, end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_splitting() {
        let splitter = SectionSplitter::default();
        let text = "某型号器件分析报告\n1、标识\n激光打标。\n2、器件封装结构\n典型DIP金属陶瓷结构。\n三、芯片\n表面金属化为Al。\n";
        let sections = splitter.split(text);

        assert_eq!(sections.len(), 4);
        assert_eq!(sections[0].kind, SectionKind::Other);
        assert_eq!(sections[1].title, "标识");
        assert_eq!(sections[2].kind, SectionKind::PackageStructure);
        assert_eq!(sections[3].kind, SectionKind::Chip);
        assert_eq!(&text[sections[2].offset.0..sections[2].offset.1], sections[2].text);
    }

    #[test]
    fn test_inline_heading_content() {
        let splitter = SectionSplitter::default();
        let text = "2、器件封装结构：典型DIP金属陶瓷结构，未发现宇航禁限用工艺与材料\n";
        let sections = splitter.split(text);

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "器件封装结构");
        assert!(sections[0].text.contains("DIP"));
    }

    #[test]
    fn test_measurements_are_not_headings() {
        let splitter = SectionSplitter::default();
        let sections = splitter.split("1.5mm厚的盖板\n");

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].kind, SectionKind::Other);
        assert_eq!(sections[0].title, "");
    }
}
