use serde::{Deserialize, Serialize};

use crate::sections::SectionSplitter;

/// Coarse category of a document section, derived from its heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    IdentificationMarks,
    PackageStructure,
    Chip,
    Bonding,
    Figures,
    Other,
}

impl SectionKind {
    /// Classify a heading title. Bonding wins over chip so that
    /// "芯片的安装与互联" lands with the interconnect material.
    pub fn classify(title: &str) -> Self {
        const FIGURES: &[&str] = &["附图", "附表", "图片"];
        const BONDING: &[&str] = &["键合", "互联", "互连"];

        if FIGURES.iter().any(|k| title.contains(k)) {
            SectionKind::Figures
        } else if BONDING.iter().any(|k| title.contains(k)) {
            SectionKind::Bonding
        } else if title.contains("标识") {
            SectionKind::IdentificationMarks
        } else if title.contains("封装") {
            SectionKind::PackageStructure
        } else if title.contains("芯片") {
            SectionKind::Chip
        } else {
            SectionKind::Other
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub kind: SectionKind,
    pub text: String,
    pub offset: (usize, usize), // [start, end) byte positions in the document text
}

/// Plain text of one document plus its section boundaries. Never mutated
/// once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentText {
    pub doc_id: String,
    pub source: String,
    pub text: String,
    pub sections: Vec<Section>,
}

impl DocumentText {
    pub fn new(doc_id: String, source: String, text: String) -> Self {
        let sections = SectionSplitter::default().split(&text);
        Self {
            doc_id,
            source,
            text,
            sections,
        }
    }

    /// Build a document whose id is derived from `source`.
    pub fn from_text(source: &str, text: &str) -> Self {
        Self::new(crate::generate_doc_id(source), source.to_string(), text.to_string())
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Text of every section except figures and tables.
    pub fn body(&self) -> String {
        if self.sections.is_empty() {
            return self.text.clone();
        }
        self.sections
            .iter()
            .filter(|s| s.kind != SectionKind::Figures)
            .map(|s| s.text.trim_end())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn sections_of<'a>(
        &'a self,
        kinds: &'a [SectionKind],
    ) -> impl Iterator<Item = &'a Section> + 'a {
        self.sections.iter().filter(move |s| kinds.contains(&s.kind))
    }
}
