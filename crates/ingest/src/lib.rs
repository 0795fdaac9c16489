pub mod document;
pub mod reader;
pub mod sections;

pub use document::{DocumentText, Section, SectionKind};
pub use reader::FileReader;
pub use sections::{SectionSplitter, SplitterConfig};

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

/// Generate a stable document ID from file path
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Read one report and split it into sections.
pub async fn ingest_file(file_path: &Path) -> Result<DocumentText> {
    let content = FileReader::read_file(file_path).await?;
    let path_str = file_path.to_string_lossy().to_string();
    let doc = DocumentText::new(generate_doc_id(&path_str), path_str, content);

    debug!(
        source = %doc.source,
        doc_id = %doc.doc_id,
        sections = doc.sections.len(),
        "Document ingested"
    );
    Ok(doc)
}

/// Ingest every text report in a directory
pub async fn ingest_directory(dir_path: &Path) -> Result<Vec<DocumentText>> {
    let files = FileReader::read_directory(dir_path).await?;

    Ok(files
        .into_iter()
        .map(|(path, content)| DocumentText::new(generate_doc_id(&path), path, content))
        .collect())
}
