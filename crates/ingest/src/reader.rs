use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

pub struct FileReader;

impl FileReader {
    pub async fn read_file(path: &Path) -> Result<String> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match extension.as_str() {
            "txt" | "md" => {
                let content = fs::read_to_string(path)
                    .await
                    .context(format!("Failed to read file: {:?}", path))?;
                Ok(content)
            }
            "doc" | "docx" => anyhow::bail!(
                "Word documents must be converted to plain text first: {:?}",
                path
            ),
            _ => anyhow::bail!("Unsupported file format: {}", extension),
        }
    }

    /// Read every text file in `dir`, sorted by path.
    pub async fn read_directory(dir: &Path) -> Result<Vec<(String, String)>> {
        let mut files = Vec::new();

        let mut entries = fs::read_dir(dir)
            .await
            .context(format!("Failed to read directory: {:?}", dir))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_text = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("md"));
            if is_text {
                let content = Self::read_file(&path).await?;
                files.push((path.to_string_lossy().to_string(), content));
            }
        }

        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        std::fs::write(&path, "1、标识\n激光打标\n").unwrap();

        let content = FileReader::read_file(&path).await.unwrap();
        assert!(content.contains("激光打标"));
    }

    #[tokio::test]
    async fn test_rejects_word_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.docx");
        std::fs::write(&path, b"PK").unwrap();

        let err = FileReader::read_file(&path).await.unwrap_err();
        assert!(err.to_string().contains("plain text"));
    }

    #[tokio::test]
    async fn test_read_directory_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        std::fs::write(dir.path().join("c.pdf"), "c").unwrap();

        let files = FileReader::read_directory(dir.path()).await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].0.ends_with("a.md"));
    }
}
