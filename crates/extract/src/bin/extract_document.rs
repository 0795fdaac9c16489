use anyhow::{Context, Result};
use extract::{Coordinator, ExtractionResult, InMemoryKnowledgeBase, LlmGateway, PipelineConfig};
use ingest::DocumentText;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let path: PathBuf = std::env::args()
        .nth(1)
        .context("usage: extract_document <report.txt | directory>")?
        .into();

    // PIPELINE_CONFIG points at a JSON file; otherwise the environment is read
    let config = match std::env::var("PIPELINE_CONFIG") {
        Ok(file) => PipelineConfig::from_file(Path::new(&file))?,
        Err(_) => PipelineConfig::from_env()?,
    };
    info!(
        technique = config.identification.technique.as_str(),
        model = %config.llm.model,
        "Loaded configuration"
    );

    let gateway = Arc::new(LlmGateway::from_config(&config).context("Failed to build LLM client")?);

    let coordinator = match std::env::var("KB_PATH") {
        Ok(kb_path) => {
            let kb = InMemoryKnowledgeBase::from_json_file(Path::new(&kb_path)).await?;
            info!(entries = kb.len(), "Loaded knowledge base");
            Coordinator::with_knowledge_base(config, gateway, Arc::new(kb)).await?
        }
        Err(_) => Coordinator::new(config, gateway)?,
    };

    if path.is_dir() {
        // one tree per report, keyed by source path
        let mut results = serde_json::Map::new();
        for doc in ingest::ingest_directory(&path).await? {
            let result = process(&coordinator, &doc).await?;
            results.insert(doc.source.clone(), serde_json::to_value(&result)?);
        }
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        let doc = ingest::ingest_file(&path).await?;
        let result = process(&coordinator, &doc).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}

async fn process(coordinator: &Coordinator, doc: &DocumentText) -> Result<ExtractionResult> {
    let output = coordinator
        .process(doc)
        .await
        .with_context(|| format!("Failed to process {}", doc.source))?;

    for warning in &output.warnings {
        warn!(run_id = %output.run_id, warning = ?warning, "Integrity warning");
    }
    info!(
        run_id = %output.run_id,
        source = %doc.source,
        technique = output.technique.as_str(),
        llm_calls = output.stats.calls,
        retries = output.stats.retries,
        avg_latency_ms = output.stats.avg_latency_ms,
        "Extraction finished"
    );
    Ok(output.result)
}
