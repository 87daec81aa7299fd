use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use regqa_core::{
    ingest_folder, AzureOpenAiEmbedder, AzureOpenAiGenerator, AzureSearchStore, ChunkingConfig,
    Classifier, ClassifierRules, Embedder, HashingEmbedder, IngestionOptions, QueryEngine,
    QueryRequest, RetrievalConfig,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EMBEDDING_CACHE_CAPACITY: usize = 512;

#[derive(Parser)]
#[command(name = "regqa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Azure AI Search endpoint, e.g. https://<service>.search.windows.net
    #[arg(long, env = "AZURE_SEARCH_ENDPOINT")]
    search_endpoint: String,

    /// Azure AI Search admin/query key
    #[arg(long, env = "AZURE_SEARCH_KEY", hide_env_values = true)]
    search_key: String,

    /// Azure AI Search index name
    #[arg(long, env = "AZURE_SEARCH_INDEX", default_value = "regqa-units")]
    search_index: String,

    /// Azure OpenAI endpoint; omit to use the local hashing embedder
    #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
    openai_endpoint: Option<String>,

    /// Azure OpenAI API key
    #[arg(long, env = "AZURE_OPENAI_KEY", hide_env_values = true)]
    openai_key: Option<String>,

    /// Azure OpenAI embedding deployment name
    #[arg(long, env = "AZURE_OPENAI_EMBEDDING_DEPLOYMENT", default_value = "text-embedding-3-small")]
    embedding_deployment: String,

    /// Azure OpenAI chat deployment name, used for answer synthesis
    #[arg(long, env = "AZURE_OPENAI_CHAT_DEPLOYMENT", default_value = "gpt-4o")]
    chat_deployment: String,

    /// Vector dimensionality of the index
    #[arg(long, default_value = "1536")]
    embedding_dimensions: usize,

    /// Optional JSON file overriding the built-in classifier rules
    #[arg(long)]
    rules: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a folder of pre-extracted regulation texts into the index.
    Ingest {
        /// Folder scanned recursively for .txt and .md files.
        #[arg(long)]
        folder: String,
        /// Target unit size in characters.
        #[arg(long, default_value = "1500")]
        chunk_chars: usize,
        /// Characters shared between consecutive units.
        #[arg(long, default_value = "200")]
        overlap_chars: usize,
        /// Records per upload batch.
        #[arg(long, default_value = "16")]
        batch_size: usize,
    },
    /// Ask a question and print a grounded, cited answer.
    Query {
        /// Question text.
        #[arg(long)]
        question: String,
        /// Override the planner's candidate count.
        #[arg(long)]
        top_k: Option<usize>,
        /// Print per-candidate signal scores.
        #[arg(long, default_value_t = false)]
        debug_scores: bool,
    },
}

fn load_classifier(rules: Option<&Path>) -> anyhow::Result<Classifier> {
    let rules = match rules {
        Some(path) => {
            let body = std::fs::read_to_string(path)
                .with_context(|| format!("reading rules file {}", path.display()))?;
            serde_json::from_str(&body)
                .with_context(|| format!("parsing rules file {}", path.display()))?
        }
        None => ClassifierRules::default(),
    };
    Classifier::new(rules).map_err(|error| anyhow::anyhow!(error.to_string()))
}

enum AnyEmbedder {
    Azure(AzureOpenAiEmbedder),
    Hashing(HashingEmbedder),
}

#[async_trait::async_trait]
impl Embedder for AnyEmbedder {
    fn dimensions(&self) -> usize {
        match self {
            Self::Azure(embedder) => embedder.dimensions(),
            Self::Hashing(embedder) => embedder.dimensions(),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, regqa_core::QueryError> {
        match self {
            Self::Azure(embedder) => embedder.embed(text).await,
            Self::Hashing(embedder) => embedder.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, regqa_core::QueryError> {
        match self {
            Self::Azure(embedder) => embedder.embed_batch(texts).await,
            Self::Hashing(embedder) => embedder.embed_batch(texts).await,
        }
    }
}

fn build_embedder(cli: &Cli) -> AnyEmbedder {
    match (&cli.openai_endpoint, &cli.openai_key) {
        (Some(endpoint), Some(key)) => AnyEmbedder::Azure(AzureOpenAiEmbedder::new(
            endpoint,
            key,
            &cli.embedding_deployment,
            cli.embedding_dimensions,
        )),
        _ => {
            warn!("no Azure OpenAI credentials, using the local hashing embedder");
            AnyEmbedder::Hashing(HashingEmbedder {
                dimensions: cli.embedding_dimensions,
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        index = %cli.search_index,
        "regqa boot"
    );

    let store = AzureSearchStore::new(
        &cli.search_endpoint,
        &cli.search_key,
        &cli.search_index,
        cli.embedding_dimensions,
    );
    let embedder = build_embedder(&cli);

    match &cli.command {
        Command::Ingest {
            folder,
            chunk_chars,
            overlap_chars,
            batch_size,
        } => {
            let classifier = load_classifier(cli.rules.as_deref())?;
            store
                .ensure_index()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let options = IngestionOptions {
                chunking: ChunkingConfig {
                    chunk_chars: *chunk_chars,
                    overlap_chars: *overlap_chars,
                    ..ChunkingConfig::default()
                },
                batch_size: *batch_size,
                ..IngestionOptions::default()
            };
            let report = ingest_folder(&store, &embedder, &classifier, Path::new(folder), &options)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            for skipped in &report.skipped {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
            }
            for failure in &report.failures {
                warn!(
                    document_id = %failure.document_id,
                    unit = failure.unit_index,
                    reason = %failure.reason,
                    "unit not indexed"
                );
            }
            println!(
                "{} units indexed from {} documents ({} skipped, {} failed units) at {}",
                report.units_indexed,
                report.documents,
                report.skipped.len(),
                report.failures.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Query {
            question,
            top_k,
            debug_scores,
        } => {
            let endpoint = cli
                .openai_endpoint
                .as_deref()
                .context("--openai-endpoint is required for query")?;
            let key = cli
                .openai_key
                .as_deref()
                .context("--openai-key is required for query")?;
            let generator = AzureOpenAiGenerator::new(endpoint, key, &cli.chat_deployment);

            let engine = QueryEngine::new(
                store.clone(),
                store.clone(),
                store,
                embedder,
                generator,
                RetrievalConfig::default(),
                EMBEDDING_CACHE_CAPACITY,
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let request = QueryRequest {
                question: question.clone(),
                top_k: *top_k,
                debug: *debug_scores,
            };
            let response = engine
                .answer(&request)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!("intent: {:?}", response.intent);
            println!("{}", response.answer);
            if !response.citations.is_empty() {
                println!("fontes: {}", response.citations.join(", "));
            }
            if let Some(debug) = response.debug {
                for candidate in debug {
                    println!(
                        "[{:.4}] {} vector={:?} keyword={:?} cooc={:.3} rerank={:?}",
                        candidate.fused_score,
                        candidate.record_id,
                        candidate.vector_score,
                        candidate.keyword_score,
                        candidate.cooccurrence_boost,
                        candidate.rerank_score,
                    );
                }
            }
        }
    }

    Ok(())
}
