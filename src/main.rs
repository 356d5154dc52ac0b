use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faq_store::config::Config;
use faq_store::embedder::Embedder;
use faq_store::embedder::ollama::OllamaEmbedder;
use faq_store::llm::{self, OpenAiClient};
use faq_store::store::{DocumentStore, PopulateOutcome, StoreOptions};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "faq-store", version)]
#[command(about = "Similarity-search FAQ store on SQLite + sqlite-vec")]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, global = true, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the store and seed it from the corpus if it is empty
    Seed {
        /// Corpus file (overrides corpus.path)
        #[arg(long)]
        corpus: Option<PathBuf>,
    },

    /// Print the nearest stored questions as JSON
    Query {
        text: String,

        /// Number of results (defaults to search.top_k)
        #[arg(short)]
        k: Option<usize>,
    },

    /// Insert a question/answer pair
    Insert {
        #[arg(long)]
        question: String,

        #[arg(long)]
        answer: String,
    },

    /// Print the number of stored documents
    Count,

    /// Send a system prompt and payload to the LLM and print the JSON reply
    Generate {
        /// File holding the system prompt
        #[arg(long)]
        system: PathBuf,

        /// File holding the user payload
        #[arg(long)]
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Commands::Seed {
        corpus: Some(path), ..
    } = &cli.command
    {
        config.corpus.path = path.display().to_string();
    }
    config.validate().context("invalid configuration")?;

    match cli.command {
        Commands::Generate { system, input } => {
            let generator = OpenAiClient::from_env(config.llm.clone())
                .context("LLM collaborator is not configured")?;
            let system = std::fs::read_to_string(&system)
                .with_context(|| format!("failed to read {}", system.display()))?;
            let input = std::fs::read_to_string(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let value = llm::structured(&generator, &system, &input);
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Seed { .. } => {
            let store = DocumentStore::connect(StoreOptions::from_config(&config), embedder(&config)?)
                .context("failed to start document store")?;
            let outcome = match store.populate_if_empty(&config.corpus)? {
                PopulateOutcome::AlreadyPopulated { documents } => {
                    json!({ "status": "already_populated", "documents": documents })
                }
                PopulateOutcome::Seeded { inserted } => {
                    json!({ "status": "seeded", "inserted": inserted })
                }
            };
            println!("{outcome}");
            store.close();
        }
        Commands::Query { text, k } => {
            let store = open_store(&config)?;
            let k = k.unwrap_or(config.search.top_k);
            let results = store.query_by_similarity(&text, k);
            println!("{}", serde_json::to_string_pretty(&results)?);
            store.close();
        }
        Commands::Insert { question, answer } => {
            let store = open_store(&config)?;
            let id = store.insert(&question, &answer);
            println!("{}", json!({ "id": id }));
            store.close();
        }
        Commands::Count => {
            let store = open_store(&config)?;
            println!("{}", store.try_document_count()?);
            store.close();
        }
    }

    Ok(())
}

fn embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let embedder = OllamaEmbedder::new(&config.embedding_base_url(), &config.embedding)
        .context("failed to build embedding client")?;
    info!(
        "Using collection {} with model {}",
        config.collection_name(),
        embedder.model()
    );
    Ok(Arc::new(embedder))
}

fn open_store(config: &Config) -> Result<DocumentStore> {
    DocumentStore::open(config, embedder(config)?).context("failed to start document store")
}
