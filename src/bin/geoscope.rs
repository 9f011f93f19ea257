#![forbid(unsafe_code)]

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use geoscope::history::{self, HistoryStore, SqliteHistoryStore};
use geoscope::model::{AnalysisRequest, Platform};
use geoscope::{InferenceGateway, Orchestrator};

#[derive(Parser)]
#[command(name = "geoscope", version, about = "Brand visibility analysis across AI answer engines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a visibility analysis
    Run {
        /// JSON request file; overrides the inline flags
        #[arg(long)]
        request: Option<PathBuf>,
        /// The search query to analyze
        #[arg(long)]
        query: Option<String>,
        /// Brand domain to track, e.g. acme.com
        #[arg(long)]
        brand: Option<String>,
        /// Competitor domain (repeatable)
        #[arg(long = "competitor")]
        competitors: Vec<String>,
        /// Platform to query (repeatable; default: both)
        #[arg(long = "platform", value_enum)]
        platforms: Vec<PlatformArg>,
        /// Maximum query variations to test
        #[arg(long, default_value_t = 5)]
        num_queries: usize,
        /// Write the result JSON here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// History database path
        #[arg(long)]
        db: Option<PathBuf>,
        /// Skip saving the result to history
        #[arg(long)]
        no_save: bool,
    },
    /// Inspect saved analyses
    History {
        #[command(subcommand)]
        command: HistoryCommands,
        /// History database path
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum HistoryCommands {
    /// List recent analyses
    Recent {
        /// Filter by brand domain
        #[arg(long)]
        brand: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show one stored analysis by run id
    Get { id: Uuid },
    /// Find analyses similar to the given text
    Search {
        text: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Delete all stored analyses
    Clear,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum PlatformArg {
    Chatgpt,
    Perplexity,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Chatgpt => Platform::Chatgpt,
            PlatformArg::Perplexity => Platform::Perplexity,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            request,
            query,
            brand,
            competitors,
            platforms,
            num_queries,
            out,
            db,
            no_save,
        } => {
            let request = match request {
                Some(path) => serde_json::from_reader(File::open(path)?)?,
                None => {
                    let query = query.ok_or("either --request or --query is required")?;
                    let brand = brand.ok_or("either --request or --brand is required")?;
                    let platforms: Vec<Platform> = if platforms.is_empty() {
                        vec![Platform::Chatgpt, Platform::Perplexity]
                    } else {
                        platforms.into_iter().map(Platform::from).collect()
                    };
                    AnalysisRequest {
                        query,
                        brand_domain: brand,
                        competitors,
                        platforms,
                        num_queries,
                    }
                }
            };

            let gateway = Arc::new(InferenceGateway::from_env()?);
            let orchestrator = Orchestrator::new(gateway, None);

            let result = orchestrator.run_analysis(request).await?;

            let rendered = serde_json::to_string_pretty(&result)?;
            match out {
                Some(path) => {
                    let mut file = File::create(&path)?;
                    file.write_all(rendered.as_bytes())?;
                    println!("result written to {}", path.display());
                }
                None => println!("{rendered}"),
            }

            if !no_save {
                let store = open_store(db)?;
                let document = history::render_summary_document(&result);
                if let Err(err) = store.put(history::metadata_for(&result), document).await {
                    tracing::warn!(error = %err, "history save failed");
                }
            }
        }

        Commands::History { command, db } => {
            let store = open_store(db)?;
            match command {
                HistoryCommands::Recent { brand, limit } => {
                    let rows = store.list_recent(brand.as_deref(), limit).await?;
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
                HistoryCommands::Get { id } => match store.get(id).await? {
                    Some(stored) => {
                        println!("{}", serde_json::to_string_pretty(&stored.metadata)?);
                        println!("{}", stored.document);
                    }
                    None => println!("no analysis found for {id}"),
                },
                HistoryCommands::Search { text, limit } => {
                    let rows = store.similarity_search(&text, limit).await?;
                    let rendered: Vec<serde_json::Value> = rows
                        .into_iter()
                        .map(|(metadata, score)| {
                            serde_json::json!({ "score": score, "metadata": metadata })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&rendered)?);
                }
                HistoryCommands::Clear => {
                    let _lock = store.lock_exclusive()?;
                    store.clear().await?;
                    println!("history cleared");
                }
            }
        }
    }

    Ok(())
}

fn open_store(db: Option<PathBuf>) -> Result<SqliteHistoryStore, Box<dyn std::error::Error>> {
    let path = db.unwrap_or_else(SqliteHistoryStore::default_path);
    Ok(SqliteHistoryStore::new(path)?)
}
