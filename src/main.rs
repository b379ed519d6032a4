use clap::{Parser, Subcommand};
use ragnarok::Result;
use ragnarok::commands::{
    init_config, list_collections, run_ask, run_delete, run_ingest, run_query, show_config,
};
use ragnarok::config::{Config, default_base_dir};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ragnarok")]
#[command(about = "Retrieval-augmented question answering over local documents")]
#[command(version)]
struct Cli {
    /// Base directory for config and index data (defaults to the platform
    /// data directory)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or initialize the configuration file
    Config {
        /// Print the active configuration instead of writing a file
        #[arg(long)]
        show: bool,
    },
    /// Index plain-text documents into a collection
    Ingest {
        /// Text files to ingest
        files: Vec<PathBuf>,
        /// Collection to write into
        #[arg(long, default_value = "default")]
        collection: String,
    },
    /// Retrieve ranked context for a query without generating an answer
    Query {
        question: String,
        #[arg(long, default_value = "default")]
        collection: String,
        /// Maximum results to return
        #[arg(long)]
        top_k: Option<usize>,
        /// Minimum cosine similarity for a result to count
        #[arg(long)]
        min_score: Option<f32>,
    },
    /// Answer a question using retrieved context and the generation service
    Ask {
        question: String,
        #[arg(long, default_value = "default")]
        collection: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        min_score: Option<f32>,
        /// Print the answer incrementally as the model produces it
        #[arg(long)]
        stream: bool,
    },
    /// List collections and their record counts
    Collections,
    /// Delete a collection, or one source document's records from it
    Delete {
        #[arg(long)]
        collection: String,
        /// Only remove records chunked from this source document
        #[arg(long)]
        source: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_base_dir().map_err(|e| anyhow::anyhow!(e))?,
    };
    let config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                init_config(&config)?;
            }
        }
        Commands::Ingest { files, collection } => {
            run_ingest(&config, &files, &collection).await?;
        }
        Commands::Query {
            question,
            collection,
            top_k,
            min_score,
        } => {
            run_query(&config, &question, &collection, top_k, min_score).await?;
        }
        Commands::Ask {
            question,
            collection,
            top_k,
            min_score,
            stream,
        } => {
            run_ask(&config, &question, &collection, top_k, min_score, stream).await?;
        }
        Commands::Collections => {
            list_collections(&config).await?;
        }
        Commands::Delete { collection, source } => {
            run_delete(&config, &collection, source.as_deref()).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["ragnarok", "collections"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            matches!(parsed.command, Commands::Collections);
        }
    }

    #[test]
    fn ingest_with_collection() {
        let cli = Cli::try_parse_from([
            "ragnarok",
            "ingest",
            "notes.txt",
            "manual.txt",
            "--collection",
            "handbook",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ingest { files, collection } = parsed.command {
                assert_eq!(files.len(), 2);
                assert_eq!(collection, "handbook");
            }
        }
    }

    #[test]
    fn query_defaults() {
        let cli = Cli::try_parse_from(["ragnarok", "query", "how do i install this?"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Query {
                question,
                collection,
                top_k,
                min_score,
            } = parsed.command
            {
                assert_eq!(question, "how do i install this?");
                assert_eq!(collection, "default");
                assert_eq!(top_k, None);
                assert_eq!(min_score, None);
            }
        }
    }

    #[test]
    fn ask_with_stream_flag() {
        let cli = Cli::try_parse_from(["ragnarok", "ask", "what is chunking?", "--stream"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ask { stream, .. } = parsed.command {
                assert!(stream);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["ragnarok", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["ragnarok", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
