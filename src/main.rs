use clap::{Parser, Subcommand};
use doctree_index::commands::{
    SearchArgs, configure, filter_documents, index_source, load_config, reset_schema, search,
    show_status, to_json,
};
use doctree_index::connectors::SourceKind;
use doctree_index::database::Metric;
use doctree_index::query::DEFAULT_TOP_K;
use doctree_index::record::RecordField;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "doctree-index")]
#[command(about = "Index document trees as embeddings and search them")]
#[command(version)]
struct Cli {
    /// Configuration file to use instead of ~/.doctree-index/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the configuration, writing defaults if no file exists
    Config {
        /// Only show the current configuration
        #[arg(long)]
        show: bool,
    },
    /// Import a document tree, embed it and build the index
    Index {
        /// JSON file, directory or SQLite database to import
        source: PathBuf,
        /// Kind of source
        #[arg(long, value_enum, default_value = "json")]
        from: SourceKind,
        /// Append to the existing index instead of rebuilding it
        #[arg(long)]
        append: bool,
    },
    /// Search the index with a text query
    Search {
        query: String,
        /// Maximum number of hits
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Metadata filter such as `category=howto`; repeatable
        #[arg(long = "where", value_name = "FIELD=VALUE")]
        wheres: Vec<String>,
        /// Only documents carrying any of these tags; repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Minimum certainty (cosine indexes only)
        #[arg(long, conflicts_with = "max_distance")]
        certainty: Option<f32>,
        /// Maximum distance
        #[arg(long)]
        max_distance: Option<f32>,
        /// Fail unless the index ranks by this metric
        #[arg(long, value_enum)]
        metric: Option<Metric>,
        /// Comma-separated metadata fields to return
        #[arg(long, value_delimiter = ',')]
        fields: Vec<RecordField>,
    },
    /// List documents matching metadata clauses, without a text query
    #[command(group(
        clap::ArgGroup::new("clauses")
            .args(["wheres", "tags"])
            .required(true)
            .multiple(true)
    ))]
    Filter {
        /// Maximum number of documents
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Metadata filter such as `category=howto`; repeatable
        #[arg(long = "where", value_name = "FIELD=VALUE")]
        wheres: Vec<String>,
        /// Only documents carrying any of these tags; repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Comma-separated metadata fields to return
        #[arg(long, value_delimiter = ',')]
        fields: Vec<RecordField>,
    },
    /// Drop and recreate the remote collection (or delete the local index)
    ResetSchema,
    /// Show the configured backend and how many rows it holds
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Config { show } => {
            println!("{}", configure(&config, show)?);
        }
        Commands::Index {
            source,
            from,
            append,
        } => {
            let stats = index_source(&config, &source, from, append).await?;
            println!("{}", to_json(&stats)?);
        }
        Commands::Search {
            query,
            top_k,
            wheres,
            tags,
            certainty,
            max_distance,
            metric,
            fields,
        } => {
            let args = SearchArgs {
                top_k,
                wheres,
                tags,
                certainty,
                max_distance,
                metric,
                fields,
            };
            let hits = search(&config, &query, &args)?;
            println!("{}", to_json(&hits)?);
        }
        Commands::Filter {
            top_k,
            wheres,
            tags,
            fields,
        } => {
            let args = SearchArgs {
                top_k,
                wheres,
                tags,
                fields,
                ..SearchArgs::default()
            };
            let hits = filter_documents(&config, &args)?;
            println!("{}", to_json(&hits)?);
        }
        Commands::ResetSchema => {
            println!("{}", reset_schema(&config)?);
        }
        Commands::Status => {
            println!("{}", to_json(&show_status(&config)?)?);
        }
    }

    Ok(())
}
