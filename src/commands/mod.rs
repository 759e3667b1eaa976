
use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::IndexError;
use crate::config::{Backend, Config, show_config};
use crate::connectors::{SourceKind, import_tree};
use crate::database::local::remove_artifacts;
use crate::database::{
    Filter, IndexBackend, Metric, RemoteIndexAdapter, Threshold, open_backend, open_backend_for,
};
use crate::embeddings::OllamaClient;
use crate::indexer::{IndexMode, Indexer, IndexingStats};
use crate::query::{QueryEngine, QueryHit, QueryInput, QueryOptions};
use crate::record::RecordField;

/// Load an explicit config file, or the one in the default directory
#[inline]
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

/// Print the configuration; without `show`, also write it out if no file exists yet
#[inline]
pub fn configure(config: &Config, show: bool) -> Result<String> {
    if !show && !config.config_file_path().exists() {
        config.save()?;
        info!(
            "Wrote default configuration to {}",
            config.config_file_path().display()
        );
    }
    show_config(config)
}

fn open_shared_backend(config: &Config, mode: IndexMode) -> Result<Arc<dyn IndexBackend>> {
    let backend = open_backend_for(config, mode).context("Failed to open index backend")?;
    Ok(Arc::from(backend))
}

/// Import a tree, embed it and write it into the configured backend
#[inline]
pub async fn index_source(
    config: &Config,
    source: &Path,
    kind: SourceKind,
    append: bool,
) -> Result<IndexingStats> {
    let tree = import_tree(kind, source)
        .await
        .with_context(|| format!("Failed to import {}", source.display()))?;

    let mode = if append {
        IndexMode::Append
    } else {
        IndexMode::Rebuild
    };

    let backend = open_shared_backend(config, mode)?;
    let embedder = OllamaClient::new(config).context("Failed to initialize Ollama client")?;
    embedder
        .health_check()
        .context("Ollama is not ready for embedding")?;

    let stats = Indexer::new(backend, Arc::new(embedder))
        .with_batch_size(config.embedding.batch_size as usize)
        .index_tree(&tree, mode)?;
    Ok(stats)
}

/// Search arguments as given on the command line
#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    pub top_k: usize,
    pub wheres: Vec<String>,
    pub tags: Vec<String>,
    pub certainty: Option<f32>,
    pub max_distance: Option<f32>,
    pub metric: Option<Metric>,
    pub fields: Vec<RecordField>,
}

impl SearchArgs {
    /// `--where` clauses and `--tag` values are combined with AND
    #[inline]
    pub fn to_options(&self) -> crate::Result<QueryOptions> {
        let mut clauses = self
            .wheres
            .iter()
            .map(|expression| Filter::parse_assignment(expression))
            .collect::<crate::Result<Vec<_>>>()?;
        if !self.tags.is_empty() {
            clauses.push(Filter::contains_any(RecordField::Tags, self.tags.iter()));
        }

        let threshold = match (self.certainty, self.max_distance) {
            (Some(_), Some(_)) => {
                return Err(IndexError::Config(
                    "use either a certainty or a maximum distance, not both".to_string(),
                ));
            }
            (Some(certainty), None) => Some(Threshold::Certainty(certainty)),
            (None, Some(distance)) => Some(Threshold::Distance(distance)),
            (None, None) => None,
        };

        Ok(QueryOptions {
            top_k: self.top_k,
            filter: Filter::all(clauses),
            threshold,
            metric: self.metric,
            fields: self.fields.clone(),
        })
    }
}

/// Embed `query` and search the configured backend
#[inline]
pub fn search(config: &Config, query: &str, args: &SearchArgs) -> Result<Vec<QueryHit>> {
    let options = args.to_options()?;
    let backend = open_shared_backend(config, IndexMode::Append)?;
    let embedder = OllamaClient::new(config).context("Failed to initialize Ollama client")?;

    let hits = QueryEngine::new(backend)
        .with_embedder(Arc::new(embedder))
        .query(QueryInput::Text(query), &options)?;
    Ok(hits)
}

/// Metadata-only lookup: rows matching the `--where`/`--tag` clauses, unranked
#[inline]
pub fn filter_documents(config: &Config, args: &SearchArgs) -> Result<Vec<QueryHit>> {
    let options = args.to_options()?;
    let backend = open_shared_backend(config, IndexMode::Append)?;

    let hits = QueryEngine::new(backend).filter(&options)?;
    Ok(hits)
}

/// Drop and recreate the remote collection, or delete the local artifacts
#[inline]
pub fn reset_schema(config: &Config) -> Result<String> {
    match config.backend {
        Backend::Remote => {
            let adapter = RemoteIndexAdapter::new(config)?;
            adapter.reset_schema()?;
            Ok(format!("Reset remote collection {}", adapter.collection()))
        }
        Backend::Local => {
            let paths = config.artifact_paths();
            remove_artifacts(&paths)?;
            Ok(format!(
                "Removed local index artifacts {} and {}",
                paths.vectors.display(),
                paths.metadata.display()
            ))
        }
    }
}

/// What the configured backend currently holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub backend: &'static str,
    pub metric: Metric,
    pub dimension: usize,
    /// `None` when no local index has been built yet
    pub rows: Option<usize>,
}

#[inline]
pub fn show_status(config: &Config) -> Result<StatusReport> {
    let backend = open_backend(config).context("Failed to open index backend")?;
    let rows = match backend.count() {
        Ok(rows) => Some(rows),
        Err(IndexError::NotLoaded) => None,
        Err(e) => bail!(e),
    };

    Ok(StatusReport {
        backend: backend.name(),
        metric: backend.metric(),
        dimension: backend.dimension(),
        rows,
    })
}

/// Pretty JSON for command output
#[inline]
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize output")
}
