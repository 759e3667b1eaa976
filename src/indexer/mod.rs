// Indexer module
// Flatten -> embed -> insert -> flush, with every dropped row accounted for

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};

use crate::database::{IndexBackend, InsertReport, RowFailureKind, RowInsertError};
use crate::embeddings::{EmbeddingFailure, EmbeddingPort, embed_records_with_progress};
use crate::record::FlatRecord;
use crate::tree::{DocumentTree, HierarchyFlattener};
use crate::{IndexError, Result};


pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 16;

/// How the indexed rows relate to what the backend already holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Replace the whole index
    Rebuild,
    /// Append to the existing index
    Append,
}

/// Statistics about one indexing pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexingStats {
    pub documents: usize,
    pub embedded: usize,
    pub embedding_failures: Vec<EmbeddingFailure>,
    /// Ordinals refer to positions in the flattened record list
    pub report: InsertReport,
}

/// Runs the indexing pipeline against one backend with one embedding model
pub struct Indexer {
    backend: Arc<dyn IndexBackend>,
    embedder: Arc<dyn EmbeddingPort>,
    batch_size: usize,
    show_progress: bool,
}

impl Indexer {
    #[inline]
    pub fn new(backend: Arc<dyn IndexBackend>, embedder: Arc<dyn EmbeddingPort>) -> Self {
        Self {
            backend,
            embedder,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            show_progress: console::user_attended_stderr(),
        }
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    #[inline]
    pub fn index_tree(&self, tree: &DocumentTree, mode: IndexMode) -> Result<IndexingStats> {
        let records = HierarchyFlattener::new().flatten(tree)?;
        self.index_records(&records, mode)
    }

    /// Embed and insert `records`.
    ///
    /// Records whose embedding failed are not sent to the backend; they are
    /// listed in the report as skipped with [`RowFailureKind::MissingVector`].
    /// A rebuild where nothing could be embedded leaves the index untouched.
    #[inline]
    pub fn index_records(&self, records: &[FlatRecord], mode: IndexMode) -> Result<IndexingStats> {
        info!(
            "Indexing {} records into the {} backend ({:?})",
            records.len(),
            self.backend.name(),
            mode
        );

        let bar = self.progress_bar(records.len());
        let outcome = embed_records_with_progress(
            self.embedder.as_ref(),
            records,
            self.batch_size,
            self.backend.dimension(),
            |done| bar.set_position(done as u64),
        );
        bar.finish_and_clear();

        if !records.is_empty() && outcome.embedded() == 0 {
            return Err(IndexError::Embedding(format!(
                "none of {} records could be embedded; index left unchanged",
                records.len()
            )));
        }

        let embedded = outcome.embedded();
        let mut kept = Vec::with_capacity(embedded);
        let mut kept_records = Vec::with_capacity(embedded);
        let mut kept_vectors = Vec::with_capacity(embedded);
        for (ordinal, (record, vector)) in records.iter().zip(outcome.vectors).enumerate() {
            if vector.is_empty() {
                continue;
            }
            kept.push(ordinal);
            kept_records.push(record.clone());
            kept_vectors.push(vector);
        }

        let mut report = match mode {
            IndexMode::Rebuild => self.backend.rebuild(&kept_records, &kept_vectors)?,
            IndexMode::Append => self.backend.add(&kept_records, &kept_vectors)?,
        };
        for row in report.skipped.iter_mut().chain(report.failed.iter_mut()) {
            if let Some(&ordinal) = kept.get(row.ordinal) {
                row.ordinal = ordinal;
            }
        }

        report.attempted += outcome.failures.len();
        report
            .skipped
            .extend(outcome.failures.iter().map(|failure| RowInsertError {
                ordinal: failure.ordinal,
                document_id: failure.document_id.clone(),
                kind: RowFailureKind::MissingVector,
                message: failure.message.clone(),
            }));
        report.skipped.sort_by_key(|row| row.ordinal);

        self.backend.flush()?;

        if !report.is_complete() {
            warn!(
                "{} of {} records were not indexed",
                report.skipped.len() + report.failed.len(),
                records.len()
            );
        }
        info!("Indexed {}/{} records", report.inserted, records.len());

        Ok(IndexingStats {
            documents: records.len(),
            embedded,
            embedding_failures: outcome.failures,
            report,
        })
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let style = ProgressStyle::with_template("{bar:40} [{pos}/{len}] Embedding documents")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(len as u64).with_style(style)
    }
}
