// Index backends
// A process-local flat vector store and a remote Weaviate-compatible adapter,
// both behind the IndexBackend capability trait


pub mod filter;
pub mod local;
pub mod remote;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Backend, Config};
use crate::indexer::IndexMode;
use crate::record::FlatRecord;
use crate::{IndexError, Result};

pub use filter::Filter;
pub use local::VectorStore;
pub use remote::RemoteIndexAdapter;

/// Similarity metric used for ranking
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    InnerProduct,
    Euclidean,
}

impl Metric {
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::InnerProduct => "inner_product",
            Self::Euclidean => "euclidean",
        }
    }

    /// Higher scores are better for similarity metrics, lower for distances
    #[inline]
    pub const fn is_similarity(self) -> bool {
        matches!(self, Self::Cosine | Self::InnerProduct)
    }
}

impl fmt::Display for Metric {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = IndexError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(Self::Cosine),
            "inner_product" | "dot" | "ip" => Ok(Self::InnerProduct),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            other => Err(IndexError::UnsupportedMetric(format!(
                "'{}' is not one of cosine, inner_product, euclidean",
                other
            ))),
        }
    }
}

/// Ranking score attached to a hit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Score {
    Similarity(f32),
    Distance(f32),
}

impl Score {
    #[inline]
    pub const fn value(self) -> f32 {
        match self {
            Self::Similarity(v) | Self::Distance(v) => v,
        }
    }
}

/// Minimum-quality cutoff applied alongside `top_k`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    /// Backend certainty in `[0, 1]`; only defined for cosine
    Certainty(f32),
    /// Maximum distance; for similarity metrics, `1 - similarity` for cosine
    /// and `-similarity` for inner product
    Distance(f32),
}

/// Cosine similarity mapped to `[0, 1]`, the way Weaviate reports certainty
#[inline]
pub fn certainty_from_cosine(cosine: f32) -> f32 {
    (1.0 + cosine) / 2.0
}

/// One similarity search against a backend
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    pub vector: &'a [f32],
    pub top_k: usize,
    pub filter: Option<&'a Filter>,
    pub threshold: Option<Threshold>,
}

impl<'a> SearchRequest<'a> {
    #[inline]
    pub const fn new(vector: &'a [f32], top_k: usize) -> Self {
        Self {
            vector,
            top_k,
            filter: None,
            threshold: None,
        }
    }

    #[inline]
    pub const fn with_filter(mut self, filter: Option<&'a Filter>) -> Self {
        self.filter = filter;
        self
    }

    #[inline]
    pub const fn with_threshold(mut self, threshold: Option<Threshold>) -> Self {
        self.threshold = threshold;
        self
    }
}

/// A ranked metadata row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub record: FlatRecord,
    pub score: Score,
    pub certainty: Option<f32>,
    /// Ordinal position in the local tables; `None` for remote hits
    pub ordinal: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowFailureKind {
    MissingVector,
    Rejected,
    Timeout,
    Request,
}

/// A single row that did not make it into the index
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("row {ordinal} (document {document_id}) {kind:?}: {message}")]
pub struct RowInsertError {
    pub ordinal: usize,
    pub document_id: String,
    pub kind: RowFailureKind,
    pub message: String,
}

/// Outcome of an insert; every skipped or failed row is listed individually
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InsertReport {
    pub attempted: usize,
    pub inserted: usize,
    pub skipped: Vec<RowInsertError>,
    pub failed: Vec<RowInsertError>,
}

impl InsertReport {
    #[inline]
    pub fn all_inserted(count: usize) -> Self {
        Self {
            attempted: count,
            inserted: count,
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }

    /// Ordinals of every row that was skipped or failed, ascending
    #[inline]
    pub fn unsuccessful_ordinals(&self) -> Vec<usize> {
        let mut ordinals: Vec<usize> = self
            .skipped
            .iter()
            .chain(self.failed.iter())
            .map(|row| row.ordinal)
            .collect();
        ordinals.sort_unstable();
        ordinals
    }

    /// Pick the records and vectors to re-submit after fixing the cause
    #[inline]
    pub fn resubmission<'a>(
        &self,
        records: &'a [FlatRecord],
        vectors: &'a [Vec<f32>],
    ) -> (Vec<&'a FlatRecord>, Vec<&'a Vec<f32>>) {
        self.unsuccessful_ordinals()
            .into_iter()
            .filter_map(|ordinal| Some((records.get(ordinal)?, vectors.get(ordinal)?)))
            .unzip()
    }

    #[inline]
    pub fn merge(&mut self, other: Self) {
        self.attempted += other.attempted;
        self.inserted += other.inserted;
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }
}

/// Capability shared by the local store and the remote adapter
pub trait IndexBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn metric(&self) -> Metric;

    fn dimension(&self) -> usize;

    /// Replace the whole index with the given rows
    fn rebuild(&self, records: &[FlatRecord], vectors: &[Vec<f32>]) -> Result<InsertReport>;

    /// Append rows to the index
    fn add(&self, records: &[FlatRecord], vectors: &[Vec<f32>]) -> Result<InsertReport>;

    fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<SearchHit>>;

    /// Up to `limit` rows matching the filter, unranked
    fn filter(&self, filter: &Filter, limit: usize) -> Result<Vec<FlatRecord>>;

    /// Number of indexed rows
    fn count(&self) -> Result<usize>;

    /// Make mutations durable (no-op for backends that persist on write)
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Construct the backend selected by configuration, loading any existing
/// local index
#[inline]
pub fn open_backend(config: &Config) -> Result<Box<dyn IndexBackend>> {
    open_backend_for(config, IndexMode::Append)
}

/// Construct the backend for an indexing run. A rebuild replaces the local
/// artifacts wholesale, so they are not loaded first.
#[inline]
pub fn open_backend_for(config: &Config, mode: IndexMode) -> Result<Box<dyn IndexBackend>> {
    match config.backend {
        Backend::Local => {
            let store = VectorStore::from_config(config)?;
            if mode == IndexMode::Append && store.artifacts_exist() {
                store.load()?;
            }
            Ok(Box::new(store))
        }
        Backend::Remote => Ok(Box::new(RemoteIndexAdapter::new(config)?)),
    }
}

/// Check a batch before any mutation: arity, then per-row dimension and
/// finiteness. Empty vectors are reported as a dimension mismatch unless
/// `allow_empty` is set.
pub(crate) fn validate_batch(
    records: &[FlatRecord],
    vectors: &[Vec<f32>],
    dimension: usize,
    allow_empty: bool,
) -> Result<()> {
    if records.len() != vectors.len() {
        return Err(IndexError::ArityMismatch {
            records: records.len(),
            vectors: vectors.len(),
        });
    }

    for (row, vector) in vectors.iter().enumerate() {
        if vector.is_empty() && allow_empty {
            continue;
        }
        validate_vector(vector, dimension, row)?;
    }

    Ok(())
}

pub(crate) fn validate_vector(vector: &[f32], dimension: usize, row: usize) -> Result<()> {
    if vector.len() != dimension {
        return Err(IndexError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
            row,
        });
    }
    if let Some(position) = vector.iter().position(|v| !v.is_finite()) {
        return Err(IndexError::InvalidVector {
            row,
            message: format!("component {} is not finite", position),
        });
    }
    Ok(())
}
