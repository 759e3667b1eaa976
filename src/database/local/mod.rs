// Process-local flat vector index
// Vector table and metadata table are kept as one unit and swapped together


pub mod persist;

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use super::{
    Filter, IndexBackend, InsertReport, Metric, Score, SearchHit, SearchRequest, Threshold,
    certainty_from_cosine, validate_batch, validate_vector,
};
use crate::config::Config;
use crate::record::FlatRecord;
use crate::{IndexError, Result};

/// Row-aligned vector and metadata tables; ordinal position is the only link
#[derive(Debug, Clone, Default)]
struct Tables {
    /// Row-major, `dimension` floats per row
    vectors: Vec<f32>,
    metadata: Vec<FlatRecord>,
}

impl Tables {
    fn len(&self) -> usize {
        self.metadata.len()
    }
}

/// Where the paired artifacts live on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub vectors: PathBuf,
    pub metadata: PathBuf,
}

/// Exhaustive-search vector store over fixed-dimension vectors.
///
/// `None` tables mean the store has never been built or loaded; an empty
/// `Tables` is a valid, searchable, empty index. Readers clone the `Arc`
/// under the read lock, so they always see a complete (vectors, metadata)
/// pair; writers build or copy-on-write a new pair under the write lock.
#[derive(Debug)]
pub struct VectorStore {
    dimension: usize,
    metric: Metric,
    paths: Option<ArtifactPaths>,
    tables: RwLock<Option<Arc<Tables>>>,
}

struct Candidate {
    ordinal: usize,
    value: f32,
}

impl VectorStore {
    /// Create an unpopulated in-memory store
    #[inline]
    pub fn new(dimension: usize, metric: Metric) -> Result<Self> {
        if dimension == 0 {
            return Err(IndexError::Config(
                "vector dimension must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            dimension,
            metric,
            paths: None,
            tables: RwLock::new(None),
        })
    }

    #[inline]
    pub fn with_artifacts(mut self, vectors: PathBuf, metadata: PathBuf) -> Self {
        self.paths = Some(ArtifactPaths { vectors, metadata });
        self
    }

    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        let paths = config.artifact_paths();
        Ok(Self::new(config.embedding.embedding_dimension as usize, config.store.metric)?
            .with_artifacts(paths.vectors, paths.metadata))
    }

    #[inline]
    pub fn artifact_paths(&self) -> Option<&ArtifactPaths> {
        self.paths.as_ref()
    }

    #[inline]
    pub fn artifacts_exist(&self) -> bool {
        self.paths
            .as_ref()
            .is_some_and(|p| p.vectors.exists() && p.metadata.exists())
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.tables.read().is_ok_and(|guard| guard.is_some())
    }

    /// Number of rows; zero when unpopulated
    #[inline]
    pub fn len(&self) -> usize {
        self.snapshot().map_or(0, |tables| tables.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace both tables with the given rows
    #[inline]
    pub fn build(&self, records: &[FlatRecord], vectors: &[Vec<f32>]) -> Result<()> {
        validate_batch(records, vectors, self.dimension, false)?;

        let tables = Tables {
            vectors: self.prepare_rows(vectors),
            metadata: records.to_vec(),
        };

        let mut guard = self.write_guard()?;
        *guard = Some(Arc::new(tables));
        drop(guard);

        info!(
            "Built vector store with {} rows (dimension {}, metric {})",
            records.len(),
            self.dimension,
            self.metric
        );
        Ok(())
    }

    /// Append rows; the whole batch is rejected on the first invalid row
    #[inline]
    pub fn add(&self, records: &[FlatRecord], vectors: &[Vec<f32>]) -> Result<()> {
        if !self.is_loaded() {
            return Err(IndexError::NotLoaded);
        }
        validate_batch(records, vectors, self.dimension, false)?;

        let prepared = self.prepare_rows(vectors);

        let mut guard = self.write_guard()?;
        let tables = guard.as_mut().ok_or(IndexError::NotLoaded)?;
        let tables = Arc::make_mut(tables);
        tables.vectors.extend_from_slice(&prepared);
        tables.metadata.extend_from_slice(records);
        let total = tables.len();
        drop(guard);

        info!("Added {} rows to vector store ({} total)", records.len(), total);
        Ok(())
    }

    /// Top-k search over every row
    #[inline]
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        self.search_with(&SearchRequest::new(query, top_k))
    }

    /// Search honoring filter and threshold.
    ///
    /// The filter is applied to the full metadata table before ranking, so
    /// `top_k` is taken from the matching rows only.
    #[inline]
    pub fn search_with(&self, request: &SearchRequest<'_>) -> Result<Vec<SearchHit>> {
        let tables = self.snapshot()?;
        validate_vector(request.vector, self.dimension, 0)?;
        if let Some(filter) = request.filter {
            filter.validate()?;
        }

        if matches!(request.threshold, Some(Threshold::Certainty(_))) && self.metric != Metric::Cosine
        {
            return Err(IndexError::UnsupportedMetric(format!(
                "certainty thresholds require cosine, store uses {}",
                self.metric
            )));
        }

        if request.top_k == 0 || tables.len() == 0 {
            return Ok(Vec::new());
        }

        let query = self.prepare_query(request.vector);
        let mut candidates: Vec<Candidate> = tables
            .metadata
            .iter()
            .enumerate()
            .filter(|(_, record)| request.filter.is_none_or(|f| f.matches(record)))
            .map(|(ordinal, _)| Candidate {
                ordinal,
                value: self.score_row(&query, self.row(&tables, ordinal)),
            })
            .filter(|candidate| self.passes_threshold(candidate.value, request.threshold))
            .collect();

        let metric = self.metric;
        candidates.sort_by(|a, b| rank_order(metric, a, b));
        candidates.truncate(request.top_k);

        debug!(
            "Local search returned {} of {} rows",
            candidates.len(),
            tables.len()
        );

        Ok(candidates
            .into_iter()
            .map(|candidate| {
                let (score, certainty) = match metric {
                    Metric::Cosine => (
                        Score::Similarity(candidate.value),
                        Some(certainty_from_cosine(candidate.value)),
                    ),
                    Metric::InnerProduct => (Score::Similarity(candidate.value), None),
                    Metric::Euclidean => (Score::Distance(candidate.value), None),
                };
                SearchHit {
                    record: tables.metadata[candidate.ordinal].clone(),
                    score,
                    certainty,
                    ordinal: Some(candidate.ordinal),
                }
            })
            .collect())
    }

    /// Rows matching the filter in ordinal order, at most `limit` of them
    #[inline]
    pub fn filter_rows(&self, filter: &Filter, limit: usize) -> Result<Vec<FlatRecord>> {
        let tables = self.snapshot()?;
        filter.validate()?;

        let matched: Vec<FlatRecord> = tables
            .metadata
            .iter()
            .filter(|record| filter.matches(record))
            .take(limit)
            .cloned()
            .collect();
        debug!(
            "Local filter matched {} of {} rows",
            matched.len(),
            tables.len()
        );
        Ok(matched)
    }

    /// Write both artifacts; each goes to a staging file first
    #[inline]
    pub fn persist(&self) -> Result<()> {
        let paths = self.require_paths()?;
        let tables = self.snapshot()?;

        for path in [&paths.vectors, &paths.metadata] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }

        let vectors_staging = persist::staging_path(&paths.vectors);
        let metadata_staging = persist::staging_path(&paths.metadata);
        persist::write_vectors(&vectors_staging, self.metric, self.dimension, &tables.vectors)?;
        persist::write_metadata(&metadata_staging, &tables.metadata)?;
        fs::rename(&vectors_staging, &paths.vectors)?;
        fs::rename(&metadata_staging, &paths.metadata)?;

        info!(
            "Persisted {} rows to {} + {}",
            tables.len(),
            paths.vectors.display(),
            paths.metadata.display()
        );
        Ok(())
    }

    /// Replace the in-memory tables with the persisted ones
    #[inline]
    pub fn load(&self) -> Result<()> {
        let paths = self.require_paths()?;
        let vector_table = persist::read_vectors(&paths.vectors)?;
        let metadata = persist::read_metadata(&paths.metadata)?;

        if vector_table.dimension != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector_table.dimension,
                row: 0,
            });
        }
        if vector_table.metric != self.metric {
            return Err(IndexError::CorruptState(format!(
                "artifacts were built for {} but the store is configured for {}",
                vector_table.metric, self.metric
            )));
        }
        if vector_table.rows != metadata.len() {
            return Err(IndexError::CorruptState(format!(
                "vector table has {} rows but metadata table has {}",
                vector_table.rows,
                metadata.len()
            )));
        }

        let rows = metadata.len();
        let mut guard = self.write_guard()?;
        *guard = Some(Arc::new(Tables {
            vectors: vector_table.values,
            metadata,
        }));
        drop(guard);

        info!(
            "Loaded {} rows from {} + {}",
            rows,
            paths.vectors.display(),
            paths.metadata.display()
        );
        Ok(())
    }

    fn snapshot(&self) -> Result<Arc<Tables>> {
        let guard = self
            .tables
            .read()
            .map_err(|_| IndexError::CorruptState("vector store lock poisoned".to_string()))?;
        guard.as_ref().map(Arc::clone).ok_or(IndexError::NotLoaded)
    }

    fn write_guard(&self) -> Result<std::sync::RwLockWriteGuard<'_, Option<Arc<Tables>>>> {
        self.tables
            .write()
            .map_err(|_| IndexError::CorruptState("vector store lock poisoned".to_string()))
    }

    fn require_paths(&self) -> Result<&ArtifactPaths> {
        self.paths.as_ref().ok_or_else(|| {
            IndexError::Config("vector store has no artifact paths configured".to_string())
        })
    }

    fn row<'a>(&self, tables: &'a Tables, ordinal: usize) -> &'a [f32] {
        let start = ordinal * self.dimension;
        &tables.vectors[start..start + self.dimension]
    }

    /// Flatten vectors into one row-major buffer, unit-normalizing for cosine
    fn prepare_rows(&self, vectors: &[Vec<f32>]) -> Vec<f32> {
        let mut flat = Vec::with_capacity(vectors.len() * self.dimension);
        for vector in vectors {
            flat.extend(self.prepare_query(vector));
        }
        flat
    }

    fn prepare_query(&self, vector: &[f32]) -> Vec<f32> {
        if self.metric == Metric::Cosine {
            normalize_l2(vector)
        } else {
            vector.to_vec()
        }
    }

    fn score_row(&self, query: &[f32], row: &[f32]) -> f32 {
        match self.metric {
            // Rows and query are unit length, so the dot product is the cosine
            Metric::Cosine | Metric::InnerProduct => dot(query, row),
            Metric::Euclidean => query
                .iter()
                .zip(row)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                .sqrt(),
        }
    }

    fn passes_threshold(&self, value: f32, threshold: Option<Threshold>) -> bool {
        match threshold {
            None => true,
            Some(Threshold::Certainty(min)) => certainty_from_cosine(value) >= min,
            Some(Threshold::Distance(max)) => {
                let distance = match self.metric {
                    Metric::Cosine => 1.0 - value,
                    Metric::InnerProduct => -value,
                    Metric::Euclidean => value,
                };
                distance <= max
            }
        }
    }
}

/// Best first; equal scores keep insertion order
fn rank_order(metric: Metric, a: &Candidate, b: &Candidate) -> Ordering {
    let by_value = if metric.is_similarity() {
        b.value.total_cmp(&a.value)
    } else {
        a.value.total_cmp(&b.value)
    };
    by_value.then_with(|| a.ordinal.cmp(&b.ordinal))
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale to unit L2 length; the zero vector is returned unchanged
#[inline]
pub fn normalize_l2(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

impl IndexBackend for VectorStore {
    fn name(&self) -> &'static str {
        "local"
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn rebuild(&self, records: &[FlatRecord], vectors: &[Vec<f32>]) -> Result<InsertReport> {
        self.build(records, vectors)?;
        Ok(InsertReport::all_inserted(records.len()))
    }

    fn add(&self, records: &[FlatRecord], vectors: &[Vec<f32>]) -> Result<InsertReport> {
        Self::add(self, records, vectors)?;
        Ok(InsertReport::all_inserted(records.len()))
    }

    fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<SearchHit>> {
        self.search_with(request)
    }

    fn filter(&self, filter: &Filter, limit: usize) -> Result<Vec<FlatRecord>> {
        self.filter_rows(filter, limit)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.snapshot()?.len())
    }

    fn flush(&self) -> Result<()> {
        if self.paths.is_none() {
            warn!("Vector store has no artifact paths; nothing persisted");
            return Ok(());
        }
        self.persist()
    }
}

/// Remove both artifacts if present, e.g. before a clean rebuild
#[inline]
pub fn remove_artifacts(paths: &ArtifactPaths) -> Result<()> {
    for path in [&paths.vectors, &paths.metadata] {
        remove_if_exists(path)?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
