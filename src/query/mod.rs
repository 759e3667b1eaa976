// Query engine
// Turns a text or vector query into one backend search and a uniform hit shape

#[cfg(test)]
mod tests;

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::database::{Filter, IndexBackend, Metric, Score, SearchRequest, Threshold};
use crate::embeddings::EmbeddingPort;
use crate::record::{FieldValue, FlatRecord, RecordField};
use crate::{IndexError, Result};

pub const DEFAULT_TOP_K: usize = 10;

/// What to search for
#[derive(Debug, Clone, Copy)]
pub enum QueryInput<'a> {
    /// Embedded through the engine's [`EmbeddingPort`] first
    Text(&'a str),
    Vector(&'a [f32]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub top_k: usize,
    pub filter: Option<Filter>,
    pub threshold: Option<Threshold>,
    /// Metric the caller expects; must match the backend's
    pub metric: Option<Metric>,
    /// Metadata fields to return; empty means all
    pub fields: Vec<RecordField>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            filter: None,
            threshold: None,
            metric: None,
            fields: Vec::new(),
        }
    }
}

impl QueryOptions {
    #[inline]
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            ..Self::default()
        }
    }

    #[inline]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[inline]
    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.threshold = Some(threshold);
        self
    }

    #[inline]
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }

    #[inline]
    pub fn with_fields(mut self, fields: Vec<RecordField>) -> Self {
        self.fields = fields;
        self
    }
}

/// A ranked result, identical in shape for every backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    /// 1-based position in the result list
    pub rank: usize,
    pub document_id: String,
    /// `None` for filter-only lookups
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certainty: Option<f32>,
    pub metadata: Map<String, Value>,
}

pub struct QueryEngine {
    backend: Arc<dyn IndexBackend>,
    embedder: Option<Arc<dyn EmbeddingPort>>,
}

impl QueryEngine {
    #[inline]
    pub fn new(backend: Arc<dyn IndexBackend>) -> Self {
        Self {
            backend,
            embedder: None,
        }
    }

    #[inline]
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingPort>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[inline]
    pub fn backend(&self) -> &dyn IndexBackend {
        self.backend.as_ref()
    }

    #[inline]
    pub fn query(&self, input: QueryInput<'_>, options: &QueryOptions) -> Result<Vec<QueryHit>> {
        self.check_metric(options)?;

        let embedded;
        let vector = match input {
            QueryInput::Vector(vector) => vector,
            QueryInput::Text(text) => {
                let embedder = self.embedder.as_ref().ok_or_else(|| {
                    IndexError::Config("text queries need an embedding model".to_string())
                })?;
                debug!("Embedding query text ({} chars)", text.len());
                embedded = embedder.encode(text)?;
                &embedded
            }
        };

        let request = SearchRequest::new(vector, options.top_k)
            .with_filter(options.filter.as_ref())
            .with_threshold(options.threshold);
        let hits = self.backend.search(&request)?;
        debug!(
            "{} backend returned {} hits",
            self.backend.name(),
            hits.len()
        );

        let fields = requested_fields(options);
        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(index, hit)| QueryHit {
                rank: index + 1,
                metadata: project(&hit.record, fields),
                document_id: hit.record.document_id,
                score: Some(hit.score),
                certainty: hit.certainty,
            })
            .collect())
    }

    /// Metadata-only lookup: up to `top_k` rows matching the filter, in index
    /// order and without a score
    #[inline]
    pub fn filter(&self, options: &QueryOptions) -> Result<Vec<QueryHit>> {
        self.check_metric(options)?;
        let filter = options.filter.as_ref().ok_or_else(|| {
            IndexError::Config("a filter-only query needs at least one filter".to_string())
        })?;
        if options.threshold.is_some() {
            return Err(IndexError::Config(
                "thresholds only apply to similarity queries".to_string(),
            ));
        }

        let records = self.backend.filter(filter, options.top_k)?;
        debug!(
            "{} backend matched {} rows",
            self.backend.name(),
            records.len()
        );

        let fields = requested_fields(options);
        Ok(records
            .into_iter()
            .enumerate()
            .map(|(index, record)| QueryHit {
                rank: index + 1,
                metadata: project(&record, fields),
                document_id: record.document_id,
                score: None,
                certainty: None,
            })
            .collect())
    }

    fn check_metric(&self, options: &QueryOptions) -> Result<()> {
        let metric = self.backend.metric();
        match options.metric.filter(|&requested| requested != metric) {
            Some(requested) => Err(IndexError::UnsupportedMetric(format!(
                "{} requested but the {} index ranks by {}",
                requested,
                self.backend.name(),
                metric
            ))),
            None => Ok(()),
        }
    }
}

fn requested_fields(options: &QueryOptions) -> &[RecordField] {
    if options.fields.is_empty() {
        &RecordField::ALL
    } else {
        &options.fields
    }
}

/// The requested fields of a record as JSON; absent values become `null`
#[inline]
pub fn project(record: &FlatRecord, fields: &[RecordField]) -> Map<String, Value> {
    fields
        .iter()
        .map(|&field| {
            let value = match record.get(field) {
                Some(FieldValue::Text(text)) => Value::String(text.to_string()),
                Some(FieldValue::List(items)) => {
                    Value::Array(items.iter().cloned().map(Value::String).collect())
                }
                None => Value::Null,
            };
            (field.name().to_string(), value)
        })
        .collect()
}
