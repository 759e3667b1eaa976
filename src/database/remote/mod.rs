// Remote index adapter for a Weaviate-compatible REST/GraphQL endpoint

#[cfg(test)]
mod tests;

mod graphql;

use std::time::Duration;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::{
    Filter, IndexBackend, InsertReport, Metric, RowFailureKind, RowInsertError, SearchHit,
    SearchRequest, validate_batch, validate_vector,
};
use crate::config::Config;
use crate::record::{FieldValue, FlatRecord, RecordField};
use crate::{IndexError, Result};

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Network-hosted index with server-side filtering.
///
/// Inserts are per-row: a row without a vector is skipped, a row the server
/// rejects is reported, and neither stops the rest of the batch. The schema is
/// only ever touched by [`RemoteIndexAdapter::reset_schema`].
#[derive(Debug, Clone)]
pub struct RemoteIndexAdapter {
    base_url: Url,
    collection: String,
    metric: Metric,
    dimension: usize,
    batch_size: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    objects: Vec<BatchObject<'a>>,
}

#[derive(Debug, Serialize)]
struct BatchObject<'a> {
    class: &'a str,
    id: Uuid,
    properties: Map<String, Value>,
    vector: &'a [f32],
}

#[derive(Debug, Deserialize)]
struct BatchObjectResult {
    #[serde(default)]
    result: Option<BatchResult>,
}

#[derive(Debug, Deserialize)]
struct BatchResult {
    #[serde(default)]
    errors: Option<BatchErrors>,
}

#[derive(Debug, Deserialize)]
struct BatchErrors {
    #[serde(default)]
    error: Vec<BatchErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct BatchErrorMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    #[serde(default)]
    classes: Vec<SchemaClass>,
}

#[derive(Debug, Deserialize)]
struct SchemaClass {
    class: String,
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

impl RemoteIndexAdapter {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .remote_url()
            .map_err(|e| IndexError::Config(format!("Failed to build remote URL: {}", e)))?;

        Ok(Self {
            base_url,
            collection: config.remote.collection.clone(),
            metric: config.remote.metric,
            dimension: config.embedding.embedding_dimension as usize,
            batch_size: config.remote.batch_size.max(1) as usize,
            agent: build_agent(Duration::from_secs(config.remote.timeout_secs)),
            retry_attempts: config.remote.retry_attempts,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Deterministic object id, so re-inserting a document overwrites it
    #[inline]
    pub fn object_id(document_id: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, document_id.as_bytes())
    }

    /// Check that the server reports itself ready
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let url = self.endpoint("/v1/.well-known/ready")?;
        self.make_request_with_retry("readiness check", || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;
        debug!("Remote index at {} is ready", self.base_url);
        Ok(())
    }

    /// Drop the collection if it exists and declare it again, empty.
    ///
    /// Destructive; never called implicitly by inserts.
    #[inline]
    pub fn reset_schema(&self) -> Result<()> {
        let schema_url = self.endpoint("/v1/schema")?;

        let body = self.make_request_with_retry("schema lookup", || {
            self.agent
                .get(schema_url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;
        let schema: SchemaResponse = serde_json::from_str(&body)
            .map_err(|e| IndexError::RemoteRequest(format!("invalid schema response: {}", e)))?;

        if schema.classes.iter().any(|c| c.class == self.collection) {
            let class_url = self.endpoint(&format!("/v1/schema/{}", self.collection))?;
            self.make_request_with_retry("schema delete", || {
                self.agent
                    .delete(class_url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })?;
            info!("Dropped remote collection {}", self.collection);
        }

        let definition = self.class_definition().to_string();
        self.make_request_with_retry("schema create", || {
            self.agent
                .post(schema_url.as_str())
                .header("Content-Type", "application/json")
                .send(&definition)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        info!(
            "Created remote collection {} (distance {})",
            self.collection,
            graphql::distance_name(self.metric)
        );
        Ok(())
    }

    fn class_definition(&self) -> Value {
        let properties: Vec<Value> = RecordField::ALL
            .iter()
            .map(|field| {
                let data_type = if field.is_list() { "text[]" } else { "text" };
                json!({ "name": field.name(), "dataType": [data_type] })
            })
            .collect();

        json!({
            "class": self.collection,
            "vectorizer": "none",
            "vectorIndexConfig": { "distance": graphql::distance_name(self.metric) },
            "properties": properties,
        })
    }

    /// Insert rows in chunks of `batch_size`.
    ///
    /// Arity and dimension errors reject the whole call before any request is
    /// sent; everything after that is reported per row.
    #[inline]
    pub fn add(&self, records: &[FlatRecord], vectors: &[Vec<f32>]) -> Result<InsertReport> {
        validate_batch(records, vectors, self.dimension, true)?;

        let mut report = InsertReport {
            attempted: records.len(),
            ..InsertReport::default()
        };

        let mut pending = Vec::with_capacity(records.len());
        for (ordinal, (record, vector)) in records.iter().zip(vectors).enumerate() {
            if vector.is_empty() {
                warn!(
                    "Skipping document {} (row {}): no embedding vector",
                    record.document_id, ordinal
                );
                report.skipped.push(RowInsertError {
                    ordinal,
                    document_id: record.document_id.clone(),
                    kind: RowFailureKind::MissingVector,
                    message: "row has no embedding vector".to_string(),
                });
            } else {
                pending.push(ordinal);
            }
        }

        for chunk in pending.chunks(self.batch_size) {
            let failed = self.insert_chunk(chunk, records, vectors);
            report.inserted += chunk.len() - failed.len();
            report.failed.extend(failed);
        }

        info!(
            "Inserted {}/{} rows into {} ({} skipped, {} failed)",
            report.inserted,
            report.attempted,
            self.collection,
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Send one chunk and return the rows that did not make it
    fn insert_chunk(
        &self,
        ordinals: &[usize],
        records: &[FlatRecord],
        vectors: &[Vec<f32>],
    ) -> Vec<RowInsertError> {
        let fail_all = |kind: RowFailureKind, message: &str| -> Vec<RowInsertError> {
            ordinals
                .iter()
                .map(|&ordinal| {
                    let failure = RowInsertError {
                        ordinal,
                        document_id: records[ordinal].document_id.clone(),
                        kind,
                        message: message.to_string(),
                    };
                    warn!("Failed to insert {}", failure);
                    failure
                })
                .collect()
        };

        let request = BatchRequest {
            objects: ordinals
                .iter()
                .map(|&ordinal| BatchObject {
                    class: &self.collection,
                    id: Self::object_id(&records[ordinal].document_id),
                    properties: properties(&records[ordinal]),
                    vector: &vectors[ordinal],
                })
                .collect(),
        };

        let body = match serde_json::to_string(&request) {
            Ok(body) => body,
            Err(e) => return fail_all(RowFailureKind::Request, &e.to_string()),
        };
        let url = match self.endpoint("/v1/batch/objects") {
            Ok(url) => url,
            Err(e) => return fail_all(RowFailureKind::Request, &e.to_string()),
        };

        debug!("Sending batch of {} objects to {}", ordinals.len(), url);

        let response = self.make_request_with_retry("batch insert", || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        });

        let text = match response {
            Ok(text) => text,
            Err(e @ IndexError::RemoteTimeout { .. }) => {
                return fail_all(RowFailureKind::Timeout, &e.to_string());
            }
            Err(e) => return fail_all(RowFailureKind::Request, &e.to_string()),
        };

        let results: Vec<BatchObjectResult> = match serde_json::from_str(&text) {
            Ok(results) => results,
            Err(e) => {
                return fail_all(
                    RowFailureKind::Request,
                    &format!("invalid batch response: {}", e),
                );
            }
        };
        if results.len() != ordinals.len() {
            return fail_all(
                RowFailureKind::Request,
                &format!(
                    "batch response has {} results for {} objects",
                    results.len(),
                    ordinals.len()
                ),
            );
        }

        ordinals
            .iter()
            .zip(results)
            .filter_map(|(&ordinal, result)| {
                let messages = result
                    .result
                    .and_then(|r| r.errors)
                    .map(|errors| errors.error)
                    .unwrap_or_default();
                if messages.is_empty() {
                    return None;
                }
                let failure = RowInsertError {
                    ordinal,
                    document_id: records[ordinal].document_id.clone(),
                    kind: RowFailureKind::Rejected,
                    message: messages.into_iter().map(|m| m.message).join("; "),
                };
                warn!("Server rejected {}", failure);
                Some(failure)
            })
            .collect()
    }

    /// `nearVector` search with the filter and threshold pushed to the server
    #[inline]
    pub fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<SearchHit>> {
        validate_vector(request.vector, self.dimension, 0)?;
        if let Some(filter) = request.filter {
            filter.validate()?;
        }
        let query = graphql::near_vector_query(&self.collection, self.metric, request)?;
        if request.top_k == 0 {
            return Ok(Vec::new());
        }

        let data = self.graphql("search", &query)?;
        let hits = graphql::parse_hits(&data, &self.collection, self.metric)?;

        debug!("Remote search returned {} hits", hits.len());
        Ok(hits)
    }

    /// Filter-only Get; rows come back in the server's order, unscored
    #[inline]
    pub fn filter_search(&self, filter: &Filter, limit: usize) -> Result<Vec<FlatRecord>> {
        filter.validate()?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query = graphql::filter_query(&self.collection, filter, limit);
        let data = self.graphql("filter", &query)?;
        let records = graphql::parse_records(&data, &self.collection)?;

        debug!("Remote filter returned {} rows", records.len());
        Ok(records)
    }

    #[inline]
    pub fn count(&self) -> Result<usize> {
        let data = self.graphql("count", &graphql::aggregate_count_query(&self.collection))?;
        graphql::parse_count(&data, &self.collection)
    }

    fn graphql(&self, operation: &str, query: &str) -> Result<Value> {
        let url = self.endpoint("/v1/graphql")?;
        let body = graphql::request_body(query);

        let text = self.make_request_with_retry(operation, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        graphql::parse_response(&text)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| IndexError::Config(format!("Failed to build URL for {}: {}", path, e)))
    }

    fn make_request_with_retry<F>(&self, operation: &str, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> std::result::Result<String, ureq::Error>,
    {
        let attempts = self.retry_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            debug!("{} attempt {}/{}", operation, attempt, attempts);

            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) if *status >= 500 => {
                            warn!(
                                "Server error (status {}) during {}, attempt {}/{}",
                                status, operation, attempt, attempts
                            );
                            true
                        }
                        ureq::Error::StatusCode(status) => {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(IndexError::RemoteRequest(format!(
                                "{} failed: HTTP {}",
                                operation, status
                            )));
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error during {}: {}, attempt {}/{}",
                                operation, error, attempt, attempts
                            );
                            true
                        }
                        _ => false,
                    };

                    if !should_retry {
                        return Err(IndexError::RemoteRequest(format!(
                            "{} failed: {}",
                            operation, error
                        )));
                    }

                    last_error = Some(error);

                    if attempt < attempts {
                        let delay = Duration::from_millis(
                            EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000,
                        );
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for {} at {}", operation, self.base_url);

        Err(match last_error {
            Some(ureq::Error::Timeout(_)) => IndexError::RemoteTimeout {
                operation: operation.to_string(),
            },
            Some(ureq::Error::Io(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                IndexError::RemoteTimeout {
                    operation: operation.to_string(),
                }
            }
            Some(error) => IndexError::RemoteRequest(format!("{} failed: {}", operation, error)),
            None => IndexError::RemoteRequest(format!("{} failed after retries", operation)),
        })
    }
}

/// Present fields only; absent optionals are left out rather than sent as null
fn properties(record: &FlatRecord) -> Map<String, Value> {
    RecordField::ALL
        .iter()
        .filter_map(|&field| {
            let value = match record.get(field)? {
                FieldValue::Text(text) => Value::String(text.to_string()),
                FieldValue::List(items) => {
                    Value::Array(items.iter().cloned().map(Value::String).collect())
                }
            };
            Some((field.name().to_string(), value))
        })
        .collect()
}

impl IndexBackend for RemoteIndexAdapter {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    /// Validates first so a bad batch never drops the existing collection
    fn rebuild(&self, records: &[FlatRecord], vectors: &[Vec<f32>]) -> Result<InsertReport> {
        validate_batch(records, vectors, self.dimension, true)?;
        self.reset_schema()?;
        Self::add(self, records, vectors)
    }

    fn add(&self, records: &[FlatRecord], vectors: &[Vec<f32>]) -> Result<InsertReport> {
        Self::add(self, records, vectors)
    }

    fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<SearchHit>> {
        Self::search(self, request)
    }

    fn filter(&self, filter: &Filter, limit: usize) -> Result<Vec<FlatRecord>> {
        self.filter_search(filter, limit)
    }

    fn count(&self) -> Result<usize> {
        Self::count(self)
    }
}
