// GraphQL query construction and response decoding for the remote index

use itertools::Itertools;
use serde::Deserialize;
use serde_json::Value;

use crate::database::{
    Filter, Metric, Score, SearchHit, SearchRequest, Threshold, certainty_from_cosine,
};
use crate::record::{FlatRecord, RecordField};
use crate::{IndexError, Result};

/// Weaviate's name for the distance that corresponds to `metric`
pub(crate) const fn distance_name(metric: Metric) -> &'static str {
    match metric {
        Metric::Cosine => "cosine",
        Metric::InnerProduct => "dot",
        Metric::Euclidean => "l2-squared",
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RemoteHit {
    #[serde(flatten)]
    record: FlatRecord,
    #[serde(rename = "_additional", default)]
    additional: Additional,
}

#[derive(Debug, Default, Deserialize)]
struct Additional {
    distance: Option<f32>,
    certainty: Option<f32>,
}

fn format_vector(vector: &[f32]) -> String {
    vector.iter().map(|v| v.to_string()).join(", ")
}

/// Build the `nearVector` Get query for one search request
pub(crate) fn near_vector_query(
    collection: &str,
    metric: Metric,
    request: &SearchRequest<'_>,
) -> Result<String> {
    let threshold = match request.threshold {
        None => String::new(),
        Some(Threshold::Certainty(certainty)) => {
            if metric != Metric::Cosine {
                return Err(IndexError::UnsupportedMetric(format!(
                    "certainty thresholds require cosine, collection uses {}",
                    metric
                )));
            }
            format!(", certainty: {}", certainty)
        }
        Some(Threshold::Distance(max)) => {
            // l2-squared distances are compared against the squared bound
            let bound = if metric == Metric::Euclidean {
                max * max
            } else {
                max
            };
            format!(", distance: {}", bound)
        }
    };

    let filter = request
        .filter
        .map(|f| format!(", where: {}", f.to_graphql()))
        .unwrap_or_default();

    let fields = RecordField::ALL.iter().map(|f| f.name()).join(" ");

    Ok(format!(
        "{{ Get {{ {collection}(limit: {limit}, nearVector: {{vector: [{vector}]{threshold}}}{filter}) {{ {fields} _additional {{ id distance certainty }} }} }} }}",
        collection = collection,
        limit = request.top_k,
        vector = format_vector(request.vector),
        threshold = threshold,
        filter = filter,
        fields = fields,
    ))
}

/// Build the filter-only Get query; no vector, so no distance to select
pub(crate) fn filter_query(collection: &str, filter: &Filter, limit: usize) -> String {
    format!(
        "{{ Get {{ {collection}(limit: {limit}, where: {filter}) {{ {fields} _additional {{ id }} }} }} }}",
        collection = collection,
        limit = limit,
        filter = filter.to_graphql(),
        fields = RecordField::ALL.iter().map(|f| f.name()).join(" "),
    )
}

pub(crate) fn aggregate_count_query(collection: &str) -> String {
    format!("{{ Aggregate {{ {} {{ meta {{ count }} }} }} }}", collection)
}

/// Wrap a query string in the JSON body the endpoint expects
pub(crate) fn request_body(query: &str) -> String {
    serde_json::json!({ "query": query }).to_string()
}

/// Decode a GraphQL reply, surfacing reported errors
pub(crate) fn parse_response(body: &str) -> Result<Value> {
    let response: GraphQlResponse = serde_json::from_str(body)
        .map_err(|e| IndexError::RemoteRequest(format!("invalid GraphQL response: {}", e)))?;

    if let Some(errors) = response.errors.filter(|errors| !errors.is_empty()) {
        let message = errors.into_iter().map(|e| e.message).join("; ");
        return Err(IndexError::RemoteRequest(message));
    }

    response
        .data
        .ok_or_else(|| IndexError::RemoteRequest("GraphQL response has no data".to_string()))
}

/// Convert backend distances into the shared score semantics
pub(crate) fn score_from_distance(metric: Metric, distance: f32) -> (Score, Option<f32>) {
    match metric {
        Metric::Cosine => {
            let similarity = 1.0 - distance;
            (
                Score::Similarity(similarity),
                Some(certainty_from_cosine(similarity)),
            )
        }
        Metric::InnerProduct => (Score::Similarity(-distance), None),
        Metric::Euclidean => (Score::Distance(distance.max(0.0).sqrt()), None),
    }
}

fn get_rows(data: &Value, collection: &str) -> Result<Vec<RemoteHit>> {
    let rows = data
        .get("Get")
        .and_then(|get| get.get(collection))
        .filter(|rows| !rows.is_null())
        .cloned()
        .unwrap_or(Value::Array(Vec::new()));

    serde_json::from_value(rows)
        .map_err(|e| IndexError::RemoteRequest(format!("unexpected search result shape: {}", e)))
}

pub(crate) fn parse_hits(data: &Value, collection: &str, metric: Metric) -> Result<Vec<SearchHit>> {
    get_rows(data, collection)?
        .into_iter()
        .map(|row| {
            let distance = row.additional.distance.ok_or_else(|| {
                IndexError::RemoteRequest(format!(
                    "hit without distance (document {})",
                    row.record.document_id
                ))
            })?;
            let (score, computed_certainty) = score_from_distance(metric, distance);
            Ok(SearchHit {
                record: row.record,
                score,
                certainty: row.additional.certainty.or(computed_certainty),
                ordinal: None,
            })
        })
        .collect()
}

pub(crate) fn parse_records(data: &Value, collection: &str) -> Result<Vec<FlatRecord>> {
    Ok(get_rows(data, collection)?
        .into_iter()
        .map(|row| row.record)
        .collect())
}

pub(crate) fn parse_count(data: &Value, collection: &str) -> Result<usize> {
    data.get("Aggregate")
        .and_then(|aggregate| aggregate.get(collection))
        .and_then(|rows| rows.get(0))
        .and_then(|row| row.pointer("/meta/count"))
        .and_then(Value::as_u64)
        .and_then(|count| usize::try_from(count).ok())
        .ok_or_else(|| IndexError::RemoteRequest("aggregate response has no count".to_string()))
}
