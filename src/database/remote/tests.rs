use super::*;
use crate::database::{Filter, Score, Threshold};
use std::time::Duration;
use wiremock::{
    Mock, MockServer, Request, Respond, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

/// Acknowledges every object in a batch, failing the ones whose document id
/// contains `fail_marker` with a 500
struct BatchResponder {
    fail_marker: Option<&'static str>,
}

impl Respond for BatchResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = request.body_json().expect("batch body should be JSON");
        let objects = body["objects"].as_array().cloned().unwrap_or_default();

        let should_fail = self.fail_marker.is_some_and(|marker| {
            objects.iter().any(|o| {
                o["properties"]["document_id"]
                    .as_str()
                    .is_some_and(|id| id.contains(marker))
            })
        });
        if should_fail {
            return ResponseTemplate::new(500);
        }

        let results: Vec<Value> = objects
            .iter()
            .map(|o| json!({ "id": o["id"], "result": {} }))
            .collect();
        ResponseTemplate::new(200).set_body_json(results)
    }
}

fn record(id: &str) -> FlatRecord {
    FlatRecord {
        document_id: id.to_string(),
        repo_id: "r1".to_string(),
        repo_name: "Repo".to_string(),
        folder_id: "f1".to_string(),
        folder_name: "Folder".to_string(),
        title: format!("Title {}", id),
        author: None,
        tags: Some(vec!["rust".to_string()]),
        category: None,
        content: Some("body".to_string()),
        files_content: None,
    }
}

fn adapter(server: &MockServer, metric: Metric) -> RemoteIndexAdapter {
    let mut config = Config::default();
    config.embedding.embedding_dimension = 3;
    config.remote.host = server.address().ip().to_string();
    config.remote.port = server.address().port();
    config.remote.collection = "Document".to_string();
    config.remote.metric = metric;

    RemoteIndexAdapter::new(&config)
        .expect("should create adapter")
        .with_retry_attempts(1)
}

async fn request_bodies(server: &MockServer, request_path: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .expect("request recording should be enabled")
        .into_iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == request_path)
        .map(|r| r.body_json::<Value>().expect("body should be JSON"))
        .collect()
}

#[test]
fn object_ids_are_stable() {
    assert_eq!(
        RemoteIndexAdapter::object_id("doc-1"),
        RemoteIndexAdapter::object_id("doc-1")
    );
    assert_ne!(
        RemoteIndexAdapter::object_id("doc-1"),
        RemoteIndexAdapter::object_id("doc-2")
    );
}

#[test]
fn properties_leave_out_absent_fields() {
    let props = properties(&record("a"));
    assert_eq!(props["document_id"], json!("a"));
    assert_eq!(props["tags"], json!(["rust"]));
    assert!(!props.contains_key("author"));
    assert!(!props.contains_key("files_content"));
}

#[test]
fn remote_scores_match_local_semantics() {
    let (score, certainty) = graphql::score_from_distance(Metric::Cosine, 0.25);
    assert_eq!(score, Score::Similarity(0.75));
    assert_eq!(certainty, Some(0.875));

    let (score, _) = graphql::score_from_distance(Metric::InnerProduct, -3.0);
    assert_eq!(score, Score::Similarity(3.0));

    let (score, _) = graphql::score_from_distance(Metric::Euclidean, 9.0);
    assert_eq!(score, Score::Distance(3.0));
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_schema_drops_and_recreates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/schema"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "classes": [{ "class": "Document" }] })),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/schema/Document"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/schema"))
        .and(body_partial_json(json!({
            "class": "Document",
            "vectorizer": "none",
            "vectorIndexConfig": { "distance": "cosine" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    adapter(&server, Metric::Cosine)
        .reset_schema()
        .expect("should reset schema");

    let created = request_bodies(&server, "/v1/schema").await;
    let properties = created[0]["properties"]
        .as_array()
        .expect("should declare properties");
    assert_eq!(properties.len(), RecordField::ALL.len());
    assert!(properties.contains(&json!({ "name": "tags", "dataType": ["text[]"] })));
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_schema_skips_delete_for_new_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/schema"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "classes": [] })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/schema"))
        .and(body_partial_json(json!({
            "vectorIndexConfig": { "distance": "l2-squared" }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    adapter(&server, Metric::Euclidean)
        .reset_schema()
        .expect("should reset schema");
}

#[tokio::test(flavor = "multi_thread")]
async fn add_skips_missing_vectors_and_reports_rejections() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/batch/objects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "result": {} },
            { "result": { "errors": { "error": [{ "message": "invalid tags" }] } } }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let records = [record("a"), record("b"), record("c")];
    let vectors = [vec![1.0, 0.0, 0.0], Vec::new(), vec![0.0, 1.0, 0.0]];
    let report = adapter(&server, Metric::Cosine)
        .add(&records, &vectors)
        .expect("should insert");

    assert_eq!(report.attempted, 3);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].ordinal, 1);
    assert_eq!(report.skipped[0].kind, RowFailureKind::MissingVector);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].document_id, "c");
    assert_eq!(report.failed[0].kind, RowFailureKind::Rejected);
    assert_eq!(report.failed[0].message, "invalid tags");
    assert_eq!(report.unsuccessful_ordinals(), vec![1, 2]);

    let bodies = request_bodies(&server, "/v1/batch/objects").await;
    let objects = bodies[0]["objects"].as_array().expect("should send objects");
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0]["class"], json!("Document"));
    assert_eq!(
        objects[0]["id"],
        json!(RemoteIndexAdapter::object_id("a").to_string())
    );
    assert_eq!(objects[1]["vector"], json!([0.0, 1.0, 0.0]));
}

#[tokio::test(flavor = "multi_thread")]
async fn add_rejects_wrong_dimension_before_sending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(BatchResponder { fail_marker: None })
        .expect(0)
        .mount(&server)
        .await;

    let result = adapter(&server, Metric::Cosine).add(
        &[record("a"), record("b")],
        &[vec![1.0, 0.0, 0.0], vec![1.0, 0.0]],
    );
    assert!(matches!(
        result,
        Err(IndexError::DimensionMismatch { row: 1, .. })
    ));

    let arity = adapter(&server, Metric::Cosine).add(&[record("a")], &[]);
    assert!(matches!(arity, Err(IndexError::ArityMismatch { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn add_sends_chunks_and_continues_after_failed_chunk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/batch/objects"))
        .respond_with(BatchResponder {
            fail_marker: Some("bad"),
        })
        .expect(3)
        .mount(&server)
        .await;

    let records = [record("a"), record("b"), record("bad-1"), record("d"), record("e")];
    let vectors = vec![vec![0.5, 0.5, 0.0]; 5];
    let report = adapter(&server, Metric::Cosine)
        .with_batch_size(2)
        .add(&records, &vectors)
        .expect("should insert");

    // Chunks: [a, b] ok, [bad-1, d] fails as a unit, [e] ok
    assert_eq!(report.inserted, 3);
    assert_eq!(report.failed.len(), 2);
    assert!(
        report
            .failed
            .iter()
            .all(|f| f.kind == RowFailureKind::Request)
    );
    assert_eq!(report.unsuccessful_ordinals(), vec![2, 3]);

    let (retry_records, _) = report.resubmission(&records, &vectors);
    let retry_ids: Vec<&str> = retry_records
        .iter()
        .map(|r| r.document_id.as_str())
        .collect();
    assert_eq!(retry_ids, vec!["bad-1", "d"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_batch_is_reported_as_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/batch/objects"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "result": {} }]))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let report = adapter(&server, Metric::Cosine)
        .with_timeout(Duration::from_millis(200))
        .add(&[record("a")], &[vec![1.0, 0.0, 0.0]])
        .expect("per-row failures do not fail the call");

    assert_eq!(report.inserted, 0);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].kind, RowFailureKind::Timeout);
}

#[tokio::test(flavor = "multi_thread")]
async fn search_pushes_filter_and_normalizes_scores() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "Get": { "Document": [
                {
                    "document_id": "a",
                    "repo_id": "r1",
                    "repo_name": "Repo",
                    "folder_id": "f1",
                    "folder_name": "Folder",
                    "title": "Title a",
                    "author": null,
                    "tags": ["rust"],
                    "category": null,
                    "content": "body",
                    "files_content": null,
                    "_additional": { "id": "x", "distance": 0.25, "certainty": 0.875 }
                },
                {
                    "document_id": "b",
                    "repo_id": "r1",
                    "repo_name": "Repo",
                    "folder_id": "f1",
                    "folder_name": "Folder",
                    "title": "Title b",
                    "_additional": { "id": "y", "distance": 0.5 }
                }
            ] } }
        })))
        .mount(&server)
        .await;

    let filter = Filter::equals(RecordField::RepoId, "r1");
    let query = [1.0, 0.0, 0.0];
    let request = SearchRequest::new(&query, 5)
        .with_filter(Some(&filter))
        .with_threshold(Some(Threshold::Certainty(0.7)));
    let hits = adapter(&server, Metric::Cosine)
        .search(&request)
        .expect("should search");

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record, record("a"));
    assert_eq!(hits[0].score, Score::Similarity(0.75));
    assert_eq!(hits[0].certainty, Some(0.875));
    assert_eq!(hits[0].ordinal, None);
    assert_eq!(hits[1].record.tags, None);
    assert_eq!(hits[1].certainty, Some(0.75));

    let bodies = request_bodies(&server, "/v1/graphql").await;
    let sent = bodies[0]["query"].as_str().expect("should send a query");
    assert!(sent.contains("Document(limit: 5"), "{sent}");
    assert!(sent.contains("nearVector: {vector: [1, 0, 0], certainty: 0.7}"), "{sent}");
    assert!(
        sent.contains(r#"where: {operator: Equal, path: ["repo_id"], valueText: "r1"}"#),
        "{sent}"
    );
    assert!(sent.contains("_additional { id distance certainty }"), "{sent}");
}

#[tokio::test(flavor = "multi_thread")]
async fn euclidean_search_squares_distance_bound() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": { "Get": { "Document": null } } })),
        )
        .mount(&server)
        .await;

    let query = [0.0, 0.0, 1.0];
    let request =
        SearchRequest::new(&query, 3).with_threshold(Some(Threshold::Distance(2.0)));
    let hits = adapter(&server, Metric::Euclidean)
        .search(&request)
        .expect("should search");
    assert!(hits.is_empty());

    let bodies = request_bodies(&server, "/v1/graphql").await;
    let sent = bodies[0]["query"].as_str().expect("should send a query");
    assert!(sent.contains("distance: 4}"), "{sent}");
}

#[tokio::test(flavor = "multi_thread")]
async fn certainty_on_dot_product_is_rejected_locally() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let query = [1.0, 0.0, 0.0];
    let request =
        SearchRequest::new(&query, 3).with_threshold(Some(Threshold::Certainty(0.5)));
    assert!(matches!(
        adapter(&server, Metric::InnerProduct).search(&request),
        Err(IndexError::UnsupportedMetric(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn graphql_errors_surface_as_request_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{ "message": "Cannot query field \"Document\"" }]
        })))
        .mount(&server)
        .await;

    let query = [1.0, 0.0, 0.0];
    let result = adapter(&server, Metric::Cosine).search(&SearchRequest::new(&query, 3));
    match result {
        Err(IndexError::RemoteRequest(message)) => {
            assert!(message.contains("Cannot query field"), "{message}");
        }
        other => panic!("expected a remote request error, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_search_is_a_timeout_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": { "Get": { "Document": [] } } }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let query = [1.0, 0.0, 0.0];
    let result = adapter(&server, Metric::Cosine)
        .with_timeout(Duration::from_millis(200))
        .search(&SearchRequest::new(&query, 3));

    assert!(matches!(result, Err(IndexError::RemoteTimeout { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .respond_with(ResponseTemplate::new(422))
        .expect(1)
        .mount(&server)
        .await;

    let query = [1.0, 0.0, 0.0];
    let result = adapter(&server, Metric::Cosine)
        .with_retry_attempts(3)
        .search(&SearchRequest::new(&query, 3));

    match result {
        Err(IndexError::RemoteRequest(message)) => assert!(message.contains("422"), "{message}"),
        other => panic!("expected a remote request error, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn count_reads_aggregate_meta() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "Aggregate": { "Document": [{ "meta": { "count": 42 } }] } }
        })))
        .mount(&server)
        .await;

    let backend: Box<dyn IndexBackend> = Box::new(adapter(&server, Metric::Cosine));
    assert_eq!(backend.count().expect("should count"), 42);
    assert_eq!(backend.name(), "remote");
}

#[tokio::test(flavor = "multi_thread")]
async fn hit_without_distance_is_a_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "Get": { "Document": [
                {
                    "document_id": "a",
                    "repo_id": "r1",
                    "repo_name": "Repo",
                    "folder_id": "f1",
                    "folder_name": "Folder",
                    "title": "Title a",
                    "_additional": { "id": "x" }
                }
            ] } }
        })))
        .mount(&server)
        .await;

    let query = [1.0, 0.0, 0.0];
    let result = adapter(&server, Metric::Cosine).search(&SearchRequest::new(&query, 3));
    match result {
        Err(IndexError::RemoteRequest(message)) => {
            assert!(message.contains("hit without distance"), "{message}");
        }
        other => panic!("expected a request error, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn filter_search_sends_where_without_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "Get": { "Document": [
                {
                    "document_id": "a",
                    "repo_id": "r1",
                    "repo_name": "Repo",
                    "folder_id": "f1",
                    "folder_name": "Folder",
                    "title": "Title a",
                    "tags": ["rust"],
                    "content": "body",
                    "_additional": { "id": "x" }
                }
            ] } }
        })))
        .mount(&server)
        .await;

    let filter = Filter::equals(RecordField::Tags, "rust");
    let records = adapter(&server, Metric::Cosine)
        .filter_search(&filter, 4)
        .expect("should filter");

    assert_eq!(records, vec![record("a")]);

    let bodies = request_bodies(&server, "/v1/graphql").await;
    let sent = bodies[0]["query"].as_str().expect("should send a query");
    assert!(
        sent.contains(
            r#"Document(limit: 4, where: {operator: ContainsAny, path: ["tags"], valueText: ["rust"]})"#
        ),
        "{sent}"
    );
    assert!(!sent.contains("nearVector"), "{sent}");
    assert!(sent.contains("_additional { id }"), "{sent}");
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_filters_are_rejected_before_sending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let adapter = adapter(&server, Metric::Cosine);

    let empty = Filter::And(Vec::new());
    assert!(matches!(
        adapter.filter_search(&empty, 3),
        Err(IndexError::Config(_))
    ));

    let no_values = Filter::contains_any(RecordField::Tags, Vec::<String>::new());
    let query = [1.0, 0.0, 0.0];
    let request = SearchRequest::new(&query, 3).with_filter(Some(&no_values));
    assert!(matches!(adapter.search(&request), Err(IndexError::Config(_))));
}
