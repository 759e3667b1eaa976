use super::*;
use crate::database::VectorStore;
use std::sync::atomic::{AtomicUsize, Ordering};

/// "north" points up, anything else points right
struct CompassPort {
    calls: AtomicUsize,
}

impl EmbeddingPort for CompassPort {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text == "north" {
            Ok(vec![0.0, 1.0])
        } else {
            Ok(vec![1.0, 0.0])
        }
    }
}

fn record(id: &str, category: Option<&str>, tags: Option<&[&str]>) -> FlatRecord {
    FlatRecord {
        document_id: id.to_string(),
        repo_id: "r1".to_string(),
        repo_name: "Repo".to_string(),
        folder_id: "f1".to_string(),
        folder_name: "Folder".to_string(),
        title: format!("Title {}", id),
        author: None,
        tags: tags.map(|tags| tags.iter().map(|t| t.to_string()).collect()),
        category: category.map(str::to_string),
        content: None,
        files_content: None,
    }
}

fn store() -> Arc<VectorStore> {
    let store = VectorStore::new(2, Metric::Cosine).expect("should create store");
    store
        .build(
            &[
                record("up", Some("a"), Some(&["x"])),
                record("diag", Some("b"), None),
                record("right", Some("a"), Some(&["y"])),
            ],
            &[vec![0.0, 3.0], vec![1.0, 1.0], vec![2.0, 0.0]],
        )
        .expect("should build");
    Arc::new(store)
}

fn engine() -> QueryEngine {
    QueryEngine::new(store()).with_embedder(Arc::new(CompassPort {
        calls: AtomicUsize::new(0),
    }))
}

#[test]
fn text_queries_are_embedded_and_ranked() {
    let hits = engine()
        .query(QueryInput::Text("north"), &QueryOptions::new(3))
        .expect("should query");

    let ids: Vec<&str> = hits.iter().map(|h| h.document_id.as_str()).collect();
    assert_eq!(ids, vec!["up", "diag", "right"]);
    let ranks: Vec<usize> = hits.iter().map(|h| h.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
    let score = hits[0].score.expect("similarity hits carry a score");
    assert!((score.value() - 1.0).abs() < 1e-6);
    assert!(matches!(score, Score::Similarity(_)));
}

#[test]
fn vector_queries_skip_the_embedder() {
    let port = Arc::new(CompassPort {
        calls: AtomicUsize::new(0),
    });
    let engine = QueryEngine::new(store()).with_embedder(port.clone());

    let hits = engine
        .query(QueryInput::Vector(&[1.0, 0.0]), &QueryOptions::new(1))
        .expect("should query");

    assert_eq!(hits[0].document_id, "right");
    assert_eq!(port.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn text_without_embedder_is_a_config_error() {
    let engine = QueryEngine::new(store());
    assert!(matches!(
        engine.query(QueryInput::Text("north"), &QueryOptions::default()),
        Err(IndexError::Config(_))
    ));
}

#[test]
fn mismatched_metric_is_rejected() {
    let options = QueryOptions::new(3).with_metric(Metric::Euclidean);
    assert!(matches!(
        engine().query(QueryInput::Vector(&[1.0, 0.0]), &options),
        Err(IndexError::UnsupportedMetric(_))
    ));

    let options = QueryOptions::new(3).with_metric(Metric::Cosine);
    assert!(engine().query(QueryInput::Vector(&[1.0, 0.0]), &options).is_ok());
}

#[test]
fn filter_is_applied_before_top_k() {
    let options = QueryOptions::new(1).with_filter(Filter::equals(RecordField::Category, "a"));

    let hits = engine()
        .query(QueryInput::Text("diagonal-ish"), &options)
        .expect("should query");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, "right");
}

#[test]
fn requested_fields_shape_the_metadata() {
    let options = QueryOptions::new(3).with_fields(vec![RecordField::Title, RecordField::Tags]);

    let hits = engine()
        .query(QueryInput::Text("north"), &options)
        .expect("should query");

    let keys: Vec<&str> = hits[0].metadata.keys().map(String::as_str).collect();
    assert_eq!(keys.len(), 2);
    assert_eq!(hits[0].metadata["title"], Value::String("Title up".to_string()));
    assert_eq!(hits[0].metadata["tags"], serde_json::json!(["x"]));
    assert_eq!(hits[1].metadata["tags"], Value::Null);
}

#[test]
fn all_fields_by_default() {
    let hits = engine()
        .query(QueryInput::Text("north"), &QueryOptions::new(1))
        .expect("should query");

    assert_eq!(hits[0].metadata.len(), RecordField::ALL.len());
    assert_eq!(hits[0].metadata["content"], Value::Null);
}

#[test]
fn certainty_threshold_limits_hits() {
    let options = QueryOptions::new(3).with_threshold(Threshold::Certainty(0.8));

    let hits = engine()
        .query(QueryInput::Text("north"), &options)
        .expect("should query");

    let ids: Vec<&str> = hits.iter().map(|h| h.document_id.as_str()).collect();
    assert_eq!(ids, vec!["up", "diag"]);
    assert!(hits.iter().all(|h| h.certainty.is_some()));
}

#[test]
fn zero_top_k_returns_nothing() {
    let hits = engine()
        .query(QueryInput::Text("north"), &QueryOptions::new(0))
        .expect("should query");
    assert!(hits.is_empty());
}

#[test]
fn unloaded_store_error_propagates() {
    let empty = VectorStore::new(2, Metric::Cosine).expect("should create store");
    let engine = QueryEngine::new(Arc::new(empty));

    assert!(matches!(
        engine.query(QueryInput::Vector(&[1.0, 0.0]), &QueryOptions::default()),
        Err(IndexError::NotLoaded)
    ));
    assert!(matches!(
        engine.query(QueryInput::Vector(&[1.0, 0.0]), &QueryOptions::new(0)),
        Err(IndexError::NotLoaded)
    ));
    let options = QueryOptions::new(0).with_filter(Filter::equals(RecordField::Category, "a"));
    assert!(matches!(engine.filter(&options), Err(IndexError::NotLoaded)));
}

#[test]
fn hits_serialize_with_score_kind() {
    let hits = engine()
        .query(QueryInput::Text("north"), &QueryOptions::new(1))
        .expect("should query");

    let json = serde_json::to_value(&hits[0]).expect("should serialize");
    assert_eq!(json["rank"], 1);
    assert_eq!(json["document_id"], "up");
    assert_eq!(json["score"]["kind"], "similarity");
}

#[test]
fn filter_only_returns_matches_in_index_order() {
    let options = QueryOptions::new(10).with_filter(Filter::equals(RecordField::Category, "a"));

    let hits = engine().filter(&options).expect("should filter");

    let ids: Vec<&str> = hits.iter().map(|h| h.document_id.as_str()).collect();
    assert_eq!(ids, vec!["up", "right"]);
    let ranks: Vec<usize> = hits.iter().map(|h| h.rank).collect();
    assert_eq!(ranks, vec![1, 2]);
    assert!(hits.iter().all(|h| h.score.is_none() && h.certainty.is_none()));

    let json = serde_json::to_value(&hits[0]).expect("should serialize");
    assert!(json.get("score").is_none());
}

#[test]
fn filter_only_respects_top_k_and_fields() {
    let options = QueryOptions::new(1)
        .with_filter(Filter::equals(RecordField::Category, "a"))
        .with_fields(vec![RecordField::Tags]);

    let hits = engine().filter(&options).expect("should filter");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, "up");
    assert_eq!(hits[0].metadata.len(), 1);
    assert_eq!(hits[0].metadata["tags"], serde_json::json!(["x"]));
}

#[test]
fn filter_only_needs_a_filter_and_no_threshold() {
    assert!(matches!(
        engine().filter(&QueryOptions::new(3)),
        Err(IndexError::Config(_))
    ));

    let options = QueryOptions::new(3)
        .with_filter(Filter::equals(RecordField::Category, "a"))
        .with_threshold(Threshold::Certainty(0.5));
    assert!(matches!(engine().filter(&options), Err(IndexError::Config(_))));

    let options = QueryOptions::new(3)
        .with_filter(Filter::equals(RecordField::Category, "a"))
        .with_metric(Metric::Euclidean);
    assert!(matches!(
        engine().filter(&options),
        Err(IndexError::UnsupportedMetric(_))
    ));
}
