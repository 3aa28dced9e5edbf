//! Retrieval engine properties over the in-memory and HTTP backends.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use daa_core::{
    BackendKind, Corpus, DaaError, InMemoryIndex, RetrievalConfig, RetrievalEngine,
};

fn sample_index() -> InMemoryIndex {
    let mut index = InMemoryIndex::new();
    let regulation = [
        "Students must register for courses before the registration deadline of each term",
        "A student who fails a course must retake it and pay the retake tuition",
        "Credit transfer requires approval from the faculty and the training office",
        "Graduation requires completing all required credits with a GPA of at least 2.0",
        "Tuition is charged per registered credit and must be paid before mid-term",
        "Students on academic probation may register at most 14 credits per term",
    ];
    for (i, text) in regulation.iter().enumerate() {
        index.insert("regulation", format!("reg-{}", i / 2), (i % 2) as u32, *text, format!("Article {}", i + 1));
    }
    index.insert("curriculum/cs", "cs-2023", 0, "Computer science majors take data structures in year two", "CS 2023");
    index.insert("curriculum/cs", "cs-2023", 1, "Elective credits for computer science include machine learning", "CS 2023");
    index.insert("curriculum/ee", "ee-2023", 0, "Electrical engineering majors take circuit analysis credits", "EE 2023");
    index
}

fn engine_with(index: InMemoryIndex) -> RetrievalEngine {
    RetrievalEngine::new(Arc::new(index), RetrievalConfig::default())
}

#[tokio::test]
async fn results_are_bounded_and_ordered() {
    let engine = engine_with(sample_index());
    let cancel = CancellationToken::new();

    for top_k in [1, 2, 3, 10] {
        let hits = engine
            .retrieve("register credits per term", &Corpus::Regulation, top_k, &cancel)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits.len() <= top_k);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|c| c.corpus_id == "regulation"));
    }
}

#[tokio::test]
async fn retrieval_is_deterministic() {
    let cancel = CancellationToken::new();
    let a = engine_with(sample_index())
        .retrieve("tuition credit", &Corpus::Regulation, 4, &cancel)
        .await
        .unwrap();
    let b = engine_with(sample_index())
        .retrieve("  TUITION   credit ", &Corpus::Regulation, 4, &cancel)
        .await
        .unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn curriculum_scoped_to_major() {
    let engine = engine_with(sample_index());
    let cancel = CancellationToken::new();

    let cs = engine
        .retrieve(
            "credits",
            &Corpus::Curriculum { major: Some("cs".to_string()) },
            5,
            &cancel,
        )
        .await
        .unwrap();
    assert!(!cs.is_empty());
    assert!(cs.iter().all(|c| c.corpus_id == "curriculum/cs"));

    let all = engine
        .retrieve("credits", &Corpus::Curriculum { major: None }, 5, &cancel)
        .await
        .unwrap();
    assert!(all.iter().any(|c| c.corpus_id == "curriculum/ee"));
    assert!(all.iter().all(|c| c.corpus_id.starts_with("curriculum/")));
}

#[tokio::test]
async fn no_match_is_empty_not_error() {
    let engine = engine_with(sample_index());
    let hits = engine
        .retrieve("quantum chromodynamics", &Corpus::Regulation, 5, &CancellationToken::new())
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let engine = engine_with(sample_index());
    let cancel = CancellationToken::new();

    let empty = engine.retrieve("   ", &Corpus::Regulation, 5, &cancel).await;
    assert!(matches!(empty, Err(DaaError::InvalidInput(_))));

    let zero = engine.retrieve("tuition", &Corpus::Regulation, 0, &cancel).await;
    assert!(matches!(zero, Err(DaaError::InvalidInput(_))));

    let too_many = engine.retrieve("tuition", &Corpus::Regulation, 51, &cancel).await;
    assert!(matches!(too_many, Err(DaaError::InvalidInput(_))));
}

#[tokio::test]
async fn repeated_query_is_served_from_cache() {
    let engine = engine_with(sample_index());
    let cancel = CancellationToken::new();

    let first = engine.retrieve("tuition", &Corpus::Regulation, 3, &cancel).await.unwrap();
    assert_eq!(engine.cache_len(), 1);
    let second = engine.retrieve("Tuition", &Corpus::Regulation, 3, &cancel).await.unwrap();
    assert_eq!(engine.cache_len(), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn from_config_loads_corpus_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("regulation.json"),
        json!({
            "corpus": "regulation",
            "chunks": [
                {"doc_id": "qc-2021", "offset": 0, "text": "Exam retake rules for failed courses", "source": "Article 20"},
                {"doc_id": "qc-2021", "offset": 1, "text": "Scholarship rules for top students", "source": "Article 31"}
            ]
        })
        .to_string(),
    )
    .unwrap();

    let engine = RetrievalEngine::from_config(RetrievalConfig {
        corpus_dir: dir.path().to_path_buf(),
        ..RetrievalConfig::default()
    })
    .unwrap();
    assert_eq!(engine.backend_name(), "memory");

    let hits = engine
        .retrieve("retake exam", &Corpus::Regulation, 1, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source, "Article 20");
}

#[tokio::test]
async fn http_backend_candidates_are_reranked() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(body_partial_json(json!({"query": "credit transfer", "corpus": "regulation"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [
                {"corpus_id": "regulation", "doc_id": "b", "offset": 0, "text": "low", "score": 0.2, "source": "B"},
                {"corpus_id": "regulation", "doc_id": "a", "offset": 2, "text": "high", "score": 0.9, "source": "A"},
                {"corpus_id": "curriculum/cs", "doc_id": "x", "offset": 0, "text": "foreign", "score": 0.99, "source": "X"},
                {"corpus_id": "regulation", "doc_id": "a", "offset": 1, "text": "tie", "score": 0.2, "source": "A"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = RetrievalEngine::from_config(RetrievalConfig {
        backend: BackendKind::Http,
        endpoint: Some(server.uri()),
        ..RetrievalConfig::default()
    })
    .unwrap();

    let hits = engine
        .retrieve("Credit  transfer", &Corpus::Regulation, 2, &CancellationToken::new())
        .await
        .unwrap();
    let order: Vec<(&str, u32)> = hits.iter().map(|c| (c.doc_id.as_str(), c.offset)).collect();
    assert_eq!(order, vec![("a", 2), ("a", 1)]);
}

#[tokio::test]
async fn http_backend_failure_is_retrieval_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let engine = RetrievalEngine::from_config(RetrievalConfig {
        backend: BackendKind::Http,
        endpoint: Some(server.uri()),
        ..RetrievalConfig::default()
    })
    .unwrap();
    let err = engine
        .retrieve("anything", &Corpus::Regulation, 3, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DaaError::Retrieval(_)));
}

#[tokio::test]
async fn cancelled_retrieval_returns_promptly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"candidates": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let engine = RetrievalEngine::from_config(RetrievalConfig {
        backend: BackendKind::Http,
        endpoint: Some(server.uri()),
        ..RetrievalConfig::default()
    })
    .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine
        .retrieve("anything", &Corpus::Regulation, 3, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, DaaError::Cancelled));
}
