use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Value, json};
use skillsearch::{
    Config,
    Embedder,
    Error,
    RecordId,
    Registry,
    ResourceFactory,
    Result,
    SearchService,
    SparseEncoderCache,
    VectorIndex,
    embedding::normalize,
    keywords::{KeywordRequest, TextGenerator},
    sparse::{term_index, tokenize},
    validate,
    vector_index::{Metadata, QueryMatch, QueryRequest, VectorRecord},
};

const DIM: usize = 256;

/// Bag-of-terms embedding: texts sharing analyzed terms are similar.
struct HashEmbedder;

fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIM];
    for token in tokenize(text) {
        vector[term_index(&token) as usize % DIM] += 1.0;
    }
    normalize(&mut vector);
    vector
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        "hash-embedder"
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
}

/// An index held in memory, scoring by dense plus sparse dot product.
#[derive(Default)]
struct MemoryIndex {
    records: Mutex<HashMap<(String, String), VectorRecord>>,
    canned: Mutex<Option<Vec<QueryMatch>>>,
    requests: Mutex<Vec<QueryRequest>>,
    upsert_calls: AtomicUsize,
    fail: AtomicBool,
}

impl MemoryIndex {
    fn respond_with(&self, matches: Vec<QueryMatch>) {
        *self.canned.lock().unwrap() = Some(matches);
    }

    fn query_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> QueryRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }

    fn stored_texts(&self, namespace: &str) -> Vec<String> {
        let mut texts: Vec<String> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, r)| r.metadata["context"].as_str().unwrap().to_string())
            .collect();
        texts.sort();
        texts
    }

    fn check_failure(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Remote {
                service: "pinecone",
                message: "HTTP 503 Service Unavailable".into(),
                retryable: true,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn query(&self, request: &QueryRequest) -> Result<Vec<QueryMatch>> {
        self.check_failure()?;
        self.requests.lock().unwrap().push(request.clone());

        if let Some(canned) = self.canned.lock().unwrap().clone() {
            return Ok(canned.into_iter().take(request.top_k).collect());
        }

        let mut scored: Vec<QueryMatch> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| *ns == request.namespace)
            .map(|(_, record)| {
                let dense: f32 = record
                    .values
                    .iter()
                    .zip(&request.vector)
                    .map(|(a, b)| a * b)
                    .sum();
                let sparse = match (&record.sparse_values, &request.sparse_vector) {
                    (Some(doc), Some(query)) => doc.dot(query),
                    _ => 0.0,
                };
                QueryMatch {
                    id: record.id.clone(),
                    score: Some(dense + sparse),
                    metadata: record.metadata.clone(),
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        scored.truncate(request.top_k);
        Ok(scored)
    }

    async fn upsert(
        &self,
        namespace: &str,
        records: &[VectorRecord],
    ) -> Result<usize> {
        self.check_failure()?;
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.records.lock().unwrap();
        for record in records {
            stored.insert(
                (namespace.to_string(), record.id.clone()),
                record.clone(),
            );
        }
        Ok(records.len())
    }
}

struct FakeFactory {
    index: Arc<MemoryIndex>,
    embedder_builds: AtomicUsize,
    build_delay: Duration,
}

#[async_trait]
impl ResourceFactory for FakeFactory {
    async fn embedder(&self, _: &Config) -> Result<Arc<dyn Embedder>> {
        self.embedder_builds.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.build_delay).await;
        Ok(Arc::new(HashEmbedder))
    }

    async fn index(
        &self,
        _: &Config,
        _: &str,
    ) -> Result<Arc<dyn VectorIndex>> {
        let index: Arc<dyn VectorIndex> = self.index.clone();
        Ok(index)
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    index: Arc<MemoryIndex>,
    factory: Arc<FakeFactory>,
    registry: Arc<Registry>,
    service: SearchService,
}

fn harness_with(configure: impl FnOnce(&mut Config), delay: Duration) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let snapshot = tmp.path().join("bm25_encoder.json");

    let mut config = Config::new(snapshot.clone());
    config.pinecone_api_key = Some("test-key".into());
    configure(&mut config);

    let index = Arc::new(MemoryIndex::default());
    let factory = Arc::new(FakeFactory {
        index: index.clone(),
        embedder_builds: AtomicUsize::new(0),
        build_delay: delay,
    });
    let registry = Arc::new(Registry::new(
        config,
        factory.clone(),
        SparseEncoderCache::new(snapshot),
    ));
    let service = SearchService::new(registry.clone());

    Harness {
        _tmp: tmp,
        index,
        factory,
        registry,
        service,
    }
}

fn harness() -> Harness {
    harness_with(|_| {}, Duration::ZERO)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn metadata(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

fn matched(id: &str, score: Option<f32>, meta: Value) -> QueryMatch {
    QueryMatch {
        id: id.into(),
        score,
        metadata: metadata(meta),
    }
}

#[tokio::test]
async fn upserted_text_is_retrieved() {
    let h = harness();
    let stored = h
        .service
        .upsert(&strings(&[
            "guitar chords for beginners",
            "sourdough bread baking",
            "rust async programming",
        ]))
        .await
        .unwrap();
    assert!(stored);

    let found = h.service.retrieve(&strings(&["guitar chords"])).await.unwrap();
    assert_eq!(found, vec!["guitar chords for beginners"]);

    let request = h.index.last_request();
    assert_eq!(request.top_k, 4);
    assert!(request.sparse_vector.is_some());
}

#[tokio::test]
async fn retrieve_applies_strict_threshold_and_keeps_unscored() {
    let h = harness();
    h.index.respond_with(vec![
        matched("a", Some(0.9), json!({ "context": "high" })),
        matched("b", Some(0.3), json!({ "context": "edge" })),
        matched("c", None, json!({ "context": "unscored" })),
        matched("d", Some(0.1), json!({ "context": "low" })),
    ]);

    let found = h.service.retrieve(&strings(&["anything"])).await.unwrap();
    assert_eq!(found, vec!["high", "unscored"]);

    let found = h
        .service
        .retrieve_with_threshold(&strings(&["anything"]), 0.05)
        .await
        .unwrap();
    assert_eq!(found, vec!["high", "edge", "unscored", "low"]);
}

#[tokio::test]
async fn queries_are_joined_with_commas() {
    let h = harness();
    h.index.respond_with(vec![]);
    h.service
        .retrieve(&strings(&["guitar", "piano"]))
        .await
        .unwrap();

    let expected = embed_text("guitar,piano");
    let sent: Vec<f32> = h.index.last_request().vector;
    let scaled: Vec<f32> = expected.iter().map(|v| v * 0.5).collect();
    assert_eq!(sent, scaled);
}

#[tokio::test]
async fn invalid_input_makes_no_remote_call() {
    let h = harness();

    assert!(matches!(
        h.service.retrieve(&[]).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        validate::string_list(&json!(["guitar", 42]), "queries"),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        h.service.query_keywords(&[], 0.0, "").await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        h.service.search_keywords(&[], 5, 0.5, "").await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        h.service.upsert(&[]).await,
        Err(Error::Validation(_))
    ));

    assert_eq!(h.factory.embedder_builds.load(Ordering::SeqCst), 0);
    assert_eq!(h.index.query_count(), 0);
    assert_eq!(h.index.upsert_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn blank_combined_query_skips_search() {
    let h = harness();
    let found = h.service.retrieve(&strings(&[" ", ""])).await.unwrap();
    assert!(found.is_empty());
    assert!(!h.registry.is_initialized());
    assert_eq!(h.index.query_count(), 0);
}

#[tokio::test]
async fn query_keywords_deduplicates() {
    let h = harness();
    h.index.respond_with(vec![
        matched("a", Some(0.9), json!({ "text": "rust" })),
        matched("b", Some(0.8), json!({ "content": "rust" })),
        matched("c", Some(0.7), json!({ "page_content": "tokio" })),
    ]);

    let mut found = h
        .service
        .query_keywords(&strings(&["systems"]), 0.0, "")
        .await
        .unwrap();
    found.sort();
    assert_eq!(found, vec!["rust", "tokio"]);

    let request = h.index.last_request();
    assert_eq!(request.top_k, 100);
    assert!(request.sparse_vector.is_none());
    assert!(!request.include_values);
}

#[tokio::test]
async fn search_keywords_keeps_first_seen_order() {
    let h = harness();
    h.index.respond_with(vec![
        matched("a", Some(0.9), json!({ "text": "bread" })),
        matched("b", Some(0.8), json!({ "text": "pasta" })),
        matched("c", Some(0.7), json!({ "content": "bread" })),
        matched("d", Some(0.6), json!({ "text": "soup" })),
    ]);

    let found = h
        .service
        .search_keywords(&strings(&["cooking"]), 5, 0.5, "")
        .await
        .unwrap();
    assert_eq!(found, vec!["bread", "pasta", "soup"]);
}

#[tokio::test]
async fn extraction_policies_differ() {
    let h = harness();
    h.index.respond_with(vec![
        matched("a", Some(0.9), json!({ "content": "x" })),
        matched("b", Some(0.9), json!({ "context": "only context" })),
    ]);

    let searched = h
        .service
        .search_keywords(&strings(&["x"]), 5, 0.5, "")
        .await
        .unwrap();
    assert_eq!(searched, vec!["x"]);

    let mut queried = h
        .service
        .query_keywords(&strings(&["x"]), 0.0, "")
        .await
        .unwrap();
    queried.sort();
    assert_eq!(queried, vec!["only context", "x"]);
}

#[tokio::test]
async fn direct_thresholds_are_inclusive_and_missing_score_is_zero() {
    let h = harness();
    h.index.respond_with(vec![
        matched("a", Some(0.5), json!({ "text": "edge" })),
        matched("b", Some(0.4), json!({ "text": "below" })),
        matched("c", None, json!({ "text": "unscored" })),
    ]);

    let searched = h
        .service
        .search_keywords(&strings(&["k"]), 5, 0.5, "")
        .await
        .unwrap();
    assert_eq!(searched, vec!["edge"]);

    let mut queried = h
        .service
        .query_keywords(&strings(&["k"]), 0.0, "")
        .await
        .unwrap();
    queried.sort();
    assert_eq!(queried, vec!["below", "edge", "unscored"]);
}

#[tokio::test]
async fn direct_queries_use_given_namespace() {
    let h = harness();
    h.index.respond_with(vec![]);
    h.service
        .search_keywords(&strings(&[" rust ", "", "tokio"]), 3, 0.5, "skills")
        .await
        .unwrap();

    let request = h.index.last_request();
    assert_eq!(request.namespace, "skills");
    assert_eq!(request.top_k, 3);
    assert_eq!(request.vector, embed_text("rust tokio"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_calls_build_once() {
    let h = harness_with(|_| {}, Duration::from_millis(50));
    h.index.respond_with(vec![]);

    let (guitar, piano) = (strings(&["guitar"]), strings(&["piano"]));
    let (a, b) = tokio::join!(
        h.service.retrieve(&guitar),
        h.service.search_keywords(&piano, 5, 0.5, ""),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(h.factory.embedder_builds.load(Ordering::SeqCst), 1);
    let first = h.registry.get_or_init().await.ok().unwrap();
    let second = h.registry.get_or_init().await.ok().unwrap();
    assert!(Arc::ptr_eq(&first.encoder, &second.encoder));
    assert!(Arc::ptr_eq(&first.embedder, &second.embedder));
}

#[tokio::test]
async fn missing_api_key_is_surfaced_not_degraded() {
    let h = harness_with(|c| c.pinecone_api_key = None, Duration::ZERO);

    for _ in 0..2 {
        assert!(matches!(
            h.service.retrieve(&strings(&["guitar"])).await,
            Err(Error::Config(_))
        ));
        assert!(matches!(
            h.service.upsert(&strings(&["guitar"])).await,
            Err(Error::Config(_))
        ));
    }
    assert_eq!(h.factory.embedder_builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn remote_failures_degrade_to_empty() {
    let h = harness();
    h.index.fail.store(true, Ordering::SeqCst);

    assert!(h.service.retrieve(&strings(&["guitar"])).await.unwrap().is_empty());
    assert!(
        h.service
            .query_keywords(&strings(&["guitar"]), 0.0, "")
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        h.service
            .search_keywords(&strings(&["guitar"]), 5, 0.5, "")
            .await
            .unwrap()
            .is_empty()
    );
    assert!(!h.service.upsert(&strings(&["guitar"])).await.unwrap());
}

#[tokio::test]
async fn upsert_batches_and_deduplicates() {
    let h = harness_with(|c| c.namespace = "prod".into(), Duration::ZERO);
    let mut texts: Vec<String> = (0..70).map(|i| format!("skill number {i}")).collect();
    texts.push("skill number 3".into());
    texts.push("   ".into());

    assert!(h.service.upsert(&texts).await.unwrap());
    assert_eq!(h.index.upsert_calls.load(Ordering::SeqCst), 3);

    let stored = h.index.stored_texts("prod");
    assert_eq!(stored.len(), 70);
    assert!(h.index.stored_texts("").is_empty());

    let records = h.index.records.lock().unwrap();
    let key = ("prod".to_string(), RecordId::for_text("skill number 3").hex);
    assert!(records.contains_key(&key));
}

#[tokio::test]
async fn reingesting_overwrites_by_id() {
    let h = harness();
    h.service.upsert(&strings(&["violin"])).await.unwrap();
    h.service.upsert(&strings(&["violin"])).await.unwrap();
    assert_eq!(h.index.stored_texts(""), vec!["violin"]);
}

#[tokio::test]
async fn texts_are_stored_as_given() {
    let h = harness();
    assert!(h.service.upsert(&strings(&[" violin "])).await.unwrap());

    assert_eq!(h.index.stored_texts(""), vec![" violin "]);
    let records = h.index.records.lock().unwrap();
    let key = (String::new(), RecordId::for_text(" violin ").hex);
    assert!(records.contains_key(&key));
}

#[tokio::test]
async fn blank_only_upsert_succeeds_without_remote_calls() {
    let h = harness();
    assert!(h.service.upsert(&strings(&[" "])).await.unwrap());
    assert!(h.service.upsert(&strings(&["", "\t"])).await.unwrap());

    assert_eq!(h.index.upsert_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.factory.embedder_builds.load(Ordering::SeqCst), 0);
}

struct CannedGenerator(&'static str);

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn complete(&self, _: &str, _: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

#[tokio::test]
async fn generated_keywords_are_stored() {
    let h = harness();
    let request = KeywordRequest {
        topic: "music".into(),
        sub_topics: strings(&["guitar"]),
    };

    let generated = h
        .service
        .generate_and_store(&CannedGenerator("chords, scales , strumming"), &request)
        .await
        .unwrap();

    assert!(generated.stored);
    assert_eq!(generated.keywords, vec!["chords", "scales", "strumming"]);
    assert_eq!(
        h.index.stored_texts(""),
        vec!["chords", "scales", "strumming"]
    );
}

#[tokio::test]
async fn empty_generation_is_not_stored() {
    let h = harness();
    let request = KeywordRequest {
        topic: "music".into(),
        sub_topics: vec![],
    };
    let generated = h
        .service
        .generate_and_store(&CannedGenerator(" , "), &request)
        .await
        .unwrap();
    assert!(!generated.stored);
    assert!(generated.keywords.is_empty());
    assert_eq!(h.index.upsert_calls.load(Ordering::SeqCst), 0);
}
