use std::sync::Arc;

use corpus_model::{ChunkRecord, DocumentId, DocumentMeta};
use corpus_store::SqliteStore;
use embedding_provider::{Embedder, EmbedderError, EmbedderInfo, ProviderKind};
use miner_service::{
    CancelToken, FusionOptions, Granularity, HybridSearchEngine, MinerConfig, MinerService,
    RawDocument, SearchResult, ServiceError, TrendQuery,
};
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> MinerConfig {
    MinerConfig {
        db_path: dir.path().join("corpus.db"),
        embedding_dimension: 16,
        chunk_size: 200,
        chunk_overlap: 40,
        min_chunk_chars: 10,
        workers: 2,
        ..MinerConfig::default()
    }
}

fn test_service(dir: &TempDir) -> MinerService {
    MinerService::from_config(test_config(dir)).expect("service builds")
}

fn doc(url: &str, date: Option<&str>, tags: &[&str], text: &str) -> RawDocument {
    RawDocument {
        url: url.to_string(),
        title: "a page".to_string(),
        publish_date: date.map(|d| d.to_string()),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        text: text.to_string(),
    }
}

struct FixedEmbedder {
    info: EmbedderInfo,
    vector: Vec<f32>,
}

impl FixedEmbedder {
    fn new(vector: Vec<f32>) -> Self {
        let info = EmbedderInfo {
            provider: ProviderKind::HashSeeded,
            embedding_model_id: "fixed".into(),
            dimension: vector.len(),
            text_repr_version: "v1".into(),
        };
        Self { info, vector }
    }
}

impl Embedder for FixedEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedderError> {
        Ok(self.vector.clone())
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Ok(texts.iter().map(|_| self.vector.clone()).collect())
    }

    fn info(&self) -> &EmbedderInfo {
        &self.info
    }
}

struct FailingEmbedder {
    info: EmbedderInfo,
}

impl FailingEmbedder {
    fn new() -> Self {
        let info = EmbedderInfo {
            provider: ProviderKind::HashSeeded,
            embedding_model_id: "failing".into(),
            dimension: 2,
            text_repr_version: "v1".into(),
        };
        Self { info }
    }
}

impl Embedder for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedderError> {
        Err(EmbedderError::ProviderFailure { message: "model offline".into() })
    }

    fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Err(EmbedderError::ProviderFailure { message: "model offline".into() })
    }

    fn info(&self) -> &EmbedderInfo {
        &self.info
    }
}

fn seeded_store() -> SqliteStore {
    // Chunk "a" matches the query on both axes, "b" on neither.
    let mut store = SqliteStore::in_memory(2).unwrap();
    let meta_a = DocumentMeta::new("https://a.com/solar", "a.com", "Solar growth");
    let meta_b = DocumentMeta::new("https://b.com/other", "b.com", "Unrelated");
    store
        .add(
            &ChunkRecord::new(DocumentId::new("a"), 0, 1, "solar capacity records", meta_a),
            &[1.0, 0.0],
        )
        .unwrap();
    store
        .add(
            &ChunkRecord::new(DocumentId::new("b"), 0, 1, "football scores tonight", meta_b),
            &[0.0, 1.0],
        )
        .unwrap();
    store
}

#[test]
fn hybrid_fusion_prefers_chunks_matching_both_sources() {
    let store = seeded_store();
    let embedder = FixedEmbedder::new(vec![1.0, 0.0]);
    let engine = HybridSearchEngine::new(&store, &embedder, FusionOptions::default());

    let hits = engine.search("solar", 10, true).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk_id, "a#0");
    assert!((hits[0].relevance_score - 1.0).abs() < 1e-6);
    // Chunk "b" is absent from the keyword pool and bottom of the vector
    // pool, so both normalized scores are zero.
    assert_eq!(hits[1].chunk_id, "b#0");
    assert!(hits[1].relevance_score.abs() < 1e-6);
}

#[test]
fn raising_vector_similarity_never_lowers_a_fused_score() {
    // Same three chunks in both stores; only "c" moves closer to the
    // query vector. Contents are identical, so the keyword pools match.
    fn build(c_embedding: &[f32]) -> SqliteStore {
        let mut store = SqliteStore::in_memory(2).unwrap();
        let meta = |d: &str| {
            DocumentMeta::new(format!("https://{d}.com/p"), format!("{d}.com"), "t")
        };
        store
            .add(
                &ChunkRecord::new(DocumentId::new("a"), 0, 1, "alpha shared entry", meta("a")),
                &[1.0, 0.0],
            )
            .unwrap();
        store
            .add(
                &ChunkRecord::new(DocumentId::new("b"), 0, 1, "beta shared entry", meta("b")),
                &[0.6, 0.8],
            )
            .unwrap();
        store
            .add(
                &ChunkRecord::new(DocumentId::new("c"), 0, 1, "gamma shared entry", meta("c")),
                c_embedding,
            )
            .unwrap();
        store
    }

    fn score(hits: &[SearchResult], id: &str) -> f32 {
        hits.iter().find(|h| h.chunk_id == id).unwrap().relevance_score
    }
    fn rank(hits: &[SearchResult], id: &str) -> usize {
        hits.iter().position(|h| h.chunk_id == id).unwrap()
    }

    let embedder = FixedEmbedder::new(vec![1.0, 0.0]);

    let low = build(&[0.0, 1.0]);
    let engine = HybridSearchEngine::new(&low, &embedder, FusionOptions::default());
    let low_hits = engine.search("shared entry", 10, true).unwrap();

    let high = build(&[0.8, 0.6]);
    let engine = HybridSearchEngine::new(&high, &embedder, FusionOptions::default());
    let high_hits = engine.search("shared entry", 10, true).unwrap();

    assert!(score(&high_hits, "c#0") > score(&low_hits, "c#0"));
    assert!(rank(&low_hits, "c#0") > rank(&low_hits, "b#0"));
    assert!(rank(&high_hits, "c#0") < rank(&high_hits, "b#0"));
    // The keyword pool is unchanged, so the untouched top candidate
    // keeps its fused score.
    assert!((score(&low_hits, "a#0") - score(&high_hits, "a#0")).abs() < 1e-6);
}

#[test]
fn vector_only_mode_ignores_keyword_matches() {
    let store = seeded_store();
    let embedder = FixedEmbedder::new(vec![0.0, 1.0]);
    let engine = HybridSearchEngine::new(&store, &embedder, FusionOptions::default());

    let hits = engine.search("solar", 10, false).unwrap();
    assert_eq!(hits[0].chunk_id, "b#0");
}

#[test]
fn empty_query_is_rejected_before_touching_the_store() {
    let store = seeded_store();
    let embedder = FixedEmbedder::new(vec![1.0, 0.0]);
    let engine = HybridSearchEngine::new(&store, &embedder, FusionOptions::default());
    assert!(matches!(engine.search("   ", 10, true), Err(ServiceError::InvalidQuery(_))));
}

#[test]
fn search_on_empty_store_returns_empty_list() {
    let store = SqliteStore::in_memory(2).unwrap();
    let embedder = FixedEmbedder::new(vec![1.0, 0.0]);
    let engine = HybridSearchEngine::new(&store, &embedder, FusionOptions::default());
    assert!(engine.search("anything", 10, true).unwrap().is_empty());
}

#[test]
fn embedder_failure_degrades_to_keyword_when_configured() {
    let store = seeded_store();
    let embedder = FailingEmbedder::new();

    let strict = HybridSearchEngine::new(&store, &embedder, FusionOptions::default());
    assert!(matches!(strict.search("solar", 10, true), Err(ServiceError::Embed(_))));

    let opts = FusionOptions { degrade_to_keyword: true, ..FusionOptions::default() };
    let lenient = HybridSearchEngine::new(&store, &embedder, opts);
    let hits = lenient.search("solar", 10, true).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "a#0");
}

#[test]
fn ingest_then_search_round_trip() {
    let dir = TempDir::new().unwrap();
    let svc = test_service(&dir);

    let report = svc
        .ingest(
            vec![
                doc(
                    "https://news.example.com/solar",
                    Some("2023-03-10"),
                    &["solar"],
                    "Utility scale solar capacity reached a new record this quarter.",
                ),
                doc(
                    "https://other.example.com/wind",
                    Some("2023-04-02"),
                    &["wind"],
                    "Offshore wind turbine installations continue along the coast.",
                ),
            ],
            None,
        )
        .unwrap();
    assert_eq!(report.docs_ingested, 2);
    assert_eq!(report.docs_failed, 0);
    assert!(report.chunks_stored >= 2);

    let hits = svc.search("solar capacity record", 5, true).unwrap();
    assert!(!hits.is_empty());
    let solar = hits
        .iter()
        .find(|h| h.url == "https://news.example.com/solar")
        .expect("keyword-matching document is retrieved");
    assert!(solar.relevance_score > 0.0);

    let stats = svc.stats().unwrap();
    assert_eq!(stats.total_documents, 2);
    assert_eq!(stats.unique_domains, 2);
}

#[test]
fn one_bad_document_does_not_sink_the_batch() {
    let dir = TempDir::new().unwrap();
    let svc = test_service(&dir);

    let report = svc
        .ingest(
            vec![
                doc("https://a.example.com/1", None, &[], "first document body with enough text"),
                doc("definitely not a url", None, &[], "second document body with enough text"),
                doc("https://c.example.com/3", None, &[], "third document body with enough text"),
            ],
            None,
        )
        .unwrap();

    assert_eq!(report.docs_ingested, 2);
    assert_eq!(report.docs_failed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "definitely not a url");
    assert_eq!(svc.stats().unwrap().total_documents, 2);
}

#[test]
fn reingesting_the_same_url_leaves_the_first_copy_in_place() {
    let dir = TempDir::new().unwrap();
    let svc = test_service(&dir);
    let d = doc("https://a.example.com/1", None, &[], "the original body of this document");

    assert_eq!(svc.ingest(vec![d.clone()], None).unwrap().docs_ingested, 1);
    let second = svc.ingest(vec![d], None).unwrap();
    assert_eq!(second.docs_ingested, 0);
    assert_eq!(second.docs_failed, 1);
    assert_eq!(svc.stats().unwrap().total_documents, 1);
}

#[test]
fn documents_below_min_length_are_skipped() {
    let dir = TempDir::new().unwrap();
    let svc = test_service(&dir);
    let report = svc
        .ingest(vec![doc("https://a.example.com/1", None, &[], "tiny")], None)
        .unwrap();
    assert_eq!(report.docs_skipped, 1);
    assert_eq!(svc.stats().unwrap().total_chunks, 0);
}

#[test]
fn canceled_token_stops_processing() {
    let dir = TempDir::new().unwrap();
    let svc = test_service(&dir);
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = svc
        .ingest(
            vec![doc("https://a.example.com/1", None, &[], "body text long enough to chunk")],
            Some(cancel),
        )
        .unwrap();
    assert_eq!(report.docs_ingested, 0);
    assert_eq!(svc.stats().unwrap().total_chunks, 0);
}

#[test]
fn yearly_trend_with_linear_growth_fits_slope_one() {
    let dir = TempDir::new().unwrap();
    let svc = test_service(&dir);

    let mut docs = Vec::new();
    for (year, count) in (2019..=2023).zip(1..=5) {
        for i in 0..count {
            docs.push(doc(
                &format!("https://news.example.com/{year}/{i}"),
                Some(&format!("{year}-06-01")),
                &["solar"],
                "a document body that clears the minimum length",
            ));
        }
    }
    let report = svc.ingest(docs, None).unwrap();
    assert_eq!(report.docs_ingested, 15);

    let trends = svc
        .trends(&TrendQuery { granularity: Granularity::Year, ..TrendQuery::default() })
        .unwrap();
    let counts: Vec<u64> = trends.points.iter().map(|p| p.count).collect();
    assert_eq!(counts, vec![1, 2, 3, 4, 5]);
    assert!((trends.slope.unwrap() - 1.0).abs() < 1e-9);
    assert!((trends.r_squared.unwrap() - 1.0).abs() < 1e-9);
    assert!(trends.p_value.unwrap() < 0.05);
}

#[test]
fn trend_buckets_are_zero_filled_across_gaps() {
    let dir = TempDir::new().unwrap();
    let svc = test_service(&dir);
    svc.ingest(
        vec![
            doc("https://a.example.com/1", Some("2020-02-01"), &[], "first dated document body"),
            doc("https://a.example.com/2", Some("2023-09-01"), &[], "second dated document body"),
        ],
        None,
    )
    .unwrap();

    let trends = svc
        .trends(&TrendQuery { granularity: Granularity::Year, ..TrendQuery::default() })
        .unwrap();
    let periods: Vec<&str> = trends.points.iter().map(|p| p.period.as_str()).collect();
    assert_eq!(periods, vec!["2020", "2021", "2022", "2023"]);
    let counts: Vec<u64> = trends.points.iter().map(|p| p.count).collect();
    assert_eq!(counts, vec![1, 0, 0, 1]);
    // Two non-zero buckets are not enough for a fit.
    assert_eq!(trends.slope, None);
    assert_eq!(trends.r_squared, None);
    assert_eq!(trends.p_value, None);
}

#[test]
fn trend_tag_filter_and_explicit_range() {
    let dir = TempDir::new().unwrap();
    let svc = test_service(&dir);
    svc.ingest(
        vec![
            doc("https://a.example.com/1", Some("2022-01-10"), &["solar"], "solar document body text"),
            doc("https://a.example.com/2", Some("2022-03-10"), &["wind"], "wind document body text"),
            doc("https://a.example.com/3", None, &["solar"], "undated solar document body"),
        ],
        None,
    )
    .unwrap();

    let trends = svc
        .trends(&TrendQuery {
            tag: Some("Solar".to_string()),
            from: Some("2022-01".to_string()),
            to: Some("2022-06".to_string()),
            granularity: Granularity::Month,
        })
        .unwrap();
    assert_eq!(trends.total_documents, 2);
    assert_eq!(trends.undated_documents, 1);
    assert_eq!(trends.points.len(), 6);
    assert_eq!(trends.points[0].period, "2022-01");
    assert_eq!(trends.points[0].count, 1);
    assert!(trends.points[1..].iter().all(|p| p.count == 0));
}

#[test]
fn bad_date_bound_is_rejected() {
    let dir = TempDir::new().unwrap();
    let svc = test_service(&dir);
    let err = svc
        .trends(&TrendQuery { from: Some("soonish".to_string()), ..TrendQuery::default() })
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidQuery(_)));
}

#[test]
fn cooccurrence_counts_pairs_and_correlates_monthly_presence() {
    let dir = TempDir::new().unwrap();
    let svc = test_service(&dir);
    svc.ingest(
        vec![
            doc("https://a.example.com/1", Some("2023-01-05"), &["solar", "storage"], "doc one body text"),
            doc("https://a.example.com/2", Some("2023-02-05"), &["wind", "battery"], "doc two body text"),
            doc("https://a.example.com/3", Some("2023-03-05"), &["solar", "storage"], "doc three body text"),
        ],
        None,
    )
    .unwrap();

    let pairs = svc.cooccurrence(2).unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].tag_a, "solar");
    assert_eq!(pairs[0].tag_b, "storage");
    assert_eq!(pairs[0].count, 2);
    // solar and storage appear in exactly the same months.
    assert!((pairs[0].correlation.unwrap() - 1.0).abs() < 1e-9);

    let all = svc.cooccurrence(1).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].count, 2);
    assert_eq!(all[1].tag_a, "battery");
    assert_eq!(all[1].tag_b, "wind");
}

#[test]
fn reset_clears_the_corpus() {
    let dir = TempDir::new().unwrap();
    let svc = test_service(&dir);
    svc.ingest(
        vec![doc("https://a.example.com/1", None, &[], "document body long enough to keep")],
        None,
    )
    .unwrap();
    assert!(svc.stats().unwrap().total_chunks > 0);
    svc.reset().unwrap();
    assert_eq!(svc.stats().unwrap().total_chunks, 0);
    assert!(svc.search("document", 5, true).unwrap().is_empty());
}

#[test]
fn search_uses_sequential_ids_within_a_document() {
    let dir = TempDir::new().unwrap();
    let cfg = MinerConfig { chunk_size: 50, chunk_overlap: 10, ..test_config(&dir) };
    let svc = MinerService::from_config(cfg).unwrap();

    let long_text = "renewable energy storage ".repeat(20);
    svc.ingest(vec![doc("https://a.example.com/long", None, &[], &long_text)], None).unwrap();

    let hits = svc.search("renewable energy storage", 20, true).unwrap();
    assert!(hits.len() > 1);
    for h in &hits {
        assert_eq!(h.chunk_id, format!("{}#{}", h.url, h.chunk_index));
        assert!(h.chunk_index < h.total_chunks);
    }
}
