//! Hybrid retrieval over a swappable index snapshot.
//!
//! ```text
//!   query ──┬── BM25 (top_k × overfetch) ──┐
//!           └── dense (top_k × overfetch) ─┴─ weighted RRF ── [LLM filter] ── cross-encoder ── top N
//! ```
//!
//! Both indexes are rebuilt together from the fragment store and published
//! as one `Arc` snapshot. A query clones the `Arc` up front, so a rebuild
//! never changes the data under a running query.

use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::RagParameters;
use crate::error::{RagError, RagResult};
use crate::llm::compression::CompressionFilter;
use crate::llm::Embedder;
use crate::models::{Fragment, RetrievalResult, StoredFragment};
use crate::search::bm25::Bm25Index;
use crate::search::hybrid::{weighted_rrf_fusion, RankedList};
use crate::search::rerank::Reranker;
use crate::search::vector::VectorIndex;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid word regex"));

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrieverSettings {
    pub top_k: usize,
    pub overfetch_factor: usize,
    pub bm25_weight: f32,
    pub vector_weight: f32,
}

impl RetrieverSettings {
    pub fn from_parameters(params: &RagParameters, overfetch_factor: usize) -> Self {
        Self {
            top_k: params.top_k,
            overfetch_factor,
            bm25_weight: params.bm25_weight,
            vector_weight: params.vector_weight,
        }
    }

    /// Candidates requested from each list, and the cap on the fused list.
    pub fn fetch_size(&self) -> usize {
        self.top_k * self.overfetch_factor.max(1)
    }
}

struct IndexSnapshot {
    fragments: Vec<Fragment>,
    bm25: Bm25Index,
    vectors: VectorIndex,
}

pub struct HybridRetriever {
    /// `None` until the first build; an empty snapshot is inert.
    snapshot: RwLock<Option<Arc<IndexSnapshot>>>,
    settings: RwLock<RetrieverSettings>,
    embedder: Arc<dyn Embedder>,
    filter: Option<CompressionFilter>,
    reranker: Reranker,
}

impl HybridRetriever {
    pub fn new(
        settings: RetrieverSettings,
        embedder: Arc<dyn Embedder>,
        filter: Option<CompressionFilter>,
        reranker: Reranker,
    ) -> Self {
        Self {
            snapshot: RwLock::new(None),
            settings: RwLock::new(settings),
            embedder,
            filter,
            reranker,
        }
    }

    pub fn configure(&self, settings: RetrieverSettings) {
        *self.settings.write() = settings;
    }

    pub fn settings(&self) -> RetrieverSettings {
        *self.settings.read()
    }

    pub fn is_initialized(&self) -> bool {
        self.snapshot.read().is_some()
    }

    pub fn reranker_enabled(&self) -> bool {
        self.reranker.is_enabled()
    }

    /// Number of fragments in the current snapshot.
    pub fn indexed_count(&self) -> usize {
        self.snapshot
            .read()
            .as_ref()
            .map_or(0, |s| s.fragments.len())
    }

    /// Rebuild both indexes from `stored` and publish them. Returns the
    /// number of searchable fragments; zero leaves an inert retriever.
    pub fn rebuild(&self, stored: Vec<StoredFragment>) -> Result<usize> {
        let total = stored.len();
        let (fragments, embeddings): (Vec<Fragment>, Vec<Vec<f32>>) = stored
            .into_iter()
            .filter(|s| is_searchable(&s.fragment.text))
            .map(|s| (s.fragment, s.embedding))
            .unzip();

        if fragments.len() < total {
            warn!(
                "Skipped {} fragments with no searchable text",
                total - fragments.len()
            );
        }

        let bm25 = Bm25Index::build(
            fragments
                .iter()
                .enumerate()
                .map(|(i, f)| (i, f.text.as_str())),
        )?;
        let vectors = VectorIndex::new(embeddings.into_iter().enumerate().collect());

        let count = fragments.len();
        if count == 0 {
            warn!("No searchable fragments, retriever is inert");
        } else {
            info!("Built retrieval indexes over {count} fragments");
        }

        *self.snapshot.write() = Some(Arc::new(IndexSnapshot {
            fragments,
            bm25,
            vectors,
        }));

        Ok(count)
    }

    /// Top `top_n` fragments for `query` with their cross-encoder scores.
    pub fn retrieve(&self, query: &str, top_n: usize) -> RagResult<Vec<RetrievalResult>> {
        let snapshot = self.snapshot.read().clone().ok_or(RagError::NotInitialized)?;

        if snapshot.fragments.is_empty() || query.trim().is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }

        let mut candidates = self.fuse(&snapshot, query);

        if let Some(filter) = &self.filter {
            candidates = filter.filter(query, candidates);
        }

        let mut reranked = self.reranker.rerank(query, candidates);
        reranked.truncate(top_n);

        Ok(reranked
            .into_iter()
            .enumerate()
            .map(|(i, (fragment, relevance_score))| RetrievalResult {
                fragment,
                relevance_score,
                rank: i + 1,
            })
            .collect())
    }

    /// Same ranking as [`retrieve`](Self::retrieve), fragments only.
    pub fn retrieve_documents(&self, query: &str, top_n: usize) -> RagResult<Vec<Fragment>> {
        Ok(self
            .retrieve(query, top_n)?
            .into_iter()
            .map(|r| r.fragment)
            .collect())
    }

    /// Fused candidates before filtering and reranking.
    pub fn fused_candidates(&self, query: &str) -> RagResult<Vec<Fragment>> {
        let snapshot = self.snapshot.read().clone().ok_or(RagError::NotInitialized)?;
        if snapshot.fragments.is_empty() || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.fuse(&snapshot, query))
    }

    fn fuse(&self, snapshot: &IndexSnapshot, query: &str) -> Vec<Fragment> {
        let settings = self.settings();
        let fetch = settings.fetch_size();
        // With both weights at zero the cross-encoder alone orders the union.
        let unweighted = settings.bm25_weight <= 0.0 && settings.vector_weight <= 0.0;

        let sparse: Vec<usize> = if settings.bm25_weight > 0.0 || unweighted {
            match snapshot.bm25.search(query, fetch) {
                Ok(hits) => hits.into_iter().map(|h| h.position).collect(),
                Err(e) => {
                    warn!("BM25 search failed: {e:#}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let dense: Vec<usize> = if settings.vector_weight > 0.0 || unweighted {
            match self.embedder.embed_query(query) {
                Ok(embedding) => snapshot
                    .vectors
                    .search(&embedding, fetch)
                    .into_iter()
                    .map(|h| h.position)
                    .collect(),
                Err(e) => {
                    warn!("Dense search skipped, query embedding failed: {e:#}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let fused = weighted_rrf_fusion(
            &[
                RankedList {
                    positions: &sparse,
                    weight: settings.bm25_weight,
                },
                RankedList {
                    positions: &dense,
                    weight: settings.vector_weight,
                },
            ],
            fetch,
        );

        debug!(
            "Fusion: {} sparse + {} dense -> {} candidates",
            sparse.len(),
            dense.len(),
            fused.len()
        );

        fused
            .into_iter()
            .filter_map(|hit| snapshot.fragments.get(hit.position).cloned())
            .collect()
    }
}

fn is_searchable(text: &str) -> bool {
    !text.trim().is_empty() && WORD.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CrossEncoder;
    use crate::models::{FragmentMetadata, SplittingMethod};
    use uuid::Uuid;

    const DIM: usize = 32;

    /// Bag-of-words hashing embedder.
    struct HashEmbedder;

    fn hash_embed(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        for word in WORD.find_iter(&text.to_lowercase()) {
            let bucket = word.as_str().chars().map(|c| c as usize).sum::<usize>() % DIM;
            v[bucket] += 1.0;
        }
        v
    }

    impl Embedder for HashEmbedder {
        fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| hash_embed(t)).collect())
        }
    }

    struct DownEmbedder;

    impl Embedder for DownEmbedder {
        fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("embedding service unavailable")
        }
    }

    /// Counts query words present in the text.
    struct OverlapScorer;

    impl CrossEncoder for OverlapScorer {
        fn score(&self, query: &str, texts: &[&str]) -> anyhow::Result<Vec<f32>> {
            let query = query.to_lowercase();
            let words: Vec<&str> = WORD.find_iter(&query).map(|m| m.as_str()).collect();
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    words.iter().filter(|w| t.contains(*w)).count() as f32
                })
                .collect())
        }
    }

    fn stored(text: &str, index: usize) -> StoredFragment {
        StoredFragment {
            fragment: Fragment {
                id: Uuid::new_v4(),
                text: text.to_string(),
                metadata: FragmentMetadata {
                    source: "polozhennia.txt".into(),
                    chunk_index: index,
                    chunk_length: text.chars().count(),
                    splitting_method: SplittingMethod::StructuredSentences,
                    section_number: None,
                    section_title: None,
                    extra: Default::default(),
                },
            },
            embedding: hash_embed(text),
        }
    }

    fn corpus() -> Vec<StoredFragment> {
        [
            "Академічна стипендія призначається за рейтингом успішності студентів.",
            "Студент може бути відрахований за академічну неуспішність.",
            "Бібліотека університету надає доступ до наукових баз даних.",
            "Соціальна стипендія призначається студентам пільгових категорій.",
            "Перескладання екзамену дозволяється не більше двох разів.",
        ]
        .iter()
        .enumerate()
        .map(|(i, t)| stored(t, i))
        .collect()
    }

    fn settings(bm25_weight: f32, vector_weight: f32) -> RetrieverSettings {
        RetrieverSettings {
            top_k: 2,
            overfetch_factor: 2,
            bm25_weight,
            vector_weight,
        }
    }

    fn retriever(embedder: Arc<dyn Embedder>, scorer: Option<Arc<dyn CrossEncoder>>) -> HybridRetriever {
        HybridRetriever::new(settings(0.3, 0.7), embedder, None, Reranker::new(scorer))
    }

    #[test]
    fn test_query_before_build_is_error() {
        let r = retriever(Arc::new(HashEmbedder), None);
        assert!(matches!(r.retrieve("стипендія", 3), Err(RagError::NotInitialized)));
    }

    #[test]
    fn test_empty_build_is_inert() {
        let r = retriever(Arc::new(HashEmbedder), None);
        assert_eq!(r.rebuild(Vec::new()).unwrap(), 0);
        assert!(r.is_initialized());
        assert!(r.retrieve("будь-який запит", 3).unwrap().is_empty());
    }

    #[test]
    fn test_unsearchable_fragments_skipped() {
        let r = retriever(Arc::new(HashEmbedder), None);
        let count = r
            .rebuild(vec![stored("   ", 0), stored("— … —", 1), stored("Стаття 5", 2)])
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(r.indexed_count(), 1);
    }

    #[test]
    fn test_retrieve_respects_top_n_and_ranks() {
        let r = retriever(Arc::new(HashEmbedder), Some(Arc::new(OverlapScorer)));
        r.rebuild(corpus()).unwrap();
        let results = r.retrieve("академічна стипендія", 3).unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= 3);
        assert!(results[0].fragment.text.contains("Академічна стипендія"));
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.rank, i + 1);
        }
        for pair in results.windows(2) {
            assert!(pair[0].relevance_score >= pair[1].relevance_score);
        }
    }

    #[test]
    fn test_fused_list_bounded_by_overfetch() {
        let r = retriever(Arc::new(HashEmbedder), None);
        r.rebuild(corpus()).unwrap();
        let fused = r.fused_candidates("студент стипендія екзамен бібліотека").unwrap();
        assert!(fused.len() <= r.settings().fetch_size());
    }

    #[test]
    fn test_sparse_only_weights_match_bm25_ranking() {
        let r = HybridRetriever::new(
            settings(1.0, 0.0),
            Arc::new(HashEmbedder),
            None,
            Reranker::new(None),
        );
        let data = corpus();
        let texts: Vec<String> = data.iter().map(|s| s.fragment.text.clone()).collect();
        r.rebuild(data).unwrap();

        let query = "стипендія студентів";
        let bm25 = Bm25Index::build(texts.iter().enumerate().map(|(i, t)| (i, t.as_str()))).unwrap();
        let expected: Vec<String> = bm25
            .search(query, 4)
            .unwrap()
            .into_iter()
            .map(|h| texts[h.position].clone())
            .collect();

        let fused: Vec<String> = r
            .fused_candidates(query)
            .unwrap()
            .into_iter()
            .map(|f| f.text)
            .collect();
        assert_eq!(fused, expected);
    }

    #[test]
    fn test_zero_weights_still_retrieve_through_reranker() {
        let r = HybridRetriever::new(
            settings(0.0, 0.0),
            Arc::new(HashEmbedder),
            None,
            Reranker::new(Some(Arc::new(OverlapScorer))),
        );
        r.rebuild(corpus()).unwrap();
        let results = r.retrieve("академічна стипендія", 3).unwrap();
        assert!(!results.is_empty());
        assert!(results[0].fragment.text.contains("Академічна стипендія"));
    }

    #[test]
    fn test_dense_failure_degrades_to_sparse() {
        let r = retriever(Arc::new(DownEmbedder), None);
        r.rebuild(corpus()).unwrap();
        let results = r.retrieve("бібліотека", 3).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].fragment.text.contains("Бібліотека"));
        assert_eq!(results[0].relevance_score, 0.0);
    }

    #[test]
    fn test_rebuild_swaps_snapshot() {
        let r = retriever(Arc::new(HashEmbedder), None);
        r.rebuild(corpus()).unwrap();
        assert_eq!(r.indexed_count(), 5);
        r.rebuild(vec![stored("Новий регламент набуває чинності.", 0)])
            .unwrap();
        assert_eq!(r.indexed_count(), 1);
        let results = r.retrieve("регламент", 3).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_empty_query_returns_empty() {
        let r = retriever(Arc::new(HashEmbedder), None);
        r.rebuild(corpus()).unwrap();
        assert!(r.retrieve("   ", 3).unwrap().is_empty());
    }
}
