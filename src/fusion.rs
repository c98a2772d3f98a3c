//! Hybrid retrieval: Reciprocal Rank Fusion over a semantic and a lexical
//! ranking.
//!
//! Each document's fused score is the sum over the rankings it appears in
//! of `1 / (k + rank)`, with `rank` counted from zero. Only positions
//! matter; the rankers' raw scores are never compared with each other.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    collaborators::{Ranker, call_with_deadline},
    collection::CollectionId,
    doc_id::DocumentId,
    error::{Collaborator, Result},
};

/// Default RRF smoothing constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Each ranker is asked for at least this many documents.
pub const MIN_FETCH: usize = 50;

/// ...and never for more than this many.
pub const MAX_FETCH: usize = 10_000;

/// Which rankings feed the fused list.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Both rankings, fused with RRF.
    #[default]
    HybridRrf,
    /// The semantic ranking alone.
    PureSemantic,
    /// The lexical (full-text) ranking alone.
    PureFulltext,
}

impl RetrievalStrategy {
    pub const ALL: [Self; 3] =
        [Self::HybridRrf, Self::PureSemantic, Self::PureFulltext];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HybridRrf => "hybrid_rrf",
            Self::PureSemantic => "pure_semantic",
            Self::PureFulltext => "pure_fulltext",
        }
    }
}

impl std::fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RetrievalStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                "expected hybrid_rrf, pure_semantic or pure_fulltext"
                    .to_string()
            })
    }
}

/// A document seen by at least one ranker, with its 0-based positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalCandidate {
    pub document_id: DocumentId,
    pub semantic_rank: Option<usize>,
    pub lexical_rank: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub document_id: DocumentId,
    pub rrf_score: f64,
    /// 1-based position in the fused list.
    pub rank: usize,
    pub semantic_rank: Option<usize>,
    pub lexical_rank: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    pub rrf_k: f64,
    pub min_score: f64,
    pub top_k: usize,
}

/// Merge two rankings into candidates, in order of first appearance.
///
/// A document listed twice in the same ranking keeps its first position.
pub fn candidates(
    semantic: &[DocumentId],
    lexical: &[DocumentId],
) -> Vec<RetrievalCandidate> {
    let mut index: HashMap<&DocumentId, usize> = HashMap::new();
    let mut merged: Vec<RetrievalCandidate> = Vec::new();

    for (is_semantic, ranking) in [(true, semantic), (false, lexical)] {
        for (rank, id) in ranking.iter().enumerate() {
            let slot = *index.entry(id).or_insert_with(|| {
                merged.push(RetrievalCandidate {
                    document_id: id.clone(),
                    semantic_rank: None,
                    lexical_rank: None,
                });
                merged.len() - 1
            });

            let candidate = &mut merged[slot];
            let position = if is_semantic {
                &mut candidate.semantic_rank
            } else {
                &mut candidate.lexical_rank
            };
            if position.is_none() {
                *position = Some(rank);
            }
        }
    }

    merged
}

/// Fuse two rankings with RRF.
///
/// 1. Score every candidate: `Σ 1/(rrf_k + rank)`.
/// 2. Sort by score descending; ties go to the better semantic rank,
///    then the better lexical rank (a missing rank sorts last), then the
///    document id.
/// 3. Drop results scoring below `min_score`.
/// 4. Keep the first `top_k` and number them from 1.
pub fn reciprocal_rank_fusion(
    semantic: &[DocumentId],
    lexical: &[DocumentId],
    params: &FusionParams,
) -> Vec<FusedResult> {
    let contribution = |rank: Option<usize>| {
        rank.map_or(0.0, |r| 1.0 / (params.rrf_k + r as f64))
    };

    let mut results: Vec<FusedResult> = candidates(semantic, lexical)
        .into_iter()
        .map(|c| FusedResult {
            rrf_score: contribution(c.semantic_rank)
                + contribution(c.lexical_rank),
            document_id: c.document_id,
            rank: 0,
            semantic_rank: c.semantic_rank,
            lexical_rank: c.lexical_rank,
        })
        .collect();

    results.sort_by(|a, b| {
        b.rrf_score
            .total_cmp(&a.rrf_score)
            .then_with(|| present_first(a.semantic_rank, b.semantic_rank))
            .then_with(|| present_first(a.lexical_rank, b.lexical_rank))
            .then_with(|| a.document_id.cmp(&b.document_id))
    });

    results
        .into_iter()
        .filter(|r| r.rrf_score >= params.min_score)
        .take(params.top_k)
        .enumerate()
        .map(|(i, mut r)| {
            r.rank = i + 1;
            r
        })
        .collect()
}

fn present_first(a: Option<usize>, b: Option<usize>) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    pub rrf_k: f64,
    /// Per-ranker deadline. Both rankers run at the same time.
    pub deadline: Duration,
    /// Carry on with one ranking when the other fails.
    pub degrade_gracefully: bool,
    pub strategy: RetrievalStrategy,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            deadline: Duration::from_secs(10),
            degrade_gracefully: false,
            strategy: RetrievalStrategy::default(),
        }
    }
}

/// Runs both rankers concurrently and fuses what they return.
#[derive(Clone)]
pub struct HybridFuser {
    semantic: Arc<dyn Ranker>,
    lexical: Arc<dyn Ranker>,
    config: FusionConfig,
}

impl HybridFuser {
    pub fn new(
        semantic: Arc<dyn Ranker>,
        lexical: Arc<dyn Ranker>,
        config: FusionConfig,
    ) -> Self {
        Self {
            semantic,
            lexical,
            config,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse with the configured strategy.
    pub async fn fuse(
        &self,
        query: &str,
        top_k: usize,
        min_score: f64,
        collection: &CollectionId,
    ) -> Result<Vec<FusedResult>> {
        self.fuse_with(
            query,
            top_k,
            min_score,
            collection,
            self.config.strategy,
        )
        .await
    }

    pub async fn fuse_with(
        &self,
        query: &str,
        top_k: usize,
        min_score: f64,
        collection: &CollectionId,
        strategy: RetrievalStrategy,
    ) -> Result<Vec<FusedResult>> {
        let fetch_k = top_k.saturating_mul(2).clamp(MIN_FETCH, MAX_FETCH);

        let (semantic, lexical) = match strategy {
            RetrievalStrategy::HybridRrf => {
                self.both(query, collection, fetch_k).await?
            }
            RetrievalStrategy::PureSemantic => {
                let semantic = self
                    .fetch(
                        Collaborator::SemanticSearch,
                        &self.semantic,
                        collection,
                        query,
                        fetch_k,
                    )
                    .await?;
                (semantic, Vec::new())
            }
            RetrievalStrategy::PureFulltext => {
                let lexical = self
                    .fetch(
                        Collaborator::LexicalSearch,
                        &self.lexical,
                        collection,
                        query,
                        fetch_k,
                    )
                    .await?;
                (Vec::new(), lexical)
            }
        };

        let results = reciprocal_rank_fusion(
            &semantic,
            &lexical,
            &FusionParams {
                rrf_k: self.config.rrf_k,
                min_score,
                top_k,
            },
        );

        debug!(
            %collection,
            %strategy,
            semantic = semantic.len(),
            lexical = lexical.len(),
            fused = results.len(),
            "fused rankings"
        );

        Ok(results)
    }

    /// Both rankings, fetched concurrently.
    async fn both(
        &self,
        query: &str,
        collection: &CollectionId,
        fetch_k: usize,
    ) -> Result<(Vec<DocumentId>, Vec<DocumentId>)> {
        let (semantic, lexical) = tokio::join!(
            self.fetch(
                Collaborator::SemanticSearch,
                &self.semantic,
                collection,
                query,
                fetch_k,
            ),
            self.fetch(
                Collaborator::LexicalSearch,
                &self.lexical,
                collection,
                query,
                fetch_k,
            ),
        );

        let degrade = self.config.degrade_gracefully;
        match (semantic, lexical) {
            (Ok(s), Ok(l)) => Ok((s, l)),
            (Err(e), Ok(l)) if degrade => {
                warn!(error = %e, "continuing with lexical ranking only");
                Ok((Vec::new(), l))
            }
            (Ok(s), Err(e)) if degrade => {
                warn!(error = %e, "continuing with semantic ranking only");
                Ok((s, Vec::new()))
            }
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }

    async fn fetch(
        &self,
        collaborator: Collaborator,
        ranker: &Arc<dyn Ranker>,
        collection: &CollectionId,
        query: &str,
        k: usize,
    ) -> Result<Vec<DocumentId>> {
        let ranker = Arc::clone(ranker);
        let collection = collection.clone();
        let query = query.to_string();

        call_with_deadline(collaborator, self.config.deadline, move || {
            ranker.rank(&collection, &query, k)
        })
        .await
    }
}

impl std::fmt::Debug for HybridFuser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridFuser")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use proptest::prelude::*;

    use super::*;
    use crate::{collaborators::Unconfigured, error::Error};

    fn ids(names: &[&str]) -> Vec<DocumentId> {
        names.iter().map(|n| DocumentId::new(*n)).collect()
    }

    fn order(results: &[FusedResult]) -> Vec<&str> {
        results.iter().map(|r| r.document_id.as_str()).collect()
    }

    const OPEN: FusionParams = FusionParams {
        rrf_k: 60.0,
        min_score: 0.0,
        top_k: 10,
    };

    #[test]
    fn worked_example_orders_by_score_then_semantic_rank() {
        let results = reciprocal_rank_fusion(
            &ids(&["A", "B", "C"]),
            &ids(&["B", "A", "D"]),
            &OPEN,
        );

        assert_eq!(order(&results), vec!["A", "B", "C", "D"]);
        assert_eq!(results[0].rrf_score, 1.0 / 60.0 + 1.0 / 61.0);
        assert_eq!(results[0].rrf_score, results[1].rrf_score);
        assert_eq!(results[2].rrf_score, 1.0 / 62.0);
        assert_eq!(results[3].rrf_score, 1.0 / 62.0);
        assert_eq!(
            results.iter().map(|r| r.rank).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn empty_rankings_give_empty_result() {
        assert!(reciprocal_rank_fusion(&[], &[], &OPEN).is_empty());
    }

    #[test]
    fn single_ranking_keeps_its_order() {
        let results =
            reciprocal_rank_fusion(&[], &ids(&["x", "y", "z"]), &OPEN);
        assert_eq!(order(&results), vec!["x", "y", "z"]);
        assert!(results.iter().all(|r| r.semantic_rank.is_none()));
    }

    #[test]
    fn min_score_applies_after_fusion() {
        let params = FusionParams {
            min_score: 0.02,
            ..OPEN
        };
        let results = reciprocal_rank_fusion(
            &ids(&["both", "sem"]),
            &ids(&["both"]),
            &params,
        );

        assert_eq!(order(&results), vec!["both"]);
    }

    #[test]
    fn truncates_to_top_k_after_filtering() {
        let params = FusionParams { top_k: 2, ..OPEN };
        let results =
            reciprocal_rank_fusion(&ids(&["a", "b", "c", "d"]), &[], &params);
        assert_eq!(order(&results), vec!["a", "b"]);
    }

    #[test]
    fn duplicate_in_one_ranking_counts_once() {
        let results =
            reciprocal_rank_fusion(&ids(&["a", "b", "a"]), &[], &OPEN);
        assert_eq!(order(&results), vec!["a", "b"]);
        assert_eq!(results[0].rrf_score, 1.0 / 60.0);
    }

    #[test]
    fn smaller_k_sharpens_rank_differences() {
        let params = FusionParams { rrf_k: 1.0, ..OPEN };
        let results = reciprocal_rank_fusion(&ids(&["a", "b"]), &[], &params);
        assert_eq!(results[0].rrf_score, 1.0);
        assert_eq!(results[1].rrf_score, 0.5);
    }

    #[test]
    fn candidates_record_first_positions() {
        let merged = candidates(&ids(&["a", "b"]), &ids(&["b", "c"]));
        assert_eq!(
            merged,
            vec![
                RetrievalCandidate {
                    document_id: DocumentId::new("a"),
                    semantic_rank: Some(0),
                    lexical_rank: None,
                },
                RetrievalCandidate {
                    document_id: DocumentId::new("b"),
                    semantic_rank: Some(1),
                    lexical_rank: Some(0),
                },
                RetrievalCandidate {
                    document_id: DocumentId::new("c"),
                    semantic_rank: None,
                    lexical_rank: Some(1),
                },
            ]
        );
    }

    fn ranking() -> impl Strategy<Value = Vec<DocumentId>> {
        proptest::collection::vec("[a-h]", 0..12)
            .prop_map(|names| names.into_iter().map(DocumentId::new).collect())
    }

    proptest! {
        #[test]
        fn output_is_sorted_bounded_and_unique(
            semantic in ranking(),
            lexical in ranking(),
            top_k in 0usize..10,
            min_score in 0.0f64..0.04,
        ) {
            let params = FusionParams { rrf_k: 60.0, min_score, top_k };
            let results = reciprocal_rank_fusion(&semantic, &lexical, &params);

            prop_assert!(results.len() <= top_k);
            for pair in results.windows(2) {
                prop_assert!(pair[0].rrf_score >= pair[1].rrf_score);
            }
            for r in &results {
                prop_assert!(r.rrf_score >= min_score);
                prop_assert!(
                    semantic.contains(&r.document_id)
                        || lexical.contains(&r.document_id)
                );
            }
            let mut seen: Vec<_> =
                results.iter().map(|r| &r.document_id).collect();
            seen.sort();
            seen.dedup();
            prop_assert_eq!(seen.len(), results.len());
        }

        #[test]
        fn top_of_both_rankings_beats_any_single_ranking_document(
            rest_semantic in ranking(),
            rest_lexical in ranking(),
        ) {
            let top = DocumentId::new("top");
            let mut semantic = vec![top.clone()];
            semantic.extend(rest_semantic);
            let mut lexical = vec![top.clone()];
            lexical.extend(rest_lexical);

            let results = reciprocal_rank_fusion(&semantic, &lexical, &OPEN);
            prop_assert_eq!(&results[0].document_id, &top);
        }
    }

    // -- Fuser --

    struct Fixed(Vec<DocumentId>);

    impl Ranker for Fixed {
        fn rank(
            &self,
            _collection: &CollectionId,
            _query: &str,
            k: usize,
        ) -> Result<Vec<DocumentId>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
    }

    struct Slow(Duration);

    impl Ranker for Slow {
        fn rank(
            &self,
            _collection: &CollectionId,
            _query: &str,
            _k: usize,
        ) -> Result<Vec<DocumentId>> {
            std::thread::sleep(self.0);
            Ok(ids(&["late"]))
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<usize>>);

    impl Ranker for Recording {
        fn rank(
            &self,
            _collection: &CollectionId,
            _query: &str,
            k: usize,
        ) -> Result<Vec<DocumentId>> {
            self.0.lock().unwrap().push(k);
            Ok(Vec::new())
        }
    }

    fn fuser(
        semantic: Arc<dyn Ranker>,
        lexical: Arc<dyn Ranker>,
        degrade_gracefully: bool,
    ) -> HybridFuser {
        HybridFuser::new(
            semantic,
            lexical,
            FusionConfig {
                rrf_k: 60.0,
                deadline: Duration::from_millis(200),
                degrade_gracefully,
                strategy: RetrievalStrategy::HybridRrf,
            },
        )
    }

    fn default_collection() -> CollectionId {
        CollectionId::new("default")
    }

    #[tokio::test]
    async fn fuser_combines_both_rankers() {
        let f = fuser(
            Arc::new(Fixed(ids(&["A", "B", "C"]))),
            Arc::new(Fixed(ids(&["B", "A", "D"]))),
            false,
        );

        let results =
            f.fuse("query", 10, 0.0, &default_collection()).await.unwrap();
        assert_eq!(order(&results), vec!["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn fuser_degrades_to_lexical_when_allowed() {
        let f = fuser(
            Arc::new(Unconfigured(Collaborator::SemanticSearch)),
            Arc::new(Fixed(ids(&["x", "y"]))),
            true,
        );

        let results =
            f.fuse("query", 10, 0.0, &default_collection()).await.unwrap();
        assert_eq!(order(&results), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn fuser_surfaces_failure_without_degradation() {
        let f = fuser(
            Arc::new(Unconfigured(Collaborator::SemanticSearch)),
            Arc::new(Fixed(ids(&["x"]))),
            false,
        );

        let err = f
            .fuse("query", 10, 0.0, &default_collection())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CollaboratorUnavailable {
                collaborator: Collaborator::SemanticSearch,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn fuser_fails_when_both_rankers_fail() {
        let f = fuser(
            Arc::new(Unconfigured(Collaborator::SemanticSearch)),
            Arc::new(Unconfigured(Collaborator::LexicalSearch)),
            true,
        );

        assert!(
            f.fuse("query", 10, 0.0, &default_collection())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn slow_ranker_is_dropped_after_deadline() {
        let f = fuser(
            Arc::new(Slow(Duration::from_secs(2))),
            Arc::new(Fixed(ids(&["fast"]))),
            true,
        );

        let results =
            f.fuse("query", 10, 0.0, &default_collection()).await.unwrap();
        assert_eq!(order(&results), vec!["fast"]);
    }

    #[tokio::test]
    async fn fetch_size_has_a_floor() {
        let semantic = Arc::new(Recording::default());
        let lexical = Arc::new(Recording::default());
        let f = fuser(semantic.clone(), lexical.clone(), false);

        f.fuse("q", 5, 0.0, &default_collection()).await.unwrap();
        f.fuse("q", 40, 0.0, &default_collection()).await.unwrap();

        assert_eq!(*semantic.0.lock().unwrap(), vec![50, 80]);
        assert_eq!(*lexical.0.lock().unwrap(), vec![50, 80]);
    }

    #[tokio::test]
    async fn huge_top_k_is_capped() {
        let semantic = Arc::new(Recording::default());
        let lexical = Arc::new(Recording::default());
        let f = fuser(semantic.clone(), lexical.clone(), false);

        let results = f
            .fuse("q", usize::MAX, 0.0, &default_collection())
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(*semantic.0.lock().unwrap(), vec![MAX_FETCH]);
        assert_eq!(*lexical.0.lock().unwrap(), vec![MAX_FETCH]);
    }

    #[tokio::test]
    async fn pure_fulltext_skips_the_semantic_ranker() {
        let semantic = Arc::new(Recording::default());
        let f =
            fuser(semantic.clone(), Arc::new(Fixed(ids(&["x", "y"]))), false);

        let results = f
            .fuse_with(
                "q",
                10,
                0.0,
                &default_collection(),
                RetrievalStrategy::PureFulltext,
            )
            .await
            .unwrap();
        assert_eq!(order(&results), vec!["x", "y"]);
        assert!(results.iter().all(|r| r.semantic_rank.is_none()));
        assert!(semantic.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pure_semantic_ignores_degradation() {
        let f = fuser(
            Arc::new(Unconfigured(Collaborator::SemanticSearch)),
            Arc::new(Fixed(ids(&["x"]))),
            true,
        );

        let err = f
            .fuse_with(
                "q",
                10,
                0.0,
                &default_collection(),
                RetrievalStrategy::PureSemantic,
            )
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn strategy_names_parse() {
        for strategy in RetrievalStrategy::ALL {
            assert_eq!(
                strategy.as_str().parse::<RetrievalStrategy>(),
                Ok(strategy)
            );
        }
        assert_eq!(
            "HYBRID_RRF".parse::<RetrievalStrategy>(),
            Ok(RetrievalStrategy::HybridRrf)
        );
        assert!("semantic".parse::<RetrievalStrategy>().is_err());
    }
}
