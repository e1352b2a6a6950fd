//! crates/inbox_assistant_core/src/similarity.rs
//!
//! Similar-message discovery: given a target message and the user's open
//! inbox, find the messages describing the same issue so one reply can be
//! fanned out to all of them.
//!
//! The tiers run in a fixed order and the first one producing matches wins:
//! exact duplicates after normalization, embedding cosine similarity with
//! accept/floor thresholds, then a language-model judgment. No tier error
//! ever reaches the caller; the worst outcome is an empty list.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{Message, MessageCategory};
use crate::ports::{CandidateText, EmbeddingService, LanguageModelService, PortError, PortResult};
use crate::text::{normalize_for_comparison, truncate_chars};
use crate::tfidf::{cosine_similarity, TfIdfEmbedder};

//=========================================================================================
// Configuration
//=========================================================================================

/// Which probabilistic tier runs first after the exact-duplicate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityStrategy {
    EmbeddingFirst,
    JudgeFirst,
}

#[derive(Debug, Clone)]
pub struct SimilarityConfig {
    /// Maximum number of candidates compared against the target.
    pub pool_cap: usize,
    /// Candidates at or above this score are accepted outright.
    pub accept_threshold: f32,
    /// When nothing clears `accept_threshold`, the best few above this floor are kept.
    pub floor_threshold: f32,
    pub fallback_top_k: usize,
    /// Candidates sent to a language model for judgment.
    pub judge_candidate_limit: usize,
    pub judge_candidate_chars: usize,
    pub judge_target_chars: usize,
    pub strategy: SimilarityStrategy,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            pool_cap: 50,
            accept_threshold: 0.6,
            floor_threshold: 0.15,
            fallback_top_k: 3,
            judge_candidate_limit: 25,
            judge_candidate_chars: 280,
            judge_target_chars: 400,
            strategy: SimilarityStrategy::EmbeddingFirst,
        }
    }
}

//=========================================================================================
// The Pipeline
//=========================================================================================

/// A candidate id paired with its cosine score against the target.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub id: String,
    pub score: f32,
}

pub struct SimilarityPipeline {
    config: SimilarityConfig,
    /// Remote providers, tried in order before the local TF-IDF fallback.
    embedders: Vec<Arc<dyn EmbeddingService>>,
    fallback_embedder: TfIdfEmbedder,
    judges: Vec<Arc<dyn LanguageModelService>>,
}

impl SimilarityPipeline {
    pub fn new(
        config: SimilarityConfig,
        embedders: Vec<Arc<dyn EmbeddingService>>,
        judges: Vec<Arc<dyn LanguageModelService>>,
    ) -> Self {
        Self {
            config,
            embedders,
            fallback_embedder: TfIdfEmbedder::new(),
            judges,
        }
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// Returns the ids of pool messages describing the same issue as `target`.
    pub async fn find_similar(&self, target: &Message, pool: &[Message]) -> Vec<String> {
        if normalize_for_comparison(&target.body).is_empty() {
            debug!(target_id = %target.id, "Target body is empty; nothing to compare.");
            return Vec::new();
        }

        let candidates = self.narrow_pool(target, pool);
        if candidates.is_empty() {
            return Vec::new();
        }

        let exact = exact_duplicates(target, &candidates);
        if !exact.is_empty() {
            info!(target_id = %target.id, matches = exact.len(), "Exact duplicates found.");
            return exact;
        }

        let tiers = match self.config.strategy {
            SimilarityStrategy::EmbeddingFirst => [Tier::Embedding, Tier::Judge],
            SimilarityStrategy::JudgeFirst => [Tier::Judge, Tier::Embedding],
        };

        for tier in tiers {
            let matches = match tier {
                Tier::Embedding => self.embedding_tier(target, &candidates).await,
                Tier::Judge => self.judge_tier(target, &candidates).await,
            };
            match matches {
                Ok(ids) if !ids.is_empty() => {
                    info!(target_id = %target.id, tier = ?tier, matches = ids.len(), "Similar messages found.");
                    return ids;
                }
                Ok(_) => debug!(target_id = %target.id, tier = ?tier, "Tier produced no matches."),
                Err(e) => warn!(target_id = %target.id, tier = ?tier, error = %e, "Tier failed; falling back."),
            }
        }

        Vec::new()
    }

    /// Removes the target, moves same-category candidates to the front, and applies the cap.
    ///
    /// A defaulted `General` category never reorders, so it cannot hide genuine duplicates.
    pub fn narrow_pool<'a>(&self, target: &Message, pool: &'a [Message]) -> Vec<&'a Message> {
        let without_target = pool.iter().filter(|m| m.id != target.id);

        let mut ordered: Vec<&Message> = if target.category != MessageCategory::General {
            let (same, other): (Vec<&Message>, Vec<&Message>) =
                without_target.partition(|m| m.category == target.category);
            same.into_iter().chain(other).collect()
        } else {
            without_target.collect()
        };

        ordered.truncate(self.config.pool_cap);
        ordered
    }

    async fn embedding_tier(&self, target: &Message, candidates: &[&Message]) -> PortResult<Vec<String>> {
        let scored = self.rank_by_embedding(target, candidates).await?;
        Ok(select_by_threshold(
            &scored,
            self.config.accept_threshold,
            self.config.floor_threshold,
            self.config.fallback_top_k,
        ))
    }

    /// Scores every candidate against the target, in pool order.
    pub async fn rank_by_embedding(
        &self,
        target: &Message,
        candidates: &[&Message],
    ) -> PortResult<Vec<ScoredCandidate>> {
        let mut texts = Vec::with_capacity(candidates.len() + 1);
        texts.push(target.body.clone());
        texts.extend(candidates.iter().map(|m| m.body.clone()));

        let vectors = self.embed_with_fallback(&texts).await?;
        let (target_vec, candidate_vecs) = vectors
            .split_first()
            .ok_or_else(|| PortError::MalformedResponse("no target embedding".to_string()))?;

        Ok(candidates
            .iter()
            .zip(candidate_vecs)
            .map(|(m, v)| ScoredCandidate {
                id: m.id.clone(),
                score: cosine_similarity(target_vec, v),
            })
            .collect())
    }

    async fn embed_with_fallback(&self, texts: &[String]) -> PortResult<Vec<Vec<f32>>> {
        for embedder in &self.embedders {
            match embedder.embed(texts).await {
                Ok(vectors) if vectors.len() == texts.len() => {
                    debug!(provider = embedder.name(), count = vectors.len(), "Embeddings computed.");
                    return Ok(vectors);
                }
                Ok(vectors) => warn!(
                    provider = embedder.name(),
                    expected = texts.len(),
                    got = vectors.len(),
                    "Embedding provider returned the wrong number of vectors."
                ),
                Err(e) => warn!(provider = embedder.name(), error = %e, "Embedding provider failed."),
            }
        }
        debug!("Falling back to local TF-IDF embeddings.");
        self.fallback_embedder.embed(texts).await
    }

    async fn judge_tier(&self, target: &Message, candidates: &[&Message]) -> PortResult<Vec<String>> {
        if self.judges.is_empty() {
            return Ok(Vec::new());
        }

        let limited: Vec<CandidateText> = candidates
            .iter()
            .take(self.config.judge_candidate_limit)
            .map(|m| CandidateText {
                id: m.id.clone(),
                text: truncate_chars(&m.body, self.config.judge_candidate_chars),
            })
            .collect();
        let target_text = truncate_chars(&target.body, self.config.judge_target_chars);

        let mut last_error = None;
        for judge in &self.judges {
            match judge.judge_similarity(&target_text, &limited).await {
                Ok(ids) => {
                    // Models occasionally invent ids; keep only those we actually sent.
                    let valid: Vec<String> = ids
                        .into_iter()
                        .filter(|id| limited.iter().any(|c| &c.id == id))
                        .collect();
                    debug!(provider = judge.name(), matches = valid.len(), "Model judged similarity.");
                    return Ok(valid);
                }
                Err(e) => {
                    warn!(provider = judge.name(), error = %e, "Similarity judgment failed.");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| PortError::Unexpected("no judge answered".to_string())))
    }
}

#[derive(Debug, Clone, Copy)]
enum Tier {
    Embedding,
    Judge,
}

/// Every candidate whose normalized body equals the target's.
pub fn exact_duplicates(target: &Message, candidates: &[&Message]) -> Vec<String> {
    let needle = normalize_for_comparison(&target.body);
    if needle.is_empty() {
        return Vec::new();
    }
    candidates
        .iter()
        .filter(|m| normalize_for_comparison(&m.body) == needle)
        .map(|m| m.id.clone())
        .collect()
}

/// Applies the accept threshold, falling back to the best `top_k` above `floor`.
///
/// Sorting is stable, so equal scores keep their pool order.
pub fn select_by_threshold(scored: &[ScoredCandidate], accept: f32, floor: f32, top_k: usize) -> Vec<String> {
    let accepted: Vec<String> = scored
        .iter()
        .filter(|c| c.score >= accept)
        .map(|c| c.id.clone())
        .collect();
    if !accepted.is_empty() {
        return accepted;
    }

    let mut ranked: Vec<&ScoredCandidate> = scored.iter().filter(|c| c.score > floor).collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.into_iter().take(top_k).map(|c| c.id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnalysisResult, Channel, ResponseCost, Sentiment};
    use crate::ports::{DraftRequest, RelevanceVerdict};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    fn message(id: &str, body: &str, category: MessageCategory) -> Message {
        Message {
            id: id.to_string(),
            sender_name: "Alice Smith".to_string(),
            sender_handle: "alice@example.com".to_string(),
            channel: Channel::Email,
            subject: None,
            body: body.to_string(),
            received_at: Utc::now(),
            is_read: false,
            is_replied: false,
            category,
            sentiment: Sentiment::Neutral,
            predicted_cost: ResponseCost::Low,
            tags: vec![],
            suggested_reply: None,
        }
    }

    fn scored(pairs: &[(&str, f32)]) -> Vec<ScoredCandidate> {
        pairs
            .iter()
            .map(|(id, score)| ScoredCandidate { id: id.to_string(), score: *score })
            .collect()
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingService for FailingEmbedder {
        fn name(&self) -> &str {
            "failing"
        }
        async fn embed(&self, _texts: &[String]) -> PortResult<Vec<Vec<f32>>> {
            Err(PortError::Transport("connection refused".to_string()))
        }
    }

    /// Records batch sizes and returns the same vector for every text.
    #[derive(Default)]
    struct RecordingEmbedder {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbeddingService for RecordingEmbedder {
        fn name(&self) -> &str {
            "recording"
        }
        async fn embed(&self, texts: &[String]) -> PortResult<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(texts.len());
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// Returns orthogonal vectors so the embedding tier never matches.
    struct OrthogonalEmbedder;

    #[async_trait]
    impl EmbeddingService for OrthogonalEmbedder {
        fn name(&self) -> &str {
            "orthogonal"
        }
        async fn embed(&self, texts: &[String]) -> PortResult<Vec<Vec<f32>>> {
            Ok((0..texts.len())
                .map(|i| {
                    let mut v = vec![0.0; texts.len()];
                    v[i] = 1.0;
                    v
                })
                .collect())
        }
    }

    struct StubJudge {
        answer: PortResult<Vec<String>>,
        seen: Mutex<Vec<usize>>,
    }

    impl StubJudge {
        fn answering(ids: &[&str]) -> Self {
            Self {
                answer: Ok(ids.iter().map(|s| s.to_string()).collect()),
                seen: Mutex::new(vec![]),
            }
        }
        fn failing() -> Self {
            Self {
                answer: Err(PortError::MalformedResponse("not json".to_string())),
                seen: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl LanguageModelService for StubJudge {
        fn name(&self) -> &str {
            "stub"
        }
        async fn judge_similarity(&self, _t: &str, candidates: &[CandidateText]) -> PortResult<Vec<String>> {
            self.seen.lock().unwrap().push(candidates.len());
            match &self.answer {
                Ok(ids) => Ok(ids.clone()),
                Err(e) => Err(PortError::MalformedResponse(e.to_string())),
            }
        }
        async fn classify(&self, _text: &str) -> PortResult<AnalysisResult> {
            Err(PortError::Unexpected("unused".to_string()))
        }
        async fn draft_reply(&self, _request: &DraftRequest) -> PortResult<String> {
            Err(PortError::Unexpected("unused".to_string()))
        }
        async fn assess_relevance(&self, _s: &str, _b: &str) -> PortResult<RelevanceVerdict> {
            Err(PortError::Unexpected("unused".to_string()))
        }
    }

    fn pipeline(
        embedders: Vec<Arc<dyn EmbeddingService>>,
        judges: Vec<Arc<dyn LanguageModelService>>,
    ) -> SimilarityPipeline {
        SimilarityPipeline::new(SimilarityConfig::default(), embedders, judges)
    }

    #[tokio::test]
    async fn html_encoded_body_is_an_exact_duplicate() {
        let target = message("t", "it&#39;s broken", MessageCategory::General);
        let pool = vec![
            target.clone(),
            message("c1", "it's broken", MessageCategory::Complaint),
            message("c2", "totally unrelated question about hats", MessageCategory::Product),
        ];
        let p = pipeline(vec![Arc::new(FailingEmbedder)], vec![Arc::new(StubJudge::failing())]);
        assert_eq!(p.find_similar(&target, &pool).await, vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn exact_duplicates_win_regardless_of_category() {
        let target = message("t", "Where is my ORDER?", MessageCategory::Shipping);
        let pool = vec![
            message("a", "where is my order?", MessageCategory::Other),
            message("b", "  Where   is my order? ", MessageCategory::Shipping),
            message("c", "Where is my refund?", MessageCategory::Returns),
        ];
        let judge = Arc::new(StubJudge::answering(&["c"]));
        let p = pipeline(vec![], vec![judge.clone()]);
        let mut ids = p.find_similar(&target, &pool).await;
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert!(judge.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn late_package_scenario_matches_through_tfidf() {
        let target = message("msg0", "My package was meant to arrive 2 days ago.", MessageCategory::Shipping);
        let pool = vec![
            target.clone(),
            message("msg1", "My package was meant to arrive 3 days ago.", MessageCategory::Shipping),
        ];
        let p = pipeline(vec![Arc::new(FailingEmbedder)], vec![]);
        assert_eq!(p.find_similar(&target, &pool).await, vec!["msg1".to_string()]);
    }

    #[tokio::test]
    async fn pool_is_capped_before_comparison() {
        let target = message("t", "Do you ship to Canada?", MessageCategory::Shipping);
        let pool: Vec<Message> = (0..120)
            .map(|i| message(&format!("m{i}"), &format!("question number {i}"), MessageCategory::Other))
            .collect();
        let recorder = Arc::new(RecordingEmbedder::default());
        let judge = Arc::new(StubJudge::failing());
        let p = pipeline(vec![recorder.clone()], vec![judge.clone()]);

        let ids = p.find_similar(&target, &pool).await;
        assert_eq!(recorder.batches.lock().unwrap().as_slice(), &[51]);
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn narrow_pool_prefers_same_category_without_filtering() {
        let target = message("t", "late parcel", MessageCategory::Shipping);
        let pool = vec![
            message("x", "a", MessageCategory::Product),
            message("t", "late parcel", MessageCategory::Shipping),
            message("y", "b", MessageCategory::Shipping),
            message("z", "c", MessageCategory::General),
        ];
        let p = pipeline(vec![], vec![]);
        let ids: Vec<&str> = p.narrow_pool(&target, &pool).iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["y", "x", "z"]);
    }

    #[test]
    fn narrow_pool_keeps_order_for_general_target() {
        let target = message("t", "hello", MessageCategory::General);
        let pool = vec![
            message("x", "a", MessageCategory::Product),
            message("y", "b", MessageCategory::General),
        ];
        let p = pipeline(vec![], vec![]);
        let ids: Vec<&str> = p.narrow_pool(&target, &pool).iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
    }

    #[test]
    fn threshold_accepts_everything_at_or_above_accept() {
        let ids = select_by_threshold(&scored(&[("a", 0.6), ("b", 0.9), ("c", 0.59)]), 0.6, 0.15, 3);
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn threshold_falls_back_to_top_three_above_floor() {
        let ids = select_by_threshold(
            &scored(&[("a", 0.2), ("b", 0.5), ("c", 0.15), ("d", 0.3), ("e", 0.4)]),
            0.6,
            0.15,
            3,
        );
        assert_eq!(ids, vec!["b".to_string(), "e".to_string(), "d".to_string()]);
    }

    #[test]
    fn threshold_ties_keep_pool_order() {
        let ids = select_by_threshold(&scored(&[("a", 0.3), ("b", 0.4), ("c", 0.3), ("d", 0.3)]), 0.6, 0.15, 3);
        assert_eq!(ids, vec!["b".to_string(), "a".to_string(), "c".to_string()]);
    }

    #[test]
    fn threshold_is_monotonic() {
        let cases = [
            vec![("a", 0.9), ("b", 0.7), ("c", 0.2)],
            vec![("a", 0.5), ("b", 0.45), ("c", 0.4), ("d", 0.35), ("e", 0.16)],
            vec![("a", 0.14), ("b", 0.6), ("c", 0.61)],
        ];
        for case in cases {
            let s = scored(&case);
            let selected = select_by_threshold(&s, 0.6, 0.15, 3);
            for hi in &s {
                for lo in &s {
                    if hi.score > lo.score && lo.score > 0.15 && selected.contains(&lo.id) {
                        assert!(selected.contains(&hi.id), "{} excluded while {} included", hi.id, lo.id);
                    }
                }
            }
        }
    }

    #[test]
    fn threshold_yields_nothing_below_floor() {
        assert!(select_by_threshold(&scored(&[("a", 0.1), ("b", 0.15)]), 0.6, 0.15, 3).is_empty());
    }

    #[tokio::test]
    async fn inconclusive_embeddings_fall_through_to_judge() {
        let target = message("t", "Can I change the colour of my mug?", MessageCategory::Custom);
        let pool = vec![
            message("a", "Is a different glaze possible for the cup I bought?", MessageCategory::Custom),
            message("b", "Thanks!", MessageCategory::General),
        ];
        let judge = Arc::new(StubJudge::answering(&["a", "invented-id"]));
        let p = pipeline(vec![Arc::new(OrthogonalEmbedder)], vec![judge.clone()]);
        assert_eq!(p.find_similar(&target, &pool).await, vec!["a".to_string()]);
        assert_eq!(judge.seen.lock().unwrap().as_slice(), &[2]);
    }

    #[tokio::test]
    async fn judge_first_strategy_consults_model_before_embeddings() {
        let target = message("t", "My package was meant to arrive 2 days ago.", MessageCategory::Shipping);
        let pool = vec![message("a", "My package was meant to arrive 3 days ago.", MessageCategory::Shipping)];
        let recorder = Arc::new(RecordingEmbedder::default());
        let config = SimilarityConfig {
            strategy: SimilarityStrategy::JudgeFirst,
            ..SimilarityConfig::default()
        };
        let p = SimilarityPipeline::new(config, vec![recorder.clone()], vec![Arc::new(StubJudge::answering(&["a"]))]);
        assert_eq!(p.find_similar(&target, &pool).await, vec!["a".to_string()]);
        assert!(recorder.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn judge_sees_at_most_twenty_five_candidates() {
        let target = message("t", "alpha", MessageCategory::General);
        let pool: Vec<Message> = (0..40).map(|i| message(&format!("m{i}"), "beta", MessageCategory::General)).collect();
        let judge = Arc::new(StubJudge::answering(&[]));
        let p = pipeline(vec![Arc::new(OrthogonalEmbedder)], vec![judge.clone()]);
        assert!(p.find_similar(&target, &pool).await.is_empty());
        assert_eq!(judge.seen.lock().unwrap().as_slice(), &[25]);
    }

    #[tokio::test]
    async fn everything_failing_yields_empty_list() {
        let target = message("t", "Completely unique words here", MessageCategory::General);
        let pool = vec![message("a", "nothing in common at all", MessageCategory::General)];
        let p = pipeline(
            vec![Arc::new(FailingEmbedder)],
            vec![Arc::new(StubJudge::failing()), Arc::new(StubJudge::failing())],
        );
        assert!(p.find_similar(&target, &pool).await.is_empty());
    }

    #[tokio::test]
    async fn empty_target_or_pool_short_circuits() {
        let judge = Arc::new(StubJudge::answering(&["a"]));
        let p = pipeline(vec![], vec![judge.clone()]);
        let blank = message("t", "   ", MessageCategory::General);
        assert!(p.find_similar(&blank, &[message("a", "   ", MessageCategory::General)]).await.is_empty());

        let target = message("t", "hello", MessageCategory::General);
        assert!(p.find_similar(&target, &[target.clone()]).await.is_empty());
        assert!(judge.seen.lock().unwrap().is_empty());
    }
}
