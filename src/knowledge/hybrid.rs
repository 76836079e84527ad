//! 하이브리드 검색 - 벡터 유사도 + 어휘 관련도 + 확장 폴백
//!
//! 1. 1차: 벡터 인덱스 top-K → 관련도 스코어 → 임계값(기본 2) 이상만 유지
//! 2. 1차 결과가 없으면 후보를 넓혀(기본 top-50) 한 번 더 검색,
//!    낮은 임계값(기본 1)으로 재스코어링
//! 3. 짧은 패시지 제거 → 점수 내림차순 안정 정렬 → 상위 N개 → 문자 수 자르기
//!
//! 인덱스 오류는 전파하지 않고 빈 결과 + 오류 표시로 돌려줍니다.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::passage::{Passage, PassageIndex};
use super::scorer::{RelevanceScorer, ScoringWeights};

// ============================================================================
// Configuration
// ============================================================================

/// 폴백 검색에 사용할 시드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackSeed {
    /// 같은 쿼리로 후보 수만 늘려 재검색
    Query,
    /// 코퍼스 대표 용어로 재검색 (예: 기관 이름)
    Term(String),
}

impl FallbackSeed {
    fn resolve<'a>(&'a self, query: &'a str) -> &'a str {
        match self {
            FallbackSeed::Query => query,
            FallbackSeed::Term(term) => term,
        }
    }
}

/// 검색 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 1차 검색 후보 수
    pub primary_k: usize,
    /// 1차 최소 관련도
    pub primary_min_score: u32,
    /// 폴백 검색 후보 수
    pub fallback_k: usize,
    /// 폴백 최소 관련도
    pub fallback_min_score: u32,
    pub fallback_seed: FallbackSeed,
    /// 컨텍스트에 넣을 최대 패시지 수
    pub max_passages: usize,
    /// 패시지당 최대 문자 수
    pub max_passage_chars: usize,
    /// 이보다 짧은 패시지는 버림 (trim 후 문자 수)
    pub min_passage_chars: usize,
    pub weights: ScoringWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            primary_k: 5,
            primary_min_score: 2,
            fallback_k: 50,
            fallback_min_score: 1,
            fallback_seed: FallbackSeed::Query,
            max_passages: 3,
            max_passage_chars: 500,
            min_passage_chars: 50,
            weights: ScoringWeights::default(),
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// 관련도 스코어가 붙은 패시지
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub relevance_score: u32,
}

/// 결과를 만든 검색 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStage {
    /// 1차 검색에서 조건을 만족
    Primary,
    /// 확장 폴백 검색에서 조건을 만족
    Fallback,
    /// 두 단계 모두 결과 없음 (또는 검색 실패)
    Empty,
}

/// 검색 성능 저하 사유
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum RetrievalError {
    #[error("vector index is not available")]
    IndexUnavailable,
    #[error("similarity search failed: {0}")]
    SearchFailed(String),
}

/// 검색 결과 (점수 내림차순)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalResult {
    pub passages: Vec<ScoredPassage>,
    pub stage: RetrievalStage,
    /// 성능 저하 모드로 빈 결과를 돌려준 경우
    pub degraded: Option<RetrievalError>,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self {
            passages: Vec::new(),
            stage: RetrievalStage::Empty,
            degraded: None,
        }
    }

    fn degraded(error: RetrievalError) -> Self {
        Self {
            degraded: Some(error),
            ..Self::empty()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
///
/// 인덱스는 시작 시 한 번 열고 읽기 전용으로 공유합니다.
/// 열지 못했으면 `None`이며 모든 검색이 `IndexUnavailable`로 끝납니다.
pub struct HybridRetriever {
    index: Option<Box<dyn PassageIndex>>,
    scorer: RelevanceScorer,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(index: Option<Box<dyn PassageIndex>>, config: RetrievalConfig) -> Self {
        Self {
            index,
            scorer: RelevanceScorer::new(config.weights),
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn index(&self) -> Option<&dyn PassageIndex> {
        self.index.as_deref()
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// 쿼리에 대한 컨텍스트 검색
    pub async fn retrieve(&self, query: &str) -> RetrievalResult {
        let Some(index) = self.index.as_deref() else {
            tracing::warn!("Retrieval skipped: vector index unavailable");
            return RetrievalResult::degraded(RetrievalError::IndexUnavailable);
        };

        // 1. 1차 검색
        let primary = match index.similarity_search(query, self.config.primary_k).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("Primary similarity search failed: {:#}", e);
                return RetrievalResult::degraded(RetrievalError::SearchFailed(e.to_string()));
            }
        };

        let qualified = self.qualify(query, primary, self.config.primary_min_score);
        if !qualified.is_empty() {
            return self.finish(qualified, RetrievalStage::Primary);
        }

        // 2. 확장 폴백 검색 (정확히 한 번)
        let seed = self.config.fallback_seed.resolve(query);
        tracing::debug!(
            "No primary passages for {:?}, broadening search (seed={:?}, k={})",
            query,
            seed,
            self.config.fallback_k
        );

        let broadened = match index.similarity_search(seed, self.config.fallback_k).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("Fallback similarity search failed: {:#}", e);
                return RetrievalResult::degraded(RetrievalError::SearchFailed(e.to_string()));
            }
        };

        let qualified = self.qualify(query, broadened, self.config.fallback_min_score);
        if qualified.is_empty() {
            tracing::info!("No qualifying passages after fallback");
            return RetrievalResult::empty();
        }

        self.finish(qualified, RetrievalStage::Fallback)
    }

    /// 스코어링 후 임계값과 최소 길이를 만족하는 후보만 (검색 순서 유지)
    fn qualify(&self, query: &str, candidates: Vec<Passage>, min_score: u32) -> Vec<ScoredPassage> {
        candidates
            .into_iter()
            .filter(|p| p.trimmed_len() >= self.config.min_passage_chars)
            .filter_map(|passage| {
                let relevance_score = self.scorer.score(query, &passage.content);
                (relevance_score >= min_score).then_some(ScoredPassage {
                    passage,
                    relevance_score,
                })
            })
            .collect()
    }

    /// 정렬, 개수 제한, 문자 수 자르기
    fn finish(&self, mut passages: Vec<ScoredPassage>, stage: RetrievalStage) -> RetrievalResult {
        // sort_by는 안정 정렬: 동점이면 검색 순서 유지
        passages.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
        passages.truncate(self.config.max_passages);

        for scored in &mut passages {
            scored.passage.content =
                truncate_chars(scored.passage.content.trim(), self.config.max_passage_chars);
        }

        tracing::info!(
            "Retrieved {} passage(s) via {:?} (top score: {})",
            passages.len(),
            stage,
            passages.first().map(|p| p.relevance_score).unwrap_or(0)
        );

        RetrievalResult {
            passages,
            stage,
            degraded: None,
        }
    }
}

/// 문자 단위로 자르기 (UTF-8 안전)
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;

    /// 호출 기록을 남기는 고정 인덱스
    struct FakeIndex {
        passages: Vec<Passage>,
        calls: Arc<AtomicUsize>,
        seeds: Arc<std::sync::Mutex<Vec<(String, usize)>>>,
    }

    impl FakeIndex {
        fn new(passages: Vec<Passage>) -> Self {
            Self {
                passages,
                calls: Arc::new(AtomicUsize::new(0)),
                seeds: Arc::new(std::sync::Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl PassageIndex for FakeIndex {
        async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seeds.lock().unwrap().push((query.to_string(), k));
            Ok(self.passages.iter().take(k).cloned().collect())
        }

        async fn count(&self) -> Result<usize> {
            Ok(self.passages.len())
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl PassageIndex for BrokenIndex {
        async fn similarity_search(&self, _query: &str, _k: usize) -> Result<Vec<Passage>> {
            anyhow::bail!("connection refused")
        }

        async fn count(&self) -> Result<usize> {
            anyhow::bail!("connection refused")
        }
    }

    fn padded(text: &str) -> String {
        format!("{} {}", text, "Nội dung bổ sung để đoạn văn đủ dài cho ngữ cảnh.")
    }

    fn passage(text: &str, position: u32) -> Passage {
        Passage::new(padded(text), "so-tay.pdf", position)
    }

    fn retriever(index: FakeIndex) -> HybridRetriever {
        HybridRetriever::new(Some(Box::new(index)), RetrievalConfig::default())
    }

    #[tokio::test]
    async fn test_primary_stage_ranks_by_score() {
        let index = FakeIndex::new(vec![
            passage("Trường có logo mới.", 1),
            passage("Logo của trường là gì: hình quyển sách.", 2),
            passage("Lịch thi học kỳ.", 3),
        ]);
        let calls = index.calls.clone();

        let result = retriever(index).retrieve("Logo của trường là gì?").await;

        assert_eq!(result.stage, RetrievalStage::Primary);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.len(), 2);
        assert_eq!(result.passages[0].passage.position, 2);
        assert!(result.passages[0].relevance_score >= 12);
        assert!(result.passages[0].relevance_score > result.passages[1].relevance_score);
    }

    #[tokio::test]
    async fn test_ties_keep_retrieval_order() {
        let index = FakeIndex::new(vec![
            passage("quy định thứ nhất", 1),
            passage("quy định thứ hai", 2),
            passage("quy định thứ ba", 3),
            passage("quy định thứ tư", 4),
        ]);
        let result = retriever(index).retrieve("quy định").await;

        let positions: Vec<u32> = result.passages.iter().map(|p| p.passage.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fallback_called_exactly_once() {
        let mut passages: Vec<Passage> = (0..5)
            .map(|i| passage("Thông báo không liên quan.", i))
            .collect();
        // 1차(top-5) 밖에 있는 관련 패시지
        passages.push(passage("Hướng dẫn đăng ký thư viện.", 99));
        let index = FakeIndex::new(passages);
        let calls = index.calls.clone();
        let seeds = index.seeds.clone();

        let result = retriever(index).retrieve("thư viện").await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(seeds.lock().unwrap()[1], ("thư viện".to_string(), 50));
        assert_eq!(result.stage, RetrievalStage::Fallback);
        assert_eq!(result.len(), 1);
        assert_eq!(result.passages[0].passage.position, 99);
    }

    #[tokio::test]
    async fn test_fallback_uses_configured_term() {
        let index = FakeIndex::new(vec![passage("Không liên quan.", 1)]);
        let seeds = index.seeds.clone();
        let config = RetrievalConfig {
            fallback_seed: FallbackSeed::Term("trường".to_string()),
            ..RetrievalConfig::default()
        };
        let retriever = HybridRetriever::new(Some(Box::new(index)), config);

        let result = retriever.retrieve("học phí").await;

        assert!(result.is_empty());
        assert_eq!(result.stage, RetrievalStage::Empty);
        assert!(result.degraded.is_none());
        assert_eq!(seeds.lock().unwrap()[1].0, "trường");
    }

    #[tokio::test]
    async fn test_fallback_lower_threshold() {
        // 스코어 가중치 1이면 1차 임계값(2)은 못 넘고 폴백 임계값(1)은 넘음
        let config = RetrievalConfig {
            weights: ScoringWeights {
                phrase: 1,
                token: 1,
                min_token_chars: 2,
            },
            ..RetrievalConfig::default()
        };
        let index = FakeIndex::new(vec![passage("Nội quy phòng máy tính.", 1)]);
        let retriever = HybridRetriever::new(Some(Box::new(index)), config);

        let result = retriever.retrieve("phòng").await;
        // phrase 1 + token 1 = 2 이므로 1차에서 통과
        assert_eq!(result.stage, RetrievalStage::Primary);

        let result = retriever.retrieve("máy in phòng khác").await;
        // "máy", "phòng" 토큰 2 → 1차 통과
        assert_eq!(result.stage, RetrievalStage::Primary);

        let result = retriever.retrieve("tính lương").await;
        // "tính" 토큰 1점 → 폴백에서만 통과
        assert_eq!(result.stage, RetrievalStage::Fallback);
        assert_eq!(result.passages[0].relevance_score, 1);
    }

    #[tokio::test]
    async fn test_limits_and_min_length() {
        let long = "thư viện ".repeat(200);
        let index = FakeIndex::new(vec![
            Passage::new("thư viện", "a.pdf", 1),
            Passage::new(long.clone(), "a.pdf", 2),
            Passage::new(long.clone(), "a.pdf", 3),
            Passage::new(long.clone(), "a.pdf", 4),
            Passage::new(long, "a.pdf", 5),
        ]);
        let result = retriever(index).retrieve("thư viện").await;

        assert_eq!(result.len(), 3);
        for scored in &result.passages {
            let len = scored.passage.content.trim().chars().count();
            assert!(len >= 50);
            assert!(len <= 500);
        }
        assert!(result.passages.iter().all(|p| p.passage.position != 1));
    }

    #[tokio::test]
    async fn test_idempotent() {
        let passages = vec![
            passage("Quy định về thiết bị.", 1),
            passage("Quy định về máy móc.", 2),
        ];
        let retriever = retriever(FakeIndex::new(passages));

        let first = retriever.retrieve("quy định về máy móc").await;
        let second = retriever.retrieve("quy định về máy móc").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_missing_index_is_degraded() {
        let retriever = HybridRetriever::new(None, RetrievalConfig::default());
        let result = retriever.retrieve("logo").await;
        assert!(result.is_empty());
        assert_eq!(result.degraded, Some(RetrievalError::IndexUnavailable));
    }

    #[tokio::test]
    async fn test_search_error_is_caught() {
        let retriever = HybridRetriever::new(Some(Box::new(BrokenIndex)), RetrievalConfig::default());
        let result = retriever.retrieve("logo").await;
        assert!(result.is_empty());
        assert!(matches!(result.degraded, Some(RetrievalError::SearchFailed(_))));
    }

    #[test]
    fn test_truncate_chars_unicode() {
        assert_eq!(truncate_chars("trường học", 6), "trường");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
