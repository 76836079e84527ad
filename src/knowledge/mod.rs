//! Knowledge 모듈 - 하이브리드 검색
//!
//! - Passage: 인덱싱된 검색 단위와 유사도 검색 트레이트
//! - Lance: LanceDB 기반 패시지 인덱스
//! - Scorer: 쿼리-패시지 어휘 관련도
//! - Hybrid: 벡터 검색 + 관련도 필터 + 확장 폴백

mod hybrid;
mod lance;
mod passage;
mod scorer;

// Re-exports
pub use hybrid::{
    FallbackSeed, HybridRetriever, RetrievalConfig, RetrievalError, RetrievalResult,
    RetrievalStage, ScoredPassage,
};
pub(crate) use hybrid::truncate_chars;
pub use lance::LancePassageIndex;
pub use passage::{Passage, PassageIndex};
pub use scorer::{RelevanceScorer, ScoringWeights};
