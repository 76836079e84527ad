//! routed-rag - 의도 라우팅 + 하이브리드 검색 RAG 엔진
//!
//! 질문을 카테고리(문서 검색, 장치 제어, 센서 읽기, 잡담)로 분류하고,
//! 문서 검색이면 LanceDB 벡터 검색 + 어휘 관련도 스코어링 + 확장 폴백으로
//! 컨텍스트를 모아 생성 프롬프트를 만듭니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod generation;
pub mod knowledge;
pub mod prompt;
pub mod router;
pub mod tools;

// Re-exports
pub use config::{get_data_dir, AppConfig, EmbeddingBackend, EmbeddingConfig, GenerationConfig};
pub use embedding::{create_embedder, EmbeddingProvider, GeminiEmbedding, OllamaEmbedding};
pub use engine::{Query, QueryEngine, QueryError, QueryOutcome};
pub use generation::{OllamaGenerator, TextGenerator};
pub use knowledge::{
    FallbackSeed, HybridRetriever, LancePassageIndex, Passage, PassageIndex, RelevanceScorer,
    RetrievalConfig, RetrievalError, RetrievalResult, RetrievalStage, ScoredPassage,
    ScoringWeights,
};
pub use prompt::{Prompt, PromptBuilder, PromptKind};
pub use router::{IntentRouter, RouterConfig, RoutingDecision, ToolCategory};
pub use tools::{ToolError, ToolRegistry, ToolResponse, ToolServer};
