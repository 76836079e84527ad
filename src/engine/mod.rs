//! Query Engine - 라우팅 → 검색 → 프롬프트 조립
//!
//! 시작 시 한 번 만들어 쿼리마다 참조로 사용합니다. 인덱스(임베딩 모델 포함)
//! 초기화 비용은 여기서 한 번만 치릅니다.

use serde::Serialize;
use thiserror::Error;

use crate::config::AppConfig;
use crate::embedding::create_embedder;
use crate::knowledge::{
    HybridRetriever, LancePassageIndex, PassageIndex, RetrievalConfig, RetrievalResult,
};
use crate::prompt::{Prompt, PromptBuilder};
use crate::router::{IntentRouter, RouterConfig, RoutingDecision};

// ============================================================================
// Query
// ============================================================================

/// 쿼리 입력 에러
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("query is empty")]
    Empty,
}

/// 비어 있지 않은 사용자 쿼리 (앞뒤 공백 제거됨)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(String);

impl Query {
    pub fn new(raw: &str) -> Result<Self, QueryError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(QueryError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// QueryOutcome
// ============================================================================

/// 쿼리 처리 결과
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub prompt: Prompt,
    pub decision: RoutingDecision,
    pub retrieval: RetrievalResult,
}

// ============================================================================
// QueryEngine
// ============================================================================

/// 라우터 + 검색기 + 프롬프트 빌더를 묶은 컨텍스트
pub struct QueryEngine {
    router: IntentRouter,
    retriever: HybridRetriever,
    prompt_builder: PromptBuilder,
}

impl QueryEngine {
    pub fn new(
        router_config: RouterConfig,
        retrieval_config: RetrievalConfig,
        index: Option<Box<dyn PassageIndex>>,
    ) -> Self {
        let prompt_builder = PromptBuilder::new(
            retrieval_config.max_passages,
            retrieval_config.max_passage_chars,
        );
        Self {
            router: IntentRouter::new(router_config),
            retriever: HybridRetriever::new(index, retrieval_config),
            prompt_builder,
        }
    }

    /// 설정으로부터 엔진 생성
    ///
    /// 인덱스를 열지 못해도 실패하지 않고 성능 저하 모드로 시작합니다.
    pub async fn from_config(config: &AppConfig) -> Self {
        let index_path = config.index_path();

        let index: Option<Box<dyn PassageIndex>> = match create_embedder(&config.embedding) {
            Ok(embedder) => match LancePassageIndex::open(&index_path, embedder).await {
                Ok(index) => Some(Box::new(index)),
                Err(e) => {
                    tracing::warn!("Passage index unavailable ({:#}), retrieval disabled", e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Embedder unavailable ({:#}), retrieval disabled", e);
                None
            }
        };

        Self::new(config.router.clone(), config.retrieval.clone(), index)
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    /// 쿼리 처리
    ///
    /// 검색이 필요 없는 카테고리는 인덱스를 호출하지 않습니다.
    pub async fn handle_query(&self, query: &Query) -> QueryOutcome {
        let decision = self.router.classify(query.as_str());

        let retrieval = if decision.requires_retrieval() {
            self.retriever.retrieve(query.as_str()).await
        } else {
            RetrievalResult::empty()
        };

        let prompt = self
            .prompt_builder
            .build(query.as_str(), &decision, &retrieval);

        tracing::info!(
            "Query handled: category={} confidence={:.2} passages={} prompt={:?}",
            decision.category,
            decision.confidence,
            retrieval.len(),
            prompt.kind
        );

        QueryOutcome {
            prompt,
            decision,
            retrieval,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
