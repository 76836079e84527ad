//! Passage Index - 유사도 검색 트레이트 및 패시지 타입
//!
//! 인덱스 내부 구현(임베딩 모델, ANN 알고리즘, 저장 포맷)은
//! 이 트레이트 뒤에 숨겨집니다. 검색 엔진은 `similarity_search`만 사용합니다.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// 인덱싱된 검색 단위 (수집 파이프라인이 생성, 이후 불변)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    /// 패시지 본문
    pub content: String,
    /// 원본 문서 식별자 (예: 파일명)
    pub source_id: String,
    /// 원본 내 위치 (예: 페이지 번호)
    pub position: u32,
    /// 벡터 인덱스 내부 핸들
    pub embedding_ref: String,
}

impl Passage {
    pub fn new(
        content: impl Into<String>,
        source_id: impl Into<String>,
        position: u32,
    ) -> Self {
        let source_id = source_id.into();
        let embedding_ref = format!("{}#{}", source_id, position);
        Self {
            content: content.into(),
            source_id,
            position,
            embedding_ref,
        }
    }

    /// 앞뒤 공백을 제외한 문자 수
    pub fn trimmed_len(&self) -> usize {
        self.content.trim().chars().count()
    }
}

// ============================================================================
// PassageIndex Trait
// ============================================================================

/// 패시지 유사도 검색 인터페이스 (async)
///
/// 결과는 유사도 내림차순이어야 합니다. 동일 입력에 대해 결정적이어야
/// 검색 결과가 재현 가능합니다.
#[async_trait]
pub trait PassageIndex: Send + Sync {
    /// 쿼리(또는 시드 문자열)와 유사한 상위 k개 패시지
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Passage>>;

    /// 인덱싱된 패시지 수
    async fn count(&self) -> Result<usize>;
}

// ============================================================================
// Tests
// ============================================================================
