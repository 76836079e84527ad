//! Relevance Scorer - 어휘 기반 관련도 스코어링
//!
//! 짧은 패시지에서는 쿼리 전체 구문 포함이 개별 토큰 겹침보다
//! 훨씬 강한 신호입니다. 기본 가중치 10:2가 이 비대칭을 표현합니다.

use serde::{Deserialize, Serialize};

/// 스코어링 가중치
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// 쿼리 전체 구문이 패시지에 포함될 때
    pub phrase: u32,
    /// 토큰 하나가 패시지에 포함될 때
    pub token: u32,
    /// 이 길이(문자 수) 이하의 토큰은 무시
    pub min_token_chars: usize,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            phrase: 10,
            token: 2,
            min_token_chars: 2,
        }
    }
}

/// 쿼리-패시지 관련도 스코어러 (상태 없음, 순수 함수)
#[derive(Debug, Clone, Copy, Default)]
pub struct RelevanceScorer {
    weights: ScoringWeights,
}

impl RelevanceScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> ScoringWeights {
        self.weights
    }

    /// 관련도 스코어 계산
    ///
    /// - 정규화된 쿼리 전체가 패시지에 연속 부분 문자열로 있으면 `phrase`
    /// - `min_token_chars`보다 긴 토큰마다 패시지에 있으면 `token`
    pub fn score(&self, query: &str, passage_text: &str) -> u32 {
        let query = normalize(query);
        let passage = normalize(passage_text);

        let mut score = 0;

        let phrase = query.trim_end_matches(SENTENCE_END);
        if !phrase.is_empty() && passage.contains(phrase) {
            score += self.weights.phrase;
        }

        for token in query.split_whitespace() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric());
            if token.chars().count() <= self.weights.min_token_chars {
                continue;
            }
            if passage.contains(token) {
                score += self.weights.token;
            }
        }

        score
    }
}

/// 구문 비교 시 제거하는 문장 끝 문장부호
const SENTENCE_END: &[char] = &['?', '!', '.', '…', ' '];

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

// ============================================================================
// Tests
// ============================================================================
