//! Intent Router - 키워드 + 길이 휴리스틱 기반 쿼리 분류
//!
//! 카테고리는 닫힌 열거형입니다. 새 카테고리를 추가하면 `match`를 쓰는
//! 모든 호출 지점(프롬프트 빌더, CLI 디스패치)이 컴파일 단계에서 드러납니다.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// ToolCategory
// ============================================================================

/// 쿼리 처리 카테고리
///
/// 선언 순서가 동점 시 우선순위입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// 내부 문서 검색 (기본 카테고리)
    KnowledgeRetrieval,
    /// 장치 제어 (LED, 팬, 펌프)
    DeviceControl,
    /// 센서 읽기 (온도, 습도, 조도)
    SensorRead,
    /// 인사 / 잡담
    GeneralChat,
}

impl ToolCategory {
    /// 우선순위 순서의 전체 카테고리
    pub const ALL: [ToolCategory; 4] = [
        ToolCategory::KnowledgeRetrieval,
        ToolCategory::DeviceControl,
        ToolCategory::SensorRead,
        ToolCategory::GeneralChat,
    ];

    /// 어떤 키워드도 맞지 않을 때 선택되는 카테고리
    pub const DEFAULT: ToolCategory = ToolCategory::KnowledgeRetrieval;

    pub fn name(self) -> &'static str {
        match self {
            ToolCategory::KnowledgeRetrieval => "rag_search",
            ToolCategory::DeviceControl => "device_control",
            ToolCategory::SensorRead => "sensor_read",
            ToolCategory::GeneralChat => "general_chat",
        }
    }

    pub fn requires_retrieval(self) -> bool {
        match self {
            ToolCategory::KnowledgeRetrieval => true,
            ToolCategory::DeviceControl | ToolCategory::SensorRead | ToolCategory::GeneralChat => {
                false
            }
        }
    }

    /// 기본 트리거 키워드 (소문자)
    pub fn default_keywords(self) -> &'static [&'static str] {
        match self {
            ToolCategory::KnowledgeRetrieval => &[
                "về",
                "là gì",
                "tài liệu",
                "thông tin",
                "quy định",
                "máy móc",
                "hướng dẫn",
            ],
            ToolCategory::DeviceControl => &[
                "bật",
                "tắt",
                "điều khiển",
                "thiết bị",
                "đèn",
                "quạt",
                "máy bơm",
            ],
            ToolCategory::SensorRead => &["cảm biến", "nhiệt độ", "độ ẩm", "ánh sáng", "sensor"],
            ToolCategory::GeneralChat => &["chào", "hi", "hello", "tạm biệt", "cảm ơn", "bạn là ai"],
        }
    }

    fn index(self) -> usize {
        match self {
            ToolCategory::KnowledgeRetrieval => 0,
            ToolCategory::DeviceControl => 1,
            ToolCategory::SensorRead => 2,
            ToolCategory::GeneralChat => 3,
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// 라우터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// 이 단어 수를 넘는 쿼리는 검색 카테고리에 보너스
    pub long_query_words: usize,
    /// 긴 쿼리 보너스
    pub long_query_bonus: u32,
    pub knowledge_keywords: Vec<String>,
    pub device_keywords: Vec<String>,
    pub sensor_keywords: Vec<String>,
    pub chat_keywords: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let owned = |category: ToolCategory| {
            category
                .default_keywords()
                .iter()
                .map(|k| k.to_string())
                .collect()
        };
        Self {
            long_query_words: 6,
            long_query_bonus: 2,
            knowledge_keywords: owned(ToolCategory::KnowledgeRetrieval),
            device_keywords: owned(ToolCategory::DeviceControl),
            sensor_keywords: owned(ToolCategory::SensorRead),
            chat_keywords: owned(ToolCategory::GeneralChat),
        }
    }
}

impl RouterConfig {
    fn keywords(&self, category: ToolCategory) -> &[String] {
        match category {
            ToolCategory::KnowledgeRetrieval => &self.knowledge_keywords,
            ToolCategory::DeviceControl => &self.device_keywords,
            ToolCategory::SensorRead => &self.sensor_keywords,
            ToolCategory::GeneralChat => &self.chat_keywords,
        }
    }
}

// ============================================================================
// RoutingDecision
// ============================================================================

/// 분류 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub category: ToolCategory,
    /// 선택 점수 / 전체 최대 점수 (모두 0이면 0.0)
    pub confidence: f32,
    /// 카테고리별 원점수 (`ToolCategory::ALL` 순서)
    pub scores: [u32; 4],
}

impl RoutingDecision {
    pub fn score_of(&self, category: ToolCategory) -> u32 {
        self.scores[category.index()]
    }

    pub fn requires_retrieval(&self) -> bool {
        self.category.requires_retrieval()
    }
}

// ============================================================================
// IntentRouter
// ============================================================================

/// 키워드 기반 의도 라우터 (순수 함수, 상태 없음)
#[derive(Debug, Clone)]
pub struct IntentRouter {
    config: RouterConfig,
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

impl IntentRouter {
    pub fn new(mut config: RouterConfig) -> Self {
        // 쿼리는 소문자로 비교하므로 키워드도 맞춤
        for category in ToolCategory::ALL {
            let keywords = match category {
                ToolCategory::KnowledgeRetrieval => &mut config.knowledge_keywords,
                ToolCategory::DeviceControl => &mut config.device_keywords,
                ToolCategory::SensorRead => &mut config.sensor_keywords,
                ToolCategory::GeneralChat => &mut config.chat_keywords,
            };
            keywords.retain(|k| !k.trim().is_empty());
            for keyword in keywords.iter_mut() {
                *keyword = keyword.trim().to_lowercase();
            }
        }
        Self { config }
    }

    /// 쿼리 분류
    ///
    /// 최고 점수 카테고리를 고르고, 동점이면 `ToolCategory::ALL` 순서를 따릅니다.
    pub fn classify(&self, query: &str) -> RoutingDecision {
        let query = query.to_lowercase();
        let word_count = query.split_whitespace().count();

        let mut scores = [0u32; 4];
        for category in ToolCategory::ALL {
            let hits = self
                .config
                .keywords(category)
                .iter()
                .filter(|keyword| query.contains(keyword.as_str()))
                .count() as u32;
            scores[category.index()] = hits;
        }

        if word_count > self.config.long_query_words {
            scores[ToolCategory::KnowledgeRetrieval.index()] += self.config.long_query_bonus;
        }

        let max = scores.iter().copied().max().unwrap_or(0);
        if max == 0 {
            return RoutingDecision {
                category: ToolCategory::DEFAULT,
                confidence: 0.0,
                scores,
            };
        }

        // ALL은 우선순위 순서이므로 첫 최대값이 동점 규칙을 만족
        let category = ToolCategory::ALL
            .into_iter()
            .find(|c| scores[c.index()] == max)
            .unwrap_or(ToolCategory::DEFAULT);

        let confidence = scores[category.index()] as f32 / max as f32;

        tracing::debug!(
            "Routed to {} (scores={:?}, words={})",
            category,
            scores,
            word_count
        );

        RoutingDecision {
            category,
            confidence,
            scores,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> IntentRouter {
        IntentRouter::default()
    }

    #[test]
    fn test_knowledge_query() {
        let decision = router().classify("Logo của trường là gì?");
        assert_eq!(decision.category, ToolCategory::KnowledgeRetrieval);
        assert!(decision.confidence > 0.0);
        assert!(decision.requires_retrieval());
    }

    #[test]
    fn test_greeting() {
        let decision = router().classify("chào");
        assert_eq!(decision.category, ToolCategory::GeneralChat);
        assert!(!decision.requires_retrieval());
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn test_device_control() {
        let decision = router().classify("bật đèn");
        assert_eq!(decision.category, ToolCategory::DeviceControl);
        assert!(decision.score_of(ToolCategory::DeviceControl) >= 1);
        assert!(decision.confidence > 0.0);
    }

    #[test]
    fn test_sensor_read() {
        let decision = router().classify("nhiệt độ phòng bây giờ");
        assert_eq!(decision.category, ToolCategory::SensorRead);
    }

    #[test]
    fn test_long_query_without_keywords_goes_to_retrieval() {
        let decision = router().classify("cho tôi biết lịch học của lớp mười hai năm nay");
        assert_eq!(decision.category, ToolCategory::KnowledgeRetrieval);
        assert_eq!(decision.score_of(ToolCategory::KnowledgeRetrieval), 2);
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn test_no_match_uses_default_with_zero_confidence() {
        let decision = router().classify("xyz");
        assert_eq!(decision.category, ToolCategory::DEFAULT);
        assert_eq!(decision.confidence, 0.0);
        assert!(decision.scores.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_tie_prefers_retrieval() {
        // "về" (검색) 1점, "chào" (잡담) 1점
        let decision = router().classify("chào về");
        assert_eq!(decision.score_of(ToolCategory::KnowledgeRetrieval), 1);
        assert_eq!(decision.score_of(ToolCategory::GeneralChat), 1);
        assert_eq!(decision.category, ToolCategory::KnowledgeRetrieval);
    }

    #[test]
    fn test_confidence_bounds() {
        let queries = [
            "",
            "chào",
            "bật quạt",
            "tắt máy bơm và đọc cảm biến nhiệt độ",
            "hướng dẫn sử dụng máy móc trong phòng thí nghiệm",
            "hello hi",
        ];
        for query in queries {
            let decision = router().classify(query);
            assert!((0.0..=1.0).contains(&decision.confidence), "{}", query);
            let all_zero = decision.scores.iter().all(|&s| s == 0);
            assert_eq!(decision.confidence == 0.0, all_zero, "{}", query);
        }
    }

    #[test]
    fn test_case_insensitive() {
        let decision = router().classify("BẬT ĐÈN");
        assert_eq!(decision.category, ToolCategory::DeviceControl);
    }

    #[test]
    fn test_custom_keywords_normalized() {
        let config = RouterConfig {
            chat_keywords: vec!["  Xin Chào ".to_string(), "".to_string()],
            ..RouterConfig::default()
        };
        let decision = IntentRouter::new(config).classify("xin chào bạn");
        assert_eq!(decision.category, ToolCategory::GeneralChat);
    }

    #[test]
    fn test_category_attributes() {
        assert_eq!(
            ToolCategory::ALL
                .iter()
                .filter(|c| c.requires_retrieval())
                .count(),
            1
        );
        assert!(ToolCategory::DEFAULT.requires_retrieval());
        assert_eq!(ToolCategory::KnowledgeRetrieval.to_string(), "rag_search");
        for category in ToolCategory::ALL {
            assert!(!category.default_keywords().is_empty());
        }
    }
}
