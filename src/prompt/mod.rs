//! Context Assembler - 라우팅 결과 + 검색 컨텍스트 → 생성 프롬프트
//!
//! 프롬프트 길이 상한:
//! `max_passages * max_passage_chars + 구분자/지시문 오버헤드 + 쿼리 길이`
//! 업스트림 패시지 크기와 무관하게 빌더에서 다시 자릅니다.

use serde::Serialize;

use crate::knowledge::{truncate_chars, RetrievalResult};
use crate::router::{RoutingDecision, ToolCategory};

// ============================================================================
// Templates
// ============================================================================

/// 컨텍스트 기반 답변 지시문
const GROUNDED_HEADER: &str = "Trả lời ngắn gọn dựa trên ngữ cảnh sau:\n";
/// 패시지 구분자
const PASSAGE_SEPARATOR: &str = "\n\n";
const QUESTION_LABEL: &str = "\n\nCâu hỏi: ";
const ANSWER_LABEL: &str = "\nTrả lời ngắn gọn:";

/// 검색 결과가 없을 때 (빈 컨텍스트로 보내면 환각 위험)
const NOT_FOUND_HEADER: &str = "Không tìm thấy thông tin phù hợp trong tài liệu nội bộ. \
Hãy nói rõ với người dùng rằng không có thông tin này, không được tự bịa câu trả lời.";

const GREETING_REPLY: &str =
    "Xin chào! Tôi là trợ lý tra cứu tài liệu nội bộ. Bạn cần tìm thông tin gì?";
const FAREWELL_REPLY: &str = "Tạm biệt! Hẹn gặp lại bạn.";
const THANKS_REPLY: &str = "Không có gì! Nếu cần thêm thông tin, bạn cứ hỏi nhé.";
const INTRO_REPLY: &str = "Tôi là trợ lý ảo: tra cứu tài liệu, điều khiển thiết bị \
và đọc cảm biến. Hãy đặt câu hỏi cho tôi.";

/// 정형 응답 매칭 테이블 (순서대로 첫 매치)
const CANNED_REPLIES: &[(&[&str], &str)] = &[
    (&["bạn là ai"], INTRO_REPLY),
    (&["tạm biệt", "bye"], FAREWELL_REPLY),
    (&["cảm ơn", "thank", "thanks"], THANKS_REPLY),
    (&["chào", "hello", "hi"], GREETING_REPLY),
];

// ============================================================================
// Types
// ============================================================================

/// 프롬프트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// 검색 컨텍스트 포함
    Grounded,
    /// 검색이 필요했지만 결과 없음
    NotFound,
    /// 원본 쿼리 그대로
    Passthrough,
    /// 정형 응답 (생성 모델 불필요)
    Canned,
}

/// 조립된 프롬프트
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub text: String,
    pub kind: PromptKind,
}

impl Prompt {
    /// 생성 서비스로 보내야 하는지
    pub fn needs_generation(&self) -> bool {
        !matches!(self.kind, PromptKind::Canned)
    }
}

// ============================================================================
// PromptBuilder
// ============================================================================

/// 프롬프트 빌더
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_passages: usize,
    max_passage_chars: usize,
}

impl PromptBuilder {
    pub fn new(max_passages: usize, max_passage_chars: usize) -> Self {
        Self {
            max_passages,
            max_passage_chars,
        }
    }

    /// 쿼리 길이를 제외한 최대 프롬프트 길이 (문자 수)
    pub fn max_overhead_chars(&self) -> usize {
        let separators = self.max_passages.saturating_sub(1) * PASSAGE_SEPARATOR.chars().count();
        let frame = GROUNDED_HEADER.chars().count()
            + QUESTION_LABEL.chars().count()
            + ANSWER_LABEL.chars().count();
        let not_found = NOT_FOUND_HEADER.chars().count()
            + QUESTION_LABEL.chars().count()
            + ANSWER_LABEL.chars().count();
        let canned = CANNED_REPLIES
            .iter()
            .map(|(_, reply)| reply.chars().count())
            .max()
            .unwrap_or(0);

        (self.max_passages * self.max_passage_chars + separators + frame)
            .max(not_found)
            .max(canned)
    }

    /// 최종 프롬프트 조립
    pub fn build(&self, query: &str, decision: &RoutingDecision, result: &RetrievalResult) -> Prompt {
        match decision.category {
            ToolCategory::KnowledgeRetrieval => {
                if result.is_empty() {
                    self.not_found(query)
                } else {
                    self.grounded(query, result)
                }
            }
            ToolCategory::GeneralChat => match canned_reply(query) {
                Some(reply) => Prompt {
                    text: reply.to_string(),
                    kind: PromptKind::Canned,
                },
                None => passthrough(query),
            },
            ToolCategory::DeviceControl | ToolCategory::SensorRead => passthrough(query),
        }
    }

    fn grounded(&self, query: &str, result: &RetrievalResult) -> Prompt {
        let context = result
            .passages
            .iter()
            .take(self.max_passages)
            .map(|p| truncate_chars(p.passage.content.trim(), self.max_passage_chars))
            .collect::<Vec<_>>()
            .join(PASSAGE_SEPARATOR);

        Prompt {
            text: format!(
                "{}{}{}{}{}",
                GROUNDED_HEADER, context, QUESTION_LABEL, query, ANSWER_LABEL
            ),
            kind: PromptKind::Grounded,
        }
    }

    fn not_found(&self, query: &str) -> Prompt {
        Prompt {
            text: format!(
                "{}{}{}{}",
                NOT_FOUND_HEADER, QUESTION_LABEL, query, ANSWER_LABEL
            ),
            kind: PromptKind::NotFound,
        }
    }
}

fn passthrough(query: &str) -> Prompt {
    Prompt {
        text: query.to_string(),
        kind: PromptKind::Passthrough,
    }
}

/// 잡담 쿼리에 맞는 정형 응답
///
/// 영어 키워드("hi", "bye")는 단어 단위로만 매칭합니다. "thi", "chi" 같은
/// 베트남어 단어 안의 "hi"는 인사가 아닙니다.
pub fn canned_reply(query: &str) -> Option<&'static str> {
    let query = query.to_lowercase();
    let words: Vec<&str> = query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .collect();
    let mentions = |keyword: &str| {
        if keyword.is_ascii() {
            words.iter().any(|w| *w == keyword)
        } else {
            query.contains(keyword)
        }
    };

    CANNED_REPLIES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| mentions(*k)))
        .map(|(_, reply)| *reply)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{Passage, RetrievalError, RetrievalStage, ScoredPassage};
    use crate::router::IntentRouter;

    fn builder() -> PromptBuilder {
        PromptBuilder::new(3, 500)
    }

    fn result_with(contents: &[String]) -> RetrievalResult {
        RetrievalResult {
            passages: contents
                .iter()
                .enumerate()
                .map(|(i, c)| ScoredPassage {
                    passage: Passage::new(c.clone(), "doc.pdf", i as u32 + 1),
                    relevance_score: 10,
                })
                .collect(),
            stage: RetrievalStage::Primary,
            degraded: None,
        }
    }

    #[test]
    fn test_grounded_prompt() {
        let query = "Logo của trường là gì?";
        let decision = IntentRouter::default().classify(query);
        let result = result_with(&[
            "Logo của trường hình quyển sách.".to_string(),
            "Màu chủ đạo là xanh dương.".to_string(),
        ]);

        let prompt = builder().build(query, &decision, &result);

        assert_eq!(prompt.kind, PromptKind::Grounded);
        assert!(prompt.text.starts_with(GROUNDED_HEADER));
        assert!(prompt.text.contains("Logo của trường hình quyển sách.\n\nMàu chủ đạo"));
        assert!(prompt.text.contains(query));
        assert!(prompt.needs_generation());
    }

    #[test]
    fn test_not_found_prompt() {
        let query = "Logo của trường là gì?";
        let decision = IntentRouter::default().classify(query);
        let mut result = RetrievalResult::empty();
        result.degraded = Some(RetrievalError::IndexUnavailable);

        let prompt = builder().build(query, &decision, &result);

        assert_eq!(prompt.kind, PromptKind::NotFound);
        assert!(prompt.text.contains("Không tìm thấy thông tin phù hợp"));
        assert!(prompt.text.contains(query));
    }

    #[test]
    fn test_greeting_is_canned() {
        let decision = IntentRouter::default().classify("chào");
        let prompt = builder().build("chào", &decision, &RetrievalResult::empty());
        assert_eq!(prompt.kind, PromptKind::Canned);
        assert_eq!(prompt.text, GREETING_REPLY);
        assert!(!prompt.needs_generation());
    }

    #[test]
    fn test_canned_reply_order() {
        assert_eq!(canned_reply("Bạn là ai?"), Some(INTRO_REPLY));
        assert_eq!(canned_reply("cảm ơn nhé"), Some(THANKS_REPLY));
        assert_eq!(canned_reply("tạm biệt"), Some(FAREWELL_REPLY));
        assert_eq!(canned_reply("xyz"), None);
    }

    #[test]
    fn test_canned_reply_ascii_whole_word() {
        assert_eq!(canned_reply("hi bạn"), Some(GREETING_REPLY));
        assert_eq!(canned_reply("Hello!"), Some(GREETING_REPLY));
        assert_eq!(canned_reply("thanks a lot"), Some(THANKS_REPLY));
        assert_eq!(canned_reply("lịch thi"), None);
        assert_eq!(canned_reply("chi phí"), None);
        assert_eq!(canned_reply("học phí bao nhiêu"), None);
    }

    #[test]
    fn test_exam_schedule_chat_goes_to_generation() {
        // 라우터는 "thi" 안의 "hi"로 잡담을 고르지만 정형 응답은 아님
        let query = "lịch thi";
        let decision = IntentRouter::default().classify(query);
        assert_eq!(decision.category, ToolCategory::GeneralChat);

        let prompt = builder().build(query, &decision, &RetrievalResult::empty());
        assert_eq!(prompt.kind, PromptKind::Passthrough);
        assert_eq!(prompt.text, query);
        assert!(prompt.needs_generation());
    }

    #[test]
    fn test_device_query_passthrough() {
        let decision = IntentRouter::default().classify("bật đèn");
        let prompt = builder().build("bật đèn", &decision, &RetrievalResult::empty());
        assert_eq!(prompt.kind, PromptKind::Passthrough);
        assert_eq!(prompt.text, "bật đèn");
    }

    #[test]
    fn test_length_bound_enforced() {
        let huge = "a".repeat(5000);
        let result = result_with(&[huge.clone(), huge.clone(), huge.clone(), huge]);
        let query = "về tài liệu";
        let decision = IntentRouter::default().classify(query);
        let builder = builder();

        let prompt = builder.build(query, &decision, &result);

        let limit = builder.max_overhead_chars() + query.chars().count();
        assert!(prompt.text.chars().count() <= limit);
        assert_eq!(prompt.text.matches(PASSAGE_SEPARATOR).count(), 3);
    }
}
