//! CLI 모듈
//!
//! routed-rag CLI 명령어 정의 및 구현

use std::io::Write;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::{get_data_dir, AppConfig, EmbeddingBackend};
use crate::embedding::has_api_key;
use crate::engine::{Query, QueryEngine, QueryOutcome};
use crate::generation::{OllamaGenerator, TextGenerator};
use crate::knowledge::RetrievalStage;
use crate::prompt::PromptKind;
use crate::router::ToolCategory;
use crate::tools::ToolRegistry;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "routed-rag")]
#[command(version, about = "의도 라우팅 + 하이브리드 검색 RAG", long_about = None)]
pub struct Cli {
    /// 생성 모델 (기본: qwen2.5:0.5b)
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// 1차 검색 후보 수
    #[arg(long, global = true)]
    pub top_k: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 대화형 질의 (exit / quit 로 종료)
    Ask {
        /// 스트리밍 없이 전체 응답을 한 번에 출력
        #[arg(long)]
        no_stream: bool,
    },

    /// 단일 질의
    Query {
        /// 질문
        query: String,

        /// 생성 없이 조립된 프롬프트만 출력
        #[arg(long)]
        dry_run: bool,

        /// 스트리밍 없이 전체 응답을 한 번에 출력
        #[arg(long)]
        no_stream: bool,
    },

    /// 라우팅 결과만 확인
    Route {
        /// 질문
        query: String,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load().context("설정 로드 실패")?;
    if let Some(model) = cli.model {
        config.generation.model = model;
    }
    if let Some(top_k) = cli.top_k {
        config.retrieval.primary_k = top_k;
    }

    match cli.command {
        Commands::Ask { no_stream } => {
            config.generation.stream &= !no_stream;
            cmd_ask(&config).await
        }
        Commands::Query {
            query,
            dry_run,
            no_stream,
        } => {
            config.generation.stream &= !no_stream;
            cmd_query(&config, &query, dry_run).await
        }
        Commands::Route { query } => cmd_route(&config, &query),
        Commands::Status => cmd_status(&config).await,
    }
}

/// 시작 시 한 번 만드는 실행 컨텍스트
struct Session {
    engine: QueryEngine,
    tools: ToolRegistry,
    generator: OllamaGenerator,
    stream: bool,
}

impl Session {
    async fn start(config: &AppConfig) -> Result<Self> {
        println!("[*] 시스템 초기화 중...");
        let engine = QueryEngine::from_config(config).await;
        if !engine.retriever().has_index() {
            println!("[!] 인덱스를 열 수 없습니다. 문서 검색 없이 동작합니다.");
        }

        Ok(Self {
            engine,
            tools: ToolRegistry::with_defaults().context("툴 서버 등록 실패")?,
            generator: OllamaGenerator::new(config.generation.clone())
                .context("생성 클라이언트 초기화 실패")?,
            stream: config.generation.stream,
        })
    }

    /// 쿼리 하나 처리 후 응답 출력
    async fn answer(&self, query: &Query) -> Result<()> {
        let started = Instant::now();
        let outcome = self.engine.handle_query(query).await;
        let category = outcome.decision.category;

        // 카테고리별 응답 경로
        let direct = match category {
            ToolCategory::DeviceControl | ToolCategory::SensorRead => {
                match self.tools.dispatch(category, query.as_str()).await {
                    Ok(response) => Some(response.output),
                    Err(e) => {
                        tracing::debug!("Tool dispatch failed, falling back to generation: {}", e);
                        None
                    }
                }
            }
            ToolCategory::KnowledgeRetrieval | ToolCategory::GeneralChat => {
                (!outcome.prompt.needs_generation()).then(|| outcome.prompt.text.clone())
            }
        };

        print!(
            "Bot ({} | prep: {:.3}s): ",
            category,
            started.elapsed().as_secs_f64()
        );
        std::io::stdout().flush()?;

        match direct {
            Some(text) => println!("{}", text),
            None => self.generate(&outcome).await?,
        }
        Ok(())
    }

    async fn generate(&self, outcome: &QueryOutcome) -> Result<()> {
        if !self.stream {
            let text = self.generator.generate(&outcome.prompt.text).await?;
            println!("{}", text.trim());
            return Ok(());
        }

        let mut tokens = self.generator.generate_stream(&outcome.prompt.text).await?;
        let mut stdout = std::io::stdout();
        while let Some(token) = tokens.next().await {
            write!(stdout, "{}", token?)?;
            stdout.flush()?;
        }
        println!();
        Ok(())
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 대화형 질의 (ask)
async fn cmd_ask(config: &AppConfig) -> Result<()> {
    let session = Session::start(config).await?;
    println!("[OK] 준비 완료 (모델: {})", session.generator.model());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n>> Câu hỏi: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let Ok(query) = Query::new(&line) else {
            continue;
        };
        if matches!(query.as_str().to_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        // 생성 실패는 루프를 끝내지 않음
        if let Err(e) = session.answer(&query).await {
            println!("\nLỗi: {:#}", e);
        }
    }

    Ok(())
}

/// 단일 질의 (query)
async fn cmd_query(config: &AppConfig, raw: &str, dry_run: bool) -> Result<()> {
    let query = Query::new(raw).context("빈 질문은 처리할 수 없습니다")?;

    if dry_run {
        let engine = QueryEngine::from_config(config).await;
        let outcome = engine.handle_query(&query).await;
        print_outcome(&outcome);
        return Ok(());
    }

    Session::start(config).await?.answer(&query).await
}

/// 라우팅 확인 (route)
fn cmd_route(config: &AppConfig, raw: &str) -> Result<()> {
    let query = Query::new(raw).context("빈 질문은 처리할 수 없습니다")?;
    let router = crate::router::IntentRouter::new(config.router.clone());
    let decision = router.classify(query.as_str());

    println!(
        "[OK] {} (신뢰도: {:.2}, 검색: {})",
        decision.category,
        decision.confidence,
        if decision.requires_retrieval() { "예" } else { "아니오" }
    );
    for category in ToolCategory::ALL {
        println!("     {:<16} {}", category.name(), decision.score_of(category));
    }
    Ok(())
}

/// 상태 확인 (status)
async fn cmd_status(config: &AppConfig) -> Result<()> {
    println!("routed-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());
    println!("[*] 인덱스 경로: {}", config.index_path().display());
    println!(
        "[*] 임베딩: {:?} / {} ({}차원)",
        config.embedding.backend, config.embedding.model, config.embedding.dimension
    );
    if config.embedding.backend == EmbeddingBackend::Gemini && !has_api_key() {
        println!("[!] Gemini API 키 없음 (GEMINI_API_KEY 또는 GOOGLE_AI_API_KEY 설정 필요)");
    }

    let engine = QueryEngine::from_config(config).await;
    match engine.retriever().index() {
        Some(index) => match index.count().await {
            Ok(count) => println!("[OK] 인덱스: {} 패시지", count),
            Err(e) => println!("[!] 인덱스 조회 실패: {:#}", e),
        },
        None => println!("[!] 인덱스: 열 수 없음"),
    }

    let generator = OllamaGenerator::new(config.generation.clone())?;
    if generator.health_check().await {
        println!("[OK] 생성 모델: {} ({})", generator.model(), config.generation.base_url);
    } else {
        println!("[!] 생성 서비스 연결 실패: {}", config.generation.base_url);
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn print_outcome(outcome: &QueryOutcome) {
    println!(
        "[OK] 라우팅: {} (신뢰도: {:.2})",
        outcome.decision.category, outcome.decision.confidence
    );

    if outcome.decision.requires_retrieval() {
        let stage = match outcome.retrieval.stage {
            RetrievalStage::Primary => "1차",
            RetrievalStage::Fallback => "폴백",
            RetrievalStage::Empty => "없음",
        };
        println!("[*] 검색: {} 건 ({})", outcome.retrieval.len(), stage);
        if let Some(ref err) = outcome.retrieval.degraded {
            println!("[!] 검색 성능 저하: {}", err);
        }
        for (i, scored) in outcome.retrieval.passages.iter().enumerate() {
            println!(
                "  {}. [점수: {}] {} (p.{})",
                i + 1,
                scored.relevance_score,
                scored.passage.source_id,
                scored.passage.position
            );
            println!("     {}", truncate_text(&scored.passage.content, 120));
        }
    }

    let kind = match outcome.prompt.kind {
        PromptKind::Grounded => "컨텍스트",
        PromptKind::NotFound => "정보 없음",
        PromptKind::Passthrough => "원문",
        PromptKind::Canned => "정형 응답",
    };
    println!("\n--- 프롬프트 ({}) ---\n{}", kind, outcome.prompt.text);
}

/// 텍스트 자르기 (UTF-8 안전, 한 줄)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate_text("trường học", 6), "trường...");
    }

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::parse_from(["routed-rag", "--model", "llama3.2", "query", "bật đèn", "--dry-run"]);
        assert_eq!(cli.model.as_deref(), Some("llama3.2"));
        match cli.command {
            Commands::Query { query, dry_run, no_stream } => {
                assert_eq!(query, "bật đèn");
                assert!(dry_run);
                assert!(!no_stream);
            }
            _ => panic!("expected query command"),
        }
    }

    #[test]
    fn test_parse_ask_command() {
        let cli = Cli::parse_from(["routed-rag", "ask", "--no-stream", "--top-k", "8"]);
        assert_eq!(cli.top_k, Some(8));
        assert!(matches!(cli.command, Commands::Ask { no_stream: true }));
    }
}
