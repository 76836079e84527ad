//! 설정 모듈
//!
//! 우선순위: CLI 플래그 > 환경변수 > `~/.routed-rag/config.json` > 기본값

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::knowledge::RetrievalConfig;
use crate::router::RouterConfig;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.routed-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".routed-rag")
}

/// 설정 파일 이름
const CONFIG_FILE: &str = "config.json";

// ============================================================================
// Types
// ============================================================================

/// 임베딩 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Ollama,
    Gemini,
}

/// 임베딩 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Ollama 모델 이름 (Gemini는 무시)
    pub model: String,
    /// 벡터 차원 (인덱스 스키마와 일치해야 함)
    pub dimension: usize,
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Ollama,
            // sentence-transformers/all-MiniLM-L6-v2
            model: "all-minilm".to_string(),
            dimension: 384,
            base_url: DEFAULT_OLLAMA_URL.to_string(),
        }
    }
}

/// 텍스트 생성 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// 모델을 메모리에 유지할 시간 (초, 음수 = 무기한)
    ///
    /// Ollama는 문자열 값을 단위가 있는 duration으로만 받으므로 숫자로 보냅니다.
    pub keep_alive: i64,
    pub stream: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: "qwen2.5:0.5b".to_string(),
            temperature: 0.1,
            keep_alive: -1,
            stream: true,
        }
    }
}

/// 기본 Ollama 주소
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// 전체 애플리케이션 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// LanceDB 인덱스 경로 (None이면 `<data_dir>/index.lance`)
    pub index_path: Option<PathBuf>,
    pub retrieval: RetrievalConfig,
    pub router: RouterConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}

impl AppConfig {
    /// 기본 위치에서 로드 후 환경변수 적용
    pub fn load() -> Result<Self> {
        let path = get_data_dir().join(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::debug!("No config file at {:?}, using defaults", path);
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// JSON 설정 파일 로드 (누락 필드는 기본값)
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// 환경변수 적용
    ///
    /// - `ROUTED_RAG_INDEX`: 인덱스 경로
    /// - `OLLAMA_HOST`: 생성/임베딩 Ollama 주소
    /// - `ROUTED_RAG_MODEL`: 생성 모델
    /// - `ROUTED_RAG_EMBEDDER`: `ollama` | `gemini`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("ROUTED_RAG_INDEX").filter(|v| !v.is_empty()) {
            self.index_path = Some(PathBuf::from(path));
        }

        if let Some(host) = var("OLLAMA_HOST").filter(|v| !v.is_empty()) {
            let host = if host.starts_with("http://") || host.starts_with("https://") {
                host
            } else {
                format!("http://{}", host)
            };
            self.generation.base_url = host.clone();
            self.embedding.base_url = host;
        }

        if let Some(model) = var("ROUTED_RAG_MODEL").filter(|v| !v.is_empty()) {
            self.generation.model = model;
        }

        match var("ROUTED_RAG_EMBEDDER").as_deref() {
            Some("gemini") => {
                self.embedding.backend = EmbeddingBackend::Gemini;
                if self.embedding.dimension == EmbeddingConfig::default().dimension {
                    self.embedding.dimension = 768;
                }
            }
            Some("ollama") => self.embedding.backend = EmbeddingBackend::Ollama,
            Some(other) => tracing::warn!("Unknown ROUTED_RAG_EMBEDDER '{}', ignored", other),
            None => {}
        }
    }

    /// 실제 인덱스 경로
    pub fn index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| get_data_dir().join("index.lance"))
    }
}

// ============================================================================
// Tests
// ============================================================================
