//! 텍스트 생성 모듈 - Ollama chat API 클라이언트
//!
//! 완성된 프롬프트를 받아 전체 응답 또는 토큰 스트림을 돌려줍니다.
//! ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-chat-completion

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;

// ============================================================================
// TextGenerator Trait
// ============================================================================

/// 텍스트 생성 서비스 인터페이스
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// 전체 응답 생성
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// 토큰 단위 스트림 생성
    async fn generate_stream(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>>;

    /// 서비스 도달 가능 여부
    async fn health_check(&self) -> bool;

    /// 모델 이름
    fn model(&self) -> &str;
}

// ============================================================================
// Ollama Chat
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
    options: ChatOptions,
    keep_alive: i64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// 스트리밍 시 NDJSON 한 줄, 비스트리밍 시 전체 응답
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

impl ChatChunk {
    fn into_content(self) -> Result<String> {
        if let Some(error) = self.error {
            anyhow::bail!("Ollama error: {}", error);
        }
        Ok(self.message.map(|m| m.content).unwrap_or_default())
    }
}

/// Ollama 생성 클라이언트
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: reqwest::Client,
    config: GenerationConfig,
}

impl OllamaGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request<'a>(&'a self, prompt: &'a str, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream,
            options: ChatOptions {
                temperature: self.config.temperature,
            },
            keep_alive: self.config.keep_alive,
        }
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&self.request(prompt, stream))
            .send()
            .await
            .with_context(|| format!("Failed to reach Ollama at {}", self.config.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama chat error ({}): {}", status, body);
        }
        Ok(response)
    }
}

/// NDJSON 버퍼에서 완성된 줄을 꺼내 토큰으로 변환
///
/// 바이트 단위로 버퍼링하므로 청크 경계에서 잘린 UTF-8 문자도 안전합니다.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<Result<String>> {
    let mut tokens = Vec::new();
    while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=newline).collect();
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        tokens.push(
            serde_json::from_slice::<ChatChunk>(&line)
                .context("Failed to parse Ollama stream chunk")
                .and_then(ChatChunk::into_content),
        );
    }
    tokens
}

/// 스트림 종료 시 개행 없이 남은 마지막 줄 처리
fn flush_remaining(buffer: &mut Vec<u8>) -> Vec<Result<String>> {
    if buffer.iter().all(u8::is_ascii_whitespace) {
        buffer.clear();
        return Vec::new();
    }
    buffer.push(b'\n');
    drain_lines(buffer)
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let chunk: ChatChunk = self
            .send(prompt, false)
            .await?
            .json()
            .await
            .context("Failed to parse Ollama chat response")?;
        chunk.into_content()
    }

    async fn generate_stream(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        let bytes = self.send(prompt, true).await?.bytes_stream();

        // None = 바이트 스트림 종료
        let tokens = bytes
            .map(Some)
            .chain(stream::once(futures::future::ready(None)))
            .scan(Vec::new(), |buffer, chunk| {
                let out = match chunk {
                    Some(Ok(bytes)) => {
                        buffer.extend_from_slice(&bytes);
                        drain_lines(buffer)
                    }
                    Some(Err(e)) => {
                        vec![Err(anyhow::Error::new(e).context("Ollama stream interrupted"))]
                    }
                    None => flush_remaining(buffer),
                };
                futures::future::ready(Some(stream::iter(out)))
            })
            .flatten()
            .filter(|token| futures::future::ready(!matches!(token, Ok(t) if t.is_empty())));

        Ok(tokens.boxed())
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.url("/api/tags"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::warn!("Ollama health check failed: {}", resp.status());
                false
            }
            Err(e) => {
                tracing::debug!("Ollama unreachable: {}", e);
                false
            }
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// Tests
// ============================================================================
