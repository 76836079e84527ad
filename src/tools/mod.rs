//! Tool 서버 - 장치 제어 / 센서 읽기 플러그인
//!
//! 각 서버는 `ToolServer` 트레이트를 구현하고 시작 시 `ToolRegistry`에
//! 카테고리별로 한 번 등록됩니다. 실행 중 임의 등록은 지원하지 않습니다.

mod device;
mod sensor;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::router::ToolCategory;

pub use device::{DeviceAction, DeviceCommand, DeviceServer};
pub use sensor::{SensorCommand, SensorServer};

// ============================================================================
// Types
// ============================================================================

/// 툴 파라미터 (예: `device` → `led`)
pub type ToolParams = HashMap<String, String>;

/// 툴 실행 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResponse {
    pub server: String,
    pub tool: String,
    pub output: String,
}

/// 툴 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub tool: String,
    pub params: ToolParams,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params: ToolParams::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// 툴 실행 에러
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool '{tool}' not found on server '{server}'")]
    UnknownTool { server: String, tool: String },
    #[error("no tool server registered for category '{0}'")]
    NoServer(ToolCategory),
    #[error("could not understand the request: {0}")]
    Unparsed(String),
    #[error("server '{0}' already registered for this category")]
    Duplicate(String),
}

// ============================================================================
// ToolServer Trait
// ============================================================================

/// 툴 서버 플러그인 계약
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// 서버 이름
    fn name(&self) -> &str;

    /// 처리하는 카테고리
    fn category(&self) -> ToolCategory;

    /// 제공하는 툴 이름
    fn tools(&self) -> &[&'static str];

    /// 자연어 쿼리를 툴 요청으로 변환
    fn parse(&self, query: &str) -> Result<ToolRequest, ToolError>;

    /// 툴 실행
    async fn handle(&self, request: &ToolRequest) -> Result<String, ToolError>;
}

// ============================================================================
// ToolRegistry
// ============================================================================

/// 카테고리별 툴 서버 레지스트리
#[derive(Default)]
pub struct ToolRegistry {
    servers: HashMap<ToolCategory, Box<dyn ToolServer>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 기본 서버(장치, 센서)가 등록된 레지스트리
    pub fn with_defaults() -> Result<Self, ToolError> {
        let mut registry = Self::new();
        registry.register(Box::new(DeviceServer::new()))?;
        registry.register(Box::new(SensorServer::new()))?;
        Ok(registry)
    }

    /// 서버 등록 (카테고리당 하나)
    pub fn register(&mut self, server: Box<dyn ToolServer>) -> Result<(), ToolError> {
        let category = server.category();
        if let Some(existing) = self.servers.get(&category) {
            return Err(ToolError::Duplicate(existing.name().to_string()));
        }
        tracing::debug!("Registered tool server '{}' for {}", server.name(), category);
        self.servers.insert(category, server);
        Ok(())
    }

    pub fn get(&self, category: ToolCategory) -> Option<&dyn ToolServer> {
        self.servers.get(&category).map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// 쿼리를 해당 카테고리 서버로 전달
    pub async fn dispatch(
        &self,
        category: ToolCategory,
        query: &str,
    ) -> Result<ToolResponse, ToolError> {
        let server = self.get(category).ok_or(ToolError::NoServer(category))?;
        let request = server.parse(query)?;

        if !server.tools().iter().any(|tool| *tool == request.tool) {
            return Err(ToolError::UnknownTool {
                server: server.name().to_string(),
                tool: request.tool,
            });
        }

        let output = server.handle(&request).await?;
        tracing::info!("Tool {}::{} handled", server.name(), request.tool);

        Ok(ToolResponse {
            server: server.name().to_string(),
            tool: request.tool,
            output,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_device() {
        let registry = ToolRegistry::with_defaults().unwrap();
        let response = registry
            .dispatch(ToolCategory::DeviceControl, "bật đèn")
            .await
            .unwrap();
        assert_eq!(response.server, "device_server");
        assert_eq!(response.tool, "turn_on");
        assert!(response.output.contains("led"));
    }

    #[tokio::test]
    async fn test_dispatch_sensor() {
        let registry = ToolRegistry::with_defaults().unwrap();
        let response = registry
            .dispatch(ToolCategory::SensorRead, "độ ẩm bao nhiêu")
            .await
            .unwrap();
        assert_eq!(response.tool, "read_humidity");
    }

    #[tokio::test]
    async fn test_dispatch_without_server() {
        let registry = ToolRegistry::with_defaults().unwrap();
        let err = registry
            .dispatch(ToolCategory::GeneralChat, "chào")
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::NoServer(ToolCategory::GeneralChat));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ToolRegistry::with_defaults().unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get(ToolCategory::KnowledgeRetrieval).is_none());
        let err = registry.register(Box::new(DeviceServer::new())).unwrap_err();
        assert_eq!(err, ToolError::Duplicate("device_server".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let server = DeviceServer::new();
        let err = server
            .handle(&ToolRequest::new("explode"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { .. }));
    }
}
