//! 센서 읽기 서버 (DHT22 / 조도 센서 모의)

use async_trait::async_trait;
use rand::Rng;

use crate::router::ToolCategory;

use super::{ToolError, ToolRequest, ToolServer};

const TOOLS: &[&str] = &[
    "read_temperature",
    "read_humidity",
    "read_light",
    "read_all_sensors",
];

/// 쿼리에서 해석한 센서 명령
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCommand {
    Temperature,
    Humidity,
    Light,
    All,
}

impl SensorCommand {
    /// 특정 센서 언급이 없으면 전체 읽기
    pub fn parse(query: &str) -> Self {
        let query = query.to_lowercase();
        let mentioned: Vec<SensorCommand> = [
            (&["nhiệt độ", "temperature"][..], SensorCommand::Temperature),
            (&["độ ẩm", "humidity"][..], SensorCommand::Humidity),
            (&["ánh sáng", "light"][..], SensorCommand::Light),
        ]
        .into_iter()
        .filter(|(keywords, _)| keywords.iter().any(|k| query.contains(k)))
        .map(|(_, command)| command)
        .collect();

        match mentioned.as_slice() {
            [single] => *single,
            _ => SensorCommand::All,
        }
    }

    fn tool(self) -> &'static str {
        match self {
            SensorCommand::Temperature => "read_temperature",
            SensorCommand::Humidity => "read_humidity",
            SensorCommand::Light => "read_light",
            SensorCommand::All => "read_all_sensors",
        }
    }
}

/// 센서 읽기 서버
#[derive(Debug, Default)]
pub struct SensorServer;

impl SensorServer {
    pub fn new() -> Self {
        Self
    }

    fn temperature() -> f64 {
        round1(rand::rng().random_range(20.0..35.0))
    }

    fn humidity() -> f64 {
        round1(rand::rng().random_range(40.0..80.0))
    }

    fn light() -> u32 {
        rand::rng().random_range(100..=1000)
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[async_trait]
impl ToolServer for SensorServer {
    fn name(&self) -> &str {
        "sensor_server"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::SensorRead
    }

    fn tools(&self) -> &[&'static str] {
        TOOLS
    }

    fn parse(&self, query: &str) -> Result<ToolRequest, ToolError> {
        Ok(ToolRequest::new(SensorCommand::parse(query).tool()))
    }

    async fn handle(&self, request: &ToolRequest) -> Result<String, ToolError> {
        match request.tool.as_str() {
            "read_temperature" => Ok(format!("Nhiệt độ hiện tại: {}°C", Self::temperature())),
            "read_humidity" => Ok(format!("Độ ẩm hiện tại: {}%", Self::humidity())),
            "read_light" => Ok(format!("Cường độ ánh sáng: {} lux", Self::light())),
            "read_all_sensors" => Ok(format!(
                "Dữ liệu sensors:\n- Nhiệt độ: {}°C\n- Độ ẩm: {}%\n- Ánh sáng: {} lux\n- Thời gian: {}",
                Self::temperature(),
                Self::humidity(),
                Self::light(),
                chrono::Local::now().format("%H:%M:%S")
            )),
            other => Err(ToolError::UnknownTool {
                server: self.name().to_string(),
                tool: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(SensorCommand::parse("nhiệt độ phòng"), SensorCommand::Temperature);
        assert_eq!(SensorCommand::parse("Độ ẩm đất"), SensorCommand::Humidity);
        assert_eq!(SensorCommand::parse("ánh sáng"), SensorCommand::Light);
        assert_eq!(SensorCommand::parse("đọc cảm biến"), SensorCommand::All);
        assert_eq!(
            SensorCommand::parse("nhiệt độ và độ ẩm"),
            SensorCommand::All
        );
    }

    #[test]
    fn test_ranges() {
        for _ in 0..100 {
            let t = SensorServer::temperature();
            assert!((20.0..=35.0).contains(&t));
            let h = SensorServer::humidity();
            assert!((40.0..=80.0).contains(&h));
            let l = SensorServer::light();
            assert!((100..=1000).contains(&l));
        }
    }

    #[tokio::test]
    async fn test_read_all() {
        let out = SensorServer::new()
            .handle(&ToolRequest::new("read_all_sensors"))
            .await
            .unwrap();
        assert!(out.starts_with("Dữ liệu sensors:"));
        assert!(out.contains("lux"));
        assert!(out.contains("Thời gian:"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let err = SensorServer::new()
            .handle(&ToolRequest::new("read_pressure"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { .. }));
    }
}
