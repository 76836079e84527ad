//! 장치 제어 서버 (GPIO 모의)

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::router::ToolCategory;

use super::{ToolError, ToolRequest, ToolServer};

const TOOLS: &[&str] = &["turn_on", "turn_off", "toggle", "get_status"];

/// 장치 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    TurnOn,
    TurnOff,
    Toggle,
    Status,
}

impl DeviceAction {
    fn tool(self) -> &'static str {
        match self {
            DeviceAction::TurnOn => "turn_on",
            DeviceAction::TurnOff => "turn_off",
            DeviceAction::Toggle => "toggle",
            DeviceAction::Status => "get_status",
        }
    }
}

/// 쿼리에서 해석한 장치 명령
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    pub action: DeviceAction,
    pub device: Option<&'static str>,
}

/// (키워드, 동작) - 앞쪽이 우선
const ACTION_KEYWORDS: &[(&str, DeviceAction)] = &[
    ("trạng thái", DeviceAction::Status),
    ("status", DeviceAction::Status),
    ("chuyển", DeviceAction::Toggle),
    ("đổi", DeviceAction::Toggle),
    ("toggle", DeviceAction::Toggle),
    ("tắt", DeviceAction::TurnOff),
    ("off", DeviceAction::TurnOff),
    ("bật", DeviceAction::TurnOn),
    ("mở", DeviceAction::TurnOn),
    ("on", DeviceAction::TurnOn),
];

const DEVICE_KEYWORDS: &[(&str, &str)] = &[
    ("đèn", "led"),
    ("led", "led"),
    ("quạt", "fan"),
    ("fan", "fan"),
    ("bơm", "pump"),
    ("pump", "pump"),
];

impl DeviceCommand {
    /// "bật đèn" → TurnOn led
    pub fn parse(query: &str) -> Option<Self> {
        let query = query.to_lowercase();
        let words: Vec<&str> = query.split_whitespace().collect();
        // 영어 짧은 키워드("on", "led")는 단어 단위, 베트남어 구문은 부분 문자열
        let mentions = |keyword: &str| {
            if keyword.is_ascii() {
                words.iter().any(|w| w.trim_matches(|c: char| !c.is_alphanumeric()) == keyword)
            } else {
                query.contains(keyword)
            }
        };

        let action = ACTION_KEYWORDS
            .iter()
            .find(|(keyword, _)| mentions(*keyword))
            .map(|(_, action)| *action)?;
        let device = DEVICE_KEYWORDS
            .iter()
            .find(|(keyword, _)| mentions(*keyword))
            .map(|(_, device)| *device);

        Some(Self { action, device })
    }
}

#[derive(Debug, Clone)]
struct Device {
    name: &'static str,
    pin: u8,
    on: bool,
}

/// 장치 제어 서버
pub struct DeviceServer {
    devices: Mutex<Vec<Device>>,
}

impl Default for DeviceServer {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceServer {
    /// led(18), fan(19), pump(20) - 모두 꺼진 상태로 시작
    pub fn new() -> Self {
        let devices = [("led", 18), ("fan", 19), ("pump", 20)]
            .into_iter()
            .map(|(name, pin)| Device {
                name,
                pin,
                on: false,
            })
            .collect();
        Self {
            devices: Mutex::new(devices),
        }
    }

    async fn set(&self, device: Option<&str>, action: DeviceAction) -> String {
        let Some(name) = device else {
            return "Chưa chỉ định thiết bị (led, fan, pump)".to_string();
        };

        let mut devices = self.devices.lock().await;
        let Some(device) = devices.iter_mut().find(|d| d.name == name) else {
            return format!("Thiết bị {} không tồn tại", name);
        };

        device.on = match action {
            DeviceAction::TurnOn => true,
            DeviceAction::TurnOff => false,
            DeviceAction::Toggle => !device.on,
            DeviceAction::Status => device.on,
        };

        let verb = if device.on { "bật" } else { "tắt" };
        format!("Đã {} {} (PIN {})", verb, device.name, device.pin)
    }

    async fn status(&self) -> String {
        let devices = self.devices.lock().await;
        let lines: Vec<String> = devices
            .iter()
            .map(|d| {
                let (mark, state) = if d.on { ("🟢", "on") } else { ("🔴", "off") };
                format!("{} {}: {} (PIN {})", mark, d.name, state, d.pin)
            })
            .collect();
        format!("Trạng thái thiết bị:\n{}", lines.join("\n"))
    }
}

#[async_trait]
impl ToolServer for DeviceServer {
    fn name(&self) -> &str {
        "device_server"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::DeviceControl
    }

    fn tools(&self) -> &[&'static str] {
        TOOLS
    }

    fn parse(&self, query: &str) -> Result<ToolRequest, ToolError> {
        let command =
            DeviceCommand::parse(query).ok_or_else(|| ToolError::Unparsed(query.to_string()))?;
        let request = ToolRequest::new(command.action.tool());
        Ok(match command.device {
            Some(device) => request.with_param("device", device),
            None => request,
        })
    }

    async fn handle(&self, request: &ToolRequest) -> Result<String, ToolError> {
        let device = request.params.get("device").map(String::as_str);
        match request.tool.as_str() {
            "turn_on" => Ok(self.set(device, DeviceAction::TurnOn).await),
            "turn_off" => Ok(self.set(device, DeviceAction::TurnOff).await),
            "toggle" => Ok(self.set(device, DeviceAction::Toggle).await),
            "get_status" => Ok(self.status().await),
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
