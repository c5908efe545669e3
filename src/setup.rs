//! Driver setup flow: single-host setup and multi-device user input.

use crate::config::{DeviceConfig, SharedConfig};
use crate::device::DeviceConnector;
use crate::entity::{en, LocalizedText};
use crate::error::Result;
use crate::session::CambridgeSession;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Reason reported to the Remote when setup fails
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SetupErrorKind {
    Other,
    ConnectionRefused,
}

/// Outcome of one setup step
#[derive(Debug, Clone, PartialEq)]
pub enum SetupAction {
    Complete,
    RequestUserInput {
        title: LocalizedText,
        settings: Vec<Value>,
    },
    Error(SetupErrorKind),
}

/// Why probing a device failed
enum ProbeError {
    Unreachable,
    Failed(String),
}

/// Validates receivers and persists them to the shared configuration
pub struct CambridgeSetup {
    config: SharedConfig,
    connector: Arc<dyn DeviceConnector>,
}

impl CambridgeSetup {
    pub fn new(config: SharedConfig, connector: Arc<dyn DeviceConnector>) -> Self {
        Self { config, connector }
    }

    /// First setup step, driven by the driver's setup schema
    pub async fn handle_setup_request(&self, setup_data: &Map<String, Value>) -> SetupAction {
        let device_count = match device_count(setup_data.get("device_count")) {
            Some(count) => count,
            None => {
                tracing::error!("Invalid device count: {:?}", setup_data.get("device_count"));
                return SetupAction::Error(SetupErrorKind::Other);
            }
        };
        let host = text(setup_data, "host");

        if device_count == 1 && !host.is_empty() {
            let name = match text(setup_data, "name") {
                name if name.is_empty() => format!("Cambridge Audio ({})", host),
                name => name,
            };
            self.setup_single_device(&host, &name).await
        } else {
            request_device_configurations(device_count)
        }
    }

    async fn setup_single_device(&self, host: &str, name: &str) -> SetupAction {
        tracing::info!("Testing connection to Cambridge Audio at {}", host);

        let device = DeviceConfig::new(host, name);
        let existing = self.config.read().get_device(&device.device_id).is_some();
        if existing {
            tracing::info!("Device {} already exists, removing for reconfiguration", device.device_id);
            if let Err(e) = self.config.write().remove_device(&device.device_id) {
                tracing::error!("Setup error: {}", e);
                return SetupAction::Error(SetupErrorKind::Other);
            }
        }

        let model = match self.probe(&device).await {
            Ok(model) => model,
            Err(ProbeError::Unreachable) => {
                tracing::error!("Connection test failed for host: {}", host);
                return SetupAction::Error(SetupErrorKind::ConnectionRefused);
            }
            Err(ProbeError::Failed(e)) => {
                tracing::error!("Setup error: {}", e);
                return SetupAction::Error(SetupErrorKind::Other);
            }
        };
        tracing::info!("Detected Cambridge Audio model: {}", model);

        match self.persist(device.with_model(model)) {
            Ok(()) => {
                tracing::info!("Successfully added device: {}", name);
                SetupAction::Complete
            }
            Err(e) => {
                tracing::error!("Setup error: {}", e);
                SetupAction::Error(SetupErrorKind::Other)
            }
        }
    }

    /// Second setup step: the per-device addresses and names entered by the user
    pub async fn handle_user_data(&self, input_values: &Map<String, Value>) -> SetupAction {
        let mut devices = Vec::new();
        let mut index = 0;
        while input_values.contains_key(&format!("device_{}_ip", index)) {
            let host = text(input_values, &format!("device_{}_ip", index));
            if host.is_empty() {
                tracing::error!("Invalid IP for device {}", index + 1);
                return SetupAction::Error(SetupErrorKind::Other);
            }
            let name = match text(input_values, &format!("device_{}_name", index)) {
                name if name.is_empty() => format!("Cambridge Audio {}", index + 1),
                name => name,
            };
            devices.push(DeviceConfig::new(host, name));
            index += 1;
        }

        tracing::info!("Testing connections to {} devices...", devices.len());

        let total = devices.len();
        let mut configured = 0;
        for (i, device) in devices.into_iter().enumerate() {
            let name = device.name.clone();
            match self.probe(&device).await {
                Ok(model) => match self.persist(device.with_model(model)) {
                    Ok(()) => {
                        configured += 1;
                        tracing::info!("Device {} ({}) configured successfully", i + 1, name);
                    }
                    Err(e) => tracing::error!("Device {} ({}) could not be saved: {}", i + 1, name, e),
                },
                Err(ProbeError::Unreachable) => {
                    tracing::error!("Device {} ({}) connection failed", i + 1, name)
                }
                Err(ProbeError::Failed(e)) => {
                    tracing::error!("Device {} ({}) test exception: {}", i + 1, name, e)
                }
            }
        }

        if configured == 0 {
            tracing::error!("No devices could be connected");
            return SetupAction::Error(SetupErrorKind::ConnectionRefused);
        }

        tracing::info!("Multi-device setup completed: {}/{} devices configured", configured, total);
        SetupAction::Complete
    }

    /// Connect, read the model, and close again
    async fn probe(&self, device: &DeviceConfig) -> std::result::Result<String, ProbeError> {
        let session = CambridgeSession::new(device.clone(), self.connector.clone());
        if !session.connect().await {
            session.close().await;
            return Err(ProbeError::Unreachable);
        }
        let info = session.get_info();
        session.close().await;
        info.map(|info| info.model)
            .map_err(|e| ProbeError::Failed(e.to_string()))
    }

    fn persist(&self, device: DeviceConfig) -> Result<()> {
        self.config.write().add_device(device)
    }
}

fn request_device_configurations(device_count: usize) -> SetupAction {
    let settings = (0..device_count)
        .flat_map(|i| {
            [
                json!({
                    "id": format!("device_{}_ip", i),
                    "label": en(format!("Device {} IP Address", i + 1)),
                    "description": en(format!("IP address for Cambridge Audio device {}", i + 1)),
                    "field": { "text": { "value": format!("192.168.1.{}", 100 + i) } },
                }),
                json!({
                    "id": format!("device_{}_name", i),
                    "label": en(format!("Device {} Name", i + 1)),
                    "description": en(format!("Friendly name for device {}", i + 1)),
                    "field": { "text": { "value": format!("Cambridge Audio {}", i + 1) } },
                }),
            ]
        })
        .collect();

    SetupAction::RequestUserInput {
        title: en(format!("Configure {} Cambridge Audio Devices", device_count)),
        settings,
    }
}

/// Upper bound of `device_count`, as declared in the driver's setup schema
pub const MAX_DEVICE_COUNT: usize = 10;

/// `device_count` as sent by the Remote: a number or a numeric string, default 1
fn device_count(value: Option<&Value>) -> Option<usize> {
    let count = match value {
        None | Some(Value::Null) => 1,
        Some(Value::Number(n)) => n.as_u64()?,
        Some(Value::String(s)) => s.trim().parse().ok()?,
        Some(_) => return None,
    };
    usize::try_from(count)
        .ok()
        .filter(|c| (1..=MAX_DEVICE_COUNT).contains(c))
}

fn text(values: &Map<String, Value>, key: &str) -> String {
    values
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}
