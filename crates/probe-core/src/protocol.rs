//! Wire protocol: client→agent and agent→client tagged JSON messages.

use serde::{Deserialize, Serialize};

use crate::types::{CaptureConfig, DelayMode, DeviceDescriptor, GeneratorConfig, SplData, TfData};

/// Messages the client may send to the agent. `hello` must precede any other
/// message; `start` is only accepted in `Idle` (enforced by the session
/// controller, not by this type).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        client: String,
        nonce: String,
    },
    GetVersion,
    ListDevices,
    /// Flattened: every `CaptureConfig` field is a sibling of `type` on the wire.
    #[serde(rename = "start")]
    Start(#[serde(flatten)] CaptureConfig),
    Stop,
    DelayFreeze {
        enable: bool,
        #[serde(default)]
        applied_ms: Option<f64>,
    },
    SetManualDelay {
        #[serde(default)]
        delay_ms: Option<f64>,
    },
    UpdateGenerator {
        config: GeneratorConfig,
    },
    Calibrate {
        spl_ref_db: f64,
        rms_dbfs: f64,
    },
}

/// Messages the agent may send to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    HelloAck {
        agent: String,
        version: String,
        #[serde(rename = "originAllowed")]
        origin_allowed: bool,
    },
    Version {
        version: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        build: Option<String>,
    },
    Devices {
        items: Vec<DeviceDescriptor>,
    },
    Frame {
        tf: TfData,
        spl: SplData,
        delay_ms: f64,
        applied_delay_ms: f64,
        delay_mode: DelayMode,
        latency_ms: f64,
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        ts: i64,
    },
    DelayStatus {
        mode: DelayMode,
        applied_ms: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_ms: Option<f64>,
    },
    Stopped,
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    CalibrationDone {
        slope: f64,
        offset: f64,
    },
}

impl AgentMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: None,
        }
    }

    pub fn error_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trips() {
        let msg = ClientMessage::Hello {
            client: "ui".into(),
            nonce: "abc".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"hello\""));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        matches!(back, ClientMessage::Hello { .. });
    }

    #[test]
    fn start_flattens_capture_config_fields() {
        let json = serde_json::json!({
            "type": "start",
            "deviceId": "0",
            "sampleRate": 48000,
            "blockSize": 256,
            "refChan": 1,
            "measChan": 2,
            "nfft": 8192,
            "window": "hann",
            "maxDelayMs": 50.0,
        });
        let msg: ClientMessage = serde_json::from_value(json).unwrap();
        match msg {
            ClientMessage::Start(cfg) => assert_eq!(cfg.sample_rate, 48000),
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn error_message_serializes_type_tag() {
        let msg = AgentMessage::error("bad thing");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("bad thing"));
    }
}
