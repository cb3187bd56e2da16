//! Session Controller (C7): per-connection message dispatch and capture
//! lifecycle.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use probe_core::{AgentMessage, CaptureConfig, ClientMessage};

use crate::capture::{self, CaptureHandle, ControlMsg};

const AGENT_NAME: &str = "probe-agent";
const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Capturing,
}

/// Process-wide capture guard: at most one [`SessionController`] may hold
/// `true` at a time, regardless of how many connections are open. Mirrors
/// the original agent's module-level `capture_task` global, which every
/// connection handler consulted before starting a new capture.
pub type GlobalCaptureGuard = Arc<Mutex<bool>>;

pub fn new_global_capture_guard() -> GlobalCaptureGuard {
    Arc::new(Mutex::new(false))
}

/// Owns one client connection's state machine. `hello` must precede any
/// other message; `start` is only accepted from `Idle`, and only when no
/// other connection is already capturing (`global_capturing`).
pub struct SessionController {
    state: State,
    hello_seen: bool,
    capture: Option<CaptureHandle>,
    out_tx: mpsc::UnboundedSender<AgentMessage>,
    origin_allowed: bool,
    global_capturing: GlobalCaptureGuard,
}

impl SessionController {
    pub fn new(out_tx: mpsc::UnboundedSender<AgentMessage>, origin_allowed: bool, global_capturing: GlobalCaptureGuard) -> Self {
        Self {
            state: State::Idle,
            hello_seen: false,
            capture: None,
            out_tx,
            origin_allowed,
            global_capturing,
        }
    }

    fn send(&self, msg: AgentMessage) {
        let _ = self.out_tx.send(msg);
    }

    /// Parse and dispatch one client text frame.
    pub async fn handle_text(&mut self, text: &str) {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                self.send(AgentMessage::error(format!("malformed message: {e}")));
                return;
            }
        };

        if !self.hello_seen && !matches!(msg, ClientMessage::Hello { .. }) {
            self.send(AgentMessage::error("hello must precede any other message"));
            return;
        }

        match msg {
            ClientMessage::Hello { .. } => {
                self.hello_seen = true;
                self.send(AgentMessage::HelloAck {
                    agent: AGENT_NAME.to_string(),
                    version: AGENT_VERSION.to_string(),
                    origin_allowed: self.origin_allowed,
                });
            }
            ClientMessage::GetVersion => {
                self.send(AgentMessage::Version {
                    version: AGENT_VERSION.to_string(),
                    build: None,
                });
            }
            ClientMessage::ListDevices => match probe_audio::list_devices() {
                Ok(items) => self.send(AgentMessage::Devices { items }),
                Err(e) => self.send(AgentMessage::error(format!("failed to list devices: {e}"))),
            },
            ClientMessage::Start(config) => self.handle_start(config).await,
            ClientMessage::Stop => self.handle_stop().await,
            ClientMessage::DelayFreeze { enable, applied_ms } => {
                self.forward(ControlMsg::DelayFreeze { enable, applied_ms });
            }
            ClientMessage::SetManualDelay { delay_ms } => {
                self.forward(ControlMsg::SetManualDelay { delay_ms });
            }
            ClientMessage::UpdateGenerator { config } => {
                self.forward(ControlMsg::UpdateGenerator { config });
            }
            ClientMessage::Calibrate { .. } => {
                // The wire carries spl_ref_db/rms_dbfs, but every revision of
                // the original source leaves the mapping to (slope, offset)
                // unstated; answered with an explicit unimplemented error
                // rather than a guessed formula (see DESIGN.md).
                self.send(AgentMessage::error_with_code("calibration is not implemented", "unimplemented"));
            }
        }
    }

    async fn handle_start(&mut self, config: CaptureConfig) {
        if self.state == State::Capturing {
            self.send(AgentMessage::error("capture already in progress"));
            return;
        }
        // At most one Capturing session system-wide: a second `start` on a
        // different connection must fail even though this connection's own
        // `state` is still `Idle`.
        {
            let mut global = self.global_capturing.lock();
            if *global {
                self.send(AgentMessage::error("capture already in progress"));
                return;
            }
            *global = true;
        }
        match capture::spawn(config, self.out_tx.clone()) {
            Ok(handle) => {
                self.capture = Some(handle);
                self.state = State::Capturing;
            }
            Err(e) => {
                *self.global_capturing.lock() = false;
                self.send(AgentMessage::error(format!("failed to start capture: {e}")));
            }
        }
    }

    async fn handle_stop(&mut self) {
        if self.state != State::Capturing {
            self.send(AgentMessage::error("not capturing"));
            return;
        }
        self.stop_capture().await;
    }

    async fn stop_capture(&mut self) {
        if let Some(handle) = self.capture.take() {
            handle.stop().await;
        }
        self.state = State::Idle;
        *self.global_capturing.lock() = false;
        self.send(AgentMessage::Stopped);
    }

    /// Resolves once a running capture ends on its own (a fatal device
    /// error), never for an explicit `stop`. Pends forever while idle, so it
    /// is safe to poll unconditionally from a `select!` loop.
    pub async fn wait_capture_ended(&mut self) {
        match self.capture.as_mut() {
            Some(handle) => handle.wait_ended().await,
            None => std::future::pending().await,
        }
    }

    /// Called after `wait_capture_ended` resolves: the task is already gone,
    /// so this only updates local state and reports the same `stopped` a
    /// client-initiated `stop` would, per the device-error handling policy.
    pub fn capture_ended(&mut self) {
        self.capture = None;
        self.state = State::Idle;
        *self.global_capturing.lock() = false;
        self.send(AgentMessage::Stopped);
    }

    fn forward(&self, msg: ControlMsg) {
        if let Some(handle) = &self.capture {
            handle.send(msg);
        } else {
            self.send(AgentMessage::error("no active capture"));
        }
    }

    /// Called when the connection closes or the transport errors: an
    /// implicit stop with no reply, since there is no channel left to
    /// write one to.
    pub async fn shutdown(&mut self) {
        if self.state == State::Capturing {
            if let Some(handle) = self.capture.take() {
                handle.stop().await;
            }
            self.state = State::Idle;
            *self.global_capturing.lock() = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_before_hello_are_rejected() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = SessionController::new(tx, true, new_global_capture_guard());
        session.handle_text(r#"{"type":"get_version"}"#).await;
        match rx.recv().await {
            Some(AgentMessage::Error { message, .. }) => assert!(message.contains("hello")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hello_then_get_version_succeeds() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = SessionController::new(tx, true, new_global_capture_guard());
        session.handle_text(r#"{"type":"hello","client":"ui","nonce":"n"}"#).await;
        assert!(matches!(rx.recv().await, Some(AgentMessage::HelloAck { .. })));
        session.handle_text(r#"{"type":"get_version"}"#).await;
        assert!(matches!(rx.recv().await, Some(AgentMessage::Version { .. })));
    }

    #[tokio::test]
    async fn stop_without_capture_is_an_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = SessionController::new(tx, true, new_global_capture_guard());
        session.handle_text(r#"{"type":"hello","client":"ui","nonce":"n"}"#).await;
        rx.recv().await;
        session.handle_text(r#"{"type":"stop"}"#).await;
        match rx.recv().await {
            Some(AgentMessage::Error { message, .. }) => assert!(message.contains("not capturing")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn calibrate_reports_unimplemented() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = SessionController::new(tx, true, new_global_capture_guard());
        session.handle_text(r#"{"type":"hello","client":"ui","nonce":"n"}"#).await;
        rx.recv().await;
        session
            .handle_text(r#"{"type":"calibrate","spl_ref_db":94.0,"rms_dbfs":-20.0}"#)
            .await;
        match rx.recv().await {
            Some(AgentMessage::Error { code, .. }) => assert_eq!(code.as_deref(), Some("unimplemented")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    /// A second connection's `start` must fail while another connection
    /// holds the single system-wide capture slot, even though this
    /// connection's own per-connection `state` is still `Idle`.
    #[tokio::test]
    async fn start_is_rejected_while_another_connection_holds_the_global_slot() {
        let guard = new_global_capture_guard();
        *guard.lock() = true;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = SessionController::new(tx, true, guard);
        session.handle_text(r#"{"type":"hello","client":"ui","nonce":"n"}"#).await;
        rx.recv().await;
        session
            .handle_text(
                r#"{"type":"start","deviceId":"default","sampleRate":48000,"blockSize":512,"refChan":1,"measChan":2,"nfft":2048,"window":"hann","maxDelayMs":50.0}"#,
            )
            .await;
        match rx.recv().await {
            Some(AgentMessage::Error { message, .. }) => assert!(message.contains("already in progress")),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
