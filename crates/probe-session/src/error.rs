//! Session-local error types: transport/TLS faults that the connection
//! handler surfaces before a [`probe_core::ProbeError`] makes sense (no
//! session exists yet to report one through).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("TLS error: {0}")]
    Tls(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;
