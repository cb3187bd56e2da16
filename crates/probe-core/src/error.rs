//! Shared error taxonomy.
//!
//! Each downstream crate defines its own error enum for crate-local failure
//! modes and converts into [`ProbeError`] at the crate boundary.

use thiserror::Error;

/// Root error type, used as the crate-boundary conversion target for
/// every downstream crate's local error enum.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Malformed JSON, unknown discriminator, missing fields. Connection stays open.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid state transition (`start` while Capturing, `stop` while Idle).
    #[error("state error: {0}")]
    State(String),

    /// Device cannot be opened, or the requested configuration is unsupported.
    #[error("device error: {0}")]
    Device(String),

    /// DSP runtime fault (underflow, NaN, buffer shape mismatch). Never fatal.
    #[error("dsp error: {0}")]
    Dsp(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ProbeResult<T> = Result<T, ProbeError>;
