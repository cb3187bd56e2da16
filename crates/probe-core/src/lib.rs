//! probe-core: shared data model, wire protocol, and error taxonomy for the
//! capture agent. No I/O lives here.

pub mod error;
pub mod protocol;
pub mod sample;
pub mod types;

pub use error::{ProbeError, ProbeResult};
pub use protocol::{AgentMessage, ClientMessage};
pub use sample::{AudioBlock, Sample};
pub use types::{
    CaptureConfig, DelayMode, DeviceDescriptor, GeneratorConfig, SignalKind, SplData, TfData,
    WindowKind,
};
