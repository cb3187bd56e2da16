//! probe-audio: cpal-backed device I/O, buffer pool, and the audio engine
//! (C1, C3).

mod device;
mod error;
mod pool;
mod stream;

pub use device::{get_default_output_device, get_device_by_id, get_host, list_devices};
pub use error::{AudioError, AudioResult};
pub use pool::{buffer_pool, PoolConsumer, PoolProducer, PoolStats};
pub use stream::{AudioEngine, AudioEngineConfig};
