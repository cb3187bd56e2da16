//! probe-dsp: signal generation and the measurement kernel for the probe
//! agent.
//!
//! - `window` — Hann/Kaiser/Blackman window generation
//! - `generator` — phase-continuous sine/sweep/colored-noise test signals
//! - `gcc_phat` — GCC-PHAT delay estimation
//! - `welch` — adaptive-segment Welch PSD / cross-spectral density
//! - `delay_controller` — Auto/Frozen/Manual delay state machine
//! - `kernel` — alignment, transfer function, coherence, impulse response

pub mod delay_controller;
pub mod gcc_phat;
pub mod generator;
pub mod kernel;
pub mod welch;
pub mod window;

pub use delay_controller::DelayController;
pub use gcc_phat::gcc_phat;
pub use generator::SignalGenerator;
pub use kernel::{compute, KernelOutput};
pub use welch::{adaptive_nperseg, csd, CsdResult};
