//! Shared data model: device descriptors, capture configuration, and the
//! measurement frame reported to clients.

use serde::{Deserialize, Serialize};

/// Stable identifier + display name + channel counts for an audio device.
/// Immutable for the duration of a capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub inputs: u16,
    pub outputs: u16,
}

/// Analysis window shape. Hann is the default and the only window wired
/// into the primary Welch/CSD path by the original source; Kaiser/Blackman
/// are accepted from the wire and routed the same way (see DESIGN.md, Open
/// Question resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    #[default]
    Hann,
    Kaiser,
    Blackman,
}

/// Test-signal family for the optional generator (C2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Sine,
    White,
    Pink,
    Brown,
    Blue,
    Violet,
    SineSweep,
}

/// Generator sub-configuration, nested inside `start` and `update_generator`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "signalType", default = "default_signal_kind")]
    pub signal_type: SignalKind,
    /// 1-based output channel indices; `None` means all channels.
    #[serde(rename = "outputChannels", default)]
    pub output_channels: Option<Vec<u16>>,
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    #[serde(rename = "startFreq", default = "default_start_freq")]
    pub start_freq: f64,
    #[serde(rename = "endFreq", default = "default_end_freq")]
    pub end_freq: f64,
    #[serde(rename = "sweepDuration", default = "default_sweep_duration")]
    pub sweep_duration: f64,
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
}

fn default_signal_kind() -> SignalKind {
    SignalKind::Sine
}
fn default_frequency() -> f64 {
    1000.0
}
fn default_start_freq() -> f64 {
    20.0
}
fn default_end_freq() -> f64 {
    20000.0
}
fn default_sweep_duration() -> f64 {
    1.0
}
fn default_amplitude() -> f64 {
    0.5
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            signal_type: SignalKind::Sine,
            output_channels: None,
            frequency: default_frequency(),
            start_freq: default_start_freq(),
            end_freq: default_end_freq(),
            sweep_duration: default_sweep_duration(),
            amplitude: default_amplitude(),
        }
    }
}

/// Capture configuration, set once per capture and immutable while running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    #[serde(rename = "blockSize")]
    pub block_size: usize,
    #[serde(rename = "refChan")]
    pub ref_chan: u16,
    #[serde(rename = "measChan")]
    pub meas_chan: u16,

    pub nfft: usize,
    pub window: WindowKind,

    #[serde(rename = "maxDelayMs")]
    pub max_delay_ms: f64,

    #[serde(rename = "useLoopback", default)]
    pub use_loopback: bool,
    #[serde(default)]
    pub generator: Option<GeneratorConfig>,
}

impl CaptureConfig {
    /// `buffer_len = nfft + 2*ceil(max_delay_ms*fs/1000) + floor(0.75*nfft)`.
    pub fn analysis_buffer_len(&self) -> usize {
        let delay_samples = (self.max_delay_ms * self.sample_rate as f64 / 1000.0).ceil() as usize;
        self.nfft + 2 * delay_samples + (self.nfft * 3) / 4
    }

    /// hop = nfft - floor(0.75*nfft), the analyzer's sample count between hops.
    pub fn hop(&self) -> usize {
        self.nfft - (self.nfft * 3) / 4
    }
}

/// Delay controller mode, mirrored on the wire as a lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayMode {
    Auto,
    Frozen,
    Manual,
}

/// Transfer-function + coherence + impulse-response payload of a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfData {
    pub freqs: Vec<f64>,
    pub mag_db: Vec<f64>,
    pub phase_deg: Vec<f64>,
    pub coh: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coh_smoothed: Option<Vec<f64>>,
    pub ir: Vec<f64>,
}

impl TfData {
    /// An empty TF frame, reported when the aligned overlap is too short
    /// to analyze, while SPL/delay are still valid.
    pub fn empty() -> Self {
        Self {
            freqs: Vec::new(),
            mag_db: Vec::new(),
            phase_deg: Vec::new(),
            coh: Vec::new(),
            coh_smoothed: None,
            ir: Vec::new(),
        }
    }
}

/// SPL payload: instantaneous dBFS, labeled `Leq`/`LZ` for wire
/// compatibility though neither is A/C-weighted or time-integrated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SplData {
    #[serde(rename = "Leq")]
    pub leq: f64,
    #[serde(rename = "LZ")]
    pub lz: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_buffer_len_matches_spec_formula() {
        let cfg = CaptureConfig {
            device_id: "0".into(),
            sample_rate: 48000,
            block_size: 256,
            ref_chan: 1,
            meas_chan: 2,
            nfft: 8192,
            window: WindowKind::Hann,
            max_delay_ms: 50.0,
            use_loopback: false,
            generator: None,
        };
        let delay_samples = (50.0_f64 * 48000.0 / 1000.0).ceil() as usize;
        assert_eq!(cfg.analysis_buffer_len(), 8192 + 2 * delay_samples + 6144);
        assert_eq!(cfg.hop(), 8192 - 6144);
    }

    #[test]
    fn generator_config_defaults() {
        let g = GeneratorConfig::default();
        assert!(!g.enabled);
        assert_eq!(g.signal_type, SignalKind::Sine);
        assert_eq!(g.frequency, 1000.0);
    }
}
