//! Signal Generator (C2): phase-continuous sine, log sweep, and pre-tabled
//! colored noise.

use std::f64::consts::PI;

use probe_core::{GeneratorConfig, SignalKind};

use crate::window::hann;

const NOISE_TABLE_SECONDS: usize = 60;
const XFADE_LEN: usize = 2048;
const BROWN_LEAK: f64 = 0.9995;

enum State {
    Sine {
        phase: f64,
    },
    Sweep {
        phase: f64,
        current_time: f64,
    },
    Noise {
        table: Vec<f64>,
        pos: usize,
        xfade_len: usize,
        xfade_in: Vec<f64>,
        xfade_out: Vec<f64>,
    },
}

/// Generates one of sine / log-sweep / colored-noise families.
pub struct SignalGenerator {
    config: GeneratorConfig,
    sample_rate: f64,
    state: State,
}

impl SignalGenerator {
    pub fn new(config: GeneratorConfig, sample_rate: f64) -> Self {
        let state = match config.signal_type {
            SignalKind::Sine => State::Sine { phase: 0.0 },
            SignalKind::SineSweep => State::Sweep {
                phase: 0.0,
                current_time: 0.0,
            },
            SignalKind::White | SignalKind::Pink | SignalKind::Brown | SignalKind::Blue | SignalKind::Violet => {
                build_noise_state(config.signal_type, sample_rate)
            }
        };
        let mut gen = Self {
            config,
            sample_rate,
            state,
        };
        // Pre-generate a small block so the first real callback is never silent.
        let _ = gen.generate(64);
        gen
    }

    /// Advance internal state by `frames` samples and return the mono signal,
    /// pre-amplitude-scaling applied.
    pub fn generate(&mut self, frames: usize) -> Vec<f64> {
        let mut signal = match &mut self.state {
            State::Sine { phase } => generate_sine(phase, self.config.frequency, self.sample_rate, frames),
            State::Sweep { phase, current_time } => generate_sweep(
                phase,
                current_time,
                self.config.start_freq,
                self.config.end_freq,
                self.config.sweep_duration,
                self.sample_rate,
                frames,
            ),
            State::Noise {
                table,
                pos,
                xfade_len,
                xfade_in,
                xfade_out,
            } => generate_noise(table, pos, *xfade_len, xfade_in, xfade_out, frames),
        };
        for s in &mut signal {
            *s *= self.config.amplitude;
        }
        signal
    }

    /// Route a mono signal into a multi-channel block, 1-based channel
    /// indices, unlisted channels zeroed.
    pub fn route(&self, signal: &[f64], num_channels: usize) -> Vec<Vec<f64>> {
        let mut out = vec![vec![0.0; signal.len()]; num_channels];
        match &self.config.output_channels {
            None => {
                for ch in out.iter_mut() {
                    ch.copy_from_slice(signal);
                }
            }
            Some(channels) => {
                for &ch in channels {
                    let idx = ch as usize;
                    if idx >= 1 && idx <= num_channels {
                        out[idx - 1].copy_from_slice(signal);
                    }
                }
            }
        }
        out
    }

    /// Returns all phases/cursors to zero.
    pub fn reset(&mut self) {
        match &mut self.state {
            State::Sine { phase } => *phase = 0.0,
            State::Sweep { phase, current_time } => {
                *phase = 0.0;
                *current_time = 0.0;
            }
            State::Noise { pos, .. } => *pos = 0,
        }
    }

    /// Apply an `update_generator` control message. Amplitude, frequency,
    /// sweep endpoints, and the output channel set take effect on the next
    /// `generate()` call since the per-sample functions read them fresh from
    /// `self.config`. A change of `signal_type` rebuilds the internal state
    /// (e.g. a fresh noise table), starting from phase/cursor zero.
    pub fn update_config(&mut self, config: GeneratorConfig) {
        if std::mem::discriminant(&self.config.signal_type) != std::mem::discriminant(&config.signal_type) {
            self.state = match config.signal_type {
                SignalKind::Sine => State::Sine { phase: 0.0 },
                SignalKind::SineSweep => State::Sweep {
                    phase: 0.0,
                    current_time: 0.0,
                },
                SignalKind::White | SignalKind::Pink | SignalKind::Brown | SignalKind::Blue | SignalKind::Violet => {
                    build_noise_state(config.signal_type, self.sample_rate)
                }
            };
        }
        self.config = config;
    }
}

fn generate_sine(phase: &mut f64, frequency: f64, fs: f64, frames: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(frames);
    let step = 2.0 * PI * frequency / fs;
    for _ in 0..frames {
        out.push(phase.sin());
        *phase += step;
        *phase %= 2.0 * PI;
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn generate_sweep(
    phase: &mut f64,
    current_time: &mut f64,
    f0: f64,
    f1: f64,
    duration: f64,
    fs: f64,
    frames: usize,
) -> Vec<f64> {
    let mut out = Vec::with_capacity(frames);
    let k = (f1 / f0).ln() / duration;
    let mut t = *current_time;
    for _ in 0..frames {
        out.push(phase.sin());
        let freq = f0 * (k * t).exp();
        *phase += 2.0 * PI * freq / fs;
        t += 1.0 / fs;
        if t >= duration {
            t %= duration;
            *phase = 0.0;
        }
    }
    *phase %= 2.0 * PI;
    *current_time = t;
    out
}

fn generate_noise(
    table: &[f64],
    pos: &mut usize,
    xfade_len: usize,
    xfade_in: &[f64],
    xfade_out: &[f64],
    frames: usize,
) -> Vec<f64> {
    let n = table.len();
    let mut out = vec![0.0; frames];
    let p = *pos;

    if p + frames <= n {
        out.copy_from_slice(&table[p..p + frames]);
        *pos = if p + frames == n { 0 } else { p + frames };
        return out;
    }

    let n1 = n - p;
    let n2 = frames - n1;
    out[..n1].copy_from_slice(&table[p..]);
    out[n1..].copy_from_slice(&table[..n2]);

    let l = xfade_len;
    if n1 >= l && n2 >= l {
        for i in 0..l {
            let crossfaded = table[n - l + i] * xfade_out[i] + table[i] * xfade_in[i];
            out[n1 - l + i] = crossfaded;
        }
    }

    *pos = n2;
    out
}

fn build_noise_state(kind: SignalKind, fs: f64) -> State {
    let n = (fs as usize) * NOISE_TABLE_SECONDS;
    let mut x = match kind {
        SignalKind::Brown => {
            let white = white_noise(n, 0x9e3779b97f4a7c15);
            let mut y = vec![0.0; n];
            let mut acc = 0.0f64;
            for i in 0..n {
                acc = BROWN_LEAK * acc + (1.0 - BROWN_LEAK) * white[i];
                y[i] = acc;
            }
            y
        }
        SignalKind::White => white_noise(n, 0x2545f4914f6cdd1d),
        // Pink/blue/violet are shaped in the frequency domain: a white
        // spectrum with random phase, magnitude scaled by f^(exponent/2)
        // so the power spectral density follows f^exponent.
        SignalKind::Pink => shaped_noise(n, -1.0, 0x853c49e6748fea9b),
        SignalKind::Blue => shaped_noise(n, 1.0, 0xda3e39cb94b95bdb),
        SignalKind::Violet => shaped_noise(n, 2.0, 0x632be59bd9b4e019),
        SignalKind::Sine | SignalKind::SineSweep => unreachable!(),
    };

    let rms = (x.iter().map(|v| v * v).sum::<f64>() / n as f64).sqrt();
    if rms > 1e-12 {
        let gain = 0.5 / rms;
        for v in &mut x {
            *v *= gain;
        }
    }

    let l = XFADE_LEN.min((n / 64).max(1));
    let w = hann(2 * l);
    let xfade_in = w[..l].to_vec();
    let xfade_out = w[l..].to_vec();

    State::Noise {
        table: x,
        pos: 0,
        xfade_len: l,
        xfade_in,
        xfade_out,
    }
}

fn white_noise(n: usize, seed: u64) -> Vec<f64> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) as f64 / u32::MAX as f64) * 2.0 - 1.0
        })
        .collect()
}

/// Builds an `n`-sample table whose PSD follows `f^exponent`: shape a
/// random-phase white spectrum by `f^(exponent/2)` in magnitude and
/// inverse-transform back to the time domain.
fn shaped_noise(n: usize, exponent: f64, seed: u64) -> Vec<f64> {
    use realfft::RealFftPlanner;
    use rustfft::num_complex::Complex;

    let mut planner = RealFftPlanner::<f64>::new();
    let fwd = planner.plan_fft_forward(n);
    let inv = planner.plan_fft_inverse(n);

    let mut time = white_noise(n, seed);
    let mut spectrum = fwd.make_output_vec();
    let mut scratch = fwd.make_scratch_vec();
    fwd.process_with_scratch(&mut time, &mut spectrum, &mut scratch)
        .expect("forward fft of fixed-length white noise table");

    let n_bins = spectrum.len();
    for (k, bin) in spectrum.iter_mut().enumerate() {
        if k == 0 {
            *bin = Complex::new(0.0, 0.0);
            continue;
        }
        let f = k as f64 / n_bins as f64;
        let gain = f.powf(exponent / 2.0);
        *bin *= gain;
    }

    let mut output = inv.make_output_vec();
    let mut scratch = inv.make_scratch_vec();
    inv.process_with_scratch(&mut spectrum, &mut output, &mut scratch)
        .expect("inverse fft of shaped spectrum");

    let scale = 1.0 / n as f64;
    for v in &mut output {
        *v *= scale;
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_is_phase_continuous_across_blocks() {
        let mut gen = SignalGenerator::new(
            GeneratorConfig {
                enabled: true,
                signal_type: SignalKind::Sine,
                output_channels: None,
                frequency: 1000.0,
                amplitude: 1.0,
                ..GeneratorConfig::default()
            },
            48000.0,
        );
        gen.reset();
        let a = gen.generate(128);
        let b = gen.generate(128);
        // Recompute the boundary sample analytically and compare.
        let step = 2.0 * PI * 1000.0 / 48000.0;
        let expected_next = (128.0 * step).sin();
        assert!((b[0] - expected_next).abs() < 1e-9);
        assert_eq!(a.len(), 128);
    }

    #[test]
    fn route_zeroes_unlisted_channels() {
        let gen = SignalGenerator::new(
            GeneratorConfig {
                enabled: true,
                signal_type: SignalKind::Sine,
                output_channels: Some(vec![2]),
                ..GeneratorConfig::default()
            },
            48000.0,
        );
        let signal = vec![1.0, 1.0, 1.0];
        let routed = gen.route(&signal, 2);
        assert!(routed[0].iter().all(|&v| v == 0.0));
        assert_eq!(routed[1], signal);
    }

    #[test]
    fn update_config_changes_frequency_without_rebuild() {
        let mut gen = SignalGenerator::new(
            GeneratorConfig {
                enabled: true,
                signal_type: SignalKind::Sine,
                frequency: 1000.0,
                amplitude: 1.0,
                ..GeneratorConfig::default()
            },
            48000.0,
        );
        gen.reset();
        let _ = gen.generate(64);
        gen.update_config(GeneratorConfig {
            enabled: true,
            signal_type: SignalKind::Sine,
            frequency: 2000.0,
            amplitude: 1.0,
            ..GeneratorConfig::default()
        });
        assert!(matches!(gen.state, State::Sine { .. }));
        assert_eq!(gen.config.frequency, 2000.0);
    }

    #[test]
    fn update_config_rebuilds_state_on_kind_change() {
        let mut gen = SignalGenerator::new(
            GeneratorConfig {
                enabled: true,
                signal_type: SignalKind::Sine,
                amplitude: 1.0,
                ..GeneratorConfig::default()
            },
            1000.0,
        );
        gen.update_config(GeneratorConfig {
            enabled: true,
            signal_type: SignalKind::White,
            amplitude: 1.0,
            ..GeneratorConfig::default()
        });
        assert!(matches!(gen.state, State::Noise { .. }));
    }

    #[test]
    fn noise_table_is_normalized_and_wraps() {
        let gen = SignalGenerator::new(
            GeneratorConfig {
                enabled: true,
                signal_type: SignalKind::White,
                amplitude: 1.0,
                ..GeneratorConfig::default()
            },
            1000.0,
        );
        if let State::Noise { table, .. } = &gen.state {
            let rms = (table.iter().map(|v| v * v).sum::<f64>() / table.len() as f64).sqrt();
            assert!((rms - 0.5).abs() < 0.05);
        } else {
            panic!("expected noise state");
        }
    }
}
