//! DSP Kernel (C5): alignment, Welch/CSD, transfer function, coherence,
//! log-frequency smoothing, and impulse response synthesis.

use realfft::RealFftPlanner;
use rustfft::num_complex::Complex;
use std::f64::consts::{LN_2, PI};

use probe_core::{SplData, TfData, WindowKind};

use crate::delay_controller::DelayController;
use crate::welch;

const EPS: f64 = 1e-20;
const MIN_USABLE_LEN: usize = 64;
const MIN_SMOOTH_BINS: usize = 3;
/// 1/6-octave half-width in natural-log frequency.
const HALF_BANDWIDTH: f64 = LN_2 / 12.0;

/// Full kernel output for one analysis hop.
pub struct KernelOutput {
    pub tf: TfData,
    pub spl: SplData,
    pub delay_ms: f64,
    pub applied_delay_ms: f64,
}

/// Run the full kernel over one hop's reference/measurement slices.
///
/// `delay_ctl` is consulted (and, in Auto mode, updated) for delay
/// selection before the rest of the pipeline runs.
pub fn compute(
    x: &[f64],
    y: &[f64],
    fs: f64,
    nfft: usize,
    window_kind: WindowKind,
    max_delay_ms: f64,
    delay_ctl: &mut DelayController,
) -> KernelOutput {
    let n = x.len().min(y.len());
    let applied_ms = delay_ctl.update(x, y, fs, Some(max_delay_ms));
    let (_, _, raw_ms) = delay_ctl.status();

    // Step 2: integer alignment with zero padding.
    let d_exact = applied_ms * fs / 1000.0;
    let d_int = d_exact.round() as i64;
    let frac = d_int as f64 - d_exact;

    let y_shifted = shift_zero_fill(&y[..n], d_int);
    let usable_len = (n as i64 - d_int.abs()).max(0) as usize;

    let (x_eff, y_eff): (&[f64], &[f64]) = if d_int >= 0 {
        (&x[..n][..usable_len], &y_shifted[..usable_len])
    } else {
        let start = n - usable_len;
        (&x[..n][start..n], &y_shifted[start..n])
    };

    let spl = compute_spl(y_eff);

    if usable_len < MIN_USABLE_LEN {
        return KernelOutput {
            tf: TfData::empty(),
            spl,
            delay_ms: raw_ms.unwrap_or(applied_ms),
            applied_delay_ms: applied_ms,
        };
    }

    // Step 3: adaptive segmentation.
    let (nperseg, noverlap) = welch::adaptive_nperseg(nfft, usable_len);

    // Step 4: Welch/CSD.
    let mut spectra = welch::csd(x_eff, y_eff, fs, nperseg, noverlap, window_kind);

    // Step 5: fractional-delay correction.
    if frac.abs() > 1e-6 {
        for (k, f) in spectra.freqs.iter().enumerate() {
            let theta = 2.0 * PI * f * frac / fs;
            let rot = Complex::new(theta.cos(), theta.sin());
            spectra.pxy[k] *= rot;
        }
    }

    // Step 6: raw coherence.
    let coh_raw: Vec<f64> = spectra
        .pxx
        .iter()
        .zip(spectra.pyy.iter())
        .zip(spectra.pxy.iter())
        .map(|((pxx, pyy), pxy)| (pxy.norm_sqr() / (pxx * pyy + EPS)).clamp(0.0, 1.0))
        .collect();

    // Step 7: log-frequency (1/6-octave) smoothing.
    let (hs, coh_s) = smooth_log_frequency(&spectra.freqs, &spectra.pxx, &spectra.pyy, &spectra.pxy, &coh_raw);

    // Step 8: display values.
    let mag_db: Vec<f64> = hs.iter().map(|h| 20.0 * (h.norm() + EPS).log10()).collect();
    let phase_deg: Vec<f64> = hs.iter().map(|h| h.arg().to_degrees()).collect();

    // Step 9: impulse response.
    let ir = impulse_response(&hs);

    let tf = TfData {
        freqs: spectra.freqs,
        mag_db,
        phase_deg,
        coh: coh_raw,
        coh_smoothed: Some(coh_s),
        ir,
    };

    KernelOutput {
        tf,
        spl,
        delay_ms: raw_ms.unwrap_or(applied_ms),
        applied_delay_ms: applied_ms,
    }
}

/// `out[i] = y[i + shift]` when in range, else zero. Positive `shift` moves
/// later samples earlier (compensates a measurement channel that lags).
fn shift_zero_fill(y: &[f64], shift: i64) -> Vec<f64> {
    let n = y.len() as i64;
    let mut out = vec![0.0; y.len()];
    for i in 0..n {
        let src = i + shift;
        if src >= 0 && src < n {
            out[i as usize] = y[src as usize];
        }
    }
    out
}

fn compute_spl(y_eff: &[f64]) -> SplData {
    let rms = if y_eff.is_empty() {
        0.0
    } else {
        (y_eff.iter().map(|v| v * v).sum::<f64>() / y_eff.len() as f64).sqrt()
    };
    let dbfs = 20.0 * rms.max(EPS).log10();
    SplData { leq: dbfs, lz: dbfs }
}

/// Step 7: band-integration via a natural-log-centered window found by
/// binary search, Hann-tapered and weighted by raw coherence.
fn smooth_log_frequency(
    freqs: &[f64],
    pxx: &[f64],
    pyy: &[f64],
    pxy: &[Complex<f64>],
    coh_raw: &[f64],
) -> (Vec<Complex<f64>>, Vec<f64>) {
    let n_bins = freqs.len();
    let mut hs = vec![Complex::new(0.0, 0.0); n_bins];
    let mut coh_s = vec![0.0f64; n_bins];

    for i in 1..n_bins {
        let ln_f = freqs[i].max(f64::MIN_POSITIVE).ln();
        let lo = ln_f - HALF_BANDWIDTH;
        let hi = ln_f + HALF_BANDWIDTH;

        let mut i0 = lower_bound_ln(freqs, lo, 1);
        let mut i1 = upper_bound_ln(freqs, hi, 1);
        if i1 <= i0 {
            i1 = (i0 + 1).min(n_bins);
        }
        if i1 - i0 < MIN_SMOOTH_BINS {
            let deficit = MIN_SMOOTH_BINS - (i1 - i0);
            let grow_left = deficit / 2 + deficit % 2;
            let grow_right = deficit / 2;
            i0 = i0.saturating_sub(grow_left).max(1);
            i1 = (i1 + grow_right).min(n_bins);
        }

        let m = i1 - i0;
        let taper = crate::window::hann(m.max(1));
        let mut w_pxx = 0.0;
        let mut w_pyy = 0.0;
        let mut w_pxy = Complex::new(0.0, 0.0);
        let mut w_sum = 0.0;
        for (j, b) in (i0..i1).enumerate() {
            let w = taper[j] * coh_raw[b];
            w_pxx += w * pxx[b];
            w_pyy += w * pyy[b];
            w_pxy += pxy[b] * w;
            w_sum += w;
        }
        let (pxx_b, pyy_b, pxy_b) = if w_sum > EPS {
            (w_pxx / w_sum, w_pyy / w_sum, w_pxy / w_sum)
        } else {
            (pxx[i], pyy[i], pxy[i])
        };

        hs[i] = pxy_b / (pxx_b + EPS);
        coh_s[i] = (pxy_b.norm_sqr() / (pxx_b * pyy_b + EPS)).clamp(0.0, 1.0);
    }

    if n_bins > 1 {
        hs[0] = hs[1];
        coh_s[0] = coh_s[1];
    }

    (hs, coh_s)
}

fn lower_bound_ln(freqs: &[f64], target_ln: f64, start: usize) -> usize {
    let mut lo = start;
    let mut hi = freqs.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if freqs[mid].max(f64::MIN_POSITIVE).ln() < target_ln {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

fn upper_bound_ln(freqs: &[f64], target_ln: f64, start: usize) -> usize {
    let mut lo = start;
    let mut hi = freqs.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if freqs[mid].max(f64::MIN_POSITIVE).ln() <= target_ln {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Step 9: DC/Nyquist zeroing, linear edge taper, inverse real transform,
/// circular rotation to a causal-centered display IR.
fn impulse_response(hs: &[Complex<f64>]) -> Vec<f64> {
    let n_bins = hs.len();
    if n_bins < 2 {
        return Vec::new();
    }

    let mut spec = hs.to_vec();
    spec[0].im = 0.0;
    let last = n_bins - 1;
    spec[last].im = 0.0;

    let taper_len = (n_bins / 64).max(8).min(n_bins / 2).max(1);
    for i in 0..taper_len {
        let g = i as f64 / taper_len as f64;
        spec[i] *= g;
        spec[last - i] *= g;
    }

    let ir_len = 2 * (n_bins - 1);
    if ir_len == 0 {
        return Vec::new();
    }

    let mut planner = RealFftPlanner::<f64>::new();
    let inv = planner.plan_fft_inverse(ir_len);
    let mut input = inv.make_input_vec();
    input.copy_from_slice(&spec);
    let mut output = inv.make_output_vec();
    let mut scratch = inv.make_scratch_vec();
    inv.process_with_scratch(&mut input, &mut output, &mut scratch)
        .expect("inverse fft on validated spectrum");

    let scale = 1.0 / ir_len as f64;
    for v in output.iter_mut() {
        *v *= scale;
    }
    output.rotate_right(ir_len / 2);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_core::WindowKind;

    fn noise(n: usize, seed: u64) -> Vec<f64> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                ((state >> 33) as f64 / u32::MAX as f64) * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn identity_gives_unit_transfer_function() {
        let x = noise(16384, 11);
        let mut ctl = DelayController::new(0.9);
        let out = compute(&x, &x, 48000.0, 8192, WindowKind::Hann, 50.0, &mut ctl);
        assert!(out.applied_delay_ms.abs() < 0.1);
        for (db, phase) in out.tf.mag_db.iter().zip(out.tf.phase_deg.iter()).skip(4) {
            assert!(db.abs() < 0.5, "mag_db {db}");
            assert!(phase.abs() < 2.0, "phase {phase}");
        }
        for &c in &out.tf.coh {
            assert!((0.0..=1.0).contains(&c));
        }
    }

    #[test]
    fn coherence_always_bounded() {
        let x = noise(8192, 3);
        let y = noise(8192, 99);
        let mut ctl = DelayController::new(0.9);
        let out = compute(&x, &y, 48000.0, 4096, WindowKind::Hann, 50.0, &mut ctl);
        for &c in &out.tf.coh {
            assert!((0.0..=1.0).contains(&c));
        }
        if let Some(cs) = &out.tf.coh_smoothed {
            for &c in cs {
                assert!((0.0..=1.0).contains(&c));
            }
        }
    }

    #[test]
    fn spl_round_trips_sine_amplitude() {
        let fs = 48000.0;
        let a = 0.5;
        let y: Vec<f64> = (0..4096).map(|i| a * (2.0 * PI * 1000.0 * i as f64 / fs).sin()).collect();
        let spl = compute_spl(&y);
        let expected = 20.0 * (a / std::f64::consts::SQRT_2).log10();
        assert!((spl.leq - expected).abs() < 0.1, "{} vs {}", spl.leq, expected);
    }

    #[test]
    fn short_overlap_yields_empty_tf_but_valid_spl() {
        let x = vec![0.0; 40];
        let y = vec![0.0; 40];
        let mut ctl = DelayController::new(0.9);
        ctl.set_manual(Some(100.0));
        let out = compute(&x, &y, 48000.0, 8192, WindowKind::Hann, 200.0, &mut ctl);
        assert!(out.tf.freqs.is_empty());
        assert_eq!(out.applied_delay_ms, 100.0);
    }
}
