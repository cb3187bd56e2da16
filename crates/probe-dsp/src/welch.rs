//! Adaptive-segment Welch PSD / cross-spectral density estimation.

use realfft::RealFftPlanner;
use rustfft::num_complex::Complex;

use crate::window;
use probe_core::WindowKind;

const MIN_NPERSEG: usize = 32;
const MIN_SEGMENTS: usize = 4;

/// Result of a Welch/CSD pass: shared frequency axis plus the three spectra
/// needed downstream (auto-power of x, auto-power of y, cross-power x→y).
pub struct CsdResult {
    pub freqs: Vec<f64>,
    pub pxx: Vec<f64>,
    pub pyy: Vec<f64>,
    pub pxy: Vec<Complex<f64>>,
}

/// Choose `nperseg` starting at `min(nfft, usable_len)` and halving (floor
/// 32) while fewer than 4 segments of 75%-overlap would fit.
pub fn adaptive_nperseg(nfft: usize, usable_len: usize) -> (usize, usize) {
    let mut nperseg = nfft.min(usable_len).max(1);
    loop {
        let noverlap = (nperseg * 3) / 4;
        let hop = nperseg.saturating_sub(noverlap).max(1);
        let segments = if usable_len >= nperseg {
            1 + (usable_len - nperseg) / hop
        } else {
            0
        };
        if segments >= MIN_SEGMENTS || nperseg <= MIN_NPERSEG {
            return (nperseg.max(1), noverlap);
        }
        nperseg = (nperseg / 2).max(MIN_NPERSEG);
    }
}

/// Compute `Pxx`, `Pyy` (real PSDs, Welch-averaged) and `Pxy = csd(x, y)`
/// (complex, `conj(X)*Y`) over fully-overlapping slices of `x`, `y`, with
/// `detrend = constant`, one-sided, density scaling. `Pxx`/`Pyy` are floored
/// at `eps = 1e-20`.
pub fn csd(x: &[f64], y: &[f64], fs: f64, nperseg: usize, noverlap: usize, window_kind: WindowKind) -> CsdResult {
    const EPS: f64 = 1e-20;
    let n = x.len().min(y.len());
    let hop = nperseg.saturating_sub(noverlap).max(1);

    let win = window::generate(window_kind, nperseg);
    let win_sq_sum: f64 = win.iter().map(|w| w * w).sum();
    let scale = 1.0 / (fs * win_sq_sum.max(1e-300));

    let n_bins = nperseg / 2 + 1;
    let mut planner = RealFftPlanner::<f64>::new();
    let fwd = planner.plan_fft_forward(nperseg);

    let mut pxx = vec![0.0f64; n_bins];
    let mut pyy = vec![0.0f64; n_bins];
    let mut pxy = vec![Complex::new(0.0, 0.0); n_bins];

    let mut seg_count = 0usize;
    let mut start = 0usize;
    let mut xin = fwd.make_input_vec();
    let mut yin = fwd.make_input_vec();
    let mut xout = fwd.make_output_vec();
    let mut yout = fwd.make_output_vec();
    let mut scratch = fwd.make_scratch_vec();

    while start + nperseg <= n {
        let xs = &x[start..start + nperseg];
        let ys = &y[start..start + nperseg];
        let xmean: f64 = xs.iter().sum::<f64>() / nperseg as f64;
        let ymean: f64 = ys.iter().sum::<f64>() / nperseg as f64;

        for i in 0..nperseg {
            xin[i] = (xs[i] - xmean) * win[i];
            yin[i] = (ys[i] - ymean) * win[i];
        }

        fwd.process_with_scratch(&mut xin, &mut xout, &mut scratch)
            .expect("forward fft on validated segment");
        fwd.process_with_scratch(&mut yin, &mut yout, &mut scratch)
            .expect("forward fft on validated segment");

        for k in 0..n_bins {
            let xv = xout[k];
            let yv = yout[k];
            let one_sided = if k == 0 || (nperseg % 2 == 0 && k == n_bins - 1) {
                1.0
            } else {
                2.0
            };
            pxx[k] += one_sided * (xv.re * xv.re + xv.im * xv.im) * scale;
            pyy[k] += one_sided * (yv.re * yv.re + yv.im * yv.im) * scale;
            let cross = xv.conj() * yv * one_sided * scale;
            pxy[k] += cross;
        }

        seg_count += 1;
        start += hop;
    }

    let count = seg_count.max(1) as f64;
    for k in 0..n_bins {
        pxx[k] = (pxx[k] / count).max(EPS);
        pyy[k] = (pyy[k] / count).max(EPS);
        pxy[k] /= count;
    }

    let freqs: Vec<f64> = (0..n_bins).map(|k| k as f64 * fs / nperseg as f64).collect();

    CsdResult { freqs, pxx, pyy, pxy }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_nperseg_halves_for_short_signals() {
        let (nperseg, noverlap) = adaptive_nperseg(8192, 2048);
        assert!(nperseg <= 2048);
        assert!(noverlap < nperseg);
    }

    #[test]
    fn adaptive_nperseg_never_drops_below_floor() {
        let (nperseg, _) = adaptive_nperseg(8192, 40);
        assert!(nperseg >= MIN_NPERSEG || nperseg == 40);
    }

    #[test]
    fn identity_signal_gives_unit_coherence_shape() {
        let n = 16384;
        let x: Vec<f64> = (0..n).map(|i| (i as f64 * 0.01).sin()).collect();
        let (nperseg, noverlap) = adaptive_nperseg(4096, n);
        let r = csd(&x, &x, 48000.0, nperseg, noverlap, WindowKind::Hann);
        for k in 1..r.pxx.len() - 1 {
            let coh = r.pxy[k].norm_sqr() / (r.pxx[k] * r.pyy[k]);
            assert!(coh > 0.95, "coherence too low at bin {k}: {coh}");
        }
    }
}
