//! GCC-PHAT delay estimation with parabolic sub-sample refinement.

use realfft::RealFftPlanner;
use rustfft::num_complex::Complex;

/// Estimate the delay, in milliseconds, by which `y` lags `x`.
///
/// Builds a zero-padded cross-correlation via `N = next_power_of_two(2n-1)`,
/// applies the PHAT weighting `R <- R/(|R|+eps)`, and refines the argmax lag
/// with a parabolic fit. Positive results mean the measurement channel lags
/// the reference channel. When `max_delay_ms` is `Some`, the search is
/// restricted to that many milliseconds either side of zero lag.
pub fn gcc_phat(x: &[f64], y: &[f64], fs: f64, max_delay_ms: Option<f64>) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }

    let fft_len = (2 * n - 1).next_power_of_two();

    let mut planner = RealFftPlanner::<f64>::new();
    let fwd = planner.plan_fft_forward(fft_len);
    let inv = planner.plan_fft_inverse(fft_len);

    let mut xin = fwd.make_input_vec();
    let mut yin = fwd.make_input_vec();
    xin[..n].copy_from_slice(&x[..n]);
    yin[..n].copy_from_slice(&y[..n]);

    let mut xf = fwd.make_output_vec();
    let mut yf = fwd.make_output_vec();
    let mut scratch = fwd.make_scratch_vec();
    fwd.process_with_scratch(&mut xin, &mut xf, &mut scratch)
        .expect("forward fft on validated buffers");
    fwd.process_with_scratch(&mut yin, &mut yf, &mut scratch)
        .expect("forward fft on validated buffers");

    const EPS: f64 = 1e-10;
    let mut r: Vec<Complex<f64>> = xf
        .iter()
        .zip(yf.iter())
        .map(|(xv, yv)| {
            let prod = xv.conj() * yv;
            let mag = prod.norm() + EPS;
            prod / mag
        })
        .collect();

    let mut cc = inv.make_output_vec();
    let mut inv_scratch = inv.make_scratch_vec();
    inv.process_with_scratch(&mut r, &mut cc, &mut inv_scratch)
        .expect("inverse fft on validated buffers");
    let scale = 1.0 / fft_len as f64;
    for v in cc.iter_mut() {
        *v *= scale;
    }

    let max_lag = match max_delay_ms {
        Some(ms) => ((ms * fs / 1000.0).ceil() as usize).min(n - 1),
        None => n - 1,
    };

    let mut best_idx = 0usize;
    let mut best_val = f64::NEG_INFINITY;
    let mut best_lag: i64 = 0;
    for lag in -(max_lag as i64)..=(max_lag as i64) {
        let idx = if lag >= 0 {
            lag as usize
        } else {
            (fft_len as i64 + lag) as usize
        };
        let v = cc[idx];
        if v > best_val {
            best_val = v;
            best_idx = idx;
            best_lag = lag;
        }
    }

    let prev_idx = (best_idx + fft_len - 1) % fft_len;
    let next_idx = (best_idx + 1) % fft_len;
    let y1 = cc[prev_idx];
    let y2 = cc[best_idx];
    let y3 = cc[next_idx];
    let denom = y1 - 2.0 * y2 + y3;
    let offset = if denom.abs() > 1e-12 {
        0.5 * (y1 - y3) / denom
    } else {
        0.0
    };

    let delta_n_fine = best_lag as f64 + offset;
    (delta_n_fine / fs) * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift(x: &[f64], d: usize) -> Vec<f64> {
        let mut y = vec![0.0; x.len()];
        if d < x.len() {
            y[d..].copy_from_slice(&x[..x.len() - d]);
        }
        y
    }

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
    fn identity_signal_has_zero_delay() {
        let x = noise(4096, 42);
        let d = gcc_phat(&x, &x, 48000.0, Some(50.0));
        assert!(d.abs() < 0.05, "delay was {d}");
    }

    #[test]
    fn known_positive_shift_recovered() {
        let x = noise(16384, 7);
        let y = shift(&x, 48);
        let d = gcc_phat(&x, &y, 48000.0, Some(50.0));
        let expected_ms = 48.0 / 48000.0 * 1000.0;
        assert!((d - expected_ms).abs() < 0.05, "delay was {d}, expected {expected_ms}");
    }
}
