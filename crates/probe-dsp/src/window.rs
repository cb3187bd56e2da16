//! Analysis window generation: Hann, Kaiser(β=14), Blackman.

use std::f64::consts::PI;

/// Modified Bessel function of the first kind, order zero. Polynomial
/// approximation (Abramowitz & Stegun 9.8.1/9.8.2).
fn bessel_i0(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 3.75 {
        let y = (x / 3.75).powi(2);
        1.0 + y
            * (3.5156229
                + y * (3.0899424
                    + y * (1.2067492 + y * (0.2659732 + y * (0.0360768 + y * 0.0045813)))))
    } else {
        let y = 3.75 / ax;
        (ax.exp() / ax.sqrt())
            * (0.39894228
                + y * (0.01328592
                    + y * (0.00225319
                        + y * (-0.00157565
                            + y * (0.00916281
                                + y * (-0.02057706
                                    + y * (0.02635537 + y * (-0.01647633 + y * 0.00392377))))))))
    }
}

/// `0.5 * (1 - cos(2*pi*i/(N-1)))`.
pub fn hann(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f64;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / denom).cos()))
        .collect()
}

/// Kaiser window with shape parameter beta (spec's capture configuration
/// fixes beta = 14).
pub fn kaiser(n: usize, beta: f64) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f64;
    let i0_beta = bessel_i0(beta);
    (0..n)
        .map(|i| {
            let r = 2.0 * i as f64 / denom - 1.0;
            let arg = (1.0 - r * r).max(0.0);
            bessel_i0(beta * arg.sqrt()) / i0_beta
        })
        .collect()
}

/// Standard 3-term Blackman window.
pub fn blackman(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f64;
    (0..n)
        .map(|i| {
            let phase = 2.0 * PI * i as f64 / denom;
            0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
        })
        .collect()
}

use probe_core::WindowKind;

/// Dispatch on the configured window kind. `beta` is fixed at 14 per spec.
pub fn generate(kind: WindowKind, n: usize) -> Vec<f64> {
    match kind {
        WindowKind::Hann => hann(n),
        WindowKind::Kaiser => kaiser(n, 14.0),
        WindowKind::Blackman => blackman(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_endpoints_are_zero() {
        let w = hann(8);
        assert!(w[0].abs() < 1e-12);
        assert!(w[w.len() - 1].abs() < 1e-12);
    }

    #[test]
    fn kaiser_beta_zero_degenerates_to_rectangular() {
        let w = kaiser(8, 0.0);
        for &v in &w {
            assert!((v - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn kaiser_peaks_at_center() {
        let w = kaiser(9, 14.0);
        let center = w[4];
        assert!(center >= *w.iter().next().unwrap());
        assert!(w.iter().all(|&v| v <= center + 1e-12));
    }

    #[test]
    fn blackman_endpoints_near_zero() {
        let w = blackman(16);
        assert!(w[0] < 0.01);
    }
}
