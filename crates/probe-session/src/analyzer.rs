//! Sliding Analyzer (C4): maintains the analysis buffer and hop counter.

/// Maintains a fixed-length analysis window for the reference/measurement
/// channel pair and decides when enough new samples have accumulated to run
/// the DSP kernel.
pub struct SlidingAnalyzer {
    ref_buf: Vec<f64>,
    meas_buf: Vec<f64>,
    buffer_len: usize,
    hop: usize,
    carry: usize,
}

impl SlidingAnalyzer {
    pub fn new(buffer_len: usize, hop: usize) -> Self {
        Self {
            ref_buf: vec![0.0; buffer_len],
            meas_buf: vec![0.0; buffer_len],
            buffer_len,
            hop,
            carry: 0,
        }
    }

    /// Ingest one consumed input buffer's reference/measurement slices.
    /// Returns `true` when a hop has completed and `buffers()` should be fed
    /// to the kernel.
    pub fn ingest(&mut self, ref_in: &[f64], meas_in: &[f64]) -> bool {
        let l = ref_in.len().min(meas_in.len());

        if l >= self.buffer_len {
            let start = l - self.buffer_len;
            self.ref_buf.copy_from_slice(&ref_in[start..start + self.buffer_len]);
            self.meas_buf.copy_from_slice(&meas_in[start..start + self.buffer_len]);
            self.carry = self.hop;
        } else {
            self.ref_buf.rotate_left(l);
            self.meas_buf.rotate_left(l);
            let tail = self.buffer_len - l;
            self.ref_buf[tail..].copy_from_slice(&ref_in[..l]);
            self.meas_buf[tail..].copy_from_slice(&meas_in[..l]);
            self.carry += l;
        }

        if self.carry >= self.hop {
            self.carry -= self.hop;
            true
        } else {
            false
        }
    }

    pub fn buffers(&self) -> (&[f64], &[f64]) {
        (&self.ref_buf, &self.meas_buf)
    }

    pub fn reset(&mut self) {
        self.ref_buf.fill(0.0);
        self.meas_buf.fill(0.0);
        self.carry = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_writes_shift_and_accumulate_carry() {
        let mut a = SlidingAnalyzer::new(8, 4);
        assert!(!a.ingest(&[1.0, 2.0], &[10.0, 20.0]));
        assert!(a.ingest(&[3.0, 4.0], &[30.0, 40.0]));
        let (r, _m) = a.buffers();
        assert_eq!(&r[4..], &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn oversized_write_forces_analysis() {
        let mut a = SlidingAnalyzer::new(4, 4);
        let big: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert!(a.ingest(&big, &big));
        let (r, _) = a.buffers();
        assert_eq!(r, &[6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn reset_clears_buffers_and_carry() {
        let mut a = SlidingAnalyzer::new(4, 2);
        a.ingest(&[1.0, 2.0], &[1.0, 2.0]);
        a.reset();
        let (r, m) = a.buffers();
        assert!(r.iter().all(|&v| v == 0.0));
        assert!(m.iter().all(|&v| v == 0.0));
    }
}
