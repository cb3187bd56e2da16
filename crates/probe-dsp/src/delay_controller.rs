//! Delay Controller (C6): hysteretic Auto/Frozen/Manual state machine with
//! exponential smoothing.

use probe_core::DelayMode;

use crate::gcc_phat::gcc_phat;

/// Default EMA factor.
pub const DEFAULT_ALPHA: f64 = 0.9;

#[derive(Debug, Clone)]
pub struct DelayController {
    mode: DelayMode,
    ema_ms: Option<f64>,
    frozen_ms: Option<f64>,
    manual_ms: Option<f64>,
    last_raw_ms: Option<f64>,
    alpha: f64,
}

impl Default for DelayController {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

impl DelayController {
    pub fn new(alpha: f64) -> Self {
        Self {
            mode: DelayMode::Auto,
            ema_ms: None,
            frozen_ms: None,
            manual_ms: None,
            last_raw_ms: None,
            alpha,
        }
    }

    pub fn mode(&self) -> DelayMode {
        self.mode
    }

    /// `set_manual(None)` returns to Auto without altering `ema_ms`.
    pub fn set_auto(&mut self) {
        self.mode = DelayMode::Auto;
    }

    /// `freeze(None)` latches the most recent applied value (Manual →
    /// `manual_ms`; Auto → `ema_ms`; if neither exists the controller stays
    /// in Auto). `freeze(ms)` latches the explicit value and sets `ema_ms`
    /// to keep state consistent.
    pub fn freeze(&mut self, applied_ms: Option<f64>) {
        match applied_ms {
            Some(ms) => {
                self.frozen_ms = Some(ms);
                self.ema_ms = Some(ms);
                self.mode = DelayMode::Frozen;
            }
            None => {
                let latched = match self.mode {
                    DelayMode::Manual => self.manual_ms,
                    _ => self.ema_ms,
                };
                match latched {
                    Some(ms) => {
                        self.frozen_ms = Some(ms);
                        self.mode = DelayMode::Frozen;
                    }
                    None => self.mode = DelayMode::Auto,
                }
            }
        }
    }

    /// `set_manual(None)` returns to Auto without altering `ema_ms`.
    pub fn set_manual(&mut self, ms: Option<f64>) {
        match ms {
            Some(v) => {
                self.manual_ms = Some(v);
                self.mode = DelayMode::Manual;
            }
            None => self.mode = DelayMode::Auto,
        }
    }

    /// Resets all delay state to Auto with no prior estimate, as at the
    /// start of a new capture.
    pub fn reset(&mut self) {
        *self = Self::new(self.alpha);
    }

    /// Current applied delay (ms) and the last raw measurement, if any.
    pub fn status(&self) -> (DelayMode, f64, Option<f64>) {
        let applied = match self.mode {
            DelayMode::Auto => self.ema_ms.unwrap_or(0.0),
            DelayMode::Frozen => self.frozen_ms.unwrap_or(0.0),
            DelayMode::Manual => self.manual_ms.unwrap_or(0.0),
        };
        (self.mode, applied, self.last_raw_ms)
    }

    /// Delay selection. In Auto, runs GCC-PHAT on `x`/`y`
    /// and folds the raw estimate into the EMA; in Frozen/Manual, GCC-PHAT is
    /// skipped entirely and the latched value is returned.
    pub fn update(&mut self, x: &[f64], y: &[f64], fs: f64, max_delay_ms: Option<f64>) -> f64 {
        if self.mode == DelayMode::Auto {
            let raw = gcc_phat(x, y, fs, max_delay_ms);
            self.last_raw_ms = Some(raw);
            let next = match self.ema_ms {
                Some(prev) => self.alpha * prev + (1.0 - self.alpha) * raw,
                None => raw,
            };
            self.ema_ms = Some(next);
        }
        self.status().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeze_none_latches_last_ema() {
        let mut ctl = DelayController::new(0.9);
        ctl.update(&[0.0; 4], &[0.0; 4], 48000.0, None);
        // force a known ema via repeated updates on a noiseless signal
        ctl.ema_ms = Some(1.234);
        ctl.freeze(None);
        let (mode, applied, _) = ctl.status();
        assert_eq!(mode, DelayMode::Frozen);
        assert_eq!(applied, 1.234);
    }

    #[test]
    fn manual_then_resume_auto_keeps_ema() {
        let mut ctl = DelayController::new(0.9);
        ctl.ema_ms = Some(2.0);
        ctl.set_manual(Some(5.0));
        let (mode, applied, _) = ctl.status();
        assert_eq!(mode, DelayMode::Manual);
        assert_eq!(applied, 5.0);

        ctl.set_manual(None);
        let (mode, applied, _) = ctl.status();
        assert_eq!(mode, DelayMode::Auto);
        assert_eq!(applied, 2.0);
    }

    #[test]
    fn reset_clears_all_state() {
        let mut ctl = DelayController::new(0.9);
        ctl.ema_ms = Some(9.0);
        ctl.set_manual(Some(3.0));
        ctl.reset();
        let (mode, applied, raw) = ctl.status();
        assert_eq!(mode, DelayMode::Auto);
        assert_eq!(applied, 0.0);
        assert!(raw.is_none());
    }

    #[test]
    fn freeze_with_explicit_value() {
        let mut ctl = DelayController::new(0.9);
        ctl.freeze(Some(7.5));
        let (mode, applied, _) = ctl.status();
        assert_eq!(mode, DelayMode::Frozen);
        assert_eq!(applied, 7.5);
    }
}
