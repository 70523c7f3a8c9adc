// src/filter.rs

//! # D-term Filters
//!
//! First-order and biquad filters for the derivative path, plus the per-axis
//! chain (notch, lowpass, second lowpass) built from a
//! [`StabilizerConfig`]. Each stage is a [`DtermFilter`], a closed set of
//! variants chosen once at initialisation; a disabled stage is the
//! pass-through variant so the loop never branches on configuration.

use crate::config::{FilterType, StabilizerConfig};
use core::f32::consts::PI;
use num_traits::Float;

/// Quality factor of a second-order Butterworth section.
pub const BIQUAD_Q: f32 = core::f32::consts::FRAC_1_SQRT_2;

/// First-order lowpass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pt1Filter {
    state: f32,
    k: f32,
}

impl Pt1Filter {
    /// Smoothing gain for a cutoff frequency at sample period `dt` seconds.
    pub fn gain(cutoff_hz: f32, dt: f32) -> f32 {
        let rc = 1.0 / (2.0 * PI * cutoff_hz);
        dt / (rc + dt)
    }

    /// Creates a filter with a precomputed smoothing gain.
    pub fn new(k: f32) -> Self {
        Pt1Filter { state: 0.0, k }
    }

    /// Creates a filter for a cutoff frequency at sample period `dt` seconds.
    pub fn with_cutoff(cutoff_hz: f32, dt: f32) -> Self {
        Self::new(Self::gain(cutoff_hz, dt))
    }

    /// Feeds one sample and returns the filtered value.
    /// A non-finite state is cleared and the input passed through.
    pub fn apply(&mut self, input: f32) -> f32 {
        self.state += self.k * (input - self.state);
        if !self.state.is_finite() {
            self.reset();
            return input;
        }
        self.state
    }

    /// Clears the filter history.
    pub fn reset(&mut self) {
        self.state = 0.0;
    }

    /// Last filtered value.
    pub fn state(&self) -> f32 {
        self.state
    }
}

/// Second-order IIR section in transposed direct form II.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadFilter {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
}

impl BiquadFilter {
    /// Butterworth lowpass at `cutoff_hz` for a sample period of `looptime_us`.
    pub fn lowpass(cutoff_hz: f32, looptime_us: u32) -> Self {
        let (cs, alpha) = Self::prewarp(cutoff_hz, looptime_us, BIQUAD_Q);
        let b0 = (1.0 - cs) * 0.5;
        Self::normalised(b0, 1.0 - cs, b0, 1.0 + alpha, -2.0 * cs, 1.0 - alpha)
    }

    /// Notch at `center_hz` with quality `q` for a sample period of `looptime_us`.
    pub fn notch(center_hz: f32, looptime_us: u32, q: f32) -> Self {
        let (cs, alpha) = Self::prewarp(center_hz, looptime_us, q);
        Self::normalised(1.0, -2.0 * cs, 1.0, 1.0 + alpha, -2.0 * cs, 1.0 - alpha)
    }

    fn prewarp(frequency_hz: f32, looptime_us: u32, q: f32) -> (f32, f32) {
        let omega = 2.0 * PI * frequency_hz * looptime_us as f32 * 1e-6;
        (omega.cos(), omega.sin() / (2.0 * q))
    }

    fn normalised(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        BiquadFilter {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            x1: 0.0,
            x2: 0.0,
        }
    }

    /// Feeds one sample and returns the filtered value.
    /// A non-finite result clears the history and passes the input through.
    pub fn apply(&mut self, input: f32) -> f32 {
        let result = self.b0 * input + self.x1;
        self.x1 = self.b1 * input - self.a1 * result + self.x2;
        self.x2 = self.b2 * input - self.a2 * result;
        if !(result.is_finite() && self.x1.is_finite() && self.x2.is_finite()) {
            self.reset();
            return input;
        }
        result
    }

    /// Clears the filter history.
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
    }
}

/// Quality factor of a notch spanning `cutoff_hz` to `center_hz`.
pub fn notch_q(center_hz: f32, cutoff_hz: f32) -> f32 {
    center_hz * cutoff_hz / (center_hz * center_hz - cutoff_hz * cutoff_hz)
}

/// One stage of the D-term filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DtermFilter {
    /// Disabled stage.
    #[default]
    PassThrough,
    /// First-order lowpass stage.
    Pt1(Pt1Filter),
    /// Biquad lowpass or notch stage.
    Biquad(BiquadFilter),
}

impl DtermFilter {
    /// Feeds one sample through the stage.
    pub fn apply(&mut self, input: f32) -> f32 {
        match self {
            DtermFilter::PassThrough => input,
            DtermFilter::Pt1(filter) => filter.apply(input),
            DtermFilter::Biquad(filter) => filter.apply(input),
        }
    }

    /// Clears the stage history.
    pub fn reset(&mut self) {
        match self {
            DtermFilter::PassThrough => {}
            DtermFilter::Pt1(filter) => filter.reset(),
            DtermFilter::Biquad(filter) => filter.reset(),
        }
    }

    /// Whether the stage filters at all.
    pub fn is_active(&self) -> bool {
        !matches!(self, DtermFilter::PassThrough)
    }
}

/// Nyquist frequency of the PID loop, truncated to whole hertz.
pub fn pid_nyquist_hz(pid_looptime_us: u32) -> u32 {
    if pid_looptime_us == 0 {
        return 0;
    }
    1_000_000 / pid_looptime_us / 2
}

/// Whether a lowpass cutoff can be realised below Nyquist.
pub fn lowpass_usable(cutoff_hz: u16, nyquist_hz: u32) -> bool {
    cutoff_hz != 0 && u32::from(cutoff_hz) <= nyquist_hz
}

/// Notch centre actually used, or `None` when the notch must be disabled.
/// A centre above Nyquist is moved down to Nyquist while the cutoff is below it.
pub fn effective_notch_hz(center_hz: u16, cutoff_hz: u16, nyquist_hz: u32) -> Option<u16> {
    if center_hz == 0 || cutoff_hz == 0 {
        return None;
    }
    if u32::from(center_hz) <= nyquist_hz {
        Some(center_hz)
    } else if u32::from(cutoff_hz) < nyquist_hz {
        u16::try_from(nyquist_hz).ok()
    } else {
        None
    }
}

/// PT1 stage for a cutoff, or pass-through if it is unusable at this loop rate.
pub fn pt1_stage(cutoff_hz: u16, pid_looptime_us: u32) -> DtermFilter {
    if lowpass_usable(cutoff_hz, pid_nyquist_hz(pid_looptime_us)) {
        let dt = pid_looptime_us as f32 * 1e-6;
        DtermFilter::Pt1(Pt1Filter::with_cutoff(f32::from(cutoff_hz), dt))
    } else {
        DtermFilter::PassThrough
    }
}

/// Per-axis D-term chain: notch, then lowpass, then second lowpass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DtermFilterChain {
    notch: DtermFilter,
    lowpass: DtermFilter,
    lowpass2: DtermFilter,
}

impl DtermFilterChain {
    /// Builds the chain for the configured PID loop rate.
    pub fn with_config(config: &StabilizerConfig) -> Self {
        let looptime_us = config.pid_looptime_us();
        let nyquist_hz = pid_nyquist_hz(looptime_us);

        let notch = match effective_notch_hz(
            config.dterm_notch_hz,
            config.dterm_notch_cutoff,
            nyquist_hz,
        ) {
            Some(center_hz) => {
                let q = notch_q(f32::from(center_hz), f32::from(config.dterm_notch_cutoff));
                DtermFilter::Biquad(BiquadFilter::notch(f32::from(center_hz), looptime_us, q))
            }
            None => DtermFilter::PassThrough,
        };

        let lowpass = if lowpass_usable(config.dterm_lowpass_hz, nyquist_hz) {
            match config.dterm_filter_type {
                FilterType::Pt1 => pt1_stage(config.dterm_lowpass_hz, looptime_us),
                FilterType::Biquad => DtermFilter::Biquad(BiquadFilter::lowpass(
                    f32::from(config.dterm_lowpass_hz),
                    looptime_us,
                )),
            }
        } else {
            DtermFilter::PassThrough
        };

        let lowpass2 = pt1_stage(config.dterm_lowpass2_hz, looptime_us);

        log::debug!(
            "dterm filters at {} Hz nyquist: notch {}, lowpass {}, lowpass2 {}",
            nyquist_hz,
            notch.is_active(),
            lowpass.is_active(),
            lowpass2.is_active()
        );

        DtermFilterChain {
            notch,
            lowpass,
            lowpass2,
        }
    }

    /// Filters one gyro sample.
    pub fn apply(&mut self, input: f32) -> f32 {
        let notched = self.notch.apply(input);
        let smoothed = self.lowpass.apply(notched);
        self.lowpass2.apply(smoothed)
    }

    /// Clears every stage.
    pub fn reset(&mut self) {
        self.notch.reset();
        self.lowpass.reset();
        self.lowpass2.reset();
    }

    /// Whether any stage filters.
    pub fn is_active(&self) -> bool {
        self.notch.is_active() || self.lowpass.is_active() || self.lowpass2.is_active()
    }
}
