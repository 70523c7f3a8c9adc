// src/stabilizer/integral.rs

//! # Integral Controller
//!
//! Owns the per-axis integral accumulators. Accumulation is clamped to the
//! integral limit, slowed near mixer saturation and boosted by anti-gravity
//! (both via [`GainSchedule`]). Integral relax suppresses accumulation while
//! the setpoint is changing quickly, so that stick transients do not wind the
//! integral up and cause bounce-back.

use crate::axis::{Axis, AXIS_COUNT};
use crate::config::{ItermRelax, ItermRelaxType, StabilizerConfig};
use crate::filter::Pt1Filter;
use crate::stabilizer::GainSchedule;
use num_traits::Float;

/// Scale from configurator I gain to controller units.
pub const ITERM_SCALE: f32 = 0.244381;

/// Rotates `v` by the small-angle rotation vector `rotation` (radians).
pub fn rotate_vector(v: &mut [f32; AXIS_COUNT], rotation: &[f32; AXIS_COUNT]) {
    for i in 0..AXIS_COUNT {
        let i_1 = (i + 1) % AXIS_COUNT;
        let i_2 = (i + 2) % AXIS_COUNT;
        let rotated = v[i_1] + v[i_2] * rotation[i];
        v[i_2] -= v[i_1] * rotation[i];
        v[i_1] = rotated;
    }
}

/// Removes the band `-deadband..deadband` from `value`.
pub fn apply_deadband(value: f32, deadband: f32) -> f32 {
    if value.abs() < deadband {
        0.0
    } else if value >= 0.0 {
        value - deadband
    } else {
        value + deadband
    }
}

/// Per-axis integral accumulation with windup protection and relax.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegralController {
    ki: [f32; AXIS_COUNT],
    limit: f32,
    dt: f32,
    relax: ItermRelax,
    relax_type: ItermRelaxType,
    relax_threshold: f32,
    relax_lpf: [Pt1Filter; AXIS_COUNT],
    accumulator: [f32; AXIS_COUNT],
}

impl IntegralController {
    /// Creates the controller for the given profile.
    pub fn with_config(config: &StabilizerConfig) -> Self {
        let dt = config.pid_dt();
        let relax_lpf = Pt1Filter::with_cutoff(f32::from(config.iterm_relax_cutoff), dt);
        IntegralController {
            ki: Axis::ALL.map(|axis| ITERM_SCALE * f32::from(config.gains(axis).i)),
            limit: config.iterm_limit,
            dt,
            relax: config.iterm_relax,
            relax_type: config.iterm_relax_type,
            relax_threshold: config.iterm_relax_setpoint_threshold,
            relax_lpf: [relax_lpf; AXIS_COUNT],
            accumulator: [0.0; AXIS_COUNT],
        }
    }

    /// Whether relax is configured at all.
    pub fn relax_enabled(&self) -> bool {
        self.relax != ItermRelax::Off
    }

    /// Applies integral relax to `iterm_error`, the error about to be
    /// accumulated on `axis`.
    pub fn relax(&mut self, axis: Axis, setpoint: f32, gyro_rate: f32, iterm_error: &mut f32) {
        let index = axis.index();
        let setpoint_lpf = self.relax_lpf[index].apply(setpoint);
        let setpoint_hpf = (setpoint - setpoint_lpf).abs();

        if !self.relax.applies_to(axis) {
            return;
        }

        let iterm = self.accumulator[index];
        let decreasing = (iterm > 0.0 && *iterm_error < 0.0) || (iterm < 0.0 && *iterm_error > 0.0);
        if self.relax.passes_decrease() && decreasing {
            return;
        }

        match self.relax_type {
            ItermRelaxType::Setpoint => *iterm_error *= self.relax_factor(setpoint_hpf),
            ItermRelaxType::Gyro => {
                *iterm_error = apply_deadband(setpoint_lpf - gyro_rate, setpoint_hpf)
            }
        }
    }

    /// Fraction of the error kept for a setpoint transient of `setpoint_hpf`.
    pub fn relax_factor(&self, setpoint_hpf: f32) -> f32 {
        if self.relax_threshold > 0.0 {
            (1.0 - setpoint_hpf / self.relax_threshold).max(0.0)
        } else {
            1.0
        }
    }

    /// Accumulates `iterm_error` on `axis` and returns the new integral term.
    pub fn accumulate(&mut self, axis: Axis, iterm_error: f32, schedule: &GainSchedule) -> f32 {
        let index = axis.index();
        let previous = self.accumulator[index];

        let unwinding = (previous > 0.0 && iterm_error < 0.0) || (previous < 0.0 && iterm_error > 0.0);
        let base_rate = self.dt * schedule.iterm_accelerator;
        let rate = if unwinding {
            base_rate
        } else {
            base_rate * schedule.windup_attenuation
        };

        let updated = (previous + self.ki[index] * iterm_error * rate).clamp(-self.limit, self.limit);
        if !updated.is_nan() {
            self.accumulator[index] = updated;
        }
        self.accumulator[index]
    }

    /// Integral term of `axis`.
    pub fn value(&self, axis: Axis) -> f32 {
        self.accumulator[axis.index()]
    }

    /// Clears the accumulator of `axis`.
    pub fn reset_axis(&mut self, axis: Axis) {
        self.accumulator[axis.index()] = 0.0;
    }

    /// Clears every accumulator.
    pub fn reset(&mut self) {
        self.accumulator = [0.0; AXIS_COUNT];
    }

    /// Clears accumulators and relax filter state.
    pub fn reset_filters(&mut self) {
        self.reset();
        for lpf in self.relax_lpf.iter_mut() {
            lpf.reset();
        }
    }

    /// Rotates the integral vector with the body frame. A non-finite rotation
    /// leaves the integral unchanged.
    pub fn rotate(&mut self, rotation: &[f32; AXIS_COUNT]) {
        if !rotation.iter().all(|angle| angle.is_finite()) {
            return;
        }
        let mut rotated = self.accumulator;
        rotate_vector(&mut rotated, rotation);
        if rotated.iter().all(|value| value.is_finite()) {
            self.accumulator = rotated.map(|value| value.clamp(-self.limit, self.limit));
        }
    }
}
