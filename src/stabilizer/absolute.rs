// src/stabilizer/absolute.rs

//! # Absolute Control
//!
//! Corrects slow attitude drift that the rate loop cannot see. The rate error
//! that falls outside a band around the lowpassed setpoint is integrated into
//! an attitude error per axis, and a correction proportional to that error is
//! added to both the setpoint and the error fed to the integral. Only active
//! with a non-zero gain, with integral relax configured, and while airmode is
//! on.

use crate::axis::{Axis, AXIS_COUNT};
use crate::config::StabilizerConfig;
use crate::filter::Pt1Filter;
use crate::pid::{compute_absolute, AbsoluteControlData};
use num_traits::Float;
use piddiy::PidController;

/// Absolute control state for all three axes.
pub struct AbsoluteControl {
    pids: [PidController<f32, AbsoluteControlData>; AXIS_COUNT],
    setpoint_lpf: [Pt1Filter; AXIS_COUNT],
    gain: f32,
    limit: f32,
    error_limit: f32,
    band: f32,
    dt: f32,
    pid_frequency: f32,
}

impl AbsoluteControl {
    /// Creates absolute control for the given profile.
    pub fn with_config(config: &StabilizerConfig) -> Self {
        let gain = f32::from(config.abs_control_gain);
        let dt = config.pid_dt();
        let lpf = Pt1Filter::with_cutoff(f32::from(config.abs_control_cutoff), dt);
        AbsoluteControl {
            pids: [absolute_pid(gain), absolute_pid(gain), absolute_pid(gain)],
            setpoint_lpf: [lpf; AXIS_COUNT],
            gain,
            limit: f32::from(config.abs_control_limit),
            error_limit: f32::from(config.abs_control_error_limit),
            band: if config.abs_control_band.is_nan() {
                0.0
            } else {
                config.abs_control_band.max(0.0)
            },
            dt,
            pid_frequency: 1.0 / dt,
        }
    }

    /// Whether a gain is configured.
    pub fn is_enabled(&self) -> bool {
        self.gain > 0.0
    }

    /// Updates the attitude error of `axis` and applies the correction to
    /// `setpoint` and `iterm_error`. The error only accumulates in airmode.
    pub fn apply(
        &mut self,
        axis: Axis,
        gyro_rate: f32,
        setpoint: &mut f32,
        iterm_error: &mut f32,
        airmode: bool,
    ) {
        if !self.is_enabled() {
            return;
        }
        let index = axis.index();
        let setpoint_lpf = self.setpoint_lpf[index].apply(*setpoint);
        let setpoint_hpf = (*setpoint - setpoint_lpf).abs();
        if !airmode {
            return;
        }

        let error_rate = self.error_rate(index, gyro_rate, setpoint_lpf, setpoint_hpf);
        let data = AbsoluteControlData {
            error_rate,
            dt: self.dt,
            error_limit: self.error_limit,
        };
        let output = self.pids[index].compute(data);
        let correction = if output.is_nan() {
            0.0
        } else {
            output.clamp(-self.limit, self.limit)
        };
        *setpoint += correction;
        *iterm_error += correction;
    }

    fn error_rate(&self, index: usize, gyro_rate: f32, setpoint_lpf: f32, setpoint_hpf: f32) -> f32 {
        let axis_error = self.pids[index].integral;
        let band_max = setpoint_lpf + self.band * setpoint_hpf;
        let band_min = setpoint_lpf - self.band * setpoint_hpf;

        if gyro_rate >= band_min && gyro_rate <= band_max {
            // inside the band, only decay the stored error towards zero
            let towards_max = band_max - gyro_rate;
            let towards_min = band_min - gyro_rate;
            let error_rate = if towards_max * axis_error < 0.0 {
                towards_max
            } else {
                towards_min
            };
            if (error_rate * self.dt).abs() > axis_error.abs() {
                -axis_error * self.pid_frequency
            } else {
                error_rate
            }
        } else if gyro_rate > band_max {
            band_max - gyro_rate
        } else {
            band_min - gyro_rate
        }
    }

    /// Accumulated attitude error of `axis`, degrees.
    pub fn error(&self, axis: Axis) -> f32 {
        self.pids[axis.index()].integral
    }

    /// Clears the accumulated errors.
    pub fn reset(&mut self) {
        for pid in self.pids.iter_mut() {
            pid.integral = 0.0;
            pid.error = 0.0;
        }
    }

    /// Clears accumulated errors and filter state.
    pub fn reset_filters(&mut self) {
        self.reset();
        for lpf in self.setpoint_lpf.iter_mut() {
            lpf.reset();
        }
    }

    /// Rotates the accumulated error vector with the body frame.
    pub fn rotate(&mut self, rotation: &[f32; AXIS_COUNT]) {
        if !rotation.iter().all(|angle| angle.is_finite()) {
            return;
        }
        let mut errors = Axis::ALL.map(|axis| self.error(axis));
        crate::stabilizer::rotate_vector(&mut errors, rotation);
        if !errors.iter().all(|error| error.is_finite()) {
            return;
        }
        for (pid, error) in self.pids.iter_mut().zip(errors) {
            pid.integral = error.clamp(-self.error_limit, self.error_limit);
        }
    }
}

fn absolute_pid(gain: f32) -> PidController<f32, AbsoluteControlData> {
    let mut pid = PidController::new();
    pid.compute_fn(compute_absolute)
        .set_point(0.0)
        .kp(0.0)
        .ki(gain)
        .kd(0.0);
    pid
}
