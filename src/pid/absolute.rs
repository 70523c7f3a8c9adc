// src/pid/absolute.rs

//! # Absolute Control PID Module
//!
//! This module provides a compute function and control data structure for
//! absolute control. The controller integrates the part of the rate error
//! that falls outside the setpoint transient band, which approximates the
//! accumulated attitude error in the body frame. Only the integral term is
//! used; its gain is the absolute control gain.

use piddiy::PidController;

/// Control data for the absolute control callback.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AbsoluteControlData {
    /// Rate error to integrate, deg/s.
    pub error_rate: f32,
    /// The time delta since the last computation.
    pub dt: f32,
    /// Magnitude limit of the accumulated error, degrees.
    pub error_limit: f32,
}

/// Absolute control compute callback. A NaN rate error keeps the stored error.
pub fn compute_absolute(
    pid: &mut PidController<f32, AbsoluteControlData>,
    data: AbsoluteControlData,
) -> (f32, f32, f32) {
    let integral =
        (pid.integral + data.error_rate * data.dt).clamp(-data.error_limit, data.error_limit);
    if integral.is_nan() {
        (0.0, pid.integral, 0.0)
    } else {
        (0.0, integral, 0.0)
    }
}
