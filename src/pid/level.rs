// src/pid/level.rs

//! # Self-Leveling PID Control Module
//!
//! This module provides a compute function and control data structure
//! for the outer angle loop of angle and horizon modes. The loop is purely
//! proportional: the set point is the commanded tilt, the measurement is
//! the trimmed attitude, and the output is a rate setpoint in deg/s.

use piddiy::PidController;

/// Control data for the self-leveling callback.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LevelControlData {
    /// Attitude angle with trim removed, degrees.
    pub attitude: f32,
}

/// Self-leveling compute callback. Only the proportional term is produced.
pub fn compute_level(
    pid: &mut PidController<f32, LevelControlData>,
    data: LevelControlData,
) -> (f32, f32, f32) {
    let error = pid.set_point - data.attitude;
    (error, 0.0, 0.0)
}
