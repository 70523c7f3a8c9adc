// src/stabilizer/flight_stabilizer.rs

//! A module specifying the shared interface of the stabilizer: the sensor and
//! pilot inputs sampled each iteration, the flight-mode state changed between
//! iterations, the per-axis outputs handed to the motor mixer, and the trait
//! through which a scheduler drives the control loop.

use crate::axis::{AngleTrims, Attitude, Axis, TimeUs, AXIS_COUNT};

/// Inputs sampled once per control iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlInputs {
    /// Filtered gyro rate per axis, deg/s.
    pub gyro_rate: [f32; AXIS_COUNT],
    /// Estimated attitude, `None` without an accelerometer reference.
    pub attitude: Option<Attitude>,
    /// Commanded rotation rate per axis, deg/s.
    pub setpoint_rate: [f32; AXIS_COUNT],
    /// Signed stick deflection per axis, -1..=1.
    pub rc_deflection: [f32; AXIS_COUNT],
    /// Throttle position, 0..=1.
    pub throttle: f32,
    /// Throttle PID attenuation factor, 0..=1.
    pub throttle_pid_attenuation: f32,
    /// Motor mix range, 1 or more when the mixer saturates.
    pub motor_mix_range: f32,
    /// Gyro reported an overflow this sample.
    pub gyro_overflow: bool,
}

impl Default for ControlInputs {
    fn default() -> Self {
        ControlInputs {
            gyro_rate: [0.0; AXIS_COUNT],
            attitude: Some(Attitude::default()),
            setpoint_rate: [0.0; AXIS_COUNT],
            rc_deflection: [0.0; AXIS_COUNT],
            throttle: 0.0,
            throttle_pid_attenuation: 1.0,
            motor_mix_range: 0.0,
            gyro_overflow: false,
        }
    }
}

/// Flight-mode state. Changed between iterations, never during one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    /// Stabilization runs; when false every output is zero.
    pub stabilization_enabled: bool,
    /// Vehicle is armed.
    pub armed: bool,
    /// Angle mode requested. Takes precedence over horizon mode.
    pub angle_mode: bool,
    /// Horizon mode requested.
    pub horizon_mode: bool,
    /// Airmode active.
    pub airmode: bool,
    /// Anti-gravity boost allowed.
    pub anti_gravity_enabled: bool,
    /// Clear the integral state after every iteration.
    pub zero_throttle_iterm_reset: bool,
}

impl Default for ControlState {
    fn default() -> Self {
        ControlState {
            stabilization_enabled: true,
            armed: false,
            angle_mode: false,
            horizon_mode: false,
            airmode: false,
            anti_gravity_enabled: false,
            zero_throttle_iterm_reset: false,
        }
    }
}

/// Self-leveling mode in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelMode {
    /// Pure rate control.
    Off,
    /// Stick commands attitude.
    Angle,
    /// Stick commands rate, leveling fades in near centre stick.
    Horizon,
}

impl ControlState {
    /// Leveling mode selected by the mode flags.
    pub fn level_mode(&self) -> LevelMode {
        if self.angle_mode {
            LevelMode::Angle
        } else if self.horizon_mode {
            LevelMode::Horizon
        } else {
            LevelMode::Off
        }
    }
}

/// Terms produced for one axis in the last iteration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidAxisData {
    /// Proportional term.
    pub p: f32,
    /// Integral term.
    pub i: f32,
    /// Derivative term.
    pub d: f32,
    /// Feedforward term.
    pub f: f32,
    /// Clamped sum of all terms.
    pub sum: f32,
}

/// Shared interface of a flight stabilizer driven by a fixed-rate scheduler.
pub trait FlightStabilizer {
    /// Runs one control iteration.
    fn update(&mut self, inputs: &ControlInputs, trims: &AngleTrims, now_us: TimeUs);

    /// Terms produced for `axis` in the last iteration.
    fn axis_data(&self, axis: Axis) -> PidAxisData;

    /// Clamped output per axis, ready for the motor mixer.
    fn pid_sums(&self) -> [f32; AXIS_COUNT] {
        Axis::ALL.map(|axis| self.axis_data(axis).sum)
    }
}
