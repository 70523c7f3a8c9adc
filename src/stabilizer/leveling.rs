// src/stabilizer/leveling.rs

//! # Leveling Mixer
//!
//! Turns stick deflection into a roll or pitch rate setpoint that drives the
//! vehicle towards a commanded attitude. In angle mode the stick commands a
//! tilt angle and the leveling loop output replaces the rate setpoint. In
//! horizon mode the leveling output is added to the pilot's rate setpoint,
//! weighted by a strength that fades out with stick deflection and, unless
//! disabled, with vehicle inclination.
//!
//! Each leveling loop is a proportional `piddiy` controller fed by
//! [`compute_level`].

use crate::axis::{AngleTrims, Attitude, Axis, AXIS_COUNT};
use crate::config::StabilizerConfig;
use crate::pid::{compute_level, LevelControlData};
use crate::stabilizer::LevelMode;
use num_traits::Float;
use piddiy::PidController;

const LEVELLED_AXES: usize = 2;

/// Angle and horizon mode setpoint mixer for roll and pitch.
pub struct LevelingMixer {
    angle_pids: [PidController<f32, LevelControlData>; LEVELLED_AXES],
    horizon_pids: [PidController<f32, LevelControlData>; LEVELLED_AXES],
    angle_limit: f32,
    horizon_transition: f32,
    horizon_cutoff_degrees: f32,
    horizon_factor_ratio: f32,
    horizon_tilt_expert_mode: bool,
}

impl LevelingMixer {
    /// Creates the mixer for the given profile.
    pub fn with_config(config: &StabilizerConfig) -> Self {
        let level_gain = f32::from(config.level.angle_strength) / 10.0;
        let horizon_gain = f32::from(config.level.horizon_strength) / 10.0;
        let tilt_effect = f32::from(config.horizon_tilt_effect);

        LevelingMixer {
            angle_pids: [level_pid(level_gain), level_pid(level_gain)],
            horizon_pids: [level_pid(horizon_gain), level_pid(horizon_gain)],
            angle_limit: f32::from(config.level_angle_limit),
            horizon_transition: f32::from(config.level.horizon_transition),
            horizon_cutoff_degrees: (175.0 - tilt_effect) * 1.8,
            horizon_factor_ratio: (100.0 - tilt_effect) * 0.01,
            horizon_tilt_expert_mode: config.horizon_tilt_expert_mode,
        }
    }

    /// Rate setpoint for `axis` after leveling. Yaw and [`LevelMode::Off`]
    /// return `setpoint` unchanged.
    pub fn apply(
        &mut self,
        axis: Axis,
        mode: LevelMode,
        setpoint: f32,
        rc_deflection: &[f32; AXIS_COUNT],
        attitude: &Attitude,
        trims: &AngleTrims,
    ) -> f32 {
        if !axis.is_levelled() || mode == LevelMode::Off {
            return setpoint;
        }
        let index = axis.index();
        let target_angle = (self.angle_limit * rc_deflection[index])
            .clamp(-self.angle_limit, self.angle_limit);
        let data = LevelControlData {
            attitude: attitude.angle(axis) - trims.angle(axis),
        };

        match mode {
            LevelMode::Angle => {
                let pid = &mut self.angle_pids[index];
                pid.set_point(target_angle);
                pid.compute(data)
            }
            LevelMode::Horizon => {
                let strength = self.horizon_strength(rc_deflection, attitude);
                let pid = &mut self.horizon_pids[index];
                pid.set_point(target_angle);
                setpoint + pid.compute(data) * strength
            }
            LevelMode::Off => setpoint,
        }
    }

    /// Horizon blend weight, 0 for no leveling up to 1 for full leveling.
    pub fn horizon_strength(&self, rc_deflection: &[f32; AXIS_COUNT], attitude: &Attitude) -> f32 {
        let most_deflected = rc_deflection[Axis::Roll.index()]
            .abs()
            .max(rc_deflection[Axis::Pitch.index()].abs());
        let mut strength = 1.0 - most_deflected;

        let inclination = attitude.roll.abs().max(attitude.pitch.abs());

        if self.horizon_tilt_expert_mode {
            if self.horizon_transition > 0.0 && self.horizon_cutoff_degrees > 0.0 {
                let inclination_ratio = ((self.horizon_cutoff_degrees - inclination)
                    / self.horizon_cutoff_degrees)
                    .clamp(0.0, 1.0);
                strength = (strength - 1.0) * 100.0 / self.horizon_transition + 1.0;
                strength *= inclination_ratio;
            } else {
                strength = 0.0;
            }
        } else {
            let sensitivity = if self.horizon_factor_ratio < 1.01 {
                let inclination_ratio = (180.0 - inclination) / 180.0
                    * (1.0 - self.horizon_factor_ratio)
                    + self.horizon_factor_ratio;
                self.horizon_transition * inclination_ratio
            } else {
                self.horizon_transition
            };
            strength = if sensitivity <= 0.0 {
                0.0
            } else {
                (strength - 1.0) * (100.0 / sensitivity) + 1.0
            };
        }

        if strength.is_nan() {
            0.0
        } else {
            strength.clamp(0.0, 1.0)
        }
    }

    /// Last angle error seen by the angle mode loop of `axis`.
    pub fn angle_error(&self, axis: Axis) -> f32 {
        if axis.is_levelled() {
            self.angle_pids[axis.index()].error
        } else {
            0.0
        }
    }
}

fn level_pid(gain: f32) -> PidController<f32, LevelControlData> {
    let mut pid = PidController::new();
    pid.compute_fn(compute_level)
        .set_point(0.0)
        .kp(gain)
        .ki(0.0)
        .kd(0.0);
    pid
}
