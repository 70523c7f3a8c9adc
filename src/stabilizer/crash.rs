// src/stabilizer/crash.rs

//! # Crash Recovery
//!
//! Detects a crash (a large, pilot-independent divergence between commanded
//! and measured rate while the mixer is saturated) and takes over roll and
//! pitch to level the vehicle until it is stable again.
//!
//! The state machine is shared by all axes:
//!
//! - `Normal` to `Detecting` when every divergence threshold is exceeded on
//!   an axis while armed and saturated. With no confirmation delay detection
//!   enters `Recovering` directly.
//! - `Detecting` back to `Normal` if the divergence clears or the pilot
//!   commands a large rate within the delay; to `Recovering` once the delay
//!   has elapsed.
//! - `Recovering` to `Normal` when the time limit expires or rates settle
//!   below the recovery rate with the mixer unsaturated, provided the attitude
//!   is within the recovery angle for the confirmation period.
//! - Any state to `Normal` when disarmed.

use crate::axis::{cmp_time_us, AngleTrims, Attitude, Axis, TimeUs, AXIS_COUNT};
use crate::config::{CrashRecoveryMode, StabilizerConfig};
use num_traits::Float;

/// Crash recovery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashState {
    /// No crash in progress.
    Normal,
    /// Divergence detected, waiting out the confirmation delay.
    Detecting {
        /// Detection time.
        since: TimeUs,
    },
    /// Recovery active.
    Recovering {
        /// Detection time.
        since: TimeUs,
        /// Start of the current run of iterations meeting the exit conditions.
        stable_since: Option<TimeUs>,
    },
}

/// Crash detection and recovery state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrashRecovery {
    mode: CrashRecoveryMode,
    state: CrashState,
    level_gain: f32,
    time_limit_us: i32,
    delay_us: i32,
    confirm_us: i32,
    recovery_angle: f32,
    recovery_rate: f32,
    dterm_threshold: f32,
    gyro_threshold: f32,
    setpoint_threshold: f32,
    limit_yaw: f32,
    disarm_requested: bool,
}

impl CrashRecovery {
    /// Creates the state machine for the given profile.
    pub fn with_config(config: &StabilizerConfig) -> Self {
        CrashRecovery {
            mode: config.crash_recovery,
            state: CrashState::Normal,
            level_gain: f32::from(config.level.angle_strength) / 10.0,
            time_limit_us: i32::from(config.crash_time) * 1000,
            delay_us: i32::from(config.crash_delay) * 1000,
            confirm_us: i32::from(config.crash_recovery_confirm_ms) * 1000,
            recovery_angle: f32::from(config.crash_recovery_angle),
            recovery_rate: f32::from(config.crash_recovery_rate),
            dterm_threshold: f32::from(config.crash_dthreshold) * 1000.0,
            gyro_threshold: f32::from(config.crash_gthreshold),
            setpoint_threshold: f32::from(config.crash_setpoint_threshold),
            limit_yaw: f32::from(config.crash_limit_yaw),
            disarm_requested: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> CrashState {
        self.state
    }

    /// Whether recovery has taken over the control loop.
    pub fn is_recovery_active(&self) -> bool {
        matches!(self.state, CrashState::Recovering { .. })
    }

    /// Whether a crash is being detected or recovered from.
    pub fn is_engaged(&self) -> bool {
        self.state != CrashState::Normal
    }

    /// Whether the beeper should sound.
    pub fn is_beeper_active(&self) -> bool {
        self.mode == CrashRecoveryMode::Beep && self.is_recovery_active()
    }

    /// Whether a crash was detected in disarm mode since the last disarm.
    pub fn disarm_requested(&self) -> bool {
        self.disarm_requested
    }

    /// Returns to `Normal` and clears any disarm request.
    pub fn reset(&mut self) {
        self.state = CrashState::Normal;
        self.disarm_requested = false;
    }

    /// Time-driven transitions, evaluated once at the start of an iteration.
    pub fn advance(
        &mut self,
        now_us: TimeUs,
        armed: bool,
        gyro_rate: &[f32; AXIS_COUNT],
        motor_mix_range: f32,
        attitude: Option<&Attitude>,
        trims: &AngleTrims,
    ) {
        if !armed {
            self.disarm_requested = false;
            if self.state != CrashState::Normal {
                log::info!("crash recovery cancelled on disarm");
                self.state = CrashState::Normal;
            }
            return;
        }

        if let CrashState::Detecting { since } = self.state {
            if cmp_time_us(now_us, since) >= self.delay_us {
                log::warn!("crash recovery engaged");
                self.state = CrashState::Recovering {
                    since,
                    stable_since: None,
                };
            }
        }

        if let CrashState::Recovering {
            since,
            stable_since,
        } = self.state
        {
            let timed_out = cmp_time_us(now_us, since) > self.time_limit_us;
            let settled = motor_mix_range < 1.0
                && gyro_rate.iter().all(|rate| rate.abs() < self.recovery_rate);
            let level = attitude.map_or(true, |attitude| {
                (attitude.roll - trims.roll).abs() < self.recovery_angle
                    && (attitude.pitch - trims.pitch).abs() < self.recovery_angle
            });

            if (timed_out || settled) && level {
                let stable_since = stable_since.unwrap_or(now_us);
                if cmp_time_us(now_us, stable_since) >= self.confirm_us {
                    log::warn!("crash recovery complete");
                    self.state = CrashState::Normal;
                } else {
                    self.state = CrashState::Recovering {
                        since,
                        stable_since: Some(stable_since),
                    };
                }
            } else {
                self.state = CrashState::Recovering {
                    since,
                    stable_since: None,
                };
            }
        }
    }

    /// Overrides the setpoint and error of `axis` while recovering. Returns
    /// `true` when the integral of the axis must be cleared.
    pub fn override_axis(
        &self,
        axis: Axis,
        gyro_rate: f32,
        attitude: Option<&Attitude>,
        trims: &AngleTrims,
        setpoint: &mut f32,
        error_rate: &mut f32,
    ) -> bool {
        if !self.is_recovery_active() {
            return false;
        }
        if axis == Axis::Yaw {
            *error_rate = error_rate.clamp(-self.limit_yaw, self.limit_yaw);
        } else if let Some(attitude) = attitude {
            let error_angle = -(attitude.angle(axis) - trims.angle(axis));
            *setpoint = error_angle * self.level_gain;
            *error_rate = *setpoint - gyro_rate;
        }
        true
    }

    /// Checks one axis for a crash. `delta` is the negated derivative of the
    /// filtered gyro rate and `setpoint_rate` the pilot's unmodified command.
    #[allow(clippy::too_many_arguments)]
    pub fn detect(
        &mut self,
        axis: Axis,
        now_us: TimeUs,
        armed: bool,
        gyro_overflow: bool,
        motor_mix_range: f32,
        delta: f32,
        error_rate: f32,
        setpoint_rate: f32,
    ) {
        if self.mode == CrashRecoveryMode::Off || gyro_overflow || !armed {
            return;
        }

        if self.state == CrashState::Normal
            && motor_mix_range >= 1.0
            && delta.abs() > self.dterm_threshold
            && error_rate.abs() > self.gyro_threshold
            && setpoint_rate.abs() < self.setpoint_threshold
        {
            if self.mode == CrashRecoveryMode::Disarm {
                if !self.disarm_requested {
                    log::warn!("crash detected on {:?}, requesting disarm", axis);
                }
                self.disarm_requested = true;
            } else if self.delay_us > 0 {
                log::warn!("crash detected on {:?}", axis);
                self.state = CrashState::Detecting { since: now_us };
            } else {
                log::warn!("crash detected on {:?}, recovery engaged", axis);
                self.state = CrashState::Recovering {
                    since: now_us,
                    stable_since: None,
                };
            }
        }

        if let CrashState::Detecting { since } = self.state {
            if cmp_time_us(now_us, since) < self.delay_us
                && (error_rate.abs() < self.gyro_threshold
                    || setpoint_rate.abs() > self.setpoint_threshold)
            {
                log::info!("crash detection cleared on {:?}", axis);
                self.state = CrashState::Normal;
            }
        }
    }
}
