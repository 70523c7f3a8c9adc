// src/config.rs

//! # Stabilizer Configuration
//!
//! A tuning profile expressed in configurator units, the way a ground station
//! stores it. Values are plain public fields; [`StabilizerConfig::default`]
//! yields the baseline profile the regression tests are written against.
//! The profile is checked by [`StabilizerConfig::validate`] and converted to
//! controller units when it is applied to a
//! [`RateStabilizer`](crate::RateStabilizer).

use crate::axis::{Axis, AXIS_COUNT};
use crate::error::{ConfigError, ConfigResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest accepted P, I or D gain.
pub const PID_GAIN_MAX: u8 = 250;
/// Largest accepted feedforward gain.
pub const F_GAIN_MAX: u16 = 2000;

/// Raw gains for one rate axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PidGains {
    /// Proportional gain.
    pub p: u8,
    /// Integral gain.
    pub i: u8,
    /// Derivative gain.
    pub d: u8,
    /// Feedforward gain.
    pub f: u16,
}

impl PidGains {
    /// Creates a gain set from its four terms.
    pub const fn new(p: u8, i: u8, d: u8, f: u16) -> Self {
        PidGains { p, i, d, f }
    }
}

/// Raw gains for the self-leveling loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LevelGains {
    /// Angle mode strength, ten times the degrees per second commanded per degree of error.
    pub angle_strength: u8,
    /// Horizon mode strength, same scale as `angle_strength`.
    pub horizon_strength: u8,
    /// Stick deflection, in percent, at which horizon leveling fades out.
    pub horizon_transition: u8,
}

/// D-term lowpass implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FilterType {
    /// First-order lowpass.
    Pt1,
    /// Second-order Butterworth lowpass.
    Biquad,
}

/// Axes on which integral relax is applied, and whether integral decrease
/// bypasses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ItermRelax {
    /// Relax disabled.
    Off,
    /// Roll and pitch.
    Rp,
    /// Roll, pitch and yaw.
    Rpy,
    /// Roll and pitch, integral decrease passes unmodified.
    RpInc,
    /// Roll, pitch and yaw, integral decrease passes unmodified.
    RpyInc,
}

impl ItermRelax {
    /// Whether relax applies to `axis`.
    pub fn applies_to(self, axis: Axis) -> bool {
        match self {
            ItermRelax::Off => false,
            ItermRelax::Rp | ItermRelax::RpInc => axis.is_levelled(),
            ItermRelax::Rpy | ItermRelax::RpyInc => true,
        }
    }

    /// Whether integral decrease bypasses relax.
    pub fn passes_decrease(self) -> bool {
        matches!(self, ItermRelax::RpInc | ItermRelax::RpyInc)
    }
}

/// Signal used to suppress integral accumulation during fast stick moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ItermRelaxType {
    /// Accumulate only the part of the gyro error outside the setpoint transient band.
    Gyro,
    /// Scale the error down by setpoint transient magnitude.
    Setpoint,
}

/// Anti-gravity integral boost strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AntiGravityMode {
    /// Boost proportional to highpassed throttle.
    Smooth,
    /// Fixed boost while throttle moves faster than a threshold.
    Step,
}

/// Reaction to a detected crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CrashRecoveryMode {
    /// Detection disabled.
    Off,
    /// Recover attitude.
    On,
    /// Recover attitude and signal the beeper.
    Beep,
    /// Request a disarm instead of recovering.
    Disarm,
}

/// Tuning profile for the stabilizer.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StabilizerConfig {
    /// Gyro sampling period in microseconds.
    pub gyro_looptime_us: u32,
    /// Number of gyro samples per PID iteration.
    pub pid_process_denom: u8,

    /// Rate gains indexed by [`Axis`].
    pub pid: [PidGains; AXIS_COUNT],
    /// Self-leveling gains.
    pub level: LevelGains,

    /// Output limit for roll and pitch sums.
    pub pidsum_limit: f32,
    /// Output limit for the yaw sum.
    pub pidsum_limit_yaw: f32,
    /// Magnitude limit of the integral term.
    pub iterm_limit: f32,
    /// Motor mix range percentage above which integral accumulation is attenuated.
    pub iterm_windup_point_percent: u8,

    /// Yaw P-term lowpass cutoff in Hz, 0 disables.
    pub yaw_lowpass_hz: u16,
    /// First D-term lowpass cutoff in Hz, 0 disables.
    pub dterm_lowpass_hz: u16,
    /// First D-term lowpass implementation.
    pub dterm_filter_type: FilterType,
    /// Second D-term lowpass (PT1) cutoff in Hz, 0 disables.
    pub dterm_lowpass2_hz: u16,
    /// D-term notch centre in Hz, 0 disables.
    pub dterm_notch_hz: u16,
    /// D-term notch lower cutoff in Hz, 0 disables.
    pub dterm_notch_cutoff: u16,

    /// Maximum tilt commanded in angle mode, degrees.
    pub level_angle_limit: u8,
    /// Effect of inclination on horizon leveling, 0..=250.
    pub horizon_tilt_effect: u8,
    /// Use the inclination cutoff variant of horizon blending.
    pub horizon_tilt_expert_mode: bool,

    /// Stick deflection percentage over which feedforward ramps in, 0 disables the ramp.
    pub feedforward_transition: u8,
    /// Roll and pitch setpoint acceleration limit in deg/s per ms, 0 disables.
    pub rate_accel_limit: u16,
    /// Yaw setpoint acceleration limit in deg/s per ms, 0 disables.
    pub yaw_rate_accel_limit: u16,

    /// Anti-gravity strategy.
    pub anti_gravity_mode: AntiGravityMode,
    /// Throttle change, per mille over 100 ms, that triggers a step boost.
    pub iterm_throttle_threshold: u16,
    /// Anti-gravity gain, 1000 means no boost.
    pub iterm_accelerator_gain: u16,

    /// Integral relax axes.
    pub iterm_relax: ItermRelax,
    /// Integral relax signal.
    pub iterm_relax_type: ItermRelaxType,
    /// Setpoint lowpass cutoff for relax, Hz.
    pub iterm_relax_cutoff: u8,
    /// Setpoint transient, deg/s, at which relax fully suppresses accumulation.
    pub iterm_relax_setpoint_threshold: f32,
    /// Rotate integral state with the body frame.
    pub iterm_rotation: bool,

    /// Absolute control gain, 0 disables.
    pub abs_control_gain: u8,
    /// Absolute control correction limit, deg/s.
    pub abs_control_limit: u8,
    /// Absolute control accumulated error limit, degrees.
    pub abs_control_error_limit: u8,
    /// Setpoint lowpass cutoff for absolute control, Hz.
    pub abs_control_cutoff: u8,
    /// Width of the relax band, in multiples of the setpoint transient, inside which
    /// absolute control stops accumulating.
    pub abs_control_band: f32,

    /// Crash reaction.
    pub crash_recovery: CrashRecoveryMode,
    /// Maximum recovery duration, ms.
    pub crash_time: u16,
    /// Time a detection must persist before recovery starts, ms.
    pub crash_delay: u16,
    /// Attitude within which recovery may end, degrees.
    pub crash_recovery_angle: u8,
    /// Rate below which recovery may end, deg/s.
    pub crash_recovery_rate: u16,
    /// Time the exit conditions must hold before recovery ends, ms.
    pub crash_recovery_confirm_ms: u16,
    /// D-term measurement acceleration threshold, deg/s per ms.
    pub crash_dthreshold: u16,
    /// Rate error threshold, deg/s.
    pub crash_gthreshold: u16,
    /// Setpoint magnitude above which a divergence is pilot commanded, deg/s.
    pub crash_setpoint_threshold: u16,
    /// Yaw error limit while recovering, deg/s.
    pub crash_limit_yaw: u16,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        StabilizerConfig {
            gyro_looptime_us: 4000,
            pid_process_denom: 2,
            pid: [
                PidGains::new(40, 40, 30, 65),
                PidGains::new(58, 50, 35, 60),
                PidGains::new(70, 45, 20, 60),
            ],
            level: LevelGains {
                angle_strength: 50,
                horizon_strength: 50,
                horizon_transition: 75,
            },
            pidsum_limit: 500.0,
            pidsum_limit_yaw: 400.0,
            iterm_limit: 150.0,
            iterm_windup_point_percent: 50,
            yaw_lowpass_hz: 0,
            dterm_lowpass_hz: 100,
            dterm_filter_type: FilterType::Biquad,
            dterm_lowpass2_hz: 0,
            dterm_notch_hz: 260,
            dterm_notch_cutoff: 160,
            level_angle_limit: 55,
            horizon_tilt_effect: 75,
            horizon_tilt_expert_mode: false,
            feedforward_transition: 100,
            rate_accel_limit: 0,
            yaw_rate_accel_limit: 100,
            anti_gravity_mode: AntiGravityMode::Smooth,
            iterm_throttle_threshold: 250,
            iterm_accelerator_gain: 1000,
            iterm_relax: ItermRelax::Off,
            iterm_relax_type: ItermRelaxType::Setpoint,
            iterm_relax_cutoff: 11,
            iterm_relax_setpoint_threshold: 30.0,
            iterm_rotation: false,
            abs_control_gain: 0,
            abs_control_limit: 90,
            abs_control_error_limit: 20,
            abs_control_cutoff: 11,
            abs_control_band: 2.0,
            crash_recovery: CrashRecoveryMode::Off,
            crash_time: 500,
            crash_delay: 0,
            crash_recovery_angle: 10,
            crash_recovery_rate: 100,
            crash_recovery_confirm_ms: 0,
            crash_dthreshold: 50,
            crash_gthreshold: 400,
            crash_setpoint_threshold: 350,
            crash_limit_yaw: 200,
        }
    }
}

impl StabilizerConfig {
    /// Creates the baseline profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gains for `axis`.
    pub fn gains(&self, axis: Axis) -> PidGains {
        self.pid[axis.index()]
    }

    /// Checks that the profile can be applied.
    ///
    /// Example Usage
    /// ```
    /// use multirotor_pid_stabilization::{ConfigError, StabilizerConfig};
    ///
    /// let mut config = StabilizerConfig::new();
    /// assert!(config.validate().is_ok());
    ///
    /// config.pid_process_denom = 0;
    /// assert_eq!(config.validate(), Err(ConfigError::ZeroProcessDenominator));
    /// ```
    pub fn validate(&self) -> ConfigResult<()> {
        if self.gyro_looptime_us == 0 {
            return Err(ConfigError::ZeroLoopTime);
        }
        if self.pid_process_denom == 0 {
            return Err(ConfigError::ZeroProcessDenominator);
        }
        for axis in Axis::ALL {
            let gains = self.gains(axis);
            if gains.p > PID_GAIN_MAX
                || gains.i > PID_GAIN_MAX
                || gains.d > PID_GAIN_MAX
                || gains.f > F_GAIN_MAX
            {
                return Err(ConfigError::GainOutOfRange(axis));
            }
        }
        for limit in [self.pidsum_limit, self.pidsum_limit_yaw] {
            if !limit.is_finite() || limit < 0.0 {
                return Err(ConfigError::InvalidSumLimit(limit));
            }
        }
        if !self.iterm_limit.is_finite() || self.iterm_limit < 0.0 {
            return Err(ConfigError::InvalidIntegralLimit(self.iterm_limit));
        }
        if self.iterm_windup_point_percent > 100 {
            return Err(ConfigError::InvalidWindupPoint(
                self.iterm_windup_point_percent,
            ));
        }
        if !(10..=90).contains(&self.level_angle_limit) {
            return Err(ConfigError::InvalidAngleLimit(self.level_angle_limit));
        }
        if self.dterm_notch_hz != 0
            && self.dterm_notch_cutoff != 0
            && self.dterm_notch_cutoff >= self.dterm_notch_hz
        {
            return Err(ConfigError::InvalidNotch {
                center: self.dterm_notch_hz,
                cutoff: self.dterm_notch_cutoff,
            });
        }
        let threshold = self.iterm_relax_setpoint_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::InvalidRelaxThreshold(threshold));
        }
        if self.crash_recovery_angle == 0 {
            return Err(ConfigError::ZeroCrashRecoveryAngle);
        }
        if self.crash_time == 0 {
            return Err(ConfigError::ZeroCrashTime);
        }
        Ok(())
    }

    /// PID loop period in microseconds.
    pub fn pid_looptime_us(&self) -> u32 {
        self.gyro_looptime_us
            .saturating_mul(u32::from(self.pid_process_denom))
    }

    /// PID loop period in seconds.
    pub fn pid_dt(&self) -> f32 {
        self.pid_looptime_us() as f32 * 1e-6
    }
}
