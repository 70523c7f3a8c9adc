// src/error.rs

//! Configuration errors, raised when a profile is applied to the stabilizer.
//! The per-iteration path never fails; it guards degenerate numbers instead.

use crate::axis::Axis;
use thiserror::Error;

/// Reasons a [`StabilizerConfig`](crate::StabilizerConfig) is rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
    /// The gyro loop time is zero.
    #[error("gyro loop time must be non-zero")]
    ZeroLoopTime,

    /// The PID process divider is zero.
    #[error("PID process divider must be non-zero")]
    ZeroProcessDenominator,

    /// A P, I or D gain exceeds the configurator maximum, or F exceeds its own.
    #[error("PID gain out of range on {0:?} axis")]
    GainOutOfRange(Axis),

    /// A PID sum limit is negative or not finite.
    #[error("PID sum limit {0} must be non-negative and finite")]
    InvalidSumLimit(f32),

    /// The integral limit is negative or not finite.
    #[error("integral limit {0} must be non-negative and finite")]
    InvalidIntegralLimit(f32),

    /// The windup point is above 100 %.
    #[error("windup point {0}% exceeds 100%")]
    InvalidWindupPoint(u8),

    /// The angle mode tilt limit is outside the supported range.
    #[error("level angle limit {0} outside 10..=90 degrees")]
    InvalidAngleLimit(u8),

    /// The D-term notch cutoff is not below its centre frequency.
    #[error("notch cutoff {cutoff} Hz must be below notch centre {center} Hz")]
    InvalidNotch {
        /// Notch centre frequency in Hz.
        center: u16,
        /// Notch cutoff frequency in Hz.
        cutoff: u16,
    },

    /// The relax setpoint threshold is negative or not finite.
    #[error("iterm relax threshold {0} must be non-negative and finite")]
    InvalidRelaxThreshold(f32),

    /// The crash recovery level angle is zero.
    #[error("crash recovery angle must be non-zero")]
    ZeroCrashRecoveryAngle,

    /// The crash recovery time limit is zero.
    #[error("crash time limit must be non-zero")]
    ZeroCrashTime,
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
