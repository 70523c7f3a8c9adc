// src/axis.rs

//! # Axes and Time
//!
//! Axis indexing and the microsecond clock shared by every stabilizer stage.
//! Per-axis state is held in fixed `[T; AXIS_COUNT]` arrays indexed by
//! [`Axis`], so nothing in the control loop allocates.

/// Number of controlled rotational axes.
pub const AXIS_COUNT: usize = 3;

/// Microsecond timestamp from a monotonic, wrapping clock.
pub type TimeUs = u32;

/// Signed difference `a - b` between two wrapping timestamps.
#[inline]
pub fn cmp_time_us(a: TimeUs, b: TimeUs) -> i32 {
    a.wrapping_sub(b) as i32
}

/// A rotational axis of the vehicle body frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Rotation about the longitudinal axis.
    Roll = 0,
    /// Rotation about the lateral axis.
    Pitch = 1,
    /// Rotation about the vertical axis.
    Yaw = 2,
}

impl Axis {
    /// All axes in array order.
    pub const ALL: [Axis; AXIS_COUNT] = [Axis::Roll, Axis::Pitch, Axis::Yaw];

    /// Array index of the axis.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether the axis has an absolute attitude reference (roll and pitch).
    #[inline]
    pub const fn is_levelled(self) -> bool {
        !matches!(self, Axis::Yaw)
    }
}

/// Roll and pitch attitude of the vehicle, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Attitude {
    /// Roll angle in degrees, positive right wing down.
    pub roll: f32,
    /// Pitch angle in degrees, positive nose up.
    pub pitch: f32,
}

impl Attitude {
    /// Angle of the given axis. Yaw has no absolute reference and reads as zero.
    pub fn angle(&self, axis: Axis) -> f32 {
        match axis {
            Axis::Roll => self.roll,
            Axis::Pitch => self.pitch,
            Axis::Yaw => 0.0,
        }
    }
}

/// Accelerometer trim subtracted from the measured attitude, in degrees.
pub type AngleTrims = Attitude;
