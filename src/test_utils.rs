// src/test_utils.rs

//! This module contains utilities for testing.

use crate::axis::AXIS_COUNT;
use num_traits::Float;

/// A constant defining the tolerance within which floating-point values
/// are considered close enough to be equal.
pub const TEST_TOLERANCE: f32 = 1e-5;

/// Relative tolerance used when comparing against reference flight logs.
pub const REFERENCE_TOLERANCE: f32 = 0.1;

/// Checks if two floating point numbers are close enough to be considered
/// equal.
///
/// # Arguments
/// * `target` - The target value.
/// * `value` - The value to compare against the target.
///
/// # Returns
/// `true` if the absolute difference between `target` and `value` is less than
/// `TEST_TOLERANCE`, otherwise `false`.
pub fn value_close(target: f32, value: f32) -> bool {
    (target - value).abs() < TEST_TOLERANCE
}

/// Checks if a value lies within `REFERENCE_TOLERANCE` of a reference value.
///
/// # Arguments
/// * `target` - The reference value.
/// * `value` - The value to compare against the reference.
///
/// # Returns
/// `true` if `value` is within ten percent of `target`. A zero reference
/// falls back to `value_close`.
pub fn value_near(target: f32, value: f32) -> bool {
    if target == 0.0 {
        value_close(target, value)
    } else {
        (target - value).abs() <= (target * REFERENCE_TOLERANCE).abs()
    }
}

/// Checks if each of the components in a vector is close enough to
/// be considered equal.
///
/// # Arguments
/// * `target` - The target vector, one value per axis.
/// * `value` - The vector to compare against the target.
///
/// # Returns
/// `true` if each component of `target` and `value` is close as per `value_close`,
/// otherwise `false`.
pub fn vector_close(target: [f32; AXIS_COUNT], value: [f32; AXIS_COUNT]) -> bool {
    target
        .iter()
        .zip(value.iter())
        .all(|(target, value)| value_close(*target, *value))
}

/// Checks if each of the components in a vector is within the reference
/// tolerance, as per `value_near`.
pub fn vector_near(target: [f32; AXIS_COUNT], value: [f32; AXIS_COUNT]) -> bool {
    target
        .iter()
        .zip(value.iter())
        .all(|(target, value)| value_near(*target, *value))
}
