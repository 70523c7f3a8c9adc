// src/lib.rs

//! # Multirotor PID Stabilization Core
//!
//! This crate provides a `no_std`, no-alloc attitude stabilization core for
//! multirotor flight controllers. Once per control period it turns the pilot's
//! rate setpoints and the filtered gyro rates into one bounded output per
//! axis for the motor mixer.
//!
//! The core covers D-term filtering, throttle PID attenuation and
//! anti-gravity, angle and horizon self-leveling, integral anti-windup and
//! relax, absolute control, feedforward and crash recovery. Sensor fusion,
//! motor mixing and receiver handling live outside of it.
//!
//! ## Usage
//!
//! Build a [`RateStabilizer`] from a [`StabilizerConfig`], set the
//! [`ControlState`] between iterations, and call
//! [`FlightStabilizer::update`] from the fixed-rate scheduler with fresh
//! [`ControlInputs`].

#![no_std]
#![deny(missing_docs)]

pub mod axis;
pub mod config;
pub mod error;
pub mod filter;
pub mod pid;
pub mod stabilizer;

#[doc(inline)]
pub use axis::*;
#[doc(inline)]
pub use config::*;
#[doc(inline)]
pub use error::*;
#[doc(inline)]
pub use stabilizer::*;

#[cfg(test)]
mod test_utils;
