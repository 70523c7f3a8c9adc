// src/stabilizer.rs

//! # Stabilizer Module
//!
//! The per-iteration stages of the attitude stabilizer and the
//! [`RateStabilizer`] that runs them in order.

pub mod absolute;
pub use absolute::*;
pub mod crash;
pub use crash::*;
pub mod flight_stabilizer;
pub use flight_stabilizer::*;
pub mod integral;
pub use integral::*;
pub mod leveling;
pub use leveling::*;
pub mod rate;
pub use rate::*;
pub mod scheduler;
pub use scheduler::*;
