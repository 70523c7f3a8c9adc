// src/pid.rs

//! # PID Control Module
//!
//! This module provides compute functions and control data structures
//! for the `piddiy` controllers embedded in the stabilizer: the
//! self-leveling angle loops and the absolute control accumulator.

pub mod absolute;
pub use absolute::*;
pub mod level;
pub use level::*;
