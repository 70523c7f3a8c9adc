// src/stabilizer/scheduler.rs

//! # Gain Scheduler
//!
//! Produces the per-iteration gain adjustments shared by every axis:
//!
//! - the throttle PID attenuation (TPA) factor applied to P and D,
//! - the anti-gravity accelerator that boosts integral accumulation while
//!   throttle moves quickly,
//! - the windup attenuation that slows integral growth while the motor
//!   mixer is close to saturation.

use crate::axis::{cmp_time_us, TimeUs};
use crate::config::{AntiGravityMode, StabilizerConfig};
use crate::filter::Pt1Filter;
use num_traits::Float;

/// Cutoff of the lowpass whose residual is the throttle highpass.
pub const ANTI_GRAVITY_THROTTLE_CUTOFF_HZ: f32 = 15.0;

const THROTTLE_BUFFER_MAX: usize = 20;
const THROTTLE_DELTA_US: u32 = 100_000;
const THROTTLE_SAMPLE_US: u32 = THROTTLE_DELTA_US / THROTTLE_BUFFER_MAX as u32;

/// Gain adjustments for one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainSchedule {
    /// Multiplier for P and D.
    pub tpa_factor: f32,
    /// Multiplier for integral accumulation rate.
    pub iterm_accelerator: f32,
    /// Fraction of integral growth allowed near mixer saturation, 0..=1.
    pub windup_attenuation: f32,
}

impl Default for GainSchedule {
    fn default() -> Self {
        GainSchedule {
            tpa_factor: 1.0,
            iterm_accelerator: 1.0,
            windup_attenuation: 1.0,
        }
    }
}

/// Throttle samples over the last 100 ms, used by step anti-gravity.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ThrottleHistory {
    samples: [f32; THROTTLE_BUFFER_MAX],
    head: usize,
    last_sample_us: Option<TimeUs>,
}

impl ThrottleHistory {
    fn new() -> Self {
        ThrottleHistory {
            samples: [0.0; THROTTLE_BUFFER_MAX],
            head: 0,
            last_sample_us: None,
        }
    }

    /// Records `throttle` at most every sample interval and returns its change
    /// over the history window.
    fn update(&mut self, now_us: TimeUs, throttle: f32) -> f32 {
        match self.last_sample_us {
            None => {
                self.samples = [throttle; THROTTLE_BUFFER_MAX];
                self.last_sample_us = Some(now_us);
            }
            Some(last) if cmp_time_us(now_us, last) >= THROTTLE_SAMPLE_US as i32 => {
                self.samples[self.head] = throttle;
                self.head = (self.head + 1) % THROTTLE_BUFFER_MAX;
                self.last_sample_us = Some(now_us);
            }
            Some(_) => {}
        }
        // head now points at the oldest sample
        throttle - self.samples[self.head]
    }
}

/// Throttle and saturation driven gain scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainScheduler {
    mode: AntiGravityMode,
    accelerator_gain: f32,
    throttle_threshold: f32,
    windup_point_inv: f32,
    throttle_lpf: Pt1Filter,
    throttle_hpf: f32,
    history: ThrottleHistory,
    iterm_accelerator: f32,
}

impl GainScheduler {
    /// Creates a scheduler for the given profile.
    pub fn with_config(config: &StabilizerConfig) -> Self {
        let windup_point_inv = if config.iterm_windup_point_percent < 100 {
            1.0 / (1.0 - f32::from(config.iterm_windup_point_percent) / 100.0)
        } else {
            0.0
        };
        GainScheduler {
            mode: config.anti_gravity_mode,
            accelerator_gain: f32::from(config.iterm_accelerator_gain),
            throttle_threshold: f32::from(config.iterm_throttle_threshold) / 1000.0,
            windup_point_inv,
            throttle_lpf: Pt1Filter::with_cutoff(ANTI_GRAVITY_THROTTLE_CUTOFF_HZ, config.pid_dt()),
            throttle_hpf: 0.0,
            history: ThrottleHistory::new(),
            iterm_accelerator: 1.0,
        }
    }

    /// Computes this iteration's schedule.
    pub fn update(
        &mut self,
        now_us: TimeUs,
        throttle: f32,
        throttle_pid_attenuation: f32,
        motor_mix_range: f32,
        anti_gravity_enabled: bool,
    ) -> GainSchedule {
        self.throttle_hpf = throttle - self.throttle_lpf.apply(throttle);
        let throttle_delta = self.history.update(now_us, throttle);

        self.iterm_accelerator = if !anti_gravity_enabled {
            1.0
        } else {
            match self.mode {
                AntiGravityMode::Smooth => {
                    1.0 + self.throttle_hpf.abs() * 0.01 * (self.accelerator_gain - 1000.0).max(0.0)
                }
                AntiGravityMode::Step => {
                    if throttle_delta.abs() >= self.throttle_threshold {
                        (self.accelerator_gain / 1000.0).max(1.0)
                    } else {
                        1.0
                    }
                }
            }
        };

        GainSchedule {
            tpa_factor: if throttle_pid_attenuation.is_nan() {
                1.0
            } else {
                throttle_pid_attenuation.clamp(0.0, 1.0)
            },
            iterm_accelerator: self.iterm_accelerator,
            windup_attenuation: self.windup_attenuation(motor_mix_range),
        }
    }

    /// Fraction of integral growth allowed at `motor_mix_range`.
    pub fn windup_attenuation(&self, motor_mix_range: f32) -> f32 {
        if self.windup_point_inv > 1.0 {
            let attenuation = ((1.0 - motor_mix_range) * self.windup_point_inv).clamp(0.0, 1.0);
            if attenuation.is_nan() {
                0.0
            } else {
                attenuation
            }
        } else {
            1.0
        }
    }

    /// Accelerator computed in the last iteration.
    pub fn iterm_accelerator(&self) -> f32 {
        self.iterm_accelerator
    }

    /// Throttle highpass computed in the last iteration.
    pub fn throttle_hpf(&self) -> f32 {
        self.throttle_hpf
    }

    /// Returns the accelerator to one.
    pub fn reset_accelerator(&mut self) {
        self.iterm_accelerator = 1.0;
    }

    /// Clears filter and history state.
    pub fn reset(&mut self) {
        self.throttle_lpf.reset();
        self.throttle_hpf = 0.0;
        self.history = ThrottleHistory::new();
        self.iterm_accelerator = 1.0;
    }
}
