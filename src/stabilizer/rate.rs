// src/stabilizer/rate.rs

//! # Rate PID Flight Stabilization Controller
//!
//! The control loop proper. Each call to [`RateStabilizer::update`] turns the
//! pilot's rate setpoints and the measured gyro rates into one clamped output
//! per axis for the motor mixer, running these stages in order:
//!
//! 1. gain scheduling (TPA, anti-gravity, windup attenuation),
//! 2. crash recovery state transitions,
//! 3. D-term filtering and optional integral rotation,
//! 4. per axis: setpoint acceleration limit, leveling, crash override,
//!    integral relax and absolute control, then the P, I, D and F terms.
//!
//! The derivative acts on the filtered measurement only, so setpoint steps do
//! not kick it; setpoint changes reach the output through feedforward.
//!
//! ## Usage
//!
//! ```
//! use multirotor_pid_stabilization::{
//!     AngleTrims, Axis, ControlInputs, ControlState, FlightStabilizer, RateStabilizer,
//!     StabilizerConfig,
//! };
//!
//! let mut stabilizer = RateStabilizer::new(&StabilizerConfig::new()).unwrap();
//! stabilizer.set_control_state(ControlState {
//!     armed: true,
//!     ..ControlState::default()
//! });
//! let mut inputs = ControlInputs::default();
//! inputs.gyro_rate = [100.0, 0.0, 0.0];
//!
//! stabilizer.update(&inputs, &AngleTrims::default(), 0);
//! assert!(stabilizer.axis_data(Axis::Roll).sum < 0.0);
//! ```

use crate::axis::{AngleTrims, Axis, TimeUs, AXIS_COUNT};
use crate::config::StabilizerConfig;
use crate::error::ConfigResult;
use crate::filter::{pt1_stage, DtermFilter, DtermFilterChain};
use crate::stabilizer::{
    AbsoluteControl, ControlInputs, ControlState, CrashRecovery, CrashState, FlightStabilizer,
    GainScheduler, IntegralController, LevelMode, LevelingMixer, PidAxisData,
};
use core::f32::consts::PI;
use num_traits::Float;

/// Scale from configurator P gain to controller units.
pub const PTERM_SCALE: f32 = 0.032029;
/// Scale from configurator D gain to controller units.
pub const DTERM_SCALE: f32 = 0.000529;
/// Scale from configurator F gain to controller units, per percent.
pub const FEEDFORWARD_SCALE: f32 = 0.013754;

const RAD: f32 = PI / 180.0;

/// Rate loop coefficients of one axis in controller units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidCoefficients {
    /// Proportional coefficient.
    pub kp: f32,
    /// Derivative coefficient.
    pub kd: f32,
    /// Feedforward coefficient.
    pub kf: f32,
}

impl PidCoefficients {
    fn with_config(config: &StabilizerConfig, axis: Axis) -> Self {
        let gains = config.gains(axis);
        PidCoefficients {
            kp: PTERM_SCALE * f32::from(gains.p),
            kd: DTERM_SCALE * f32::from(gains.d),
            kf: FEEDFORWARD_SCALE * f32::from(gains.f) / 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct AxisState {
    previous_filtered_gyro: f32,
    previous_setpoint: f32,
    limited_setpoint: f32,
}

/// Multirotor rate stabilizer with leveling, anti-windup and crash recovery.
pub struct RateStabilizer {
    config: StabilizerConfig,
    state: ControlState,
    dt: f32,
    pid_frequency: f32,
    coefficients: [PidCoefficients; AXIS_COUNT],
    max_velocity: [f32; AXIS_COUNT],
    feedforward_transition: f32,
    scheduler: GainScheduler,
    dterm_filters: [DtermFilterChain; AXIS_COUNT],
    yaw_lowpass: DtermFilter,
    leveling: LevelingMixer,
    integral: IntegralController,
    absolute: AbsoluteControl,
    crash: CrashRecovery,
    axes: [AxisState; AXIS_COUNT],
    outputs: [PidAxisData; AXIS_COUNT],
}

impl RateStabilizer {
    /// Creates a stabilizer for a validated profile.
    pub fn new(config: &StabilizerConfig) -> ConfigResult<Self> {
        config.validate()?;
        let stabilizer = Self::build(config, ControlState::default());
        log::info!(
            "rate stabilizer running every {} us ({} Hz)",
            config.pid_looptime_us(),
            stabilizer.pid_frequency
        );
        Ok(stabilizer)
    }

    /// Applies a new profile. All controller state is reset; the control
    /// state flags are kept. On error the current profile stays in effect.
    pub fn reinit(&mut self, config: &StabilizerConfig) -> ConfigResult<()> {
        config.validate()?;
        *self = Self::build(config, self.state);
        log::info!("rate stabilizer profile reloaded");
        Ok(())
    }

    fn build(config: &StabilizerConfig, state: ControlState) -> Self {
        let dt = config.pid_dt();
        let max_velocity = Axis::ALL.map(|axis| {
            let limit = match axis {
                Axis::Yaw => config.yaw_rate_accel_limit,
                Axis::Roll | Axis::Pitch => config.rate_accel_limit,
            };
            f32::from(limit) * 100.0 * dt
        });
        let feedforward_transition = if config.feedforward_transition > 0 {
            100.0 / f32::from(config.feedforward_transition)
        } else {
            0.0
        };
        let dterm_filter = DtermFilterChain::with_config(config);

        RateStabilizer {
            config: *config,
            state,
            dt,
            pid_frequency: 1.0 / dt,
            coefficients: Axis::ALL.map(|axis| PidCoefficients::with_config(config, axis)),
            max_velocity,
            feedforward_transition,
            scheduler: GainScheduler::with_config(config),
            dterm_filters: [dterm_filter; AXIS_COUNT],
            yaw_lowpass: pt1_stage(config.yaw_lowpass_hz, config.pid_looptime_us()),
            leveling: LevelingMixer::with_config(config),
            integral: IntegralController::with_config(config),
            absolute: AbsoluteControl::with_config(config),
            crash: CrashRecovery::with_config(config),
            axes: [AxisState::default(); AXIS_COUNT],
            outputs: [PidAxisData::default(); AXIS_COUNT],
        }
    }

    /// Clears every filter, integral, history and crash state.
    pub fn reset(&mut self) {
        self.scheduler.reset();
        for chain in self.dterm_filters.iter_mut() {
            chain.reset();
        }
        self.yaw_lowpass.reset();
        self.integral.reset_filters();
        self.absolute.reset_filters();
        self.crash.reset();
        self.axes = [AxisState::default(); AXIS_COUNT];
        self.outputs = [PidAxisData::default(); AXIS_COUNT];
    }

    /// Clears the integral terms and absolute control errors.
    pub fn reset_integral(&mut self) {
        self.integral.reset();
        self.absolute.reset();
    }

    /// Profile in effect.
    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    /// Flight-mode state in effect.
    pub fn control_state(&self) -> ControlState {
        self.state
    }

    /// Replaces the flight-mode state. Disabling stabilization clears the
    /// integral state; disarming also ends any crash recovery; toggling
    /// anti-gravity resets its accelerator.
    pub fn set_control_state(&mut self, state: ControlState) {
        if self.state.stabilization_enabled && !state.stabilization_enabled {
            self.reset_integral();
        }
        if self.state.armed && !state.armed {
            self.crash.reset();
        }
        if self.state.anti_gravity_enabled != state.anti_gravity_enabled {
            self.scheduler.reset_accelerator();
        }
        self.state = state;
    }

    /// Enables or disables stabilization.
    pub fn set_stabilization_enabled(&mut self, enabled: bool) {
        self.set_control_state(ControlState {
            stabilization_enabled: enabled,
            ..self.state
        });
    }

    /// Loop period in seconds.
    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Loop frequency in hertz.
    pub fn pid_frequency(&self) -> f32 {
        self.pid_frequency
    }

    /// Rate loop coefficients of `axis`.
    pub fn coefficients(&self, axis: Axis) -> PidCoefficients {
        self.coefficients[axis.index()]
    }

    /// Stored integral of `axis`.
    pub fn integral(&self, axis: Axis) -> f32 {
        self.integral.value(axis)
    }

    /// Accumulated absolute control error of `axis`, degrees.
    pub fn absolute_control_error(&self, axis: Axis) -> f32 {
        self.absolute.error(axis)
    }

    /// Anti-gravity accelerator of the last iteration.
    pub fn iterm_accelerator(&self) -> f32 {
        self.scheduler.iterm_accelerator()
    }

    /// Crash recovery state.
    pub fn crash_state(&self) -> CrashState {
        self.crash.state()
    }

    /// Whether crash recovery has taken over the control loop.
    pub fn is_crash_recovery_active(&self) -> bool {
        self.crash.is_recovery_active()
    }

    /// Whether crash recovery asks for the beeper.
    pub fn is_crash_beeper_active(&self) -> bool {
        self.crash.is_beeper_active()
    }

    /// Whether a crash asked for the vehicle to be disarmed.
    pub fn crash_disarm_requested(&self) -> bool {
        self.crash.disarm_requested()
    }

    fn limit_setpoint_acceleration(&mut self, axis: Axis, setpoint: f32) -> f32 {
        let max_velocity = self.max_velocity[axis.index()];
        if max_velocity <= 0.0 {
            return setpoint;
        }
        let state = &mut self.axes[axis.index()];
        let velocity = setpoint - state.limited_setpoint;
        let limited = if velocity.abs() > max_velocity {
            if velocity > 0.0 {
                state.limited_setpoint + max_velocity
            } else {
                state.limited_setpoint - max_velocity
            }
        } else {
            setpoint
        };
        state.limited_setpoint = limited;
        limited
    }

    fn feedforward_transition_factor(&self, rc_deflection: f32) -> f32 {
        if self.feedforward_transition > 0.0 {
            (rc_deflection.abs() * self.feedforward_transition).min(1.0)
        } else {
            1.0
        }
    }

    fn sum_limit(&self, axis: Axis) -> f32 {
        match axis {
            Axis::Yaw => self.config.pidsum_limit_yaw,
            Axis::Roll | Axis::Pitch => self.config.pidsum_limit,
        }
    }
}

impl FlightStabilizer for RateStabilizer {
    fn update(&mut self, inputs: &ControlInputs, trims: &AngleTrims, now_us: TimeUs) {
        if !self.state.stabilization_enabled || !self.state.armed || inputs.gyro_overflow {
            self.outputs = [PidAxisData::default(); AXIS_COUNT];
            return;
        }

        let schedule = self.scheduler.update(
            now_us,
            inputs.throttle,
            inputs.throttle_pid_attenuation,
            inputs.motor_mix_range,
            self.state.anti_gravity_enabled,
        );
        let tpa = schedule.tpa_factor;

        self.crash.advance(
            now_us,
            self.state.armed,
            &inputs.gyro_rate,
            inputs.motor_mix_range,
            inputs.attitude.as_ref(),
            trims,
        );

        let mut filtered_gyro = [0.0; AXIS_COUNT];
        for axis in Axis::ALL {
            let index = axis.index();
            filtered_gyro[index] = self.dterm_filters[index].apply(inputs.gyro_rate[index]);
        }

        let rotation = inputs.gyro_rate.map(|rate| rate * RAD * self.dt);
        if self.config.iterm_rotation {
            self.integral.rotate(&rotation);
        }
        if self.absolute.is_enabled() {
            self.absolute.rotate(&rotation);
        }

        let level_mode = self.state.level_mode();

        for axis in Axis::ALL {
            let index = axis.index();
            let coefficients = self.coefficients[index];
            let gyro_rate = inputs.gyro_rate[index];

            let mut setpoint = self.limit_setpoint_acceleration(axis, inputs.setpoint_rate[index]);
            if let Some(attitude) = inputs.attitude.as_ref() {
                setpoint = self.leveling.apply(
                    axis,
                    level_mode,
                    setpoint,
                    &inputs.rc_deflection,
                    attitude,
                    trims,
                );
            }

            let mut error_rate = setpoint - gyro_rate;
            if self.crash.override_axis(
                axis,
                gyro_rate,
                inputs.attitude.as_ref(),
                trims,
                &mut setpoint,
                &mut error_rate,
            ) {
                self.integral.reset_axis(axis);
            }

            let mut iterm_error = error_rate;
            if self.integral.relax_enabled() && !self.crash.is_engaged() {
                self.integral.relax(axis, setpoint, gyro_rate, &mut iterm_error);
                self.absolute.apply(
                    axis,
                    gyro_rate,
                    &mut setpoint,
                    &mut iterm_error,
                    self.state.airmode,
                );
                error_rate = setpoint - gyro_rate;
            }

            // P
            let mut p = coefficients.kp * error_rate * tpa;
            if axis == Axis::Yaw {
                p = self.yaw_lowpass.apply(p);
            }

            // I
            let i = self.integral.accumulate(axis, iterm_error, &schedule);

            // D, on measurement only
            let d = if coefficients.kd > 0.0 {
                let delta = -(filtered_gyro[index] - self.axes[index].previous_filtered_gyro)
                    * self.pid_frequency;
                self.crash.detect(
                    axis,
                    now_us,
                    self.state.armed,
                    inputs.gyro_overflow,
                    inputs.motor_mix_range,
                    delta,
                    error_rate,
                    inputs.setpoint_rate[index],
                );
                coefficients.kd * delta * tpa
            } else {
                0.0
            };
            if filtered_gyro[index].is_finite() {
                self.axes[index].previous_filtered_gyro = filtered_gyro[index];
            }

            // F, disabled while leveling
            let setpoint_delta = setpoint - self.axes[index].previous_setpoint;
            self.axes[index].previous_setpoint = setpoint;
            let feedforward_gain = if level_mode == LevelMode::Off {
                coefficients.kf
            } else {
                0.0
            };
            let f = if feedforward_gain > 0.0 {
                let transition = self.feedforward_transition_factor(inputs.rc_deflection[index]);
                feedforward_gain * transition * setpoint_delta * self.pid_frequency
            } else {
                0.0
            };

            let limit = self.sum_limit(axis);
            let sum = p + i + d + f;
            let sum = if sum.is_nan() {
                0.0
            } else {
                sum.clamp(-limit, limit)
            };

            self.outputs[index] = PidAxisData { p, i, d, f, sum };
        }

        if self.state.zero_throttle_iterm_reset {
            self.reset_integral();
        }
    }

    fn axis_data(&self, axis: Axis) -> PidAxisData {
        self.outputs[axis.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CrashRecoveryMode, ItermRelax};
    use crate::filter::Pt1Filter;
    use crate::test_utils::*;
    use crate::Attitude;

    const ROLL: Axis = Axis::Roll;
    const PITCH: Axis = Axis::Pitch;
    const YAW: Axis = Axis::Yaw;

    /// Drives a stabilizer the way the flight loop does, one period at a time.
    struct Harness {
        stabilizer: RateStabilizer,
        inputs: ControlInputs,
        trims: AngleTrims,
        loop_iter: u32,
    }

    impl Harness {
        fn with_config(config: StabilizerConfig) -> Self {
            let stabilizer = match RateStabilizer::new(&config) {
                Ok(stabilizer) => stabilizer,
                Err(error) => panic!("baseline profile rejected: {}", error),
            };
            let mut harness = Harness {
                stabilizer,
                inputs: ControlInputs::default(),
                trims: AngleTrims::default(),
                loop_iter: 0,
            };

            // idle for a while with stabilization off, then arm
            harness.stabilizer.set_stabilization_enabled(false);
            for _ in 0..20 {
                harness.run();
            }
            harness.stabilizer.set_control_state(ControlState {
                stabilization_enabled: true,
                armed: true,
                airmode: true,
                ..ControlState::default()
            });
            harness
        }

        fn new() -> Self {
            Self::with_config(StabilizerConfig::new())
        }

        fn set_stick(&mut self, axis: Axis, ratio: f32) {
            self.inputs.setpoint_rate[axis.index()] = 1998.0 * ratio;
            self.inputs.rc_deflection[axis.index()] = ratio;
        }

        fn set_attitude(&mut self, roll: f32, pitch: f32) {
            self.inputs.attitude = Some(Attitude { roll, pitch });
        }

        fn update_state(&mut self, change: impl FnOnce(&mut ControlState)) {
            let mut state = self.stabilizer.control_state();
            change(&mut state);
            self.stabilizer.set_control_state(state);
        }

        fn run(&mut self) {
            let now_us = self.stabilizer.config().pid_looptime_us() * self.loop_iter;
            self.loop_iter += 1;
            self.stabilizer.update(&self.inputs, &self.trims, now_us);
        }

        fn data(&self, axis: Axis) -> PidAxisData {
            self.stabilizer.axis_data(axis)
        }

        fn p(&self) -> [f32; AXIS_COUNT] {
            Axis::ALL.map(|axis| self.data(axis).p)
        }

        fn i(&self) -> [f32; AXIS_COUNT] {
            Axis::ALL.map(|axis| self.data(axis).i)
        }

        fn d(&self) -> [f32; AXIS_COUNT] {
            Axis::ALL.map(|axis| self.data(axis).d)
        }

        fn f(&self) -> [f32; AXIS_COUNT] {
            Axis::ALL.map(|axis| self.data(axis).f)
        }
    }

    const ZERO: [f32; AXIS_COUNT] = [0.0; AXIS_COUNT];

    /// Test the derived loop timing and coefficients of the baseline profile.
    #[test]
    fn test_initialisation() {
        let harness = Harness::new();
        let stabilizer = &harness.stabilizer;
        assert!(value_close(0.008, stabilizer.dt()));
        assert!(value_close(125.0, stabilizer.pid_frequency()));

        let roll = stabilizer.coefficients(ROLL);
        assert!(value_close(1.28116, roll.kp));
        assert!(value_close(0.01587, roll.kd));
        assert!(value_close(0.0089401, roll.kf));

        assert!(vector_close(ZERO, harness.p()));
        assert!(vector_close(ZERO, harness.i()));
        assert!(vector_close(ZERO, harness.d()));
    }

    /// Test that an invalid profile is rejected at construction and on reload.
    #[test]
    fn test_invalid_profile() {
        let mut config = StabilizerConfig::new();
        config.pidsum_limit = -1.0;
        assert!(RateStabilizer::new(&config).is_err());

        let mut harness = Harness::new();
        assert_eq!(
            harness.stabilizer.reinit(&config),
            Err(crate::ConfigError::InvalidSumLimit(-1.0))
        );
        assert!(
            value_close(500.0, harness.stabilizer.config().pidsum_limit),
            "Rejected profile must not replace the active one."
        );
    }

    /// Test that an unarmed vehicle produces no output and keeps no integral.
    #[test]
    fn test_unarmed() {
        let mut harness = Harness::new();
        harness.update_state(|state| state.armed = false);
        harness.inputs.gyro_rate[ROLL.index()] = 100.0;

        for _ in 0..10 {
            harness.run();
            assert!(vector_close(ZERO, harness.p()));
            assert!(vector_close(ZERO, harness.i()));
            assert!(vector_close(ZERO, harness.stabilizer.pid_sums()));
        }
        assert!(value_close(0.0, harness.stabilizer.integral(ROLL)));

        harness.update_state(|state| state.armed = true);
        harness.run();
        assert!(value_near(-128.1, harness.data(ROLL).p));
    }

    /// Test that every sum is clamped to its axis limit, yaw to its own.
    #[test]
    fn test_sum_limits() {
        let mut harness = Harness::new();
        harness.run();

        harness.inputs.gyro_rate = [-1000.0, 1000.0, 1000.0];
        harness.run();
        assert!(harness.data(ROLL).p > 500.0);
        assert!(harness.data(YAW).p < -400.0);
        assert!(vector_close(
            [500.0, -500.0, -400.0],
            harness.stabilizer.pid_sums()
        ));
    }

    /// Test that a zero sum limit mutes the axis entirely.
    #[test]
    fn test_zero_sum_limit() {
        let mut config = StabilizerConfig::new();
        config.pidsum_limit_yaw = 0.0;
        let mut harness = Harness::with_config(config);

        harness.inputs.gyro_rate = [100.0, 0.0, 100.0];
        harness.run();
        assert!(harness.data(YAW).p < 0.0);
        assert_eq!(harness.data(YAW).sum, 0.0);
        assert!(harness.data(ROLL).sum < 0.0, "Roll keeps its own limit.");
    }

    /// Test that nothing builds up while stabilization is disabled.
    #[test]
    fn test_stabilisation_disabled() {
        let mut harness = Harness::new();
        harness.stabilizer.set_stabilization_enabled(false);
        harness.inputs.gyro_rate = [100.0, -100.0, 100.0];

        for _ in 0..10 {
            harness.run();
            assert!(vector_close(ZERO, harness.p()));
            assert!(vector_close(ZERO, harness.i()));
            assert!(vector_close(ZERO, harness.d()));
            assert!(vector_close(ZERO, harness.stabilizer.pid_sums()));
        }
        assert!(value_close(0.0, harness.stabilizer.integral(ROLL)));
    }

    /// Test the rate loop reaction to gyro error on each axis in turn.
    #[test]
    fn test_pid_loop() {
        let mut harness = Harness::new();

        // Loop 1 - no error, no output
        harness.run();
        assert!(vector_close(ZERO, harness.p()));
        assert!(vector_close(ZERO, harness.i()));
        assert!(vector_close(ZERO, harness.d()));

        // Loop 2 - roll error
        harness.inputs.gyro_rate[ROLL.index()] = 100.0;
        harness.run();
        assert!(value_near(-128.1, harness.data(ROLL).p));
        assert!(value_near(-7.8, harness.data(ROLL).i));
        assert!(value_near(-198.4, harness.data(ROLL).d));
        assert!(value_close(0.0, harness.data(PITCH).p));
        assert!(value_close(0.0, harness.data(YAW).p));

        // Loop 3 - pitch error, roll still in error
        harness.inputs.gyro_rate[PITCH.index()] = -100.0;
        harness.run();
        assert!(value_near(-128.1, harness.data(ROLL).p));
        assert!(value_near(185.8, harness.data(PITCH).p));
        assert!(value_close(0.0, harness.data(YAW).p));
        assert!(value_near(-15.6, harness.data(ROLL).i));
        assert!(value_near(9.8, harness.data(PITCH).i));
        assert!(value_close(0.0, harness.data(ROLL).d));
        assert!(value_near(231.4, harness.data(PITCH).d));

        // Loop 4 - yaw error, roll and pitch still in error
        harness.inputs.gyro_rate[YAW.index()] = 100.0;
        harness.run();
        assert!(vector_near([-128.1, 185.8, -224.2], harness.p()));
        assert!(vector_near([-23.5, 19.6, -8.8], harness.i()));
        assert!(vector_near([0.0, 0.0, -132.25], harness.d()));

        // Mixer saturation freezes integral growth
        harness.inputs.motor_mix_range = 1.2;
        harness.run();
        assert!(vector_near([-23.5, 19.6, -8.8], harness.i()));
        harness.inputs.motor_mix_range = 0.0;

        // Match the stick to the gyro to stop the error
        harness.inputs.setpoint_rate = [100.0, -100.0, 100.0];
        for _ in 0..5 {
            harness.run();
        }
        assert!(vector_close(ZERO, harness.p()));
        assert!(vector_near([-23.5, 19.6, -10.6], harness.i()));
        assert!(vector_close(ZERO, harness.d()));

        // Disabling stabilization zeroes everything
        harness.stabilizer.set_stabilization_enabled(false);
        harness.run();
        assert!(vector_close(ZERO, harness.p()));
        assert!(vector_close(ZERO, harness.i()));
        assert!(vector_close(ZERO, harness.d()));
        assert!(
            value_close(0.0, harness.stabilizer.integral(ROLL)),
            "Disabling stabilization clears the integral."
        );
    }

    /// Test angle mode holding the commanded attitude and the return to rate control.
    #[test]
    fn test_angle_mode() {
        let mut harness = Harness::new();
        harness.update_state(|state| state.angle_mode = true);
        harness.run();
        assert!(vector_close(ZERO, harness.p()));

        // Full stick with the attitude already at the angle limit
        harness.set_stick(ROLL, 1.0);
        harness.set_stick(PITCH, -1.0);
        harness.set_attitude(55.0, -55.0);
        for _ in 0..3 {
            harness.run();
        }
        assert!(vector_close(ZERO, harness.p()));
        assert!(vector_close(ZERO, harness.i()));
        assert!(vector_close(ZERO, harness.d()));
        assert!(
            vector_close(ZERO, harness.f()),
            "Feedforward is disabled while leveling."
        );

        // Leaving angle mode on full stick gives full rate
        harness.update_state(|state| state.angle_mode = false);
        harness.run();
        assert!(value_near(2559.8, harness.data(ROLL).p));
        assert!(value_near(-3711.6, harness.data(PITCH).p));
        assert!(value_close(0.0, harness.data(YAW).p));
        assert!(value_close(150.0, harness.data(ROLL).i));
        assert!(value_close(-150.0, harness.data(PITCH).i));
        assert!(vector_close(ZERO, harness.d()));
        assert!(
            vector_close([500.0, -500.0, 0.0], harness.stabilizer.pid_sums()),
            "Sums should saturate at the roll and pitch limit."
        );
    }

    /// Test horizon mode blending stick rate with self-leveling.
    #[test]
    fn test_horizon_mode() {
        let mut harness = Harness::new();
        harness.update_state(|state| state.horizon_mode = true);
        harness.run();
        assert!(vector_close(ZERO, harness.p()));

        // Full stick: no leveling at all
        harness.set_stick(ROLL, 1.0);
        harness.set_stick(PITCH, -1.0);
        harness.set_attitude(55.0, -55.0);
        harness.run();
        assert!(value_near(2559.8, harness.data(ROLL).p));
        assert!(value_near(-3711.6, harness.data(PITCH).p));
        assert!(value_close(0.0, harness.data(YAW).p));
        assert!(value_close(500.0, harness.data(ROLL).sum));
        assert!(value_close(-500.0, harness.data(PITCH).sum));

        // Small stick while strongly banked: leveling nearly cancels the stick
        harness.set_stick(ROLL, 0.1);
        harness.set_stick(PITCH, -0.1);
        harness.set_attitude(53.6, -53.6);
        harness.run();
        assert!(value_near(0.753, harness.data(ROLL).p));
        assert!(value_near(-1.092, harness.data(PITCH).p));
        assert!(value_close(0.0, harness.data(YAW).p));
        assert!(vector_close(ZERO, harness.f()));
    }

    /// Test the integral attenuation from mixer saturation.
    #[test]
    fn test_mixer_saturation() {
        let mut harness = Harness::new();
        harness.set_stick(ROLL, 1.0);
        harness.set_stick(PITCH, -1.0);
        harness.set_stick(YAW, 1.0);
        harness.inputs.motor_mix_range = 2.0;
        harness.run();
        assert!(
            vector_close(ZERO, harness.i()),
            "Full saturation stops integral growth."
        );

        let small_sticks = |harness: &mut Harness| {
            harness.set_stick(ROLL, 0.1);
            harness.set_stick(PITCH, -0.1);
            harness.set_stick(YAW, 0.1);
        };

        let mut baseline = Harness::new();
        small_sticks(&mut baseline);
        baseline.run();
        let baseline_i = baseline.i();

        // Just above the windup point
        let mut saturated = Harness::new();
        small_sticks(&mut saturated);
        saturated.inputs.motor_mix_range =
            f32::from(saturated.stabilizer.config().iterm_windup_point_percent + 1) / 100.0;
        saturated.run();
        let saturated_i = saturated.i();

        assert!(saturated_i[0] < baseline_i[0]);
        assert!(saturated_i[1] >= baseline_i[1]);
        assert!(saturated_i[2] < baseline_i[2]);
    }

    /// Test that a sustained divergence under saturation engages crash recovery.
    #[test]
    fn test_crash_recovery_engages() {
        let mut config = StabilizerConfig::new();
        config.crash_recovery = CrashRecoveryMode::On;
        let mut harness = Harness::with_config(config);
        harness.inputs.motor_mix_range = 1.2;
        harness.inputs.gyro_rate[ROLL.index()] = 800.0;

        let loops_to_test = u32::from(config.crash_time) * 1000 / config.pid_looptime_us() + 1;
        for _ in 0..=loops_to_test {
            harness.inputs.gyro_rate[ROLL.index()] += harness.inputs.gyro_rate[ROLL.index()];
            harness.run();
        }
        assert!(harness.stabilizer.is_crash_recovery_active());
    }

    /// Test the override during recovery and the exit once the vehicle settles.
    #[test]
    fn test_crash_recovery_round_trip() {
        let mut config = StabilizerConfig::new();
        config.crash_recovery = CrashRecoveryMode::On;
        let mut harness = Harness::with_config(config);
        harness.run();

        harness.inputs.motor_mix_range = 1.2;
        harness.inputs.gyro_rate[ROLL.index()] = 1600.0;
        harness.run();
        assert!(harness.stabilizer.is_crash_recovery_active());
        assert!(!harness.stabilizer.is_crash_beeper_active());

        // Yaw error is clamped while recovering; roll integral stays cleared
        harness.inputs.gyro_rate[YAW.index()] = 1000.0;
        harness.run();
        assert!(harness.stabilizer.is_crash_recovery_active());
        let yaw_kp = harness.stabilizer.coefficients(YAW).kp;
        assert!(value_close(yaw_kp * -200.0, harness.data(YAW).p));
        assert!(value_close(0.0, harness.stabilizer.integral(ROLL)));

        harness.inputs.gyro_rate = ZERO;
        harness.inputs.motor_mix_range = 0.5;
        harness.run();
        assert_eq!(CrashState::Normal, harness.stabilizer.crash_state());
    }

    /// Test the feedforward response to stick movement and its decay.
    #[test]
    fn test_feedforward() {
        let mut harness = Harness::new();
        harness.run();
        assert!(vector_close(ZERO, harness.f()));

        harness.set_stick(ROLL, 1.0);
        harness.set_stick(PITCH, -1.0);
        harness.set_stick(YAW, -1.0);
        harness.run();
        assert!(vector_near([2232.8, -2061.0, -82.52], harness.f()));

        harness.set_stick(ROLL, 0.5);
        harness.set_stick(PITCH, -0.5);
        harness.set_stick(YAW, -0.5);
        harness.run();
        assert!(vector_near([-558.2, 515.26, -41.26], harness.f()));

        // Yaw catches up with its accelerating setpoint, then all settle
        for _ in 0..16 {
            harness.run();
        }
        assert!(vector_close(ZERO, harness.f()));
    }

    /// Test that setpoint steps reach the output through F but never through D.
    #[test]
    fn test_derivative_on_measurement() {
        let mut harness = Harness::new();
        harness.run();

        harness.set_stick(ROLL, 0.5);
        harness.run();
        assert!(value_close(0.0, harness.data(ROLL).d));
        assert!(value_near(558.2, harness.data(ROLL).f));
        assert!(harness.data(ROLL).p > 0.0);
    }

    /// Test that throttle PID attenuation scales P and D.
    #[test]
    fn test_throttle_pid_attenuation() {
        let mut harness = Harness::new();
        harness.inputs.throttle_pid_attenuation = 0.5;
        harness.run();

        harness.inputs.gyro_rate[ROLL.index()] = 100.0;
        harness.run();
        assert!(value_near(-64.06, harness.data(ROLL).p));
        assert!(value_near(-99.2, harness.data(ROLL).d));
        assert!(
            value_near(-7.8, harness.data(ROLL).i),
            "Integral is not attenuated."
        );
    }

    /// Test the yaw P lowpass.
    #[test]
    fn test_yaw_lowpass() {
        let mut config = StabilizerConfig::new();
        config.yaw_lowpass_hz = 30;
        let mut harness = Harness::with_config(config);

        harness.inputs.gyro_rate[YAW.index()] = 100.0;
        harness.run();
        let k = Pt1Filter::gain(30.0, harness.stabilizer.dt());
        let yaw_kp = harness.stabilizer.coefficients(YAW).kp;
        assert!(value_close(k * (yaw_kp * -100.0), harness.data(YAW).p));
        assert!(value_close(0.0, harness.data(ROLL).p));
    }

    /// Test setpoint based integral relax on roll and pitch.
    #[test]
    fn test_iterm_relax() {
        let mut config = StabilizerConfig::new();
        config.iterm_relax = ItermRelax::Rp;
        let mut harness = Harness::with_config(config);

        harness.inputs.setpoint_rate = [10.0, -10.0, 100.0];
        harness.run();
        assert!(value_close(0.614159, harness.data(ROLL).i));
        assert!(value_close(-0.767699, harness.data(PITCH).i));
        assert!(
            value_close(7.0381728, harness.data(YAW).i),
            "Yaw is not relaxed and follows the acceleration limit."
        );

        harness.run();
        assert!(value_close(1.288085, harness.data(ROLL).i));
    }

    /// Test absolute control correcting a persistent rate error.
    #[test]
    fn test_absolute_control() {
        let mut config = StabilizerConfig::new();
        config.iterm_relax = ItermRelax::Rp;
        config.abs_control_gain = 10;
        let mut harness = Harness::with_config(config);

        harness.inputs.gyro_rate[ROLL.index()] = 50.0;
        for _ in 0..10 {
            harness.run();
        }
        assert!(value_close(-4.0, harness.stabilizer.absolute_control_error(ROLL)));
        assert!(value_near(-115.3, harness.data(ROLL).p));

        // Without airmode the accumulated error holds still
        harness.update_state(|state| state.airmode = false);
        harness.run();
        assert!(value_close(-4.0, harness.stabilizer.absolute_control_error(ROLL)));
    }

    /// Test that yaw rotation moves the roll integral into pitch.
    #[test]
    fn test_iterm_rotation() {
        let mut config = StabilizerConfig::new();
        config.iterm_rotation = true;
        let mut harness = Harness::with_config(config);

        harness.inputs.setpoint_rate[ROLL.index()] = 100.0;
        harness.run();
        assert!(value_close(7.820192, harness.stabilizer.integral(ROLL)));

        harness.inputs.setpoint_rate = ZERO;
        harness.inputs.gyro_rate[YAW.index()] = 90.0;
        harness.run();
        assert!(value_close(-0.0982714, harness.stabilizer.integral(PITCH)));
    }

    /// Test the integral reset at zero throttle.
    #[test]
    fn test_zero_throttle_iterm_reset() {
        let mut harness = Harness::new();
        harness.update_state(|state| state.zero_throttle_iterm_reset = true);

        harness.inputs.gyro_rate[ROLL.index()] = 100.0;
        harness.run();
        assert!(value_near(-7.8, harness.data(ROLL).i));
        assert!(value_close(0.0, harness.stabilizer.integral(ROLL)));
    }

    /// Test that a gyro overflow zeroes the outputs and skips crash detection.
    #[test]
    fn test_gyro_overflow() {
        let mut config = StabilizerConfig::new();
        config.crash_recovery = CrashRecoveryMode::On;
        let mut harness = Harness::with_config(config);
        harness.run();

        harness.inputs.gyro_overflow = true;
        harness.inputs.motor_mix_range = 1.2;
        harness.inputs.gyro_rate[ROLL.index()] = 1600.0;
        harness.run();
        assert!(vector_close(ZERO, harness.stabilizer.pid_sums()));
        assert_eq!(CrashState::Normal, harness.stabilizer.crash_state());
    }

    /// Test that a NaN measurement yields a zero sum and keeps the integral.
    #[test]
    fn test_nan_measurement() {
        let mut harness = Harness::new();
        harness.inputs.gyro_rate[ROLL.index()] = 100.0;
        harness.run();
        let integral = harness.stabilizer.integral(ROLL);

        harness.inputs.gyro_rate[ROLL.index()] = f32::NAN;
        harness.run();
        assert!(value_close(0.0, harness.data(ROLL).sum));
        assert!(value_close(integral, harness.stabilizer.integral(ROLL)));
    }

    /// Test that a NaN sample with integral rotation enabled does not corrupt the integral.
    #[test]
    fn test_iterm_rotation_nan_measurement() {
        let mut config = StabilizerConfig::new();
        config.iterm_rotation = true;
        let mut harness = Harness::with_config(config);

        harness.inputs.gyro_rate = [100.0, 0.0, 0.0];
        harness.run();
        harness.inputs.gyro_rate = [f32::NAN, 0.0, 0.0];
        harness.run();
        harness.inputs.gyro_rate = [100.0, 0.0, 0.0];
        for _ in 0..48 {
            harness.run();
        }

        for axis in Axis::ALL {
            let integral = harness.stabilizer.integral(axis);
            assert!(integral.is_finite(), "{:?} integral is {}.", axis, integral);
            assert!(integral.abs() <= 150.0);
        }
        assert!(harness.data(ROLL).i < 0.0);
        assert!(harness.data(ROLL).sum < 0.0);
    }

    /// Test that the D-term chain of a fast loop recovers from a NaN sample.
    #[test]
    fn test_filtered_nan_measurement() {
        let mut config = StabilizerConfig::new();
        config.gyro_looptime_us = 125;
        let mut harness = Harness::with_config(config);

        harness.inputs.gyro_rate[ROLL.index()] = 100.0;
        harness.run();
        harness.inputs.gyro_rate[ROLL.index()] = f32::NAN;
        harness.run();
        assert!(value_close(0.0, harness.data(ROLL).sum));

        harness.inputs.gyro_rate[ROLL.index()] = 100.0;
        for _ in 0..2000 {
            harness.run();
        }
        let roll = harness.data(ROLL);
        assert!(roll.d.is_finite() && roll.d.abs() < 0.1, "Roll D is {}.", roll.d);
        assert!(value_near(-128.1, roll.p));
        assert!(roll.sum.is_finite() && roll.sum < 0.0);
    }
}
