// demos/horizon.rs

use multirotor_pid_stabilization::{
    AngleTrims, Attitude, Axis, ControlInputs, ControlState, FlightStabilizer, RateStabilizer,
    StabilizerConfig,
};

fn main() {
    let mut config = StabilizerConfig::new();

    // Stronger self-leveling than the baseline profile.
    config.level.horizon_strength = 70;
    config.level.horizon_transition = 60;

    let mut stabilizer = match RateStabilizer::new(&config) {
        Ok(stabilizer) => stabilizer,
        Err(error) => {
            eprintln!("invalid profile: {}", error);
            return;
        }
    };
    stabilizer.set_control_state(ControlState {
        armed: true,
        airmode: true,
        horizon_mode: true,
        ..ControlState::default()
    });

    // Vehicle starts banked with a light stick input on roll.
    let trims = AngleTrims::default();
    let mut inputs = ControlInputs::default();
    let mut attitude = Attitude {
        roll: 30.0,
        pitch: -15.0,
    };
    inputs.rc_deflection[Axis::Roll.index()] = 0.05;
    inputs.setpoint_rate[Axis::Roll.index()] = 1998.0 * 0.05;

    let dt = stabilizer.dt();
    let looptime_us = config.pid_looptime_us();
    // crude airframe model: rate follows the pid sum
    let response = 0.5;

    println!("                      Roll,    Pitch,      Yaw");
    for step in 0..=20u32 {
        inputs.attitude = Some(attitude);
        stabilizer.update(&inputs, &trims, step * looptime_us);
        let sums = stabilizer.pid_sums();

        println!("t = {:.3}", step as f32 * dt);
        println!(
            "    Attitude:     {:-8.3}, {:-8.3}",
            attitude.roll, attitude.pitch
        );
        println!(
            "    Gyroscope:    {:-8.3}, {:-8.3}, {:-8.3}",
            inputs.gyro_rate[0], inputs.gyro_rate[1], inputs.gyro_rate[2]
        );
        println!(
            "    PID:          {:-8.3}, {:-8.3}, {:-8.3}",
            sums[0], sums[1], sums[2]
        );

        // simulate response
        for axis in Axis::ALL {
            let index = axis.index();
            inputs.gyro_rate[index] += (sums[index] * response - inputs.gyro_rate[index]) * 0.5;
        }
        attitude.roll += inputs.gyro_rate[Axis::Roll.index()] * dt;
        attitude.pitch += inputs.gyro_rate[Axis::Pitch.index()] * dt;
    }
}
