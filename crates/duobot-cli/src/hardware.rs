//! Backend selection.

use duobot_hal::HardwareContext;
use duobot_hal::sim::SimHardware;
use duobot_types::RoverError;
use duobot_types::config::ArmConfig;
use tracing::info;

use crate::config::{Backend, HardwareConfig};

/// Build the pin set named by `hardware.backend`.
///
/// # Errors
///
/// - [`RoverError::Config`] when `rpi` is requested but the binary was built
///   without the `rpi` feature.
/// - [`RoverError::HardwareFault`] when the GPIO peripheral cannot be
///   opened.
pub fn build(hardware: &HardwareConfig, arm: &ArmConfig) -> Result<HardwareContext, RoverError> {
    match hardware.backend {
        Backend::Sim => {
            info!(distance_cm = ?hardware.sim_distance_cm, "using simulated pins");
            let (context, _handles) = SimHardware::new()
                .with_distance(hardware.sim_distance_cm)
                .build();
            Ok(context)
        }
        Backend::Rpi => build_rpi(hardware, arm),
    }
}

#[cfg(all(feature = "rpi", target_os = "linux"))]
fn build_rpi(hardware: &HardwareConfig, arm: &ArmConfig) -> Result<HardwareContext, RoverError> {
    info!("using Raspberry Pi GPIO");
    Ok(duobot_hal::rpi::build(
        arm,
        &hardware.drive,
        &hardware.sensors,
    )?)
}

#[cfg(not(all(feature = "rpi", target_os = "linux")))]
fn build_rpi(_hardware: &HardwareConfig, _arm: &ArmConfig) -> Result<HardwareContext, RoverError> {
    Err(RoverError::Config(
        "backend 'rpi' needs a Linux build with the `rpi` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use duobot_kernel::CommandDispatcher;
    use duobot_types::config::{AvoidanceConfig, MotionTiming};

    #[test]
    fn sim_backend_builds_a_dispatcher() {
        let hardware = HardwareConfig {
            sim_distance_cm: Some(120.0),
            ..HardwareConfig::default()
        };
        let arm = ArmConfig::default();
        let context = build(&hardware, &arm).unwrap();
        let dispatcher = CommandDispatcher::from_hardware(
            context,
            &arm,
            MotionTiming::default(),
            hardware.drive.pwm_frequency_hz,
            AvoidanceConfig::default(),
        );
        assert!(dispatcher.is_ok());
    }

    #[cfg(not(all(feature = "rpi", target_os = "linux")))]
    #[test]
    fn rpi_without_feature_is_config_error() {
        let hardware = HardwareConfig {
            backend: Backend::Rpi,
            ..HardwareConfig::default()
        };
        match build(&hardware, &ArmConfig::default()) {
            Err(RoverError::Config(message)) => assert!(message.contains("rpi")),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("rpi backend built without the feature"),
        }
    }
}
