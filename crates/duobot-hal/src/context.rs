//! [`HardwareContext`] – every pin the robot owns, in one value.
//!
//! A backend builds the context once at startup with fixed pin bindings.
//! [`HardwareContext::split`] then hands each controller the pins it drives
//! exclusively: the arm's servo pins, the chassis H-bridge, and the obstacle
//! sensors.  Nothing else holds a pin, so there are no ambient hardware
//! handles anywhere in the process.

use crate::gpio::{InputPin, OutputPin, PulseInput, PwmOutput};

/// Servo pins of the three arm joints.
pub struct ArmPins {
    pub shoulder: Box<dyn PwmOutput>,
    pub elbow: Box<dyn PwmOutput>,
    pub gripper: Box<dyn PwmOutput>,
}

/// One side of the H-bridge: two direction inputs and a PWM enable line.
pub struct BridgeSide {
    pub in1: Box<dyn OutputPin>,
    pub in2: Box<dyn OutputPin>,
    pub enable: Box<dyn PwmOutput>,
}

/// Both wheel pairs of the chassis.
pub struct DrivePins {
    pub right: BridgeSide,
    pub left: BridgeSide,
}

/// Ultrasonic ranger lines.
pub struct RangePins {
    pub trigger: Box<dyn OutputPin>,
    pub echo: Box<dyn PulseInput>,
}

/// Obstacle sensors read by the avoidance loop.
pub struct SensorPins {
    pub range: RangePins,
    pub ir: Box<dyn InputPin>,
}

/// The complete set of pins, owned in one place.
pub struct HardwareContext {
    pub arm: ArmPins,
    pub drive: DrivePins,
    pub sensors: SensorPins,
}

impl HardwareContext {
    /// Hand out the per-controller pin groups.
    pub fn split(self) -> (ArmPins, DrivePins, SensorPins) {
        (self.arm, self.drive, self.sensors)
    }
}
