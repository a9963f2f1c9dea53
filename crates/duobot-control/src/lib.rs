//! `duobot-control` – the robot's actuator and sensor controllers.
//!
//! Every controller owns the pins it drives (handed out by
//! [`duobot_hal::HardwareContext::split`]) and suspends only at fixed points:
//! between interpolation steps, during settle holds, and between avoidance
//! cycles.
//!
//! # Modules
//!
//! - [`joint`] – [`JointController`]: smooth, stepped moves of one servo.
//! - [`arm`] – [`ArmController`]: named gestures over the three joints with
//!   a published [`ArmSnapshot`][duobot_types::ArmSnapshot].
//! - [`range`] – [`RangeSensor`]: ultrasonic distance measurement.
//! - [`chassis`] – [`ChassisDriver`]: H-bridge direction and speed.
//! - [`avoidance`] – [`AvoidancePolicy`] and the [`AvoidanceLoop`] that
//!   drives the chassis while steering clear of obstacles.

pub mod arm;
pub mod avoidance;
pub mod chassis;
pub mod joint;
pub mod range;

pub use arm::ArmController;
pub use avoidance::{AvoidanceLoop, AvoidancePolicy, Decision, LoopExit, Maneuver, ObstacleSensors};
pub use chassis::ChassisDriver;
pub use joint::{Joint, JointController};
pub use range::RangeSensor;
