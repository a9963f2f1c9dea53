//! `duobot-types` – shared vocabulary for the duobot controller.
//!
//! Every other crate in the workspace speaks in these types: the devices and
//! actions of the command interface, the arm and chassis state snapshots, the
//! per-cycle chassis report, and the workspace-wide [`RoverError`].
//!
//! # Modules
//!
//! - [`command`] – [`Command`][command::Command]: an immutable, validated
//!   request for one device, parsed from a device name, an action name and a
//!   string parameter map.
//! - [`config`] – serde-backed tuning and pin-binding sections shared by the
//!   HAL backends, the controllers and the binary's configuration file.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod command;
pub mod config;

pub use command::{Command, DriveRequest, Request};

/// Speed of sound expressed in centimetres per microsecond.
///
/// An ultrasonic echo travels to the obstacle and back, so a pulse of `t` µs
/// corresponds to `t * SOUND_CM_PER_US / 2` centimetres.
pub const SOUND_CM_PER_US: f64 = 0.0343;

/// Largest speed accepted by the chassis (percent of full duty).
pub const MAX_SPEED: u8 = 100;

/// Largest joint angle in degrees. The smallest is 0.
pub const MAX_ANGLE: f32 = 180.0;

// ────────────────────────────────────────────────────────────────────────────
// Devices and actions
// ────────────────────────────────────────────────────────────────────────────

/// The two independently addressable devices of the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Arm,
    Chassis,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Arm => write!(f, "arm"),
            Device::Chassis => write!(f, "chassis"),
        }
    }
}

impl FromStr for Device {
    type Err = RoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arm" => Ok(Device::Arm),
            "chassis" => Ok(Device::Chassis),
            other => Err(RoverError::NotFound(format!("unknown device '{other}'"))),
        }
    }
}

/// Chassis travel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Stop => "stop",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = RoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(Direction::Forward),
            "backward" => Ok(Direction::Backward),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            "stop" => Ok(Direction::Stop),
            other => Err(RoverError::InvalidInput(format!(
                "direction must be one of forward, backward, left, right, stop (got '{other}')"
            ))),
        }
    }
}

/// The three servo joints of the arm, in mounting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JointId {
    Shoulder,
    Elbow,
    Gripper,
}

impl JointId {
    pub const ALL: [JointId; 3] = [JointId::Shoulder, JointId::Elbow, JointId::Gripper];

    pub fn as_str(&self) -> &'static str {
        match self {
            JointId::Shoulder => "shoulder",
            JointId::Elbow => "elbow",
            JointId::Gripper => "gripper",
        }
    }
}

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, predefined arm motion.
///
/// Single-joint gestures move one joint to a fixed set point.  The two
/// composite gestures chain single-joint moves in a fixed order because the
/// shoulder and elbow can collide when driven simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    ShoulderUp,
    ShoulderDown,
    ElbowExpand,
    ElbowClose,
    GripperOpen,
    GripperClose,
    ArmExpand,
    ArmClose,
}

impl Gesture {
    pub const ALL: [Gesture; 8] = [
        Gesture::ShoulderUp,
        Gesture::ShoulderDown,
        Gesture::ElbowExpand,
        Gesture::ElbowClose,
        Gesture::GripperOpen,
        Gesture::GripperClose,
        Gesture::ArmExpand,
        Gesture::ArmClose,
    ];

    /// Action name used on the command interface.
    pub fn action(&self) -> &'static str {
        match self {
            Gesture::ShoulderUp => "move_shoulder_up",
            Gesture::ShoulderDown => "move_shoulder_down",
            Gesture::ElbowExpand => "expand_elbow",
            Gesture::ElbowClose => "close_elbow",
            Gesture::GripperOpen => "open_gripper",
            Gesture::GripperClose => "close_gripper",
            Gesture::ArmExpand => "expand_arm",
            Gesture::ArmClose => "close_arm",
        }
    }

    /// Resolve an action name, returning `None` for anything unknown.
    pub fn from_action(action: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.action() == action)
    }

    /// Human-readable confirmation returned to the caller on success.
    pub fn message(&self) -> &'static str {
        match self {
            Gesture::ShoulderUp => "Shoulder moved up",
            Gesture::ShoulderDown => "Shoulder moved down",
            Gesture::ElbowExpand => "Elbow expanded",
            Gesture::ElbowClose => "Elbow closed",
            Gesture::GripperOpen => "Gripper opened",
            Gesture::GripperClose => "Gripper closed",
            Gesture::ArmExpand => "Arm expanded",
            Gesture::ArmClose => "Arm closed",
        }
    }

    /// The ordered single-joint moves `(joint, target angle in degrees)` that
    /// make up this gesture.
    pub fn moves(&self) -> &'static [(JointId, f32)] {
        match self {
            Gesture::ShoulderUp => &[(JointId::Shoulder, 180.0)],
            Gesture::ShoulderDown => &[(JointId::Shoulder, 40.0)],
            Gesture::ElbowExpand => &[(JointId::Elbow, 180.0)],
            Gesture::ElbowClose => &[(JointId::Elbow, 0.0)],
            Gesture::GripperOpen => &[(JointId::Gripper, 35.0)],
            Gesture::GripperClose => &[(JointId::Gripper, 55.0)],
            Gesture::ArmExpand => &[(JointId::Shoulder, 180.0), (JointId::Elbow, 180.0)],
            Gesture::ArmClose => &[(JointId::Elbow, 0.0), (JointId::Shoulder, 40.0)],
        }
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// State and reports
// ────────────────────────────────────────────────────────────────────────────

/// Joint angles (degrees) after the last completed move of each joint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmSnapshot {
    pub shoulder: f32,
    pub elbow: f32,
    pub gripper: f32,
}

impl ArmSnapshot {
    pub fn angle(&self, joint: JointId) -> f32 {
        match joint {
            JointId::Shoulder => self.shoulder,
            JointId::Elbow => self.elbow,
            JointId::Gripper => self.gripper,
        }
    }

    pub fn set(&mut self, joint: JointId, angle: f32) {
        match joint {
            JointId::Shoulder => self.shoulder = angle,
            JointId::Elbow => self.elbow = angle,
            JointId::Gripper => self.gripper = angle,
        }
    }
}

/// Last commanded chassis state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChassisState {
    pub direction: Direction,
    pub speed: u8,
}

impl Default for ChassisState {
    fn default() -> Self {
        Self {
            direction: Direction::Stop,
            speed: 0,
        }
    }
}

/// Result of one ultrasonic measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distance {
    /// Echo received; distance in centimetres.
    Cm(f64),
    /// No echo within the timeout: nothing in range.
    Unknown,
}

impl Distance {
    /// `true` when a measured obstacle is strictly closer than `cm`.
    /// An unknown distance is never closer than anything.
    pub fn is_closer_than(&self, cm: f64) -> bool {
        match self {
            Distance::Cm(d) => *d < cm,
            Distance::Unknown => false,
        }
    }

    pub fn as_cm(&self) -> Option<f64> {
        match self {
            Distance::Cm(d) => Some(*d),
            Distance::Unknown => None,
        }
    }
}

/// One fresh poll of the chassis obstacle sensors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub distance: Distance,
    pub ir_triggered: bool,
}

/// Status carried by every chassis report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Running,
}

/// Per-cycle report streamed back to the caller of a chassis `move`.
///
/// `distance` is `None` when the echo timed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChassisReport {
    pub distance: Option<f64>,
    pub speed: u8,
    pub status: ReportStatus,
    pub direction: Direction,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Coarse classification of a [`RoverError`] for the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing or invalid parameter.
    Client,
    /// Unknown device or action.
    NotFound,
    /// The device is busy; retrying later may succeed.
    Conflict,
    /// Hardware or internal failure.
    Server,
}

/// Workspace-wide error type spanning input validation, hardware faults and
/// device contention.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoverError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Device busy: {0} is executing another command")]
    Busy(Device),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl RoverError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RoverError::InvalidInput(_) => ErrorClass::Client,
            RoverError::NotFound(_) => ErrorClass::NotFound,
            RoverError::Busy(_) => ErrorClass::Conflict,
            RoverError::HardwareFault { .. } | RoverError::Config(_) | RoverError::Io(_) => {
                ErrorClass::Server
            }
        }
    }

    /// Only contention is worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RoverError::Busy(_))
    }
}
