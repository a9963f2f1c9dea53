//! Tuning and pin-binding sections.
//!
//! Each struct maps onto one table of the binary's TOML configuration file
//! and carries the stock defaults, so an empty table (or a missing file)
//! reproduces the stock robot.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::JointId;

/// Servo duty calibration in 10-bit counts (`0..=1023`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyRange {
    pub min: u16,
    pub max: u16,
}

impl Default for DutyRange {
    fn default() -> Self {
        Self { min: 40, max: 115 }
    }
}

/// Pin binding and calibration of one servo joint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointConfig {
    pub pin: u8,
    pub frequency_hz: u32,
    /// Angle assumed at power-on, before the first move.
    #[serde(default)]
    pub initial_angle: f32,
    #[serde(default)]
    pub duty: DutyRange,
}

impl JointConfig {
    /// Stock binding for `joint`.
    pub fn stock(joint: JointId) -> Self {
        let (pin, frequency_hz) = match joint {
            JointId::Shoulder => (23, 60),
            JointId::Elbow => (22, 70),
            JointId::Gripper => (21, 30),
        };
        Self {
            pin,
            frequency_hz,
            duty: DutyRange::default(),
            initial_angle: 0.0,
        }
    }
}

/// What the dispatcher does with an arm command while a gesture runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Answer immediately with a retryable busy error.
    #[default]
    Reject,
    /// Wait for the running gesture to finish, then execute.
    Queue,
}

/// `[arm]` table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    pub busy_policy: BusyPolicy,
    pub shoulder: JointConfig,
    pub elbow: JointConfig,
    pub gripper: JointConfig,
}

impl ArmConfig {
    pub fn joint(&self, joint: JointId) -> &JointConfig {
        match joint {
            JointId::Shoulder => &self.shoulder,
            JointId::Elbow => &self.elbow,
            JointId::Gripper => &self.gripper,
        }
    }
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            shoulder: JointConfig::stock(JointId::Shoulder),
            elbow: JointConfig::stock(JointId::Elbow),
            gripper: JointConfig::stock(JointId::Gripper),
            busy_policy: BusyPolicy::default(),
        }
    }
}

/// `[motion]` table: joint interpolation timing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionTiming {
    /// Nominal angle change per interpolation step (degrees).
    pub step_degrees: f32,
    pub step_interval_ms: u64,
    /// Hold time at the target before the pin is released.
    pub settle_ms: u64,
}

impl MotionTiming {
    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for MotionTiming {
    fn default() -> Self {
        Self {
            step_degrees: 5.0,
            step_interval_ms: 20,
            settle_ms: 500,
        }
    }
}

/// `[avoidance]` table: obstacle policy thresholds and loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvoidanceConfig {
    /// Closer than this: stop and reverse (cm).
    pub stop_distance_cm: f64,
    /// Closer than this: slow down (cm).
    pub slow_distance_cm: f64,
    pub cruise_speed: u8,
    pub slow_speed: u8,
    pub reverse_speed: u8,
    pub evasive_delay_ms: u64,
    pub cycle_ms: u64,
    pub echo_timeout_ms: u64,
    /// The IR module pulls its output low when it sees an obstacle.
    pub ir_active_low: bool,
}

impl AvoidanceConfig {
    pub fn evasive_delay(&self) -> Duration {
        Duration::from_millis(self.evasive_delay_ms)
    }

    pub fn cycle(&self) -> Duration {
        Duration::from_millis(self.cycle_ms)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }
}

impl Default for AvoidanceConfig {
    fn default() -> Self {
        Self {
            stop_distance_cm: 50.0,
            slow_distance_cm: 100.0,
            cruise_speed: 100,
            slow_speed: 50,
            reverse_speed: 50,
            evasive_delay_ms: 50,
            cycle_ms: 100,
            echo_timeout_ms: 30,
            ir_active_low: true,
        }
    }
}

/// H-bridge pins of one wheel pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgePinout {
    pub in1: u8,
    pub in2: u8,
    pub enable: u8,
}

/// `[hardware.drive]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrivePinout {
    pub pwm_frequency_hz: u32,
    pub right: BridgePinout,
    pub left: BridgePinout,
}

impl Default for DrivePinout {
    fn default() -> Self {
        Self {
            right: BridgePinout {
                in1: 15,
                in2: 2,
                enable: 4,
            },
            left: BridgePinout {
                in1: 13,
                in2: 12,
                enable: 14,
            },
            pwm_frequency_hz: 1000,
        }
    }
}

/// `[hardware.sensors]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorPinout {
    pub trigger: u8,
    pub echo: u8,
    pub ir: u8,
}

impl Default for SensorPinout {
    fn default() -> Self {
        Self {
            trigger: 27,
            echo: 26,
            ir: 25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_joint_frequencies() {
        let arm = ArmConfig::default();
        assert_eq!(arm.joint(JointId::Shoulder).frequency_hz, 60);
        assert_eq!(arm.joint(JointId::Elbow).frequency_hz, 70);
        assert_eq!(arm.joint(JointId::Gripper).frequency_hz, 30);
        assert_eq!(arm.shoulder.duty, DutyRange { min: 40, max: 115 });
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let cfg: AvoidanceConfig = toml::from_str("stop_distance_cm = 30.0").unwrap();
        assert_eq!(cfg.stop_distance_cm, 30.0);
        assert_eq!(cfg.slow_distance_cm, 100.0);
        assert_eq!(cfg.cycle(), Duration::from_millis(100));
    }

    #[test]
    fn busy_policy_from_lowercase() {
        let cfg: ArmConfig = toml::from_str("busy_policy = \"queue\"").unwrap();
        assert_eq!(cfg.busy_policy, BusyPolicy::Queue);
        assert_eq!(cfg.elbow.pin, 22);
    }

    #[test]
    fn motion_timing_defaults() {
        let t = MotionTiming::default();
        assert_eq!(t.step_interval(), Duration::from_millis(20));
        assert_eq!(t.settle(), Duration::from_millis(500));
    }
}
