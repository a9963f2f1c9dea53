//! `duobot-hal` – pin-level hardware abstraction.
//!
//! Controllers never touch a GPIO library directly.  They own boxed trait
//! objects handed out by a [`HardwareContext`], so the same control code runs
//! against the in-process [`sim`] backend in tests and against real pins on
//! the robot.
//!
//! # Modules
//!
//! - [`gpio`] – the [`OutputPin`], [`InputPin`], [`PwmOutput`] and
//!   [`PulseInput`] traits every backend implements.
//! - [`servo`] – [`ServoDriver`][servo::ServoDriver]: maps an angle to a
//!   duty value and drives one servo pin.
//! - [`context`] – [`HardwareContext`]: the single owned bundle of every pin
//!   the robot uses, split into per-controller parts at startup.
//! - [`sim`] – recording stub pins with scripted sensors and fault
//!   injection, for headless runs and tests.
//! - `rpi` (feature `rpi`) – Raspberry Pi backend built on `rppal`.

use duobot_types::RoverError;
use thiserror::Error;

pub mod context;
pub mod gpio;
#[cfg(all(feature = "rpi", target_os = "linux"))]
pub mod rpi;
pub mod servo;
pub mod sim;

pub use context::{ArmPins, BridgeSide, DrivePins, HardwareContext, RangePins, SensorPins};
pub use gpio::{InputPin, Level, OutputPin, PulseInput, PwmOutput, DUTY_MAX};
pub use servo::{ServoDriver, angle_to_duty};

/// Failure reported by a pin driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HalError {
    #[error("pin {pin}: {details}")]
    Pin { pin: String, details: String },

    #[error("PWM on {pin}: {details}")]
    Pwm { pin: String, details: String },

    #[error("GPIO backend unavailable: {0}")]
    Backend(String),
}

impl HalError {
    /// Label of the pin that failed, or `"gpio"` for backend-level errors.
    pub fn component(&self) -> &str {
        match self {
            HalError::Pin { pin, .. } | HalError::Pwm { pin, .. } => pin,
            HalError::Backend(_) => "gpio",
        }
    }
}

impl From<HalError> for RoverError {
    fn from(err: HalError) -> Self {
        RoverError::HardwareFault {
            component: err.component().to_string(),
            details: err.to_string(),
        }
    }
}
