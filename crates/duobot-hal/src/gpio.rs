//! Pin traits implemented by every backend.
//!
//! Each pin has a stable `label` (e.g. `"shoulder"` or `"GPIO23"`) used in
//! fault messages and logs.  All traits are object safe so controllers can
//! hold `Box<dyn …>` regardless of the backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::HalError;

/// Full-scale duty value.  Duty cycles are expressed in 10-bit counts.
pub const DUTY_MAX: u16 = 1023;

/// Logic level of a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn from_bool(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

/// A push-pull digital output (H-bridge inputs, ultrasonic trigger).
pub trait OutputPin: Send {
    fn label(&self) -> &str;

    /// Drive the line to `level`.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::Pin`] if the backend rejects the write.
    fn set_level(&mut self, level: Level) -> Result<(), HalError>;
}

/// A digital input (IR obstacle module).
pub trait InputPin: Send {
    fn label(&self) -> &str;

    fn read(&mut self) -> Result<Level, HalError>;
}

/// A pin driven by a PWM peripheral.
///
/// Servo pins are engaged only while a move is in progress and released
/// afterwards; motor enable pins stay engaged for the process lifetime.
pub trait PwmOutput: Send {
    fn label(&self) -> &str;

    /// Start PWM on the pin at `frequency_hz` with a zero duty.
    fn enable(&mut self, frequency_hz: u32) -> Result<(), HalError>;

    /// Apply `duty` (`0..=DUTY_MAX`).  The pin must be enabled.
    fn set_duty(&mut self, duty: u16) -> Result<(), HalError>;

    /// Stop PWM and return the pin to a floating input.
    fn release(&mut self) -> Result<(), HalError>;
}

/// An input that can time a single pulse (ultrasonic echo).
#[async_trait]
pub trait PulseInput: Send {
    fn label(&self) -> &str;

    /// Wait for a pulse at `level` and return its width.
    ///
    /// `timeout` bounds the whole wait, both for the pulse to start and to
    /// end.  Returns `Ok(None)` when it expires; a timeout is a normal
    /// outcome, not an error.
    async fn pulse_width(
        &mut self,
        level: Level,
        timeout: Duration,
    ) -> Result<Option<Duration>, HalError>;
}

/// Busy-wait for `duration`.
///
/// Only for microsecond holds such as the ultrasonic trigger pulse, where a
/// timer-based sleep would overshoot by orders of magnitude.
pub fn spin_delay(duration: Duration) {
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}
