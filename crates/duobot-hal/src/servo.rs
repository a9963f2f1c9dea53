//! [`ServoDriver`] – angle-to-duty mapping for one hobby servo pin.
//!
//! A servo is only powered while it is being positioned: the driver
//! [`engage`][ServoDriver::engage]s PWM, writes one or more angles, then
//! [`release`][ServoDriver::release]s the pin back to a floating input so the
//! idle servo neither jitters nor draws holding current.
//!
//! # Example
//!
//! ```rust
//! use duobot_hal::servo::angle_to_duty;
//! use duobot_types::config::DutyRange;
//!
//! let range = DutyRange { min: 40, max: 115 };
//! assert_eq!(angle_to_duty(0.0, range), 40);
//! assert_eq!(angle_to_duty(180.0, range), 115);
//! ```

use std::time::Duration;

use duobot_types::MAX_ANGLE;
use duobot_types::config::DutyRange;
use tracing::{debug, warn};

use crate::HalError;
use crate::gpio::PwmOutput;

/// Linear map of `angle` (clamped to `[0, 180]`) onto `range`, rounded to
/// the nearest duty count.
pub fn angle_to_duty(angle: f32, range: DutyRange) -> u16 {
    let angle = if angle.is_nan() { 0.0 } else { angle.clamp(0.0, MAX_ANGLE) };
    let min = f32::from(range.min);
    let span = f32::from(range.max) - min;
    (min + (angle / MAX_ANGLE) * span).round() as u16
}

/// Drives one servo through a [`PwmOutput`].
///
/// The driver holds the pin's PWM peripheral exclusively; there is no way to
/// actuate the same pin from elsewhere while a `ServoDriver` owns it.
pub struct ServoDriver {
    pwm: Box<dyn PwmOutput>,
    duty: DutyRange,
    frequency_hz: u32,
    engaged: bool,
}

impl ServoDriver {
    pub fn new(pwm: Box<dyn PwmOutput>, duty: DutyRange, frequency_hz: u32) -> Self {
        Self {
            pwm,
            duty,
            frequency_hz,
            engaged: false,
        }
    }

    pub fn label(&self) -> &str {
        self.pwm.label()
    }

    pub fn duty_range(&self) -> DutyRange {
        self.duty
    }

    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    /// Enable PWM at the servo's frequency.  No-op when already engaged.
    pub fn engage(&mut self) -> Result<(), HalError> {
        if !self.engaged {
            self.pwm.enable(self.frequency_hz)?;
            self.engaged = true;
        }
        Ok(())
    }

    /// Command `angle` and return the duty that was written.
    ///
    /// # Errors
    ///
    /// [`HalError::Pwm`] when the servo is not engaged or the write fails.
    pub fn write_angle(&mut self, angle: f32) -> Result<u16, HalError> {
        if !self.engaged {
            return Err(HalError::Pwm {
                pin: self.pwm.label().to_string(),
                details: "write while PWM is disabled".to_string(),
            });
        }
        let duty = angle_to_duty(angle, self.duty);
        self.pwm.set_duty(duty)?;
        debug!(pin = self.pwm.label(), angle, duty, "servo duty");
        Ok(duty)
    }

    /// Disable PWM and float the pin.  Always marks the driver disengaged,
    /// even when the backend reports an error.
    pub fn release(&mut self) -> Result<(), HalError> {
        self.engaged = false;
        self.pwm.release()
    }

    /// One-shot positioning: engage, write `angle`, hold for `hold`, release.
    pub async fn set_angle(&mut self, angle: f32, hold: Duration) -> Result<u16, HalError> {
        self.sweep([angle], Duration::ZERO, hold).await
    }

    /// Engage, write each of `angles` with `interval` between writes, hold
    /// the last one for `hold`, then release.  Returns the last duty written.
    ///
    /// The pin is released on every path; a write failure is returned in
    /// preference to a subsequent release failure.
    pub async fn sweep(
        &mut self,
        angles: impl IntoIterator<Item = f32>,
        interval: Duration,
        hold: Duration,
    ) -> Result<u16, HalError> {
        let written = self.write_all(angles, interval).await;
        if written.is_ok() {
            tokio::time::sleep(hold).await;
        }
        let released = self.release();
        match (written, released) {
            (Err(e), released) => {
                if let Err(r) = released {
                    warn!(pin = self.pwm.label(), error = %r, "release after failed write");
                }
                Err(e)
            }
            (Ok(_), Err(r)) => Err(r),
            (Ok(duty), Ok(())) => Ok(duty),
        }
    }

    async fn write_all(
        &mut self,
        angles: impl IntoIterator<Item = f32>,
        interval: Duration,
    ) -> Result<u16, HalError> {
        self.engage()?;
        let mut last = None;
        for angle in angles {
            if last.is_some() {
                tokio::time::sleep(interval).await;
            }
            last = Some(self.write_angle(angle)?);
        }
        last.ok_or_else(|| HalError::Pwm {
            pin: self.pwm.label().to_string(),
            details: "no angle to write".to_string(),
        })
    }
}
