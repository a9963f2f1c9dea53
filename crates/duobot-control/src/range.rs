//! [`RangeSensor`] – HC-SR04 style ultrasonic distance measurement.

use std::time::Duration;

use duobot_hal::gpio::spin_delay;
use duobot_hal::{Level, OutputPin, PulseInput, RangePins};
use duobot_types::{Distance, RoverError, SOUND_CM_PER_US};
use tracing::debug;

const TRIGGER_SETTLE: Duration = Duration::from_micros(2);
const TRIGGER_PULSE: Duration = Duration::from_micros(10);

/// Round-trip echo width to one-way distance in centimetres.
pub fn pulse_to_cm(width: Duration) -> f64 {
    width.as_secs_f64() * 1e6 * SOUND_CM_PER_US / 2.0
}

pub struct RangeSensor {
    trigger: Box<dyn OutputPin>,
    echo: Box<dyn PulseInput>,
    timeout: Duration,
}

impl RangeSensor {
    /// `timeout` bounds the echo wait; the stock value is 30 ms (about 5 m).
    pub fn new(pins: RangePins, timeout: Duration) -> Self {
        Self {
            trigger: pins.trigger,
            echo: pins.echo,
            timeout,
        }
    }

    /// Fire one ping and time the echo.
    ///
    /// A missing echo is [`Distance::Unknown`], not an error.
    ///
    /// # Errors
    ///
    /// [`RoverError::HardwareFault`] when the trigger or echo line fails.
    pub async fn measure_distance_cm(&mut self) -> Result<Distance, RoverError> {
        self.trigger.set_level(Level::Low)?;
        spin_delay(TRIGGER_SETTLE);
        self.trigger.set_level(Level::High)?;
        spin_delay(TRIGGER_PULSE);
        self.trigger.set_level(Level::Low)?;

        let distance = match self.echo.pulse_width(Level::High, self.timeout).await? {
            Some(width) => Distance::Cm(pulse_to_cm(width)),
            None => Distance::Unknown,
        };
        debug!(?distance, "range");
        Ok(distance)
    }
}
