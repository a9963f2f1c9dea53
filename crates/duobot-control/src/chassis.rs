//! [`ChassisDriver`] – dual H-bridge motion control.
//!
//! Each wheel pair has two direction inputs and a PWM enable line.  The
//! enable lines stay engaged for the driver's lifetime; speed is applied as
//! the same duty on both of them.
//!
//! | direction | right (in1, in2) | left (in1, in2) |
//! |---|---|---|
//! | forward | (off, on) | (off, on) |
//! | backward | (on, off) | (on, off) |
//! | left | (off, on) | (on, off) |
//! | right | (on, off) | (off, on) |
//! | stop | (off, off) | (off, off) |

use duobot_hal::{BridgeSide, DUTY_MAX, DrivePins, HalError, Level};
use duobot_types::{ChassisState, Direction, MAX_SPEED, RoverError};
use tracing::{debug, warn};

type Pair = (Level, Level);

const OFF_ON: Pair = (Level::Low, Level::High);
const ON_OFF: Pair = (Level::High, Level::Low);
const OFF_OFF: Pair = (Level::Low, Level::Low);

/// `(right, left)` bridge input levels for `direction`.
pub fn bridge_levels(direction: Direction) -> (Pair, Pair) {
    match direction {
        Direction::Forward => (OFF_ON, OFF_ON),
        Direction::Backward => (ON_OFF, ON_OFF),
        Direction::Left => (OFF_ON, ON_OFF),
        Direction::Right => (ON_OFF, OFF_ON),
        Direction::Stop => (OFF_OFF, OFF_OFF),
    }
}

/// Percent speed (`0..=100`) to enable-line duty.
pub fn speed_to_duty(speed: u8) -> u16 {
    let speed = u32::from(speed.min(MAX_SPEED));
    (speed * u32::from(DUTY_MAX) / u32::from(MAX_SPEED)) as u16
}

pub struct ChassisDriver {
    right: BridgeSide,
    left: BridgeSide,
    state: ChassisState,
}

impl ChassisDriver {
    /// Engage both enable lines at `pwm_frequency_hz` and de-energize the
    /// bridges.
    pub fn new(pins: DrivePins, pwm_frequency_hz: u32) -> Result<Self, RoverError> {
        let mut driver = Self {
            right: pins.right,
            left: pins.left,
            state: ChassisState::default(),
        };
        driver.right.enable.enable(pwm_frequency_hz)?;
        driver.left.enable.enable(pwm_frequency_hz)?;
        driver.set_motion(Direction::Stop, 0)?;
        Ok(driver)
    }

    /// Last successfully applied motion.
    pub fn state(&self) -> ChassisState {
        self.state
    }

    /// Drive the bridges for `direction` at `speed` percent.
    ///
    /// `Stop` always de-energizes the bridges and records speed 0.  Every pin
    /// is written even if an earlier write fails; the state is updated only
    /// when all writes succeeded.
    ///
    /// # Errors
    ///
    /// - [`RoverError::InvalidInput`] for a speed above 100.
    /// - [`RoverError::HardwareFault`] for the first failing pin.
    pub fn set_motion(&mut self, direction: Direction, speed: u8) -> Result<ChassisState, RoverError> {
        if speed > MAX_SPEED {
            return Err(RoverError::InvalidInput(format!(
                "speed {speed} outside 0..=100"
            )));
        }
        let speed = if direction == Direction::Stop { 0 } else { speed };
        let (right, left) = bridge_levels(direction);
        let duty = speed_to_duty(speed);

        let results = [
            Self::apply(&mut self.right, right, duty),
            Self::apply(&mut self.left, left, duty),
        ];
        if let Some(err) = results.into_iter().find_map(Result::err) {
            return Err(err.into());
        }

        self.state = ChassisState { direction, speed };
        debug!(%direction, speed, duty, "chassis motion");
        Ok(self.state)
    }

    /// De-energize both bridges.
    pub fn stop(&mut self) -> Result<ChassisState, RoverError> {
        self.set_motion(Direction::Stop, 0)
    }

    fn apply(side: &mut BridgeSide, (in1, in2): Pair, duty: u16) -> Result<(), HalError> {
        let writes = [
            side.in1.set_level(in1),
            side.in2.set_level(in2),
            side.enable.set_duty(duty),
        ];
        let mut first = None;
        for err in writes.into_iter().filter_map(Result::err) {
            if first.is_some() {
                warn!(error = %err, "additional bridge write failure");
            } else {
                first = Some(err);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
