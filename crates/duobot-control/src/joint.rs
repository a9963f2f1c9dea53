//! [`JointController`] – stepped, smooth positioning of one servo joint.
//!
//! A move from `start` to `target` is split into
//! `N = max(round(|target - start| / step), 1)` steps.  Step `k` commands
//! `start + (target - start) * k / N`, so the final step lands exactly on the
//! target.  The servo's PWM is engaged for the whole move, held for the
//! settle time at the target, and released on every exit path.

use duobot_hal::{PwmOutput, ServoDriver};
use duobot_types::config::{DutyRange, JointConfig, MotionTiming};
use duobot_types::{JointId, MAX_ANGLE, RoverError};
use tracing::{debug, error};

/// Number of interpolation steps for a move of `delta` degrees.
///
/// Never zero: a zero-length move still issues one write at the target.
pub fn step_count(delta: f32, step_degrees: f32) -> u32 {
    let steps = (delta.abs() / step_degrees).round();
    if steps.is_finite() && steps >= 1.0 {
        steps as u32
    } else {
        1
    }
}

/// The angles commanded by a move, one per step, ending on `target`.
pub fn interpolate(start: f32, target: f32, steps: u32) -> impl Iterator<Item = f32> {
    let steps = steps.max(1);
    let delta = target - start;
    (1..=steps).map(move |k| {
        if k == steps {
            target
        } else {
            start + delta * k as f32 / steps as f32
        }
    })
}

/// Read-only view of one joint.
#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    pub id: JointId,
    pub pin: String,
    pub current_angle: f32,
    pub duty: DutyRange,
    pub frequency_hz: u32,
}

/// Sole writer of one joint's angle.
pub struct JointController {
    id: JointId,
    servo: ServoDriver,
    current_angle: f32,
    timing: MotionTiming,
}

impl JointController {
    pub fn new(
        id: JointId,
        pwm: Box<dyn PwmOutput>,
        config: &JointConfig,
        timing: MotionTiming,
    ) -> Self {
        Self {
            id,
            servo: ServoDriver::new(pwm, config.duty, config.frequency_hz),
            current_angle: config.initial_angle.clamp(0.0, MAX_ANGLE),
            timing,
        }
    }

    pub fn id(&self) -> JointId {
        self.id
    }

    /// Angle reached by the last successful move.
    pub fn current_angle(&self) -> f32 {
        self.current_angle
    }

    pub fn joint(&self) -> Joint {
        Joint {
            id: self.id,
            pin: self.servo.label().to_string(),
            current_angle: self.current_angle,
            duty: self.servo.duty_range(),
            frequency_hz: self.servo.frequency_hz(),
        }
    }

    /// Move smoothly to `target` degrees and return the new angle.
    ///
    /// # Errors
    ///
    /// - [`RoverError::InvalidInput`] if `target` is not in `[0, 180]`.  No
    ///   pin is touched.
    /// - [`RoverError::HardwareFault`] if a PWM write fails.  The pin is
    ///   still released and `current_angle` keeps its previous value.
    pub async fn move_to(&mut self, target: f32) -> Result<f32, RoverError> {
        if !target.is_finite() || !(0.0..=MAX_ANGLE).contains(&target) {
            return Err(RoverError::InvalidInput(format!(
                "{} angle {target} outside 0..=180",
                self.id
            )));
        }

        let start = self.current_angle;
        let steps = step_count(target - start, self.timing.step_degrees);
        debug!(joint = %self.id, start, target, steps, "joint move");

        let timing = self.timing;
        let driven = if steps == 1 {
            self.servo.set_angle(target, timing.settle()).await
        } else {
            let path = interpolate(start, target, steps);
            self.servo.sweep(path, timing.step_interval(), timing.settle()).await
        };

        match driven {
            Ok(duty) => {
                debug!(joint = %self.id, target, duty, "joint settled");
                self.current_angle = target;
                Ok(target)
            }
            Err(e) => {
                error!(joint = %self.id, error = %e, "joint move failed");
                Err(e.into())
            }
        }
    }
}
