//! [`Command`] – a validated request for one device.
//!
//! The transport layer hands over three strings (device, action) and a
//! parameter map.  [`Command::parse`] resolves them into a typed [`Request`]
//! or a classified [`RoverError`] without touching any hardware:
//!
//! | Input problem | Error |
//! |---|---|
//! | unknown device or action | [`RoverError::NotFound`] |
//! | missing / malformed parameter | [`RoverError::InvalidInput`] |

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Device, Direction, Gesture, MAX_SPEED, RoverError};

/// Chassis `move` parameters.
///
/// `speed` is the caller's ceiling; the avoidance loop may lower it on every
/// cycle but never raises it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveRequest {
    pub direction: Direction,
    pub speed: u8,
}

/// What a command asks a device to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "device", content = "request", rename_all = "lowercase")]
pub enum Request {
    Arm(Gesture),
    Chassis(DriveRequest),
}

/// An immutable, parsed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub request: Request,
}

impl Command {
    /// Wrap an already-typed request.
    pub fn new(request: Request) -> Self {
        Self {
            id: Uuid::new_v4(),
            received_at: Utc::now(),
            request,
        }
    }

    /// Parse `device` / `action` / `params` into a command.
    ///
    /// # Errors
    ///
    /// - [`RoverError::NotFound`] for an unknown device or action.
    /// - [`RoverError::InvalidInput`] for a missing `direction`, an unknown
    ///   direction, or a `speed` that is not an integer in `0..=100`.
    pub fn parse(
        device: &str,
        action: &str,
        params: &HashMap<String, String>,
    ) -> Result<Self, RoverError> {
        let request = match device.parse::<Device>()? {
            Device::Arm => {
                let gesture = Gesture::from_action(action).ok_or_else(|| {
                    RoverError::NotFound(format!("unknown arm action '{action}'"))
                })?;
                Request::Arm(gesture)
            }
            Device::Chassis => {
                if action != "move" {
                    return Err(RoverError::NotFound(format!(
                        "unknown chassis action '{action}'"
                    )));
                }
                Request::Chassis(parse_drive(params)?)
            }
        };
        Ok(Self::new(request))
    }

    pub fn device(&self) -> Device {
        match self.request {
            Request::Arm(_) => Device::Arm,
            Request::Chassis(_) => Device::Chassis,
        }
    }
}

fn parse_drive(params: &HashMap<String, String>) -> Result<DriveRequest, RoverError> {
    let direction = params
        .get("direction")
        .filter(|d| !d.is_empty())
        .ok_or_else(|| RoverError::InvalidInput("missing 'direction' parameter".to_string()))?
        .parse::<Direction>()?;

    let speed = match params.get("speed").filter(|s| !s.is_empty()) {
        None => MAX_SPEED,
        Some(raw) => raw
            .parse::<u8>()
            .ok()
            .filter(|s| *s <= MAX_SPEED)
            .ok_or_else(|| {
                RoverError::InvalidInput(format!("speed must be an integer in 0..=100 (got '{raw}')"))
            })?,
    };

    Ok(DriveRequest { direction, speed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorClass;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_arm_gesture() {
        let cmd = Command::parse("arm", "expand_arm", &HashMap::new()).unwrap();
        assert_eq!(cmd.request, Request::Arm(Gesture::ArmExpand));
        assert_eq!(cmd.device(), Device::Arm);
    }

    #[test]
    fn unknown_arm_action_is_not_found() {
        let err = Command::parse("arm", "wave", &HashMap::new()).unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[test]
    fn parses_chassis_move_with_default_speed() {
        let cmd = Command::parse("chassis", "move", &params(&[("direction", "forward")])).unwrap();
        assert_eq!(
            cmd.request,
            Request::Chassis(DriveRequest {
                direction: Direction::Forward,
                speed: 100
            })
        );
    }

    #[test]
    fn chassis_speed_is_validated() {
        let cmd = Command::parse(
            "chassis",
            "move",
            &params(&[("direction", "left"), ("speed", "60")]),
        )
        .unwrap();
        assert_eq!(
            cmd.request,
            Request::Chassis(DriveRequest {
                direction: Direction::Left,
                speed: 60
            })
        );

        for bad in ["101", "-1", "fast"] {
            let err = Command::parse(
                "chassis",
                "move",
                &params(&[("direction", "left"), ("speed", bad)]),
            )
            .unwrap_err();
            assert_eq!(err.class(), ErrorClass::Client, "speed '{bad}'");
        }
    }

    #[test]
    fn missing_direction_is_client_error() {
        let err = Command::parse("chassis", "move", &params(&[("speed", "50")])).unwrap_err();
        assert!(matches!(err, RoverError::InvalidInput(_)));

        let err = Command::parse("chassis", "move", &params(&[("direction", "")])).unwrap_err();
        assert!(matches!(err, RoverError::InvalidInput(_)));
    }

    #[test]
    fn unknown_chassis_action_and_device_are_not_found() {
        let err = Command::parse("chassis", "fly", &HashMap::new()).unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);

        let err = Command::parse("turret", "move", &HashMap::new()).unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[test]
    fn each_command_gets_a_fresh_id() {
        let a = Command::new(Request::Arm(Gesture::GripperOpen));
        let b = Command::new(Request::Arm(Gesture::GripperOpen));
        assert_ne!(a.id, b.id);
    }
}
