//! [`ArmController`] – named gestures over the shoulder, elbow and gripper.
//!
//! Gestures run their single-joint moves strictly in order.  The arm's
//! angles are published on a [`tokio::sync::watch`] channel that is updated
//! only after a joint move completes, so a reader never sees a move in
//! progress and never has to wait for one.

use duobot_hal::ArmPins;
use duobot_types::config::{ArmConfig, MotionTiming};
use duobot_types::{ArmSnapshot, Gesture, JointId, RoverError};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::joint::{Joint, JointController};

pub struct ArmController {
    shoulder: JointController,
    elbow: JointController,
    gripper: JointController,
    state: watch::Sender<ArmSnapshot>,
}

impl ArmController {
    pub fn new(pins: ArmPins, config: &ArmConfig, timing: MotionTiming) -> Self {
        let shoulder =
            JointController::new(JointId::Shoulder, pins.shoulder, &config.shoulder, timing);
        let elbow = JointController::new(JointId::Elbow, pins.elbow, &config.elbow, timing);
        let gripper = JointController::new(JointId::Gripper, pins.gripper, &config.gripper, timing);

        let (state, _) = watch::channel(ArmSnapshot {
            shoulder: shoulder.current_angle(),
            elbow: elbow.current_angle(),
            gripper: gripper.current_angle(),
        });

        let arm = Self {
            shoulder,
            elbow,
            gripper,
            state,
        };
        for joint in arm.joints() {
            debug!(
                joint = %joint.id,
                pin = %joint.pin,
                frequency_hz = joint.frequency_hz,
                angle = joint.current_angle,
                "joint bound"
            );
        }
        arm
    }

    fn joint_mut(&mut self, joint: JointId) -> &mut JointController {
        match joint {
            JointId::Shoulder => &mut self.shoulder,
            JointId::Elbow => &mut self.elbow,
            JointId::Gripper => &mut self.gripper,
        }
    }

    /// Run `gesture` and return the resulting snapshot.
    ///
    /// On a hardware fault the remaining sub-moves are skipped.  Joints that
    /// already finished keep their new angle; the failing joint keeps its
    /// previous one.
    pub async fn perform(&mut self, gesture: Gesture) -> Result<ArmSnapshot, RoverError> {
        info!(%gesture, "arm gesture");
        for &(joint, angle) in gesture.moves() {
            let reached = self.joint_mut(joint).move_to(angle).await?;
            self.state.send_modify(|snapshot| snapshot.set(joint, reached));
        }
        Ok(self.snapshot())
    }

    /// Resolve `action` and run it.
    ///
    /// # Errors
    ///
    /// [`RoverError::NotFound`] for an unknown action, without moving
    /// anything.
    pub async fn perform_action(&mut self, action: &str) -> Result<ArmSnapshot, RoverError> {
        let gesture = Gesture::from_action(action)
            .ok_or_else(|| RoverError::NotFound(format!("unknown arm action '{action}'")))?;
        self.perform(gesture).await
    }

    /// Angles after the last completed move of each joint.
    pub fn snapshot(&self) -> ArmSnapshot {
        *self.state.borrow()
    }

    /// A receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ArmSnapshot> {
        self.state.subscribe()
    }

    pub fn joints(&self) -> [Joint; 3] {
        [self.shoulder.joint(), self.elbow.joint(), self.gripper.joint()]
    }
}
