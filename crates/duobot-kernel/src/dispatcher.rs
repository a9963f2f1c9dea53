//! [`CommandDispatcher`] – routes commands to the arm and chassis.
//!
//! Each device has its own `tokio::sync::Mutex`, so arm and chassis run
//! independently while commands for the same device are serialized:
//!
//! - **Arm**: with [`BusyPolicy::Reject`] a command arriving while a gesture
//!   runs fails with a retryable [`RoverError::Busy`]; with
//!   [`BusyPolicy::Queue`] it waits its turn.  A gesture always runs to
//!   completion in its own task, even if the caller goes away.
//! - **Chassis**: a new command supersedes the running avoidance loop.  The
//!   old loop is cancelled and awaited (it stops the motors on the way out)
//!   before the new one starts.  Supersession holds its own lock, so racing
//!   chassis commands are applied one after the other.

use std::collections::HashMap;
use std::sync::Arc;

use duobot_control::{ArmController, AvoidanceLoop, ChassisDriver, LoopExit, ObstacleSensors};
use duobot_hal::HardwareContext;
use duobot_types::config::{ArmConfig, AvoidanceConfig, BusyPolicy, MotionTiming};
use duobot_types::{
    ArmSnapshot, ChassisReport, Command, Device, DriveRequest, Gesture, Request, RoverError,
};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Reports buffered per chassis session before the loop waits on the reader.
const REPORT_BUFFER: usize = 16;

// ────────────────────────────────────────────────────────────────────────────
// Outcomes
// ────────────────────────────────────────────────────────────────────────────

/// Result of a completed arm command.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmOutcome {
    pub gesture: Gesture,
    pub message: &'static str,
    pub snapshot: ArmSnapshot,
}

/// A running chassis command: its report stream and final result.
///
/// Dropping the session (or just its reports) ends the loop and stops the
/// chassis.
#[derive(Debug)]
pub struct DriveSession {
    pub command_id: Uuid,
    pub request: DriveRequest,
    reports: mpsc::Receiver<ChassisReport>,
    result: oneshot::Receiver<Result<LoopExit, RoverError>>,
}

impl DriveSession {
    /// Next cycle report, or `None` once the loop has ended.
    pub async fn next_report(&mut self) -> Option<ChassisReport> {
        self.reports.recv().await
    }

    /// Detach from the report stream and wait for the loop to end.
    pub async fn finish(self) -> Result<LoopExit, RoverError> {
        let Self {
            reports, result, ..
        } = self;
        drop(reports);
        result.await.unwrap_or_else(|_| {
            Err(RoverError::HardwareFault {
                component: "chassis".to_string(),
                details: "avoidance task ended without a result".to_string(),
            })
        })
    }
}

/// What [`CommandDispatcher::dispatch`] produced.
#[derive(Debug)]
pub enum Dispatched {
    Arm(ArmOutcome),
    Chassis(DriveSession),
}

struct ActiveDrive {
    command_id: Uuid,
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ActiveDrive {
    /// Cancel the loop and wait until it has stopped the chassis.
    async fn halt(self) {
        // The loop may already have ended on its own.
        let _ = self.cancel.send(());
        if let Err(e) = self.task.await {
            warn!(command = %self.command_id, error = %e, "avoidance task failed");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ────────────────────────────────────────────────────────────────────────────

pub struct CommandDispatcher {
    arm: Arc<Mutex<ArmController>>,
    arm_state: watch::Receiver<ArmSnapshot>,
    busy_policy: BusyPolicy,
    chassis: Arc<Mutex<AvoidanceLoop>>,
    active: Mutex<Option<ActiveDrive>>,
}

impl CommandDispatcher {
    pub fn new(arm: ArmController, chassis: AvoidanceLoop, busy_policy: BusyPolicy) -> Self {
        Self {
            arm_state: arm.subscribe(),
            arm: Arc::new(Mutex::new(arm)),
            busy_policy,
            chassis: Arc::new(Mutex::new(chassis)),
            active: Mutex::new(None),
        }
    }

    /// Build every controller from `hardware` and wrap them in a dispatcher.
    ///
    /// # Errors
    ///
    /// [`RoverError::HardwareFault`] if the chassis enable lines cannot be
    /// engaged.
    pub fn from_hardware(
        hardware: HardwareContext,
        arm: &ArmConfig,
        motion: MotionTiming,
        drive_pwm_hz: u32,
        avoidance: AvoidanceConfig,
    ) -> Result<Self, RoverError> {
        let (arm_pins, drive_pins, sensor_pins) = hardware.split();
        let arm_ctl = ArmController::new(arm_pins, arm, motion);
        let chassis = ChassisDriver::new(drive_pins, drive_pwm_hz)?;
        let sensors = ObstacleSensors::new(sensor_pins, &avoidance);
        Ok(Self::new(
            arm_ctl,
            AvoidanceLoop::new(chassis, sensors, avoidance),
            arm.busy_policy,
        ))
    }

    /// Latest completed arm snapshot.  Never waits on a running gesture.
    pub fn arm_state(&self) -> ArmSnapshot {
        *self.arm_state.borrow()
    }

    /// Parse `device` / `action` / `params` and dispatch the result.
    pub async fn dispatch_request(
        &self,
        device: &str,
        action: &str,
        params: &HashMap<String, String>,
    ) -> Result<Dispatched, RoverError> {
        let command = Command::parse(device, action, params)?;
        self.dispatch(command).await
    }

    /// Route a parsed command to its device.
    pub async fn dispatch(&self, command: Command) -> Result<Dispatched, RoverError> {
        let span = info_span!("command", id = %command.id, device = %command.device());
        match command.request {
            Request::Arm(gesture) => self
                .run_gesture(gesture)
                .instrument(span)
                .await
                .map(Dispatched::Arm),
            Request::Chassis(request) => self
                .start_drive(command.id, request, span.clone())
                .instrument(span)
                .await
                .map(Dispatched::Chassis),
        }
    }

    async fn run_gesture(&self, gesture: Gesture) -> Result<ArmOutcome, RoverError> {
        let mut arm = match self.busy_policy {
            BusyPolicy::Reject => Arc::clone(&self.arm).try_lock_owned().map_err(|_| {
                debug!(%gesture, "arm busy, rejecting");
                RoverError::Busy(Device::Arm)
            })?,
            BusyPolicy::Queue => Arc::clone(&self.arm).lock_owned().await,
        };

        let task = tokio::spawn(
            async move { arm.perform(gesture).await }.instrument(tracing::Span::current()),
        );
        let snapshot = task.await.map_err(|e| RoverError::HardwareFault {
            component: "arm".to_string(),
            details: format!("gesture task failed: {e}"),
        })??;

        info!(%gesture, ?snapshot, "gesture complete");
        Ok(ArmOutcome {
            gesture,
            message: gesture.message(),
            snapshot,
        })
    }

    async fn start_drive(
        &self,
        command_id: Uuid,
        request: DriveRequest,
        span: tracing::Span,
    ) -> Result<DriveSession, RoverError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!(superseded = %previous.command_id, "superseding chassis command");
            previous.halt().await;
        }

        let mut driver = Arc::clone(&self.chassis).lock_owned().await;
        let (report_tx, report_rx) = mpsc::channel(REPORT_BUFFER);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (result_tx, result_rx) = oneshot::channel();

        let task = tokio::spawn(
            async move {
                let outcome = driver.run(request, report_tx, cancel_rx).await;
                let _ = result_tx.send(outcome);
            }
            .instrument(span),
        );

        *active = Some(ActiveDrive {
            command_id,
            cancel: cancel_tx,
            task,
        });

        Ok(DriveSession {
            command_id,
            request,
            reports: report_rx,
            result: result_rx,
        })
    }

    /// Cancel any chassis command and force the chassis to a stop.
    pub async fn emergency_stop(&self) -> Result<(), RoverError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.halt().await;
        }
        let result = self.chassis.lock().await.stop();
        match &result {
            Ok(()) => info!("emergency stop"),
            Err(e) => warn!(error = %e, "emergency stop failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duobot_hal::Level;
    use duobot_hal::sim::{SimEvent, SimHandles, SimHardware};
    use duobot_types::{Direction, ErrorClass};
    use std::time::Duration;

    fn dispatcher_with(
        hw: SimHardware,
        policy: BusyPolicy,
    ) -> (Arc<CommandDispatcher>, SimHandles) {
        let (ctx, handles) = hw.build();
        let arm = ArmConfig {
            busy_policy: policy,
            ..ArmConfig::default()
        };
        let dispatcher = CommandDispatcher::from_hardware(
            ctx,
            &arm,
            MotionTiming::default(),
            1000,
            AvoidanceConfig::default(),
        )
        .unwrap();
        (Arc::new(dispatcher), handles)
    }

    fn dispatcher(policy: BusyPolicy) -> (Arc<CommandDispatcher>, SimHandles) {
        dispatcher_with(SimHardware::new().with_distance(Some(200.0)), policy)
    }

    fn drive(direction: Direction) -> Command {
        Command::new(Request::Chassis(DriveRequest {
            direction,
            speed: 100,
        }))
    }

    fn session(dispatched: Dispatched) -> DriveSession {
        match dispatched {
            Dispatched::Chassis(session) => session,
            Dispatched::Arm(outcome) => panic!("expected chassis session, got {outcome:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn arm_command_returns_message_and_state() {
        let (dispatcher, _) = dispatcher(BusyPolicy::Reject);
        let done = dispatcher
            .dispatch_request("arm", "move_shoulder_up", &HashMap::new())
            .await
            .unwrap();
        match done {
            Dispatched::Arm(outcome) => {
                assert_eq!(outcome.message, "Shoulder moved up");
                assert_eq!(outcome.snapshot.shoulder, 180.0);
            }
            Dispatched::Chassis(_) => panic!("expected arm outcome"),
        }
        assert_eq!(dispatcher.arm_state().shoulder, 180.0);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_requests_are_classified() {
        let (dispatcher, handles) = dispatcher(BusyPolicy::Reject);
        let none = HashMap::new();

        let err = dispatcher.dispatch_request("tank", "move", &none).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);

        let err = dispatcher.dispatch_request("arm", "wave", &none).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);

        let err = dispatcher.dispatch_request("chassis", "move", &none).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Client);

        let params = HashMap::from([
            ("direction".to_string(), "forward".to_string()),
            ("speed".to_string(), "150".to_string()),
        ]);
        let err = dispatcher.dispatch_request("chassis", "move", &params).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Client);

        // No servo was touched.
        assert!(
            handles
                .log
                .events()
                .iter()
                .all(|e| !["shoulder", "elbow", "gripper"].contains(&e.pin()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_arm_command_is_rejected_as_busy() {
        let (dispatcher, _) = dispatcher(BusyPolicy::Reject);

        let first = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                d.dispatch(Command::new(Request::Arm(Gesture::ArmExpand))).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = dispatcher
            .dispatch(Command::new(Request::Arm(Gesture::GripperOpen)))
            .await
            .unwrap_err();
        assert_eq!(err, RoverError::Busy(Device::Arm));
        assert!(err.is_retryable());

        assert!(first.await.unwrap().is_ok());
        assert!(
            dispatcher
                .dispatch(Command::new(Request::Arm(Gesture::GripperOpen)))
                .await
                .is_ok()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn queued_arm_commands_never_interleave() {
        let (dispatcher, handles) = dispatcher(BusyPolicy::Queue);

        let tasks: Vec<_> = [Gesture::ShoulderUp, Gesture::ElbowExpand, Gesture::GripperOpen]
            .into_iter()
            .map(|g| {
                let d = Arc::clone(&dispatcher);
                tokio::spawn(async move { d.dispatch(Command::new(Request::Arm(g))).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        // Each servo's events form one contiguous block.
        let servo_pins: Vec<String> = handles
            .log
            .events()
            .iter()
            .map(|e| e.pin().to_string())
            .filter(|p| ["shoulder", "elbow", "gripper"].contains(&p.as_str()))
            .collect();
        let mut blocks = servo_pins.clone();
        blocks.dedup();
        assert_eq!(blocks.len(), 3, "interleaved: {servo_pins:?}");

        let state = dispatcher.arm_state();
        assert_eq!((state.shoulder, state.elbow, state.gripper), (180.0, 180.0, 35.0));
    }

    #[tokio::test(start_paused = true)]
    async fn chassis_runs_while_arm_moves() {
        let (dispatcher, _) = dispatcher(BusyPolicy::Reject);
        let arm = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                d.dispatch(Command::new(Request::Arm(Gesture::ArmExpand))).await
            })
        };

        let mut drive = session(dispatcher.dispatch(drive(Direction::Forward)).await.unwrap());
        let report = drive.next_report().await.unwrap();
        assert_eq!(report.speed, 100);

        assert!(arm.await.unwrap().is_ok());
        drop(drive);
    }

    #[tokio::test(start_paused = true)]
    async fn new_chassis_command_supersedes_and_stops_first() {
        let (dispatcher, handles) = dispatcher(BusyPolicy::Reject);

        let mut first = session(dispatcher.dispatch(drive(Direction::Forward)).await.unwrap());
        assert_eq!(first.next_report().await.unwrap().direction, Direction::Forward);

        let mut second = session(dispatcher.dispatch(drive(Direction::Backward)).await.unwrap());
        assert_eq!(second.next_report().await.unwrap().direction, Direction::Backward);

        assert_eq!(first.finish().await.unwrap(), LoopExit::Cancelled);

        // Between the forward and backward directives the bridge was stopped.
        let events = handles.log.events();
        let forward = events
            .iter()
            .rposition(|e| {
                *e == SimEvent::Level {
                    pin: "right_in2".to_string(),
                    level: Level::High,
                }
            })
            .unwrap();
        let backward = events
            .iter()
            .position(|e| {
                *e == SimEvent::Level {
                    pin: "right_in1".to_string(),
                    level: Level::High,
                }
            })
            .unwrap();
        assert!(forward < backward);
        let stop = SimEvent::Duty {
            pin: "right_enable".to_string(),
            duty: 0,
        };
        assert!(events[forward..backward].contains(&stop));

        drop(second);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_session_stops_the_chassis() {
        let (dispatcher, handles) = dispatcher(BusyPolicy::Reject);
        let mut drive = session(dispatcher.dispatch(drive(Direction::Left)).await.unwrap());
        drive.next_report().await.unwrap();

        assert_eq!(drive.finish().await.unwrap(), LoopExit::ReceiverClosed);
        assert_eq!(handles.log.last_duty("left_enable"), Some(0));
        assert_eq!(handles.log.last_level("left_in1"), Some(Level::Low));
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_stop_cancels_the_loop() {
        let (dispatcher, handles) = dispatcher(BusyPolicy::Reject);
        let mut drive = session(dispatcher.dispatch(drive(Direction::Forward)).await.unwrap());
        drive.next_report().await.unwrap();

        dispatcher.emergency_stop().await.unwrap();
        assert_eq!(handles.log.last_duty("right_enable"), Some(0));
        assert!(drive.next_report().await.is_none());
        assert_eq!(drive.finish().await.unwrap(), LoopExit::Cancelled);

        // Idle emergency stop is harmless.
        dispatcher.emergency_stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn chassis_fault_is_reported_on_finish() {
        let (dispatcher, handles) = dispatcher(BusyPolicy::Reject);
        handles.fault("trigger").unwrap().fail_after(0);

        let mut drive = session(dispatcher.dispatch(drive(Direction::Forward)).await.unwrap());
        assert!(drive.next_report().await.is_none());
        let err = drive.finish().await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Server);
    }
}
