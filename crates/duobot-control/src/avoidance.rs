//! Obstacle avoidance for the chassis.
//!
//! [`AvoidancePolicy`] is the pure per-cycle decision; [`AvoidanceLoop`] runs
//! the sense → decide → actuate → report cycle until it is cancelled, its
//! report receiver goes away, or the hardware fails.
//!
//! # Policy
//!
//! 1. IR triggered while the requested direction is backward → drive forward.
//! 2. Requested stop → speed 0.
//! 3. Any other non-backward direction, by distance:
//!    closer than `stop_distance_cm` → stop, then reverse (evasive);
//!    closer than `slow_distance_cm` → slow speed; otherwise cruise speed.
//!    An unknown distance (no echo) counts as far.
//! 4. Backward → reverse speed.
//!
//! The caller's requested speed caps the result.  Overrides persist: after
//! an IR override or an evasive reverse, later cycles start from the
//! overridden direction.

use duobot_hal::{InputPin, Level, SensorPins};
use duobot_types::config::AvoidanceConfig;
use duobot_types::{ChassisReport, Direction, DriveRequest, ReportStatus, RoverError, SensorReading};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::chassis::ChassisDriver;
use crate::range::RangeSensor;

// ────────────────────────────────────────────────────────────────────────────
// Policy
// ────────────────────────────────────────────────────────────────────────────

/// What a cycle did.  Informational only; nothing carries over between
/// cycles except the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maneuver {
    Running,
    Slowing,
    Reversing,
    Stopped,
}

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub direction: Direction,
    pub speed: u8,
    pub maneuver: Maneuver,
    /// The obstacle is too close: halt for the evasive delay before
    /// applying `direction`.
    pub evasive: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct AvoidancePolicy {
    config: AvoidanceConfig,
}

impl AvoidancePolicy {
    pub fn new(config: AvoidanceConfig) -> Self {
        Self { config }
    }

    /// The heading after the IR override: a rear obstacle turns a backward
    /// request into forward.
    pub fn heading(&self, requested: Direction, reading: SensorReading) -> Direction {
        if reading.ir_triggered && requested == Direction::Backward {
            Direction::Forward
        } else {
            requested
        }
    }

    pub fn decide(&self, requested: Direction, ceiling: u8, reading: SensorReading) -> Decision {
        let cfg = &self.config;
        let direction = self.heading(requested, reading);

        let (direction, speed, maneuver, evasive) = match direction {
            Direction::Stop => (direction, 0, Maneuver::Stopped, false),
            Direction::Backward => (direction, cfg.reverse_speed, Maneuver::Reversing, false),
            _ if reading.distance.is_closer_than(cfg.stop_distance_cm) => {
                (Direction::Backward, 0, Maneuver::Reversing, true)
            }
            _ if reading.distance.is_closer_than(cfg.slow_distance_cm) => {
                (direction, cfg.slow_speed, Maneuver::Slowing, false)
            }
            _ => (direction, cfg.cruise_speed, Maneuver::Running, false),
        };

        Decision {
            direction,
            speed: speed.min(ceiling),
            maneuver,
            evasive,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sensors
// ────────────────────────────────────────────────────────────────────────────

/// The ultrasonic ranger plus the rear IR obstacle module.
pub struct ObstacleSensors {
    range: RangeSensor,
    ir: Box<dyn InputPin>,
    ir_active_level: Level,
}

impl ObstacleSensors {
    pub fn new(pins: SensorPins, config: &AvoidanceConfig) -> Self {
        Self {
            range: RangeSensor::new(pins.range, config.echo_timeout()),
            ir: pins.ir,
            ir_active_level: if config.ir_active_low {
                Level::Low
            } else {
                Level::High
            },
        }
    }

    /// Take a fresh reading of both sensors.
    pub async fn read(&mut self) -> Result<SensorReading, RoverError> {
        let distance = self.range.measure_distance_cm().await?;
        let ir_triggered = self.ir.read()? == self.ir_active_level;
        Ok(SensorReading {
            distance,
            ir_triggered,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Loop
// ────────────────────────────────────────────────────────────────────────────

/// Why a loop returned normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The cancel signal fired (or its sender was dropped).
    Cancelled,
    /// Nobody is listening for reports any more.
    ReceiverClosed,
}

/// Owns the chassis and its sensors; at most one run at a time.
pub struct AvoidanceLoop {
    chassis: ChassisDriver,
    sensors: ObstacleSensors,
    policy: AvoidancePolicy,
    config: AvoidanceConfig,
}

impl AvoidanceLoop {
    pub fn new(chassis: ChassisDriver, sensors: ObstacleSensors, config: AvoidanceConfig) -> Self {
        Self {
            chassis,
            sensors,
            policy: AvoidancePolicy::new(config),
            config,
        }
    }

    pub fn chassis(&self) -> &ChassisDriver {
        &self.chassis
    }

    /// Force the chassis to a stop.
    pub fn stop(&mut self) -> Result<(), RoverError> {
        self.chassis.stop().map(|_| ())
    }

    /// Drive according to `request` until cancelled, the receiver of
    /// `reports` is dropped, or a hardware fault occurs.  The chassis is
    /// stopped before this returns, whatever the reason.
    pub async fn run(
        &mut self,
        request: DriveRequest,
        reports: mpsc::Sender<ChassisReport>,
        mut cancel: oneshot::Receiver<()>,
    ) -> Result<LoopExit, RoverError> {
        info!(direction = %request.direction, speed = request.speed, "avoidance loop started");
        let outcome = self.cycle(request, &reports, &mut cancel).await;

        let stopped = self.stop();
        match (&outcome, stopped) {
            (Ok(exit), Ok(())) => info!(?exit, "avoidance loop ended"),
            (Ok(_), Err(e)) => {
                warn!(error = %e, "forced stop failed");
                return Err(e);
            }
            (Err(e), Ok(())) => warn!(error = %e, "avoidance loop aborted"),
            (Err(e), Err(s)) => warn!(error = %e, stop_error = %s, "avoidance loop aborted, stop failed"),
        }
        outcome
    }

    async fn cycle(
        &mut self,
        request: DriveRequest,
        reports: &mpsc::Sender<ChassisReport>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<LoopExit, RoverError> {
        let mut direction = request.direction;
        loop {
            let reading = tokio::select! {
                biased;
                _ = &mut *cancel => return Ok(LoopExit::Cancelled),
                reading = self.sensors.read() => reading?,
            };

            let decision = self.policy.decide(direction, request.speed, reading);
            if decision.evasive {
                self.chassis.set_motion(self.policy.heading(direction, reading), 0)?;
                if let Some(exit) = Self::pause(self.config.evasive_delay(), reports, cancel).await {
                    return Ok(exit);
                }
            }
            self.chassis.set_motion(decision.direction, decision.speed)?;
            direction = decision.direction;

            debug!(
                distance = ?reading.distance,
                ir = reading.ir_triggered,
                direction = %decision.direction,
                speed = decision.speed,
                maneuver = ?decision.maneuver,
                "avoidance cycle"
            );

            let report = ChassisReport {
                distance: reading.distance.as_cm(),
                speed: decision.speed,
                status: ReportStatus::Running,
                direction: decision.direction,
            };
            tokio::select! {
                biased;
                _ = &mut *cancel => return Ok(LoopExit::Cancelled),
                sent = reports.send(report) => {
                    if sent.is_err() {
                        return Ok(LoopExit::ReceiverClosed);
                    }
                }
            }

            if let Some(exit) = Self::pause(self.config.cycle(), reports, cancel).await {
                return Ok(exit);
            }
        }
    }

    /// Sleep for `duration`, waking early on cancel or a closed receiver.
    async fn pause(
        duration: std::time::Duration,
        reports: &mpsc::Sender<ChassisReport>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Option<LoopExit> {
        tokio::select! {
            biased;
            _ = &mut *cancel => Some(LoopExit::Cancelled),
            _ = reports.closed() => Some(LoopExit::ReceiverClosed),
            _ = tokio::time::sleep(duration) => None,
        }
    }
}
