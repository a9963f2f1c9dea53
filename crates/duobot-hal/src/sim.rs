//! In-process simulation backend for headless runs and tests.
//!
//! Every simulated pin appends what it is asked to do to a shared [`SimLog`],
//! so a test can assert on the exact sequence of hardware writes across all
//! pins.  Sensors are scripted through handles returned by
//! [`SimHardware::build`], and any output can be made to fail on demand with
//! a [`FaultSwitch`].
//!
//! | Driver | Stub behaviour |
//! |---|---|
//! | [`SimPwm`] | Logs enable / duty / release; rejects duty writes while disabled. |
//! | [`SimOutput`] | Logs every level change. |
//! | [`SimInput`] | Returns the level set on its [`SimLevel`] handle. |
//! | [`SimEcho`] | Converts the scripted distance into an echo pulse width. |
//!
//! # Example
//!
//! ```rust
//! use duobot_hal::sim::SimHardware;
//!
//! let (ctx, handles) = SimHardware::new().with_distance(Some(120.0)).build();
//! let (_arm, _drive, _sensors) = ctx.split();
//! assert!(handles.log.events().is_empty());
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use duobot_types::SOUND_CM_PER_US;

use crate::HalError;
use crate::context::{ArmPins, BridgeSide, DrivePins, HardwareContext, RangePins, SensorPins};
use crate::gpio::{InputPin, Level, OutputPin, PulseInput, PwmOutput};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ────────────────────────────────────────────────────────────────────────────
// Event log
// ────────────────────────────────────────────────────────────────────────────

/// One recorded hardware write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    PwmEnabled { pin: String, frequency_hz: u32 },
    Duty { pin: String, duty: u16 },
    PwmReleased { pin: String },
    Level { pin: String, level: Level },
}

impl SimEvent {
    pub fn pin(&self) -> &str {
        match self {
            SimEvent::PwmEnabled { pin, .. }
            | SimEvent::Duty { pin, .. }
            | SimEvent::PwmReleased { pin }
            | SimEvent::Level { pin, .. } => pin,
        }
    }
}

/// Shared, append-only record of every simulated write.  Clones share the
/// same log.
#[derive(Debug, Clone, Default)]
pub struct SimLog {
    events: Arc<Mutex<Vec<SimEvent>>>,
}

impl SimLog {
    fn push(&self, event: SimEvent) {
        lock(&self.events).push(event);
    }

    pub fn events(&self) -> Vec<SimEvent> {
        lock(&self.events).clone()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    /// Duty values written to `pin`, in order.
    pub fn duties(&self, pin: &str) -> Vec<u16> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                SimEvent::Duty { pin: p, duty } if p == pin => Some(*duty),
                _ => None,
            })
            .collect()
    }

    /// Most recent level written to `pin`.
    pub fn last_level(&self, pin: &str) -> Option<Level> {
        lock(&self.events).iter().rev().find_map(|e| match e {
            SimEvent::Level { pin: p, level } if p == pin => Some(*level),
            _ => None,
        })
    }

    /// Most recent duty written to `pin`.
    pub fn last_duty(&self, pin: &str) -> Option<u16> {
        self.duties(pin).last().copied()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fault injection
// ────────────────────────────────────────────────────────────────────────────

/// Makes a simulated output fail after a number of successful writes.
///
/// Clones share the same counter.  A fresh switch never fails.
#[derive(Debug, Clone)]
pub struct FaultSwitch {
    remaining: Arc<AtomicI64>,
}

impl Default for FaultSwitch {
    fn default() -> Self {
        Self {
            remaining: Arc::new(AtomicI64::new(-1)),
        }
    }
}

impl FaultSwitch {
    /// Allow `writes` more successful writes, then fail every later one.
    pub fn fail_after(&self, writes: u32) {
        self.remaining.store(i64::from(writes), Ordering::SeqCst);
    }

    /// Stop failing.
    pub fn heal(&self) {
        self.remaining.store(-1, Ordering::SeqCst);
    }

    /// Consume one write; `false` when this write must fail.
    fn admit(&self) -> bool {
        let mut current = self.remaining.load(Ordering::SeqCst);
        loop {
            if current < 0 {
                return true;
            }
            if current == 0 {
                return false;
            }
            match self.remaining.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub outputs
// ────────────────────────────────────────────────────────────────────────────

/// Simulated PWM pin.
pub struct SimPwm {
    label: String,
    log: SimLog,
    fault: FaultSwitch,
    enabled: bool,
}

impl SimPwm {
    pub fn new(label: impl Into<String>, log: SimLog) -> Self {
        Self {
            label: label.into(),
            log,
            fault: FaultSwitch::default(),
            enabled: false,
        }
    }

    /// Fault switch governing this pin's duty writes.
    pub fn fault(&self) -> FaultSwitch {
        self.fault.clone()
    }
}

impl PwmOutput for SimPwm {
    fn label(&self) -> &str {
        &self.label
    }

    fn enable(&mut self, frequency_hz: u32) -> Result<(), HalError> {
        self.enabled = true;
        self.log.push(SimEvent::PwmEnabled {
            pin: self.label.clone(),
            frequency_hz,
        });
        Ok(())
    }

    fn set_duty(&mut self, duty: u16) -> Result<(), HalError> {
        if !self.enabled {
            return Err(HalError::Pwm {
                pin: self.label.clone(),
                details: "duty written while disabled".to_string(),
            });
        }
        if !self.fault.admit() {
            return Err(HalError::Pwm {
                pin: self.label.clone(),
                details: "injected fault".to_string(),
            });
        }
        self.log.push(SimEvent::Duty {
            pin: self.label.clone(),
            duty,
        });
        Ok(())
    }

    fn release(&mut self) -> Result<(), HalError> {
        self.enabled = false;
        self.log.push(SimEvent::PwmReleased {
            pin: self.label.clone(),
        });
        Ok(())
    }
}

/// Simulated digital output.
pub struct SimOutput {
    label: String,
    log: SimLog,
    fault: FaultSwitch,
}

impl SimOutput {
    pub fn new(label: impl Into<String>, log: SimLog) -> Self {
        Self {
            label: label.into(),
            log,
            fault: FaultSwitch::default(),
        }
    }

    pub fn fault(&self) -> FaultSwitch {
        self.fault.clone()
    }
}

impl OutputPin for SimOutput {
    fn label(&self) -> &str {
        &self.label
    }

    fn set_level(&mut self, level: Level) -> Result<(), HalError> {
        if !self.fault.admit() {
            return Err(HalError::Pin {
                pin: self.label.clone(),
                details: "injected fault".to_string(),
            });
        }
        self.log.push(SimEvent::Level {
            pin: self.label.clone(),
            level,
        });
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub inputs
// ────────────────────────────────────────────────────────────────────────────

/// Handle controlling what a [`SimInput`] reads.
#[derive(Debug, Clone)]
pub struct SimLevel {
    level: Arc<Mutex<Level>>,
}

impl SimLevel {
    pub fn new(level: Level) -> Self {
        Self {
            level: Arc::new(Mutex::new(level)),
        }
    }

    pub fn set(&self, level: Level) {
        *lock(&self.level) = level;
    }

    pub fn get(&self) -> Level {
        *lock(&self.level)
    }
}

/// Simulated digital input.
pub struct SimInput {
    label: String,
    level: SimLevel,
}

impl SimInput {
    pub fn new(label: impl Into<String>, level: SimLevel) -> Self {
        Self {
            label: label.into(),
            level,
        }
    }
}

impl InputPin for SimInput {
    fn label(&self) -> &str {
        &self.label
    }

    fn read(&mut self) -> Result<Level, HalError> {
        Ok(self.level.get())
    }
}

#[derive(Debug)]
struct RangeScript {
    steady: Option<f64>,
    queued: VecDeque<Option<f64>>,
}

/// Handle scripting the distances a [`SimEcho`] reports.
///
/// `None` means "no echo" (nothing in range).  Queued readings are consumed
/// one per measurement before falling back to the steady distance.
#[derive(Debug, Clone)]
pub struct SimRange {
    script: Arc<Mutex<RangeScript>>,
    polls: Arc<AtomicUsize>,
}

impl SimRange {
    pub fn new(steady: Option<f64>) -> Self {
        Self {
            script: Arc::new(Mutex::new(RangeScript {
                steady,
                queued: VecDeque::new(),
            })),
            polls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_distance(&self, cm: Option<f64>) {
        lock(&self.script).steady = cm;
    }

    pub fn push_reading(&self, cm: Option<f64>) {
        lock(&self.script).queued.push_back(cm);
    }

    /// Number of echo measurements taken so far.
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Option<f64> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut script = lock(&self.script);
        script.queued.pop_front().unwrap_or(script.steady)
    }
}

/// Simulated ultrasonic echo line.
pub struct SimEcho {
    label: String,
    range: SimRange,
}

impl SimEcho {
    pub fn new(label: impl Into<String>, range: SimRange) -> Self {
        Self {
            label: label.into(),
            range,
        }
    }
}

#[async_trait]
impl PulseInput for SimEcho {
    fn label(&self) -> &str {
        &self.label
    }

    async fn pulse_width(
        &mut self,
        _level: Level,
        timeout: Duration,
    ) -> Result<Option<Duration>, HalError> {
        let width = self.range.next().and_then(|cm| {
            let micros = cm * 2.0 / SOUND_CM_PER_US;
            (micros.is_finite() && micros >= 0.0).then(|| Duration::from_secs_f64(micros / 1e6))
        });
        Ok(width.filter(|w| *w <= timeout))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimHardware builder
// ────────────────────────────────────────────────────────────────────────────

/// Control handles for a simulated [`HardwareContext`].
pub struct SimHandles {
    pub log: SimLog,
    pub range: SimRange,
    pub ir: SimLevel,
    faults: HashMap<String, FaultSwitch>,
}

impl SimHandles {
    /// Fault switch of the output labelled `pin`.
    pub fn fault(&self, pin: &str) -> Option<&FaultSwitch> {
        self.faults.get(pin)
    }
}

/// Builder for a fully simulated [`HardwareContext`].
///
/// Pins are labelled by role: `shoulder`, `elbow`, `gripper`,
/// `right_in1`/`right_in2`/`right_enable`, `left_in1`/`left_in2`/`left_enable`,
/// `trigger`, `echo` and `ir`.
#[derive(Debug, Clone)]
pub struct SimHardware {
    distance_cm: Option<f64>,
    ir: Level,
}

impl Default for SimHardware {
    fn default() -> Self {
        Self {
            distance_cm: None,
            ir: Level::High,
        }
    }
}

impl SimHardware {
    /// No obstacle in range and the IR line idle (high).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_distance(mut self, cm: Option<f64>) -> Self {
        self.distance_cm = cm;
        self
    }

    pub fn with_ir(mut self, level: Level) -> Self {
        self.ir = level;
        self
    }

    pub fn build(self) -> (HardwareContext, SimHandles) {
        let log = SimLog::default();
        let range = SimRange::new(self.distance_cm);
        let ir = SimLevel::new(self.ir);
        let mut faults = HashMap::new();

        let mut pwm = |label: &str| -> Box<dyn PwmOutput> {
            let pin = SimPwm::new(label, log.clone());
            faults.insert(label.to_string(), pin.fault());
            Box::new(pin)
        };
        let arm = ArmPins {
            shoulder: pwm("shoulder"),
            elbow: pwm("elbow"),
            gripper: pwm("gripper"),
        };
        let right_enable = pwm("right_enable");
        let left_enable = pwm("left_enable");

        let mut output = |label: &str| -> Box<dyn OutputPin> {
            let pin = SimOutput::new(label, log.clone());
            faults.insert(label.to_string(), pin.fault());
            Box::new(pin)
        };
        let drive = DrivePins {
            right: BridgeSide {
                in1: output("right_in1"),
                in2: output("right_in2"),
                enable: right_enable,
            },
            left: BridgeSide {
                in1: output("left_in1"),
                in2: output("left_in2"),
                enable: left_enable,
            },
        };
        let trigger = output("trigger");

        let sensors = SensorPins {
            range: RangePins {
                trigger,
                echo: Box::new(SimEcho::new("echo", range.clone())),
            },
            ir: Box::new(SimInput::new("ir", ir.clone())),
        };

        (
            HardwareContext {
                arm,
                drive,
                sensors,
            },
            SimHandles {
                log,
                range,
                ir,
                faults,
            },
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_pwm_records_lifecycle() {
        let log = SimLog::default();
        let mut pwm = SimPwm::new("elbow", log.clone());
        pwm.enable(70).unwrap();
        pwm.set_duty(80).unwrap();
        pwm.release().unwrap();

        assert_eq!(log.duties("elbow"), vec![80]);
        assert_eq!(log.events().len(), 3);
        assert!(pwm.set_duty(90).is_err(), "released pin must reject duty writes");
    }

    #[test]
    fn fault_switch_fails_after_budget() {
        let log = SimLog::default();
        let mut pin = SimOutput::new("right_in1", log.clone());
        pin.fault().fail_after(2);
        assert!(pin.set_level(Level::High).is_ok());
        assert!(pin.set_level(Level::Low).is_ok());
        assert!(pin.set_level(Level::High).is_err());
        assert_eq!(log.last_level("right_in1"), Some(Level::Low));

        pin.fault().heal();
        assert!(pin.set_level(Level::High).is_ok());
    }

    #[test]
    fn sim_input_follows_handle() {
        let level = SimLevel::new(Level::High);
        let mut ir = SimInput::new("ir", level.clone());
        assert_eq!(ir.read().unwrap(), Level::High);
        level.set(Level::Low);
        assert_eq!(ir.read().unwrap(), Level::Low);
    }

    #[tokio::test]
    async fn sim_echo_scripted_readings() {
        let range = SimRange::new(Some(100.0));
        range.push_reading(None);
        let mut echo = SimEcho::new("echo", range.clone());
        let timeout = Duration::from_millis(30);

        assert_eq!(echo.pulse_width(Level::High, timeout).await.unwrap(), None);

        let width = echo.pulse_width(Level::High, timeout).await.unwrap().unwrap();
        let micros = width.as_secs_f64() * 1e6;
        assert!((micros - 100.0 * 2.0 / SOUND_CM_PER_US).abs() < 1e-3);
        assert_eq!(range.polls(), 2);
    }

    #[tokio::test]
    async fn sim_echo_beyond_timeout_is_none() {
        // 600 cm → ~35 ms round trip, past the 30 ms ceiling.
        let mut echo = SimEcho::new("echo", SimRange::new(Some(600.0)));
        let width = echo
            .pulse_width(Level::High, Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(width, None);
    }

    #[test]
    fn sim_hardware_exposes_fault_switches() {
        let (ctx, handles) = SimHardware::new().build();
        let (mut arm, _drive, _sensors) = ctx.split();

        handles.fault("shoulder").unwrap().fail_after(0);
        arm.shoulder.enable(60).unwrap();
        assert!(arm.shoulder.set_duty(40).is_err());
        assert!(handles.fault("no_such_pin").is_none());
    }
}
