//! Raspberry Pi backend built on `rppal` (feature `rpi`).
//!
//! PWM uses rppal's software PWM, which is adequate for hobby servos and the
//! motor enable lines.  Servo pins are opened as I/O pins so that
//! [`PwmOutput::release`] can switch them back to a floating input.
//! Echo pulses are timed on the blocking thread pool so the polling loop never
//! stalls the async executor.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use duobot_types::config::{ArmConfig, BridgePinout, DrivePinout, SensorPinout};
use rppal::gpio::{self, Gpio, IoPin, Mode};

use crate::HalError;
use crate::context::{ArmPins, BridgeSide, DrivePins, HardwareContext, RangePins, SensorPins};
use crate::gpio::{DUTY_MAX, InputPin, Level, OutputPin, PulseInput, PwmOutput};

fn to_rppal(level: Level) -> gpio::Level {
    match level {
        Level::Low => gpio::Level::Low,
        Level::High => gpio::Level::High,
    }
}

fn pin_error(label: &str, err: impl std::fmt::Display) -> HalError {
    HalError::Pin {
        pin: label.to_string(),
        details: err.to_string(),
    }
}

fn pwm_error(label: &str, err: impl std::fmt::Display) -> HalError {
    HalError::Pwm {
        pin: label.to_string(),
        details: err.to_string(),
    }
}

/// Servo or motor-enable pin driven by software PWM.
pub struct RpiPwm {
    label: String,
    pin: IoPin,
    frequency_hz: f64,
}

impl PwmOutput for RpiPwm {
    fn label(&self) -> &str {
        &self.label
    }

    fn enable(&mut self, frequency_hz: u32) -> Result<(), HalError> {
        self.pin.set_mode(Mode::Output);
        self.frequency_hz = f64::from(frequency_hz);
        self.pin
            .set_pwm_frequency(self.frequency_hz, 0.0)
            .map_err(|e| pwm_error(&self.label, e))
    }

    fn set_duty(&mut self, duty: u16) -> Result<(), HalError> {
        let cycle = f64::from(duty.min(DUTY_MAX)) / f64::from(DUTY_MAX);
        self.pin
            .set_pwm_frequency(self.frequency_hz, cycle)
            .map_err(|e| pwm_error(&self.label, e))
    }

    fn release(&mut self) -> Result<(), HalError> {
        let cleared = self.pin.clear_pwm().map_err(|e| pwm_error(&self.label, e));
        self.pin.set_mode(Mode::Input);
        cleared
    }
}

/// Plain digital output.
pub struct RpiOutput {
    label: String,
    pin: gpio::OutputPin,
}

impl OutputPin for RpiOutput {
    fn label(&self) -> &str {
        &self.label
    }

    fn set_level(&mut self, level: Level) -> Result<(), HalError> {
        self.pin.write(to_rppal(level));
        Ok(())
    }
}

/// Plain digital input.
pub struct RpiInput {
    label: String,
    pin: gpio::InputPin,
}

impl InputPin for RpiInput {
    fn label(&self) -> &str {
        &self.label
    }

    fn read(&mut self) -> Result<Level, HalError> {
        Ok(Level::from_bool(self.pin.is_high()))
    }
}

/// Echo line timed by polling on the blocking pool.
pub struct RpiEcho {
    label: String,
    pin: Arc<Mutex<gpio::InputPin>>,
}

fn time_pulse(pin: &gpio::InputPin, level: gpio::Level, timeout: Duration) -> Option<Duration> {
    let deadline = Instant::now() + timeout;
    while pin.read() != level {
        if Instant::now() >= deadline {
            return None;
        }
    }
    let start = Instant::now();
    while pin.read() == level {
        if Instant::now() >= deadline {
            return None;
        }
    }
    Some(start.elapsed())
}

#[async_trait]
impl PulseInput for RpiEcho {
    fn label(&self) -> &str {
        &self.label
    }

    async fn pulse_width(
        &mut self,
        level: Level,
        timeout: Duration,
    ) -> Result<Option<Duration>, HalError> {
        let pin = Arc::clone(&self.pin);
        let target = to_rppal(level);
        tokio::task::spawn_blocking(move || {
            let pin = pin.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            time_pulse(&pin, target, timeout)
        })
        .await
        .map_err(|e| pin_error(&self.label, e))
    }
}

struct PinFactory {
    gpio: Gpio,
}

impl PinFactory {
    fn get(&self, label: &str, bcm: u8) -> Result<gpio::Pin, HalError> {
        self.gpio.get(bcm).map_err(|e| pin_error(label, e))
    }

    fn pwm(&self, label: &str, bcm: u8) -> Result<Box<dyn PwmOutput>, HalError> {
        Ok(Box::new(RpiPwm {
            label: label.to_string(),
            pin: self.get(label, bcm)?.into_io(Mode::Input),
            frequency_hz: 0.0,
        }))
    }

    fn output(&self, label: &str, bcm: u8) -> Result<Box<dyn OutputPin>, HalError> {
        Ok(Box::new(RpiOutput {
            label: label.to_string(),
            pin: self.get(label, bcm)?.into_output_low(),
        }))
    }

    fn bridge(&self, side: &str, pins: &BridgePinout) -> Result<BridgeSide, HalError> {
        Ok(BridgeSide {
            in1: self.output(&format!("{side}_in1"), pins.in1)?,
            in2: self.output(&format!("{side}_in2"), pins.in2)?,
            enable: self.pwm(&format!("{side}_enable"), pins.enable)?,
        })
    }
}

/// Open every pin named by the configuration.
///
/// # Errors
///
/// [`HalError::Backend`] when the GPIO peripheral cannot be opened, or
/// [`HalError::Pin`] for a pin that is unavailable.
pub fn build(
    arm: &ArmConfig,
    drive: &DrivePinout,
    sensors: &SensorPinout,
) -> Result<HardwareContext, HalError> {
    let factory = PinFactory {
        gpio: Gpio::new().map_err(|e| HalError::Backend(e.to_string()))?,
    };

    let arm_pins = ArmPins {
        shoulder: factory.pwm("shoulder", arm.shoulder.pin)?,
        elbow: factory.pwm("elbow", arm.elbow.pin)?,
        gripper: factory.pwm("gripper", arm.gripper.pin)?,
    };
    let drive_pins = DrivePins {
        right: factory.bridge("right", &drive.right)?,
        left: factory.bridge("left", &drive.left)?,
    };
    let sensor_pins = SensorPins {
        range: RangePins {
            trigger: factory.output("trigger", sensors.trigger)?,
            echo: Box::new(RpiEcho {
                label: "echo".to_string(),
                pin: Arc::new(Mutex::new(factory.get("echo", sensors.echo)?.into_input())),
            }),
        },
        ir: Box::new(RpiInput {
            label: "ir".to_string(),
            pin: factory.get("ir", sensors.ir)?.into_input(),
        }),
    };

    Ok(HardwareContext {
        arm: arm_pins,
        drive: drive_pins,
        sensors: sensor_pins,
    })
}
