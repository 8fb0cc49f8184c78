//! Firmware drivers for the devices behind SPJS ports.
//!
//! A [`Driver`] describes how to talk to one kind of device: the SPJS
//! open parameters, how inbound serial data is handled, and which
//! controller capabilities it implements. Capabilities default to `None`
//! and the controller facade reports absent ones as
//! `Error::UnsupportedByDriver`; unsupported is a runtime value, not a
//! type error.

pub mod grbl;
pub mod pendant;

use async_trait::async_trait;
use cncpilot_core::{Position, Result};
use tokio::sync::watch;

/// Live machine status assembled from the controller's status reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerStatus {
    /// Raw status text, e.g. `Idle`, `Run`, `Hold:0`, `ALARM:1`.
    pub status: String,
    /// Machine position.
    pub mpos: Position,
    /// Work position, `mpos - wco`.
    pub wpos: Position,
    /// Work-coordinate offset. Reported intermittently; carried across
    /// reports.
    pub wco: Position,
    /// Current feed rate, units/min.
    pub feed: f64,
    /// Current spindle speed, RPM.
    pub spindle: f64,
    /// Input pin states, rebuilt on every report.
    pub pins: PinState,
    /// Feed/rapid/spindle override percentages.
    pub overrides: OverrideState,
    /// Spindle and coolant accessory states.
    pub accessory: AccessoryState,
}

impl ControllerStatus {
    /// True while the controller reports an alarm state.
    pub fn is_alarm(&self) -> bool {
        self.status.starts_with("ALARM")
    }

    /// True when the controller is idle and ready for commands.
    pub fn is_ready(&self) -> bool {
        self.status == "Idle"
    }
}

/// Input pin states from the `Pn:` status field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinState {
    /// X limit switch.
    pub x: bool,
    /// Y limit switch.
    pub y: bool,
    /// Z limit switch.
    pub z: bool,
    /// Probe input.
    pub probe: bool,
    /// Door switch.
    pub door: bool,
    /// Feed-hold input.
    pub hold: bool,
    /// Reset input.
    pub reset: bool,
    /// Cycle-start input.
    pub start: bool,
}

/// Override percentages from the `Ov:` status field.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OverrideState {
    /// Feed override.
    pub feed: f64,
    /// Rapid override.
    pub rapid: f64,
    /// Spindle override.
    pub spindle: f64,
}

/// Accessory states from the `A:` status field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessoryState {
    /// Spindle running (either direction).
    pub spindle_on: bool,
    /// Spindle running counter-clockwise.
    pub spindle_ccw: bool,
    /// Flood coolant on.
    pub flood: bool,
    /// Mist coolant on.
    pub mist: bool,
}

/// A logical device behind an SPJS serial port.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Driver name, for logs.
    fn name(&self) -> &str;

    /// SPJS flow-control mode string used when opening the port.
    fn buffer_algorithm(&self) -> &str;

    /// Serial baud rate used when opening the port.
    fn baud_rate(&self) -> u32;

    /// Process one chunk of raw serial data from the device. Errors are
    /// logged by the transport and never tear down the connection.
    async fn handle_data(&self, data: &str) -> Result<()>;

    /// Join program lines into one on-wire payload. Probe with an empty
    /// slice to test for the capability.
    fn wrap_gcode(&self, _lines: &[String]) -> Option<String> {
        None
    }

    /// Byte sequence for the homing cycle.
    fn home_command(&self) -> Option<String> {
        None
    }

    /// Byte sequence for feed hold.
    fn feed_hold_command(&self) -> Option<String> {
        None
    }

    /// Byte sequence for cycle start / resume.
    fn cycle_start_command(&self) -> Option<String> {
        None
    }

    /// Byte sequence for a controller reset.
    fn reset_command(&self) -> Option<String> {
        None
    }

    /// Byte sequence for an emergency stop.
    fn estop_command(&self) -> Option<String> {
        None
    }

    /// Byte sequence jogging `axis` by `mm` millimetres, relative.
    fn jog_command(&self, _axis: char, _mm: f64) -> Option<String> {
        None
    }

    /// Byte sequence setting the work coordinate of `axis` to `mm`.
    fn wpos_command(&self, _axis: char, _mm: f64) -> Option<String> {
        None
    }

    /// Stream of parsed status snapshots, if the device reports status.
    /// Single-slot: a slow consumer sees only the newest value.
    fn status_stream(&self) -> Option<watch::Receiver<ControllerStatus>> {
        None
    }
}
