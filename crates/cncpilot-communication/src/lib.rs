//! # cncpilot Communication
//!
//! The SPJS transport (WebSocket client, port discovery, command
//! correlation), firmware drivers for the devices behind SPJS ports, the
//! controller facade, and G-code job streaming.

pub mod controller;
pub mod firmware;
mod job;
pub mod spjs;

pub use controller::Controller;
pub use firmware::{ControllerStatus, Driver};
pub use spjs::{vid_pid_matcher, Client, PortBinding, SerialPort, SerialPortMatcher};
