//! Serial-Port-JSON-Server transport: the WebSocket client, per-device
//! send pipelines, command correlation, and the wire dialect.

mod client;
mod port;
mod registry;
mod wire;

pub use client::Client;
pub use port::PortBinding;
pub use registry::{CommandHandle, CommandId};
pub use wire::{vid_pid_matcher, InboundFrame, SendJson, SendJsonData, SerialPort, SerialPortMatcher};
