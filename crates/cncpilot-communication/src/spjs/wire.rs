//! SPJS wire dialect: serial-port descriptors and the JSON frame shapes
//! exchanged over the WebSocket.
//!
//! Outbound plain commands are bare text frames (`list`,
//! `open <name> <baud> <algo>`); serial payloads travel as
//! `sendjson <json>` with the [`SendJson`] body. Inbound frames all share
//! one JSON object shape and are told apart by which fields are set.

use serde::{Deserialize, Serialize};

/// One USB serial device as reported by an SPJS `list` response.
///
/// Snapshots are immutable and replaced wholesale on every update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SerialPort {
    /// Device path, e.g. `/dev/ttyUSB0`.
    #[serde(rename = "Name")]
    pub name: String,
    /// Human-readable device description.
    #[serde(rename = "Friendly")]
    pub friendly: String,
    /// Whether SPJS currently holds the port open.
    #[serde(rename = "IsOpen")]
    pub is_open: bool,
    /// USB serial number, when the device reports one.
    #[serde(rename = "SerialNumber")]
    pub serial_number: String,
    /// USB vendor ID as a hex string.
    #[serde(rename = "UsbVid")]
    pub vid: String,
    /// USB product ID as a hex string.
    #[serde(rename = "UsbPid")]
    pub pid: String,
}

/// Predicate deciding whether a [`SerialPort`] belongs to a binding.
pub type SerialPortMatcher = Box<dyn Fn(&SerialPort) -> bool + Send + Sync>;

/// Matcher claiming devices by USB vendor and product ID.
pub fn vid_pid_matcher(vid: &str, pid: &str) -> SerialPortMatcher {
    let vid = vid.to_owned();
    let pid = pid.to_owned();
    Box::new(move |port| port.vid == vid && port.pid == pid)
}

/// Every inbound SPJS JSON frame, decoded permissively.
///
/// SPJS reuses one object shape for port lists, raw serial data, and
/// command acknowledgements; absent fields decode to their defaults and
/// the demultiplexer keys off which ones are populated.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InboundFrame {
    /// Port list (also sent as part of the hello message).
    #[serde(rename = "SerialPorts")]
    pub serial_ports: Option<Vec<SerialPort>>,
    /// Source port for raw data and per-command acknowledgements.
    #[serde(rename = "P")]
    pub port: String,
    /// Raw serial data from the device.
    #[serde(rename = "D")]
    pub data: String,
    /// Acknowledgement kind: `Open`, `Write`, `Complete`, `Error`,
    /// `WipedQueue` or `Close`. Empty for raw data frames.
    #[serde(rename = "Cmd")]
    pub cmd: String,
    /// Correlation ID of the acknowledged command, `<baseID>-<sequence>`.
    #[serde(rename = "Id")]
    pub id: String,
    /// Device error code accompanying `Cmd: "Error"`.
    #[serde(rename = "ErrorCode")]
    pub error_code: String,
    /// Port whose queue was discarded, for `WipedQueue` / `Close`.
    #[serde(rename = "Port")]
    pub queue_port: String,
}

/// Body of an outbound `sendjson` frame.
#[derive(Debug, Serialize)]
pub struct SendJson<'a> {
    /// Target port name.
    #[serde(rename = "P")]
    pub port: &'a str,
    /// Payloads submitted in one frame.
    #[serde(rename = "Data")]
    pub data: Vec<SendJsonData>,
}

/// One correlated serial payload inside a [`SendJson`] body.
#[derive(Debug, Serialize)]
pub struct SendJsonData {
    /// Bytes to write to the serial port.
    #[serde(rename = "D")]
    pub data: String,
    /// Correlation ID echoed back in acknowledgements.
    #[serde(rename = "Id")]
    pub id: String,
}
