//! Error handling for cncpilot
//!
//! One taxonomy covers the whole command path: transport faults surface as
//! per-command errors through the correlation registry, never directly to
//! the user. All variants are `Clone` because a command error is latched
//! into `JobStatus` and observed by any number of status consumers.

use thiserror::Error;

/// Errors produced by the SPJS transport, the per-port send pipeline, the
/// controller facade, and the job streamer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No serial port currently matches the binding's matcher. Recovers
    /// once a port list containing a match arrives.
    #[error("port not available")]
    PortNotAvailable,

    /// The matched port's name changed underneath a pending batch; the
    /// pending entries were abandoned and the caller should retry.
    #[error("port changed")]
    PortChanged,

    /// The driver does not implement the requested capability. Permanent.
    #[error("unsupported by driver")]
    UnsupportedByDriver,

    /// The WebSocket to SPJS dropped; every in-flight command resolves
    /// with this error on reconnect.
    #[error("network reset")]
    NetworkReset,

    /// SPJS reported `WipedQueue` or `Close` for the port; all queued work
    /// for the port was discarded.
    #[error("port reset")]
    PortReset,

    /// SPJS reported `Error` for the command, with the device's error code
    /// passed through verbatim.
    #[error("device error: {0}")]
    Device(String),

    /// Malformed data on the wire (SPJS frame, status report, or pendant
    /// frame). Logged and dropped; never fatal.
    #[error("protocol decode: {0}")]
    ProtocolDecode(String),

    /// Writing to SPJS failed after the one transparent reconnect-and-retry.
    #[error("transport: {0}")]
    Transport(String),

    /// `start_job` was called with no job installed.
    #[error("no loaded job")]
    NoLoadedJob,

    /// `start_job` was called while the installed job is already active.
    #[error("job already started")]
    JobAlreadyStarted,

    /// Reading the job input failed.
    #[error("job read: {0}")]
    JobRead(String),
}

/// Result alias used across the cncpilot crates.
pub type Result<T> = std::result::Result<T, Error>;
