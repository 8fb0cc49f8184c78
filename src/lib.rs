//! # cncpilot
//!
//! Host-side controller for a CNC milling machine reached through
//! Serial-Port-JSON-Server (SPJS), a local bridge daemon exposing USB
//! serial ports over one WebSocket.
//!
//! ## Architecture
//!
//! cncpilot is organized as a workspace:
//!
//! 1. **cncpilot-core** - shared types and the error taxonomy
//! 2. **cncpilot-communication** - SPJS transport, firmware drivers,
//!    controller facade, job streaming
//! 3. **cncpilot** - the binary wiring drivers to a running SPJS
//!
//! The binary claims two USB devices by vendor/product ID - a GRBL motion
//! controller and an Arduino jog pendant - streams commands to GRBL with
//! correlated acknowledgements, and reflects live machine status back
//! through the controller's status streams.

pub use cncpilot_communication::firmware::grbl::GrblDriver;
pub use cncpilot_communication::firmware::pendant::PendantDriver;
pub use cncpilot_communication::{vid_pid_matcher, Client, Controller, ControllerStatus, Driver};
pub use cncpilot_core::{Error, JobStatus, Position, Result};

/// Initialize logging for the process. `RUST_LOG` narrows the filter;
/// the default level is INFO.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let fmt_layer = fmt::layer().with_target(true).with_level(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
    Ok(())
}
