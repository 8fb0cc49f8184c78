//! Arduino jog-pendant driver.
//!
//! The pendant is read-only: it emits ASCII frames (`STOP`,
//! `STEP:axis,mult,count`) which this driver translates into controller
//! calls. It exposes no capabilities of its own.

use super::Driver;
use crate::controller::Controller;
use async_trait::async_trait;
use cncpilot_core::{Error, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A decoded pendant frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PendantRequest {
    /// Emergency stop.
    Stop,
    /// Relative jog of one axis.
    Step {
        /// Axis letter, `X`/`Y`/`Z`.
        axis: char,
        /// Signed distance in millimetres.
        mm: f64,
    },
}

/// Decode one pendant frame. Returns `Ok(None)` for frames addressed to
/// nobody (unknown axis index, unrelated chatter).
pub fn parse_frame(data: &str) -> Result<Option<PendantRequest>> {
    let data = data.trim();
    if data == "STOP" {
        return Ok(Some(PendantRequest::Stop));
    }
    let Some(fields) = data.strip_prefix("STEP:") else {
        return Ok(None);
    };

    let mut fields = fields.splitn(3, ',');
    let mut next = || -> Result<i64> {
        fields
            .next()
            .and_then(|field| field.trim().parse().ok())
            .ok_or_else(|| Error::ProtocolDecode(format!("pendant frame '{data}'")))
    };
    let axis_index = next()?;
    let mult = next()?;
    let mut step = next()?;

    let axis = match axis_index {
        1 => 'X',
        2 => 'Y',
        3 => {
            // the pendant's Z wheel runs opposite to machine Z
            step = -step;
            'Z'
        }
        _ => return Ok(None),
    };
    Ok(Some(PendantRequest::Step {
        axis,
        mm: step as f64 * mult as f64 / 100.0,
    }))
}

/// Relays pendant input to a [`Controller`].
pub struct PendantDriver {
    controller: Arc<Controller>,
}

impl PendantDriver {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl Driver for PendantDriver {
    fn name(&self) -> &str {
        "ArduinoPendant"
    }

    fn buffer_algorithm(&self) -> &str {
        "default"
    }

    fn baud_rate(&self) -> u32 {
        115200
    }

    async fn handle_data(&self, data: &str) -> Result<()> {
        match parse_frame(data)? {
            Some(PendantRequest::Stop) => self.controller.command_estop().await,
            Some(PendantRequest::Step { axis, mm }) => {
                self.controller
                    .command_jog(axis, mm, false, CancellationToken::new())
                    .await
            }
            None => Ok(()),
        }
    }
}
